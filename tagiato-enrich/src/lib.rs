//! tagiato-enrich library interface
//!
//! Enrichment pipeline engine: timeline matching, AI backend gateway, batch
//! orchestration and resumable per-photo state.

pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{EnrichError, EnrichResult};
