//! # Tagiato Common Library
//!
//! Shared code for the Tagiato enrichment crates including:
//! - GPS coordinates and timeline waypoints
//! - Event types (EnrichEvent enum) and the EventBus
//! - Configuration loading and the per-directory working layout
//! - Atomic JSON persistence
//! - Tracing initialisation

pub mod config;
pub mod error;
pub mod events;
pub mod geo;
pub mod logging;
pub mod persist;
pub mod status;

pub use error::{Error, Result};
pub use geo::{GpsCoordinates, Waypoint};
pub use status::{AiOperation, BatchState, ProcessingStatus, TaskStatus};
