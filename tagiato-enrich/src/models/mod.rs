//! Data models for the enrichment engine

pub mod ai_result;
pub mod batch;
pub mod photo;
pub mod task;

pub use ai_result::{AiResult, ConfidenceTier};
pub use batch::{BatchProgress, BatchRun, StateTransition};
pub use photo::{MatchedLocation, OperationState, Photo, PhotoEdit, ScannedPhoto};
pub use task::{TaskError, TaskErrorKind, TaskRecord};
