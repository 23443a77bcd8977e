//! Asynchronous task records
//!
//! A TaskRecord identifies one outstanding or completed AI operation on one
//! photo. Once it reaches `done` or `error` it is immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tagiato_common::{AiOperation, TaskStatus};
use uuid::Uuid;

use crate::models::AiResult;

/// Error taxonomy surfaced on failed tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// Backend exceeded the hard timeout
    Timeout,
    /// Backend process could not be started at all
    SpawnFailed,
    /// Backend exited unsuccessfully
    BackendFailed,
    /// Output matched none of the JSON extraction strategies
    UnparseableResponse,
    /// No image could be prepared for the prompt
    ThumbnailUnavailable,
    PhotoNotFound,
    /// Same operation already processing on this photo
    AlreadyProcessing,
    Internal,
}

impl TaskErrorKind {
    /// Caller may reasonably retry (with backoff)
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskErrorKind::Timeout)
    }

    /// Aborts the whole BatchRun instead of one task
    pub fn is_fatal(&self) -> bool {
        matches!(self, TaskErrorKind::SpawnFailed)
    }
}

/// Structured per-task error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// One asynchronous photo × operation unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub filename: String,
    pub operation: AiOperation,
    /// Owning batch, `None` for single-photo requests
    pub batch_id: Option<Uuid>,
    pub status: TaskStatus,
    pub result: Option<AiResult>,
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(filename: impl Into<String>, operation: AiOperation, batch_id: Option<Uuid>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            filename: filename.into(),
            operation,
            batch_id,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
