//! Status vocabularies shared between the engine and its observers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// AI operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiOperation {
    /// Natural-language caption
    Describe,
    /// GPS / place recognition
    Locate,
}

impl AiOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiOperation::Describe => "describe",
            AiOperation::Locate => "locate",
        }
    }
}

impl fmt::Display for AiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiOperation {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "describe" => Ok(AiOperation::Describe),
            "locate" => Ok(AiOperation::Locate),
            other => Err(crate::Error::InvalidInput(format!(
                "Invalid operation: {} (expected describe or locate)",
                other
            ))),
        }
    }
}

/// Per-photo, per-operation processing status (persisted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    #[default]
    Untouched,
    Processing,
    Done,
    Error,
}

/// Asynchronous task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }
}

/// BatchRun state machine: `Idle → Running → (Completed | Stopped | Failed)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    #[default]
    Idle,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Completed | BatchState::Stopped | BatchState::Failed
        )
    }
}
