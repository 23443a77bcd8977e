//! Event definitions and EventBus
//!
//! Progress of batch runs and individual AI tasks is published here so any
//! number of observers (UI layer, CLI progress line, tests) can follow along
//! without the engine knowing who listens.

use crate::status::{AiOperation, BatchState, ProcessingStatus, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Enrichment event types
///
/// Progress events carry counts, never worklist positions: completion order is
/// unordered under concurrent workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EnrichEvent {
    /// A BatchRun transitioned to Running
    BatchStarted {
        batch_id: Uuid,
        operation: AiOperation,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// A task inside a BatchRun finished
    BatchProgress {
        batch_id: Uuid,
        total: usize,
        completed: usize,
        errored: usize,
        in_flight: usize,
        /// Photo whose task just finished
        last_filename: String,
        timestamp: DateTime<Utc>,
    },

    /// A BatchRun reached a terminal state
    BatchFinished {
        batch_id: Uuid,
        state: BatchState,
        completed: usize,
        errored: usize,
        /// Worklist entries never dispatched (stop or fatal failure)
        not_started: usize,
        timestamp: DateTime<Utc>,
    },

    /// A photo's operation status changed
    PhotoStatusChanged {
        filename: String,
        operation: AiOperation,
        status: ProcessingStatus,
        timestamp: DateTime<Utc>,
    },

    /// A task record reached a terminal status
    TaskFinished {
        task_id: Uuid,
        filename: String,
        operation: AiOperation,
        status: TaskStatus,
        timestamp: DateTime<Utc>,
    },

    /// State file written
    StateSaved {
        photo_count: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EnrichEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EnrichEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EnrichEvent,
    ) -> Result<usize, broadcast::error::SendError<EnrichEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EnrichEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
