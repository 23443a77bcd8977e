//! In-process registry of asynchronous AI tasks
//!
//! Records move `pending → running → done | error`. A terminal record is
//! frozen: later writes are ignored and logged.

use std::collections::HashMap;

use chrono::Utc;
use tagiato_common::{AiOperation, TaskStatus};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{AiResult, TaskError, TaskRecord};

/// Finished records retained by a default cleanup
pub const DEFAULT_KEEP_FINISHED: usize = 100;

#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending task
    pub async fn create(&self, filename: &str, operation: AiOperation, batch_id: Option<Uuid>) -> TaskRecord {
        let record = TaskRecord::new(filename, operation, batch_id);
        self.tasks.write().await.insert(record.task_id, record.clone());
        record
    }

    pub async fn mark_running(&self, task_id: Uuid) {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task_id) {
            Some(record) if record.status == TaskStatus::Pending => record.status = TaskStatus::Running,
            Some(record) => {
                tracing::debug!(task_id = %task_id, status = ?record.status, "Ignoring running mark")
            }
            None => tracing::warn!(task_id = %task_id, "Unknown task marked running"),
        }
    }

    /// Move a task to its terminal status
    ///
    /// Returns the frozen record, or `None` if the task is unknown or was
    /// already terminal.
    pub async fn finish(&self, task_id: Uuid, outcome: Result<AiResult, TaskError>) -> Option<TaskRecord> {
        let mut tasks = self.tasks.write().await;
        let Some(record) = tasks.get_mut(&task_id) else {
            tracing::warn!(task_id = %task_id, "Unknown task finished");
            return None;
        };
        if record.is_terminal() {
            tracing::warn!(task_id = %task_id, status = ?record.status, "Late write to finished task ignored");
            return None;
        }

        match outcome {
            Ok(result) => {
                record.status = TaskStatus::Done;
                record.result = Some(result);
            }
            Err(error) => {
                record.status = TaskStatus::Error;
                record.error = Some(error);
            }
        }
        record.finished_at = Some(Utc::now());
        Some(record.clone())
    }

    pub async fn get(&self, task_id: Uuid) -> Option<TaskRecord> {
        self.tasks.read().await.get(&task_id).cloned()
    }

    /// Every retained record for one photo, oldest first
    pub async fn for_photo(&self, filename: &str) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|r| r.filename == filename)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Drop all but the `keep` most recently finished records
    ///
    /// Pending and running records are never removed. Returns how many were
    /// dropped.
    pub async fn cleanup(&self, keep: usize) -> usize {
        let mut tasks = self.tasks.write().await;

        let mut finished: Vec<_> = tasks
            .values()
            .filter_map(|r| r.finished_at.map(|at| (at, r.task_id)))
            .collect();
        if finished.len() <= keep {
            return 0;
        }

        // Newest first
        finished.sort_by(|a, b| b.cmp(a));
        let stale: Vec<Uuid> = finished.into_iter().skip(keep).map(|(_, id)| id).collect();
        for id in &stale {
            tasks.remove(id);
        }

        tracing::debug!(removed = stale.len(), remaining = tasks.len(), "Task registry cleaned");
        stale.len()
    }
}
