//! Per-task flow shared by batch workers and single-photo requests
//!
//! processing → analyze → merge → done | error, with every photo write going
//! through the StateStore so concurrent edits to other fields survive.

use std::sync::Arc;

use chrono::Utc;
use tagiato_common::config::ContextSettings;
use tagiato_common::events::{EnrichEvent, EventBus};
use tagiato_common::{AiOperation, ProcessingStatus};
use uuid::Uuid;

use crate::error::EnrichError;
use crate::models::{AiResult, Photo, TaskError, TaskErrorKind};
use crate::services::ai_gateway::{AiRequest, PhotoAnalyzer};
use crate::services::collaborators::ThumbnailGenerator;
use crate::services::context;
use crate::services::state_store::StateStore;
use crate::services::task_registry::TaskRegistry;

/// Collaborators every task needs
pub(crate) struct TaskContext {
    pub store: Arc<StateStore>,
    pub analyzer: Arc<dyn PhotoAnalyzer>,
    pub thumbnails: Arc<dyn ThumbnailGenerator>,
    pub tasks: Arc<TaskRegistry>,
    pub event_bus: EventBus,
    pub context: ContextSettings,
}

/// What the driver needs to know about a finished task
#[derive(Debug, Clone)]
pub(crate) struct TaskOutcome {
    pub filename: String,
    pub error: Option<TaskError>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_fatal(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.kind.is_fatal())
    }
}

impl TaskContext {
    /// Claim the photo's operation slot
    pub async fn begin(&self, filename: &str, operation: AiOperation) -> Result<Photo, TaskError> {
        self.store
            .begin_operation(filename, operation)
            .await
            .map_err(|e| match e {
                EnrichError::Conflict(msg) => TaskError::new(TaskErrorKind::AlreadyProcessing, msg),
                EnrichError::NotFound(msg) => TaskError::new(TaskErrorKind::PhotoNotFound, msg),
                other => TaskError::new(TaskErrorKind::Internal, other.to_string()),
            })
    }

    /// Full flow for one task, including claiming the slot
    ///
    /// A task that loses the slot to another request fails without touching
    /// the photo.
    pub async fn execute(
        &self,
        task_id: Uuid,
        filename: String,
        operation: AiOperation,
        user_hint: Option<String>,
    ) -> TaskOutcome {
        match self.begin(&filename, operation).await {
            Ok(photo) => self.execute_claimed(task_id, photo, operation, user_hint).await,
            Err(error) => {
                tracing::warn!(filename = %filename, operation = %operation, error = %error, "Task rejected");
                self.finish_task(task_id, &filename, operation, Err(error.clone())).await;
                TaskOutcome {
                    filename,
                    error: Some(error),
                }
            }
        }
    }

    /// Flow after `begin` succeeded: analyze, merge, record
    pub async fn execute_claimed(
        &self,
        task_id: Uuid,
        photo: Photo,
        operation: AiOperation,
        user_hint: Option<String>,
    ) -> TaskOutcome {
        self.tasks.mark_running(task_id).await;
        let filename = photo.filename.clone();

        let outcome = self.analyze(&photo, operation, user_hint).await;
        let status = match &outcome {
            Ok(_) => ProcessingStatus::Done,
            Err(_) => ProcessingStatus::Error,
        };

        // Re-read through the store; only this operation's fields are written
        let merged = self
            .store
            .update(&filename, |current| merge_outcome(current, operation, &outcome))
            .await;
        if let Err(e) = merged {
            tracing::error!(filename = %filename, error = %e, "Photo vanished before merge");
        }
        self.store.emit_status(&filename, operation, status);

        match &outcome {
            Ok(result) => tracing::info!(
                filename = %filename,
                operation = %operation,
                empty = result.empty,
                "Task done"
            ),
            Err(error) => tracing::warn!(
                filename = %filename,
                operation = %operation,
                kind = ?error.kind,
                error = %error,
                "Task failed"
            ),
        }

        let error = outcome.as_ref().err().cloned();
        self.finish_task(task_id, &filename, operation, outcome).await;
        TaskOutcome { filename, error }
    }

    /// Settle a task whose flow panicked after claiming the slot
    ///
    /// The photo moves from `processing` to `error` so the slot is free again.
    pub async fn recover_panic(
        &self,
        task_id: Uuid,
        filename: String,
        operation: AiOperation,
        panic: tokio::task::JoinError,
    ) -> TaskOutcome {
        let error = TaskError::new(TaskErrorKind::Internal, format!("Task panicked: {}", panic));
        tracing::error!(filename = %filename, operation = %operation, error = %error, "Task panicked");

        let failed = Err(error.clone());
        let reset = self
            .store
            .update(&filename, |current| {
                let claimed = current.operation(operation).status == ProcessingStatus::Processing;
                if claimed {
                    merge_outcome(current, operation, &failed);
                }
                claimed
            })
            .await;
        if matches!(reset, Ok(true)) {
            self.store.emit_status(&filename, operation, ProcessingStatus::Error);
        }

        self.finish_task(task_id, &filename, operation, failed).await;
        TaskOutcome {
            filename,
            error: Some(error),
        }
    }

    async fn analyze(
        &self,
        photo: &Photo,
        operation: AiOperation,
        user_hint: Option<String>,
    ) -> Result<AiResult, TaskError> {
        let mut request = AiRequest::for_photo(operation, photo).with_user_hint(user_hint);

        if operation == AiOperation::Describe && self.context.enabled {
            let photos = self.store.photos().await;
            request.nearby_descriptions = context::prompt_context(photo, &photos, &self.context);
        }

        let image = self
            .thumbnails
            .thumbnail(&photo.filename)
            .await
            .map_err(|e| TaskError::new(TaskErrorKind::ThumbnailUnavailable, e.to_string()))?;
        request.image_path = Some(image);

        self.analyzer.analyze(&request).await.map_err(TaskError::from)
    }

    async fn finish_task(
        &self,
        task_id: Uuid,
        filename: &str,
        operation: AiOperation,
        outcome: Result<AiResult, TaskError>,
    ) {
        if let Some(record) = self.tasks.finish(task_id, outcome).await {
            self.event_bus.emit_lossy(EnrichEvent::TaskFinished {
                task_id,
                filename: filename.to_string(),
                operation,
                status: record.status,
                timestamp: Utc::now(),
            });
        }
    }
}

/// Write one outcome into the current photo
///
/// Success sets only the fields the result carries; an empty result changes
/// status but no content. Failure records the message.
pub(crate) fn merge_outcome(photo: &mut Photo, operation: AiOperation, outcome: &Result<AiResult, TaskError>) {
    match outcome {
        Ok(result) => {
            match operation {
                AiOperation::Describe => {
                    if let Some(description) = &result.description {
                        photo.description = Some(description.clone());
                        photo.dirty = true;
                    }
                }
                AiOperation::Locate => {
                    if let Some(gps) = result.refined_gps {
                        photo.refined_gps = Some(gps);
                        // Geocoded name belonged to the previous position
                        photo.place_name = None;
                        photo.dirty = true;
                    }
                    if let Some(name) = &result.location_name {
                        photo.location_name = Some(name.clone());
                        photo.dirty = true;
                    }
                    photo.locate_confidence = result.confidence.clone();
                }
            }
            let state = photo.operation_mut(operation);
            state.status = ProcessingStatus::Done;
            state.error = None;
            state.empty_response = result.empty;
        }
        Err(error) => {
            let state = photo.operation_mut(operation);
            state.status = ProcessingStatus::Error;
            state.error = Some(error.message.clone());
        }
    }
}
