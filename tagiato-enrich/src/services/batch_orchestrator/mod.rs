//! Batch orchestration
//!
//! Runs one AI operation over a worklist with a bounded worker pool.
//!
//! **State machine:** `idle → running → (completed | stopped | failed)`.
//! Only one BatchRun may be running per orchestrator; a second `start` fails
//! fast with a conflict instead of queueing.
//!
//! **Dispatch:** N tasks are seeded, then one new task is pulled per
//! completion, in worklist order. Completion order is unordered, so progress
//! is reported as counts.
//!
//! **Cancellation:** cooperative. `stop()` prevents further dispatch;
//! in-flight backend calls run to completion (or their own timeout).
//!
//! **Faults:** every entry runs as its own tokio task. A panic fails that
//! entry with an `Internal` error and frees the photo's slot; siblings keep
//! running.

mod task;

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tagiato_common::config::EnrichConfig;
use tagiato_common::events::{EnrichEvent, EventBus};
use tagiato_common::{AiOperation, BatchState};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{EnrichError, EnrichResult};
use crate::models::{BatchProgress, BatchRun, TaskRecord};
use crate::services::ai_gateway::PhotoAnalyzer;
use crate::services::collaborators::ThumbnailGenerator;
use crate::services::state_store::StateStore;
use crate::services::task_registry::{TaskRegistry, DEFAULT_KEEP_FINISHED};

use task::{TaskContext, TaskOutcome};

/// Current (or last finished) run and its control handles
#[derive(Default)]
struct ActiveBatch {
    run: Option<BatchRun>,
    cancel: Option<CancellationToken>,
    driver: Option<JoinHandle<()>>,
}

/// Schedules photo × operation tasks over the AI gateway
#[derive(Clone)]
pub struct BatchOrchestrator {
    ctx: Arc<TaskContext>,
    active: Arc<Mutex<ActiveBatch>>,
    worker_count: usize,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<StateStore>,
        analyzer: Arc<dyn PhotoAnalyzer>,
        thumbnails: Arc<dyn ThumbnailGenerator>,
        tasks: Arc<TaskRegistry>,
        event_bus: EventBus,
        config: &EnrichConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(TaskContext {
                store,
                analyzer,
                thumbnails,
                tasks,
                event_bus,
                context: config.context.clone(),
            }),
            active: Arc::new(Mutex::new(ActiveBatch::default())),
            worker_count: config.worker_count.max(1),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.ctx.store
    }

    /// Start a BatchRun over `selection` (or every known photo)
    ///
    /// Rejected with `Conflict` while another run is running, and with
    /// `InvalidInput` for an empty worklist or unknown filenames.
    pub async fn start(&self, selection: Option<Vec<String>>, operation: AiOperation) -> EnrichResult<BatchProgress> {
        let mut active = self.active.lock().await;
        if let Some(run) = active.run.as_ref().filter(|r| r.is_running()) {
            return Err(EnrichError::Conflict(format!(
                "Batch {} ({}) is already running",
                run.batch_id, run.operation
            )));
        }

        let worklist = self.build_worklist(selection).await?;

        let mut run = BatchRun::new(operation, worklist);
        run.transition_to(BatchState::Running);
        let batch_id = run.batch_id;
        let progress = run.progress();

        tracing::info!(
            batch_id = %batch_id,
            operation = %operation,
            total = run.total(),
            workers = self.worker_count,
            "Batch started"
        );
        self.ctx.event_bus.emit_lossy(EnrichEvent::BatchStarted {
            batch_id,
            operation,
            total: run.total(),
            timestamp: Utc::now(),
        });

        let cancel = CancellationToken::new();
        active.run = Some(run);
        active.cancel = Some(cancel.clone());
        active.driver = Some(tokio::spawn(self.clone().drive(batch_id, operation, cancel)));

        Ok(progress)
    }

    async fn build_worklist(&self, selection: Option<Vec<String>>) -> EnrichResult<Vec<String>> {
        let worklist = match selection {
            None => self.ctx.store.filenames().await,
            Some(selected) => {
                let mut worklist: Vec<String> = Vec::with_capacity(selected.len());
                for filename in selected {
                    if !self.ctx.store.contains(&filename).await {
                        return Err(EnrichError::InvalidInput(format!("Unknown photo: {}", filename)));
                    }
                    // Same photo twice would race against itself
                    if !worklist.contains(&filename) {
                        worklist.push(filename);
                    }
                }
                worklist
            }
        };

        if worklist.is_empty() {
            return Err(EnrichError::InvalidInput("Worklist is empty".to_string()));
        }
        Ok(worklist)
    }

    /// Worker pool driver for one run
    async fn drive(self, batch_id: Uuid, operation: AiOperation, cancel: CancellationToken) {
        let mut in_flight = FuturesUnordered::new();

        for _ in 0..self.worker_count {
            if cancel.is_cancelled() {
                break;
            }
            match self.dispatch_next(batch_id).await {
                Some(filename) => in_flight.push(self.clone().run_entry(batch_id, operation, filename)),
                None => break,
            }
        }

        while let Some(outcome) = in_flight.next().await {
            self.record_outcome(&outcome).await;

            if outcome.is_fatal() {
                let message = outcome
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_default();
                tracing::error!(
                    batch_id = %batch_id,
                    filename = %outcome.filename,
                    error = %message,
                    "Fatal task error, aborting batch"
                );
                if let Some(run) = self.active.lock().await.run.as_mut() {
                    run.failure.get_or_insert(message);
                }
                cancel.cancel();
            }

            if cancel.is_cancelled() {
                continue;
            }
            if let Some(filename) = self.dispatch_next(batch_id).await {
                in_flight.push(self.clone().run_entry(batch_id, operation, filename));
            }
        }

        self.settle(batch_id).await;
    }

    /// Next worklist entry of the run, if it is still this run
    async fn dispatch_next(&self, batch_id: Uuid) -> Option<String> {
        let mut active = self.active.lock().await;
        let run = active.run.as_mut().filter(|r| r.batch_id == batch_id)?;
        run.next_dispatch()
    }

    async fn run_entry(self, batch_id: Uuid, operation: AiOperation, filename: String) -> TaskOutcome {
        let task_id = self.ctx.tasks.create(&filename, operation, Some(batch_id)).await.task_id;

        // Own task, so a panic fails this entry instead of the driver
        let ctx = Arc::clone(&self.ctx);
        let task_filename = filename.clone();
        let handle = tokio::spawn(async move { ctx.execute(task_id, task_filename, operation, None).await });
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => self.ctx.recover_panic(task_id, filename, operation, e).await,
        }
    }

    async fn record_outcome(&self, outcome: &TaskOutcome) {
        let save_result = self.ctx.store.save().await;

        let mut active = self.active.lock().await;
        let Some(run) = active.run.as_mut() else {
            return;
        };
        run.record_outcome(outcome.is_success());
        if let Err(e) = save_result {
            tracing::warn!(batch_id = %run.batch_id, error = %e, "State save failed, batch continues");
            run.last_save_error = Some(e.to_string());
        }

        self.ctx.event_bus.emit_lossy(EnrichEvent::BatchProgress {
            batch_id: run.batch_id,
            total: run.total(),
            completed: run.completed,
            errored: run.errored,
            in_flight: run.in_flight(),
            last_filename: outcome.filename.clone(),
            timestamp: Utc::now(),
        });
    }

    /// Move the run to its terminal state once nothing is in flight
    async fn settle(&self, batch_id: Uuid) {
        let mut guard = self.active.lock().await;
        let active = &mut *guard;
        let Some(run) = active.run.as_mut().filter(|r| r.batch_id == batch_id) else {
            return;
        };

        let state = run.settled_state();
        run.transition_to(state);
        active.cancel = None;

        tracing::info!(
            batch_id = %batch_id,
            state = ?state,
            completed = run.completed,
            errored = run.errored,
            not_started = run.not_started(),
            "Batch finished"
        );
        self.ctx.event_bus.emit_lossy(EnrichEvent::BatchFinished {
            batch_id,
            state,
            completed: run.completed,
            errored: run.errored,
            not_started: run.not_started(),
            timestamp: Utc::now(),
        });

        self.ctx.tasks.cleanup(DEFAULT_KEEP_FINISHED).await;
    }

    /// Request cooperative cancellation of the running batch
    pub async fn stop(&self) -> EnrichResult<BatchProgress> {
        let mut active = self.active.lock().await;
        let cancel = active.cancel.clone();
        let run = active
            .run
            .as_mut()
            .filter(|r| r.is_running())
            .ok_or_else(|| EnrichError::InvalidInput("No batch is running".to_string()))?;

        run.stop_requested = true;
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        tracing::info!(
            batch_id = %run.batch_id,
            in_flight = run.in_flight(),
            not_started = run.not_started(),
            "Batch stop requested"
        );
        Ok(run.progress())
    }

    /// Snapshot of the current or last run
    pub async fn status(&self) -> Option<BatchProgress> {
        self.active.lock().await.run.as_ref().map(BatchRun::progress)
    }

    /// Wait for the current run's driver to exit and return the final snapshot
    pub async fn wait(&self) -> Option<BatchProgress> {
        let driver = self.active.lock().await.driver.take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                tracing::error!(error = %e, "Batch driver panicked");
                self.abort(format!("Batch driver panicked: {}", e)).await;
            }
        }
        self.status().await
    }

    /// Fail a run whose driver exited without settling it
    async fn abort(&self, failure: String) {
        let batch_id = {
            let mut active = self.active.lock().await;
            let Some(run) = active.run.as_mut().filter(|r| r.is_running()) else {
                return;
            };
            run.failure.get_or_insert(failure);
            run.batch_id
        };
        self.settle(batch_id).await;
    }

    /// Run one operation on one photo outside any batch
    ///
    /// The processing slot is claimed before this returns, so a duplicate
    /// request for the same photo and operation is rejected with `Conflict`.
    pub async fn submit(&self, filename: &str, operation: AiOperation, user_hint: Option<String>) -> EnrichResult<Uuid> {
        let photo = self.ctx.store.begin_operation(filename, operation).await?;
        let record = self.ctx.tasks.create(filename, operation, None).await;
        let task_id = record.task_id;

        tracing::info!(task_id = %task_id, filename = %filename, operation = %operation, "Task submitted");

        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            let filename = photo.filename.clone();
            let flow = Arc::clone(&ctx);
            let handle =
                tokio::spawn(async move { flow.execute_claimed(task_id, photo, operation, user_hint).await });
            if let Err(e) = handle.await {
                ctx.recover_panic(task_id, filename, operation, e).await;
            }
            if let Err(e) = ctx.store.save().await {
                tracing::warn!(task_id = %task_id, error = %e, "State save failed after task");
            }
            ctx.tasks.cleanup(DEFAULT_KEEP_FINISHED).await;
        });

        Ok(task_id)
    }

    pub async fn task(&self, task_id: Uuid) -> Option<TaskRecord> {
        self.ctx.tasks.get(task_id).await
    }
}
