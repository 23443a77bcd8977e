//! Shared fixtures for tagiato-enrich integration tests
//!
//! A scripted analyzer stands in for the AI backends so batch behaviour can be
//! driven deterministically: per-photo outcomes, a gate that holds calls until
//! the test releases them, and counters for started calls and peak
//! concurrency.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tagiato_common::config::{EnrichConfig, WorkDir};
use tagiato_common::events::EventBus;
use tagiato_common::{AiOperation, GpsCoordinates};
use tagiato_enrich::models::{AiResult, ScannedPhoto, TaskRecord};
use tagiato_enrich::services::{
    AiError, AiRequest, BatchOrchestrator, PhotoAnalyzer, StateStore, TaskRegistry,
    ThumbnailGenerator,
};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Upper bound for any polling loop in the tests
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// What the scripted analyzer returns for one photo
#[derive(Debug, Clone)]
pub enum Scripted {
    Result(AiResult),
    Timeout,
    SpawnFailure,
    Unparseable,
    /// The analyzer panics mid-call
    Panic,
}

impl Scripted {
    fn into_outcome(self) -> Result<AiResult, AiError> {
        match self {
            Scripted::Result(result) => Ok(result),
            Scripted::Timeout => Err(AiError::Timeout { secs: 120 }),
            Scripted::SpawnFailure => Err(AiError::Spawn {
                program: "claude".to_string(),
                message: "No such file or directory (os error 2)".to_string(),
            }),
            Scripted::Unparseable => Err(AiError::Unparseable {
                excerpt: "I could not look at the picture".to_string(),
            }),
            Scripted::Panic => panic!("analyzer crashed"),
        }
    }
}

/// PhotoAnalyzer with per-filename outcomes
///
/// Unscripted photos get a caption naming the file (describe) or the Eiffel
/// Tower (locate).
pub struct ScriptedAnalyzer {
    scripts: Mutex<HashMap<String, Scripted>>,
    gate: Option<Semaphore>,
    requests: Mutex<Vec<AiRequest>>,
    started: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            gate: None,
            requests: Mutex::new(Vec::new()),
            started: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Calls block until [`release`](Self::release) hands out permits
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn script(self, filename: &str, outcome: Scripted) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(filename.to_string(), outcome);
        self
    }

    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<AiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Wait until at least `n` calls have entered the analyzer
    pub async fn wait_for_started(&self, n: usize) {
        tokio::time::timeout(WAIT_LIMIT, async {
            while self.started() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("only {} of {} analyzer calls started", self.started(), n));
    }

    fn default_outcome(request: &AiRequest) -> AiResult {
        let mut result = AiResult::empty(request.operation);
        match request.operation {
            AiOperation::Describe => {
                result.description = Some(format!("Caption of {}.", request.filename));
            }
            AiOperation::Locate => {
                result.refined_gps = Some(eiffel_tower());
                result.location_name = Some("Eiffel Tower".to_string());
                result.confidence = Some("high".to_string());
            }
        }
        result.empty = false;
        result
    }
}

#[async_trait]
impl PhotoAnalyzer for ScriptedAnalyzer {
    async fn analyze(&self, request: &AiRequest) -> Result<AiResult, AiError> {
        self.requests.lock().unwrap().push(request.clone());
        self.started.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        tokio::task::yield_now().await;

        let scripted = self.scripts.lock().unwrap().get(&request.filename).cloned();
        self.active.fetch_sub(1, Ordering::SeqCst);

        match scripted {
            Some(outcome) => outcome.into_outcome(),
            None => Ok(Self::default_outcome(request)),
        }
    }
}

/// Thumbnail generator returning a fixed path per photo
pub struct StubThumbnails {
    dir: PathBuf,
}

impl StubThumbnails {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }
}

#[async_trait]
impl ThumbnailGenerator for StubThumbnails {
    async fn thumbnail(&self, filename: &str) -> tagiato_common::Result<PathBuf> {
        Ok(self.dir.join(format!("{}.thumb.jpg", filename)))
    }
}

pub fn eiffel_tower() -> GpsCoordinates {
    GpsCoordinates::new(48.8584, 2.2945)
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
}

/// `photo_00.jpg`, `photo_01.jpg`, ... one minute apart
pub fn photo_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("photo_{:02}.jpg", i)).collect()
}

/// Temporary photo directory with an opened store
pub struct Fixture {
    pub dir: TempDir,
    pub event_bus: EventBus,
    pub store: Arc<StateStore>,
    pub tasks: Arc<TaskRegistry>,
}

impl Fixture {
    /// Store holding `count` dated photos without GPS
    pub async fn with_photos(count: usize) -> Self {
        let scanned = photo_names(count)
            .into_iter()
            .enumerate()
            .map(|(i, name)| ScannedPhoto::new(name).with_timestamp(at(10, i as u32)))
            .collect();
        Self::with_scan(scanned).await
    }

    pub async fn with_scan(scanned: Vec<ScannedPhoto>) -> Self {
        let dir = TempDir::new().unwrap();
        let work_dir = WorkDir::new(dir.path());
        work_dir.ensure_dirs().await.unwrap();

        let event_bus = EventBus::default();
        let store = StateStore::open(work_dir, event_bus.clone()).await.unwrap();
        store.merge_scan(scanned).await;

        Self {
            dir,
            event_bus,
            store: Arc::new(store),
            tasks: Arc::new(TaskRegistry::new()),
        }
    }

    pub fn work_dir(&self) -> WorkDir {
        WorkDir::new(self.dir.path())
    }

    pub fn orchestrator(&self, analyzer: Arc<ScriptedAnalyzer>, workers: usize) -> BatchOrchestrator {
        let config = EnrichConfig {
            worker_count: workers,
            ..EnrichConfig::default()
        };
        BatchOrchestrator::new(
            Arc::clone(&self.store),
            analyzer,
            Arc::new(StubThumbnails::new(self.dir.path())),
            Arc::clone(&self.tasks),
            self.event_bus.clone(),
            &config,
        )
    }

    /// Reopen the state file as a fresh process would
    pub async fn reopen(&self) -> StateStore {
        StateStore::open(self.work_dir(), EventBus::default())
            .await
            .unwrap()
    }
}

/// Poll a task until it reaches `done` or `error`
pub async fn wait_for_task(orchestrator: &BatchOrchestrator, task_id: Uuid) -> TaskRecord {
    tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            if let Some(record) = orchestrator.task(task_id).await.filter(|r| r.is_terminal()) {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task did not finish in time")
}
