//! Durable per-photo state
//!
//! The registry is the single source of truth for photo entities. Writers go
//! through [`StateStore::update`] (read current → mutate → release), never
//! through a long-lived copy, so concurrent writers only race on the fields
//! they each touch.
//!
//! Durability unit: mutations are in memory until the next [`StateStore::save`].

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tagiato_common::config::WorkDir;
use tagiato_common::events::{EnrichEvent, EventBus};
use tagiato_common::persist::{read_json, write_json_atomic};
use tagiato_common::{AiOperation, ProcessingStatus};
use tokio::sync::{Mutex, RwLock};

use crate::error::{EnrichError, EnrichResult};
use crate::models::{Photo, PhotoEdit, ScannedPhoto};

const STATE_FILE_VERSION: u32 = 1;

/// On-disk state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub photos: Vec<Photo>,
}

impl StateFile {
    /// Read the state file; an absent file is an empty registry
    ///
    /// Operations recorded as `processing` are reset to `untouched`: the
    /// process that owned them is gone.
    pub async fn load(path: &Path) -> EnrichResult<Vec<Photo>> {
        let Some(file) = read_json::<StateFile>(path).await? else {
            tracing::info!(state_file = %path.display(), "No state file, starting fresh");
            return Ok(Vec::new());
        };

        let mut photos = file.photos;
        let mut reset = 0usize;
        for photo in &mut photos {
            for operation in [AiOperation::Describe, AiOperation::Locate] {
                let state = photo.operation_mut(operation);
                if state.status == ProcessingStatus::Processing {
                    state.status = ProcessingStatus::Untouched;
                    reset += 1;
                }
            }
        }

        tracing::info!(
            state_file = %path.display(),
            photo_count = photos.len(),
            interrupted_operations = reset,
            "State loaded"
        );
        Ok(photos)
    }

    /// Atomically replace the state file
    pub async fn save(path: &Path, photos: &[Photo]) -> EnrichResult<()> {
        let file = StateFileRef {
            version: STATE_FILE_VERSION,
            saved_at: Utc::now(),
            photos,
        };
        write_json_atomic(path, &file)
            .await
            .map_err(|e| EnrichError::Persistence(format!("{}: {}", path.display(), e)))
    }
}

/// Borrowing twin of [`StateFile`] for serialization without a clone
#[derive(Serialize)]
struct StateFileRef<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    photos: &'a [Photo],
}

/// Ordered photo registry with a filename index
#[derive(Debug, Default)]
struct Registry {
    photos: Vec<Photo>,
    index: HashMap<String, usize>,
}

impl Registry {
    fn new(photos: Vec<Photo>) -> Self {
        let mut registry = Self {
            photos,
            index: HashMap::new(),
        };
        registry.reindex();
        registry
    }

    fn reindex(&mut self) {
        self.index = self
            .photos
            .iter()
            .enumerate()
            .map(|(i, p)| (p.filename.clone(), i))
            .collect();
    }

    /// Capture time ascending, undated photos last, then filename
    fn sort(&mut self) {
        self.photos.sort_by(|a, b| {
            (a.timestamp.is_none(), a.timestamp, &a.filename).cmp(&(b.timestamp.is_none(), b.timestamp, &b.filename))
        });
        self.reindex();
    }

    fn get(&self, filename: &str) -> Option<&Photo> {
        self.index.get(filename).map(|&i| &self.photos[i])
    }

    fn get_mut(&mut self, filename: &str) -> Option<&mut Photo> {
        let i = *self.index.get(filename)?;
        self.photos.get_mut(i)
    }
}

/// Counts for status displays
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateStats {
    pub total: usize,
    pub described: usize,
    /// Photos with a refined GPS or a recognised place name
    pub located: usize,
    pub with_gps: usize,
    pub errors: usize,
    pub processing: usize,
    pub dirty: usize,
}

/// Outcome of merging a directory scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanMerge {
    pub added: usize,
    pub refreshed: usize,
}

/// Owner of all photo entities for one photo directory
pub struct StateStore {
    work_dir: WorkDir,
    registry: RwLock<Registry>,
    /// Serializes snapshot + write so an older snapshot never lands last
    save_lock: Mutex<()>,
    event_bus: EventBus,
}

impl StateStore {
    /// Open the store for `work_dir`, loading any existing state file
    pub async fn open(work_dir: WorkDir, event_bus: EventBus) -> EnrichResult<Self> {
        let photos = StateFile::load(&work_dir.state_file()).await?;
        let mut registry = Registry::new(photos);
        registry.sort();

        Ok(Self {
            work_dir,
            registry: RwLock::new(registry),
            save_lock: Mutex::new(()),
            event_bus,
        })
    }

    pub fn work_dir(&self) -> &WorkDir {
        &self.work_dir
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Snapshot of every photo in registry order
    pub async fn photos(&self) -> Vec<Photo> {
        self.registry.read().await.photos.clone()
    }

    pub async fn filenames(&self) -> Vec<String> {
        self.registry
            .read()
            .await
            .photos
            .iter()
            .map(|p| p.filename.clone())
            .collect()
    }

    pub async fn get(&self, filename: &str) -> Option<Photo> {
        self.registry.read().await.get(filename).cloned()
    }

    pub async fn contains(&self, filename: &str) -> bool {
        self.registry.read().await.index.contains_key(filename)
    }

    pub async fn len(&self) -> usize {
        self.registry.read().await.photos.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Read-modify-write one photo under the registry lock
    pub async fn update<F, R>(&self, filename: &str, f: F) -> EnrichResult<R>
    where
        F: FnOnce(&mut Photo) -> R,
    {
        let mut registry = self.registry.write().await;
        let photo = registry
            .get_mut(filename)
            .ok_or_else(|| EnrichError::NotFound(format!("Photo not found: {}", filename)))?;
        Ok(f(photo))
    }

    /// Mark `operation` as processing unless it already is
    ///
    /// The check and the set happen under one write lock, so at most one
    /// caller wins. Returns the photo as it was when the operation began.
    pub async fn begin_operation(&self, filename: &str, operation: AiOperation) -> EnrichResult<Photo> {
        let photo = {
            let mut registry = self.registry.write().await;
            let photo = registry
                .get_mut(filename)
                .ok_or_else(|| EnrichError::NotFound(format!("Photo not found: {}", filename)))?;

            let state = photo.operation_mut(operation);
            if state.status == ProcessingStatus::Processing {
                return Err(EnrichError::Conflict(format!(
                    "{} already processing for {}",
                    operation, filename
                )));
            }
            state.status = ProcessingStatus::Processing;
            photo.clone()
        };

        tracing::debug!(filename = %filename, operation = %operation, "Operation started");
        self.emit_status(filename, operation, ProcessingStatus::Processing);
        Ok(photo)
    }

    pub(crate) fn emit_status(&self, filename: &str, operation: AiOperation, status: ProcessingStatus) {
        self.event_bus.emit_lossy(EnrichEvent::PhotoStatusChanged {
            filename: filename.to_string(),
            operation,
            status,
            timestamp: Utc::now(),
        });
    }

    /// Apply a user edit to the fields it names
    pub async fn apply_edit(&self, filename: &str, edit: &PhotoEdit) -> EnrichResult<Photo> {
        let photo = self
            .update(filename, |photo| {
                edit.apply_to(photo);
                photo.clone()
            })
            .await?;
        tracing::info!(filename = %filename, "User edit applied");
        Ok(photo)
    }

    /// Merge a fresh directory scan
    ///
    /// New photos are added untouched; known photos get their capture time and
    /// EXIF GPS refreshed (when the scan supplies them) and keep every
    /// enrichment field.
    pub async fn merge_scan(&self, scanned: Vec<ScannedPhoto>) -> ScanMerge {
        let mut summary = ScanMerge::default();
        let mut registry = self.registry.write().await;

        for scan in scanned {
            match registry.get_mut(&scan.filename) {
                Some(photo) => {
                    if scan.timestamp.is_some() {
                        photo.timestamp = scan.timestamp;
                    }
                    if scan.original_gps.is_some() {
                        photo.original_gps = scan.original_gps;
                    }
                    if !photo.has_description() {
                        photo.description = scan.description.filter(|d| !d.trim().is_empty());
                    }
                    summary.refreshed += 1;
                }
                None => {
                    let photo = Photo::from_scan(scan);
                    let index = registry.photos.len();
                    registry.index.insert(photo.filename.clone(), index);
                    registry.photos.push(photo);
                    summary.added += 1;
                }
            }
        }
        registry.sort();

        tracing::info!(
            added = summary.added,
            refreshed = summary.refreshed,
            total = registry.photos.len(),
            "Scan merged"
        );
        summary
    }

    /// Persist the registry atomically
    ///
    /// On failure the previous state file is intact and the in-memory
    /// registry is unchanged, so the caller may retry.
    pub async fn save(&self) -> EnrichResult<()> {
        let _guard = self.save_lock.lock().await;
        let photos = self.photos().await;
        let path = self.work_dir.state_file();

        StateFile::save(&path, &photos).await?;

        tracing::debug!(state_file = %path.display(), photo_count = photos.len(), "State saved");
        self.event_bus.emit_lossy(EnrichEvent::StateSaved {
            photo_count: photos.len(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn stats(&self) -> StateStats {
        let registry = self.registry.read().await;
        let mut stats = StateStats {
            total: registry.photos.len(),
            ..Default::default()
        };

        for photo in &registry.photos {
            let states = [&photo.describe, &photo.locate];
            stats.described += usize::from(photo.has_description());
            stats.located += usize::from(photo.refined_gps.is_some() || photo.location_name.is_some());
            stats.with_gps += usize::from(photo.effective_gps().is_some());
            stats.errors += usize::from(states.iter().any(|s| s.status == ProcessingStatus::Error));
            stats.processing += usize::from(states.iter().any(|s| s.status == ProcessingStatus::Processing));
            stats.dirty += usize::from(photo.dirty);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tagiato_common::GpsCoordinates;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> StateStore {
        StateStore::open(WorkDir::new(dir.path()), EventBus::new(16))
            .await
            .unwrap()
    }

    fn scanned(name: &str, hour: Option<u32>) -> ScannedPhoto {
        let scan = ScannedPhoto::new(name);
        match hour {
            Some(h) => scan.with_timestamp(Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap()),
            None => scan,
        }
    }

    #[tokio::test]
    async fn test_merge_scan_orders_and_keeps_enrichment() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let summary = store
            .merge_scan(vec![scanned("c.jpg", None), scanned("b.jpg", Some(12)), scanned("a.jpg", Some(9))])
            .await;
        assert_eq!(summary, ScanMerge { added: 3, refreshed: 0 });
        assert_eq!(store.filenames().await, vec!["a.jpg", "b.jpg", "c.jpg"]);

        store
            .update("b.jpg", |p| p.description = Some("Harbour.".to_string()))
            .await
            .unwrap();

        let rescan = scanned("b.jpg", Some(8)).with_gps(GpsCoordinates::new(1.0, 2.0));
        let summary = store.merge_scan(vec![rescan]).await;
        assert_eq!(summary.refreshed, 1);

        let photo = store.get("b.jpg").await.unwrap();
        assert_eq!(photo.description.as_deref(), Some("Harbour."));
        assert_eq!(photo.original_gps, Some(GpsCoordinates::new(1.0, 2.0)));
        assert_eq!(store.filenames().await, vec!["b.jpg", "a.jpg", "c.jpg"]);
    }

    #[tokio::test]
    async fn test_begin_operation_is_exclusive_per_kind() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.merge_scan(vec![scanned("a.jpg", Some(9))]).await;

        store.begin_operation("a.jpg", AiOperation::Describe).await.unwrap();
        let err = store.begin_operation("a.jpg", AiOperation::Describe).await.unwrap_err();
        assert!(matches!(err, EnrichError::Conflict(_)));

        // Other kind is independent
        store.begin_operation("a.jpg", AiOperation::Locate).await.unwrap();

        assert!(matches!(
            store.begin_operation("nope.jpg", AiOperation::Locate).await,
            Err(EnrichError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_save_and_reload_resets_processing() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let mut rx = store.event_bus().subscribe();
        store.merge_scan(vec![scanned("a.jpg", Some(9))]).await;
        store.begin_operation("a.jpg", AiOperation::Locate).await.unwrap();
        store
            .update("a.jpg", |p| {
                p.describe.status = ProcessingStatus::Done;
                p.description = Some("Bridge.".to_string());
            })
            .await
            .unwrap();
        store.save().await.unwrap();

        let mut saw_saved = false;
        while let Ok(event) = rx.try_recv() {
            saw_saved |= matches!(event, EnrichEvent::StateSaved { photo_count: 1, .. });
        }
        assert!(saw_saved);

        let reopened = open(&dir).await;
        let photo = reopened.get("a.jpg").await.unwrap();
        assert_eq!(photo.locate.status, ProcessingStatus::Untouched);
        assert_eq!(photo.describe.status, ProcessingStatus::Done);
        assert_eq!(photo.description.as_deref(), Some("Bridge."));
    }

    #[tokio::test]
    async fn test_failed_save_keeps_memory() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.merge_scan(vec![scanned("a.jpg", Some(9))]).await;

        // A non-empty directory where the state file should go cannot be
        // replaced by rename
        let state_file = store.work_dir().state_file();
        std::fs::create_dir_all(state_file.join("blocker")).unwrap();

        let err = store.save().await.unwrap_err();
        assert!(matches!(err, EnrichError::Persistence(_)));
        assert_eq!(store.len().await, 1);

        std::fs::remove_dir_all(&state_file).unwrap();
        store.save().await.unwrap();
        assert!(state_file.is_file());
    }

    #[tokio::test]
    async fn test_stats() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store
            .merge_scan(vec![
                scanned("a.jpg", Some(9)).with_gps(GpsCoordinates::new(1.0, 1.0)),
                scanned("b.jpg", Some(10)),
            ])
            .await;
        store
            .apply_edit(
                "b.jpg",
                &PhotoEdit {
                    description: Some("Castle.".to_string()),
                    location_name: Some("Castle".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .update("a.jpg", |p| p.locate.status = ProcessingStatus::Error)
            .await
            .unwrap();

        let stats = store.stats().await;
        assert_eq!(
            stats,
            StateStats {
                total: 2,
                described: 1,
                located: 1,
                with_gps: 1,
                errors: 1,
                processing: 0,
                dirty: 1,
            }
        );
    }
}
