//! External collaborator seams
//!
//! EXIF parsing, metadata encoding, thumbnail resizing, timeline parsing and
//! network geocoding live outside the engine. The engine only calls these
//! traits.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tagiato_common::{GpsCoordinates, Waypoint};
use walkdir::WalkDir;

use crate::models::{Photo, ScannedPhoto};
use crate::services::geocode_cache::GeocodeError;

/// Supplies the photos of a directory with their EXIF timestamp and GPS
#[async_trait]
pub trait PhotoScanner: Send + Sync {
    async fn scan(&self, photos_dir: &Path) -> tagiato_common::Result<Vec<ScannedPhoto>>;
}

/// Lists the JPEG files of a directory without reading their metadata
///
/// Known photos keep their stored timestamp and GPS on merge, since this
/// scanner never supplies either.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegDirectoryScanner;

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

#[async_trait]
impl PhotoScanner for JpegDirectoryScanner {
    async fn scan(&self, photos_dir: &Path) -> tagiato_common::Result<Vec<ScannedPhoto>> {
        let root = photos_dir.to_path_buf();
        let filenames = tokio::task::spawn_blocking(move || list_jpegs(&root))
            .await
            .map_err(|e| tagiato_common::Error::Internal(format!("Scan task failed: {}", e)))??;

        tracing::debug!(dir = %photos_dir.display(), count = filenames.len(), "Scanned photo directory");
        Ok(filenames.into_iter().map(ScannedPhoto::new).collect())
    }
}

/// JPEG file names directly inside `root`, sorted
fn list_jpegs(root: &Path) -> tagiato_common::Result<Vec<String>> {
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name();

    let mut filenames = Vec::new();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() || !is_jpeg(entry.path()) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            filenames.push(name.to_string());
        }
    }
    Ok(filenames)
}

/// Supplies an already-parsed location-history track
#[async_trait]
pub trait TimelineLoader: Send + Sync {
    async fn load(&self) -> tagiato_common::Result<Vec<Waypoint>>;
}

/// Final field values handed to the metadata writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoMetadata {
    pub filename: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub gps: Option<GpsCoordinates>,
    pub description: Option<String>,
    pub location_name: Option<String>,
}

impl PhotoMetadata {
    pub fn from_photo(photo: &Photo) -> Self {
        Self {
            filename: photo.filename.clone(),
            timestamp: photo.timestamp,
            gps: photo.effective_gps().map(|r| r.gps),
            description: photo.description.clone(),
            location_name: photo.location_name.clone(),
        }
    }

    /// Nothing worth writing
    pub fn is_blank(&self) -> bool {
        self.gps.is_none() && self.description.is_none()
    }
}

/// Writes final values into the photo file (EXIF/XMP encoding is its concern)
#[async_trait]
pub trait MetadataWriter: Send + Sync {
    async fn write(&self, photos_dir: &Path, metadata: &PhotoMetadata) -> tagiato_common::Result<()>;
}

/// Produces an image path suitable for attaching to a prompt
#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    async fn thumbnail(&self, filename: &str) -> tagiato_common::Result<PathBuf>;
}

/// Hands the original photo to the backend unchanged
#[derive(Debug, Clone)]
pub struct SourceImageThumbnails {
    photos_dir: PathBuf,
}

impl SourceImageThumbnails {
    pub fn new(photos_dir: impl Into<PathBuf>) -> Self {
        Self {
            photos_dir: photos_dir.into(),
        }
    }
}

#[async_trait]
impl ThumbnailGenerator for SourceImageThumbnails {
    async fn thumbnail(&self, filename: &str) -> tagiato_common::Result<PathBuf> {
        let path = self.photos_dir.join(filename);
        if !tokio::fs::try_exists(&path).await? {
            return Err(tagiato_common::Error::NotFound(path.display().to_string()));
        }
        Ok(path)
    }
}

/// Reverse geocoding (coordinates to display name)
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse(&self, gps: GpsCoordinates) -> Result<Option<String>, GeocodeError>;
}
