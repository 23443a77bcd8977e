//! Photo entity
//!
//! One record per JPEG, keyed by filename. All per-operation status fields are
//! plain persisted data: a restart resumes by reading the state file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tagiato_common::{AiOperation, GpsCoordinates, ProcessingStatus};

use crate::services::gps_resolver::{self, ResolvedGps};

/// GPS assigned by nearest-timestamp lookup against the waypoint track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedLocation {
    pub gps: GpsCoordinates,
    /// Absolute photo/waypoint time difference
    pub gap_minutes: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_name: Option<String>,
}

/// Status of one AI operation kind on one photo
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationState {
    pub status: ProcessingStatus,
    /// Last error message; cleared by the next success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last successful run reported "nothing recognised"
    pub empty_response: bool,
}

/// Photo as supplied by the external scanner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannedPhoto {
    pub filename: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub original_gps: Option<GpsCoordinates>,
    /// Description already embedded in the file's metadata
    #[serde(default)]
    pub description: Option<String>,
}

impl ScannedPhoto {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            timestamp: None,
            original_gps: None,
            description: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_gps(mut self, gps: GpsCoordinates) -> Self {
        self.original_gps = Some(gps);
        self
    }
}

/// Photo entity owned by the StateStore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub filename: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// GPS found in the file's EXIF
    #[serde(default)]
    pub original_gps: Option<GpsCoordinates>,
    #[serde(default)]
    pub matched_location: Option<MatchedLocation>,
    /// GPS proposed by an AI locate operation (or set by the user)
    #[serde(default)]
    pub refined_gps: Option<GpsCoordinates>,
    #[serde(default)]
    pub description: Option<String>,
    /// Recognised place (AI locate or user)
    #[serde(default)]
    pub location_name: Option<String>,
    /// Geocoded display name of the effective GPS
    #[serde(default)]
    pub place_name: Option<String>,
    /// Raw confidence label of the last locate result
    #[serde(default)]
    pub locate_confidence: Option<String>,
    #[serde(default)]
    pub describe: OperationState,
    #[serde(default)]
    pub locate: OperationState,
    /// Changes not yet handed to the metadata writer
    #[serde(default)]
    pub dirty: bool,
}

impl Photo {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            timestamp: None,
            original_gps: None,
            matched_location: None,
            refined_gps: None,
            description: None,
            location_name: None,
            place_name: None,
            locate_confidence: None,
            describe: OperationState::default(),
            locate: OperationState::default(),
            dirty: false,
        }
    }

    pub fn from_scan(scanned: ScannedPhoto) -> Self {
        let mut photo = Self::new(scanned.filename);
        photo.timestamp = scanned.timestamp;
        photo.original_gps = scanned.original_gps;
        photo.description = scanned.description.filter(|d| !d.trim().is_empty());
        photo
    }

    pub fn operation(&self, operation: AiOperation) -> &OperationState {
        match operation {
            AiOperation::Describe => &self.describe,
            AiOperation::Locate => &self.locate,
        }
    }

    pub fn operation_mut(&mut self, operation: AiOperation) -> &mut OperationState {
        match operation {
            AiOperation::Describe => &mut self.describe,
            AiOperation::Locate => &mut self.locate,
        }
    }

    /// Best-known GPS, recomputed on every call
    pub fn effective_gps(&self) -> Option<ResolvedGps> {
        gps_resolver::resolve_photo(self)
    }

    pub fn has_description(&self) -> bool {
        self.description.as_deref().is_some_and(|d| !d.trim().is_empty())
    }
}

/// Field-level user edit; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoEdit {
    /// Empty string clears the description
    pub description: Option<String>,
    /// `Some(None)` clears the refined GPS
    pub refined_gps: Option<Option<GpsCoordinates>>,
    /// Empty string clears the location name
    pub location_name: Option<String>,
}

impl PhotoEdit {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.refined_gps.is_none() && self.location_name.is_none()
    }

    /// Apply the present fields to `photo`
    pub fn apply_to(&self, photo: &mut Photo) {
        if let Some(description) = &self.description {
            photo.description = non_blank(description);
        }
        if let Some(refined_gps) = self.refined_gps {
            photo.refined_gps = refined_gps;
        }
        if let Some(location_name) = &self.location_name {
            photo.location_name = non_blank(location_name);
        }
        if !self.is_empty() {
            photo.dirty = true;
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_scan_drops_blank_description() {
        let mut scanned = ScannedPhoto::new("a.jpg");
        scanned.description = Some("   ".to_string());
        let photo = Photo::from_scan(scanned);
        assert!(photo.description.is_none());
        assert!(!photo.has_description());
    }

    #[test]
    fn test_edit_touches_only_present_fields() {
        let mut photo = Photo::new("a.jpg");
        photo.description = Some("old".to_string());
        photo.location_name = Some("Place".to_string());

        PhotoEdit {
            refined_gps: Some(Some(GpsCoordinates::new(1.0, 2.0))),
            ..Default::default()
        }
        .apply_to(&mut photo);

        assert_eq!(photo.description.as_deref(), Some("old"));
        assert_eq!(photo.location_name.as_deref(), Some("Place"));
        assert_eq!(photo.refined_gps, Some(GpsCoordinates::new(1.0, 2.0)));
        assert!(photo.dirty);
    }

    #[test]
    fn test_edit_clears_with_empty_values() {
        let mut photo = Photo::new("a.jpg");
        photo.description = Some("old".to_string());
        photo.refined_gps = Some(GpsCoordinates::new(1.0, 2.0));

        PhotoEdit {
            description: Some(String::new()),
            refined_gps: Some(None),
            location_name: None,
        }
        .apply_to(&mut photo);

        assert!(photo.description.is_none());
        assert!(photo.refined_gps.is_none());
    }

    #[test]
    fn test_empty_edit_does_not_mark_dirty() {
        let mut photo = Photo::new("a.jpg");
        PhotoEdit::default().apply_to(&mut photo);
        assert!(!photo.dirty);
    }

    #[test]
    fn test_minimal_json_deserializes() {
        let photo: Photo = serde_json::from_str(r#"{"filename": "x.jpg"}"#).unwrap();
        assert_eq!(photo.describe.status, ProcessingStatus::Untouched);
        assert_eq!(photo.locate.status, ProcessingStatus::Untouched);
        assert!(photo.effective_gps().is_none());
    }
}
