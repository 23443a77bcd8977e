//! GPS priority merge
//!
//! Priority: refined (AI or user) → timeline match → original EXIF.
//! Evaluated on every read and never stored, so an edit to any one source is
//! reflected immediately.
//!
//! A low-confidence refined GPS still outranks a timeline match. Whether it
//! should is a policy question left to the caller (it can clear
//! `refined_gps` or inspect `locate_confidence`).

use serde::{Deserialize, Serialize};
use tagiato_common::GpsCoordinates;

use crate::models::Photo;

/// Which field supplied the effective GPS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpsSource {
    Refined,
    Timeline,
    Exif,
}

/// Effective GPS plus its origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedGps {
    pub gps: GpsCoordinates,
    pub source: GpsSource,
}

/// First present of refined, matched, original
pub fn resolve(
    refined: Option<GpsCoordinates>,
    matched: Option<GpsCoordinates>,
    original: Option<GpsCoordinates>,
) -> Option<ResolvedGps> {
    refined
        .map(|gps| ResolvedGps {
            gps,
            source: GpsSource::Refined,
        })
        .or_else(|| {
            matched.map(|gps| ResolvedGps {
                gps,
                source: GpsSource::Timeline,
            })
        })
        .or_else(|| {
            original.map(|gps| ResolvedGps {
                gps,
                source: GpsSource::Exif,
            })
        })
}

pub fn resolve_photo(photo: &Photo) -> Option<ResolvedGps> {
    resolve(
        photo.refined_gps,
        photo.matched_location.as_ref().map(|m| m.gps),
        photo.original_gps,
    )
}
