//! Nearby-description context for describe prompts
//!
//! Existing captions of photos taken close by are shown to the model so it
//! picks a different fact instead of repeating its neighbours.

use chrono::Duration;
use tagiato_common::config::ContextSettings;
use tagiato_common::GpsCoordinates;

use crate::models::Photo;

/// Window for borrowing a position from a photo taken around the same time
const POSITION_ESTIMATE_WINDOW_MINUTES: i64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct NearbyDescription {
    pub filename: String,
    pub description: String,
    pub distance_km: f64,
}

/// Effective GPS, or the GPS of the temporally closest photo within 30 minutes
pub fn estimate_position(photo: &Photo, photos: &[Photo]) -> Option<GpsCoordinates> {
    if let Some(resolved) = photo.effective_gps() {
        return Some(resolved.gps);
    }
    let timestamp = photo.timestamp?;
    let window = Duration::minutes(POSITION_ESTIMATE_WINDOW_MINUTES);

    photos
        .iter()
        .filter(|other| other.filename != photo.filename)
        .filter_map(|other| {
            let gap = (other.timestamp? - timestamp).abs();
            let gps = other.effective_gps()?.gps;
            (gap <= window).then_some((gap, gps))
        })
        .min_by_key(|(gap, _)| *gap)
        .map(|(_, gps)| gps)
}

/// Described photos within the configured radius, nearest first
pub fn nearby_descriptions(photo: &Photo, photos: &[Photo], settings: &ContextSettings) -> Vec<NearbyDescription> {
    if !settings.enabled || settings.max_count == 0 {
        return Vec::new();
    }
    let Some(target) = estimate_position(photo, photos) else {
        return Vec::new();
    };

    let mut nearby: Vec<NearbyDescription> = photos
        .iter()
        .filter(|other| other.filename != photo.filename)
        .filter_map(|other| {
            let description = other.description.as_deref().filter(|d| !d.trim().is_empty())?;
            let distance_km = target.distance_to_km(&estimate_position(other, photos)?);
            (distance_km <= settings.radius_km).then(|| NearbyDescription {
                filename: other.filename.clone(),
                description: description.to_string(),
                distance_km,
            })
        })
        .collect();

    nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    nearby.truncate(settings.max_count);
    nearby
}

/// Caption lines for the prompt; the photo's own caption comes first
pub fn prompt_context(photo: &Photo, photos: &[Photo], settings: &ContextSettings) -> Vec<String> {
    let nearby = nearby_descriptions(photo, photos, settings);
    if !nearby.is_empty() {
        tracing::debug!(
            filename = %photo.filename,
            neighbours = ?nearby.iter().map(|n| format!("{} ({:.1}km)", n.filename, n.distance_km)).collect::<Vec<_>>(),
            "Nearby caption context"
        );
    }

    photo
        .description
        .iter()
        .filter(|d| !d.trim().is_empty())
        .cloned()
        .chain(nearby.into_iter().map(|n| n.description))
        .collect()
}
