//! Timestamp matching of photos against a location-history track
//!
//! The track is built once per run and is read-only afterwards. Matching is a
//! pure function: binary search for the insertion point, then compare only the
//! immediate predecessor and successor.

use chrono::{DateTime, Utc};
use tagiato_common::{GpsCoordinates, Waypoint};
use thiserror::Error;

use crate::models::MatchedLocation;

/// Track construction errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackError {
    /// Waypoint timestamp earlier than its predecessor
    #[error("Waypoint {index} is earlier than the waypoint before it")]
    OutOfOrder { index: usize },
}

/// Immutable, time-ordered waypoint sequence
#[derive(Debug, Clone, Default)]
pub struct WaypointTrack {
    waypoints: Vec<Waypoint>,
}

impl WaypointTrack {
    /// Build from waypoints already in non-decreasing timestamp order
    pub fn from_sorted(waypoints: Vec<Waypoint>) -> Result<Self, TrackError> {
        if let Some(index) = waypoints
            .windows(2)
            .position(|pair| pair[1].timestamp < pair[0].timestamp)
        {
            return Err(TrackError::OutOfOrder { index: index + 1 });
        }
        Ok(Self { waypoints })
    }

    /// Build from waypoints in any order; equal timestamps keep input order
    pub fn from_unsorted(mut waypoints: Vec<Waypoint>) -> Self {
        waypoints.sort_by_key(|w| w.timestamp);
        Self { waypoints }
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.waypoints.first()?.timestamp, self.waypoints.last()?.timestamp))
    }
}

/// Nearest waypoint accepted for a photo
#[derive(Debug, Clone, PartialEq)]
pub struct LocationMatch {
    pub gps: GpsCoordinates,
    pub gap_minutes: f64,
    pub place_name: Option<String>,
}

impl From<LocationMatch> for MatchedLocation {
    fn from(m: LocationMatch) -> Self {
        MatchedLocation {
            gps: m.gps,
            gap_minutes: m.gap_minutes,
            place_name: m.place_name,
        }
    }
}

/// Nearest-in-time waypoint, or `None` when the track is empty or the nearest
/// waypoint is more than `max_gap_minutes` away.
///
/// Equidistant neighbours resolve to the earlier waypoint (and to the first of
/// several waypoints sharing one timestamp). Timestamps outside
/// the track clamp to the nearest endpoint and are subject to the same limit.
pub fn match_location(
    photo_timestamp: DateTime<Utc>,
    track: &WaypointTrack,
    max_gap_minutes: u32,
) -> Option<LocationMatch> {
    let waypoints = track.waypoints();
    let idx = waypoints.partition_point(|w| w.timestamp < photo_timestamp);

    let delta_ms = |w: &Waypoint| (photo_timestamp - w.timestamp).num_milliseconds().abs();

    // First of any run of waypoints sharing the predecessor's timestamp
    let before = idx.checked_sub(1).map(|i| {
        let ts = waypoints[i].timestamp;
        &waypoints[waypoints.partition_point(|w| w.timestamp < ts)]
    });
    let after = waypoints.get(idx);

    let nearest = match (before, after) {
        (Some(b), Some(a)) => {
            if delta_ms(a) < delta_ms(b) {
                a
            } else {
                b
            }
        }
        (Some(b), None) => b,
        (None, Some(a)) => a,
        (None, None) => return None,
    };

    let gap_ms = delta_ms(nearest);
    if gap_ms > i64::from(max_gap_minutes) * 60_000 {
        return None;
    }

    Some(LocationMatch {
        gps: nearest.gps,
        gap_minutes: gap_ms as f64 / 60_000.0,
        place_name: nearest.place_name.clone(),
    })
}
