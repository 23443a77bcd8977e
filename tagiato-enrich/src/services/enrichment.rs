//! Enrichment glue around the StateStore
//!
//! Timeline application, place-name annotation, metadata export and the
//! markdown digest. Each step reads and writes photos through the store.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tagiato_common::persist::write_atomic;
use tagiato_common::GpsCoordinates;

use crate::error::{EnrichError, EnrichResult};
use crate::models::{MatchedLocation, Photo};
use crate::services::collaborators::{Geocoder, MetadataWriter, PhotoMetadata};
use crate::services::location_matcher::{match_location, WaypointTrack};
use crate::services::state_store::StateStore;

/// Places listed in the digest header
const DIGEST_PLACE_LIMIT: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineSummary {
    pub matched: usize,
    pub unmatched: usize,
    /// No timestamp, or EXIF GPS already present
    pub skipped: usize,
}

/// Match every dated photo without EXIF GPS against `track`
///
/// An empty track is rejected up front.
pub async fn apply_timeline(store: &StateStore, track: &WaypointTrack, max_gap_minutes: u32) -> EnrichResult<TimelineSummary> {
    if track.is_empty() {
        return Err(EnrichError::InvalidInput("Timeline track is empty".to_string()));
    }

    let mut summary = TimelineSummary::default();
    for photo in store.photos().await {
        let Some(timestamp) = photo.timestamp.filter(|_| photo.original_gps.is_none()) else {
            summary.skipped += 1;
            continue;
        };

        let matched: Option<MatchedLocation> = match_location(timestamp, track, max_gap_minutes).map(Into::into);
        if matched.is_some() {
            summary.matched += 1;
        } else {
            summary.unmatched += 1;
        }

        store
            .update(&photo.filename, |p| {
                if p.matched_location != matched {
                    p.matched_location = matched;
                    p.dirty = true;
                }
            })
            .await?;
    }

    tracing::info!(
        waypoints = track.len(),
        matched = summary.matched,
        unmatched = summary.unmatched,
        skipped = summary.skipped,
        max_gap_minutes,
        "Timeline applied"
    );
    Ok(summary)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceNameSummary {
    pub named: usize,
    pub unknown: usize,
    pub failed: usize,
}

/// Fill `place_name` for photos that have a position but no name yet
///
/// Lookup failures are logged and counted; they never abort the pass.
pub async fn annotate_place_names(store: &StateStore, geocoder: &dyn Geocoder) -> EnrichResult<PlaceNameSummary> {
    let mut summary = PlaceNameSummary::default();

    for photo in store.photos().await {
        if photo.place_name.is_some() {
            continue;
        }
        let Some(resolved) = photo.effective_gps() else {
            continue;
        };

        match geocoder.reverse(resolved.gps).await {
            Ok(Some(name)) => {
                let gps = resolved.gps;
                // The position may have been edited while the lookup ran
                store
                    .update(&photo.filename, |p| {
                        if p.effective_gps().map(|r| r.gps) == Some(gps) {
                            p.place_name = Some(name);
                        }
                    })
                    .await?;
                summary.named += 1;
            }
            Ok(None) => summary.unknown += 1,
            Err(e) => {
                tracing::warn!(
                    filename = %photo.filename,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Reverse geocoding failed"
                );
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        named = summary.named,
        unknown = summary.unknown,
        failed = summary.failed,
        "Place names annotated"
    );
    Ok(summary)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub written: usize,
    /// Dirty photos with nothing to write
    pub skipped: usize,
    /// (filename, error message)
    pub errors: Vec<(String, String)>,
}

/// Hand dirty photos to the metadata writer and clear their dirty flag
pub async fn export_metadata(
    store: &StateStore,
    writer: &dyn MetadataWriter,
    selection: Option<&[String]>,
) -> EnrichResult<ExportSummary> {
    let mut summary = ExportSummary::default();
    let photos_dir = store.work_dir().photos_dir().to_path_buf();

    let selected = store
        .photos()
        .await
        .into_iter()
        .filter(|p| p.dirty)
        .filter(|p| selection.map_or(true, |s| s.contains(&p.filename)));

    for photo in selected {
        let metadata = PhotoMetadata::from_photo(&photo);
        if metadata.is_blank() {
            summary.skipped += 1;
            continue;
        }

        match writer.write(&photos_dir, &metadata).await {
            Ok(()) => {
                store.update(&photo.filename, |p| p.dirty = false).await?;
                summary.written += 1;
            }
            Err(e) => {
                tracing::warn!(filename = %photo.filename, error = %e, "Metadata write failed");
                summary.errors.push((photo.filename.clone(), e.to_string()));
            }
        }
    }

    tracing::info!(
        written = summary.written,
        skipped = summary.skipped,
        errors = summary.errors.len(),
        "Metadata exported"
    );
    Ok(summary)
}

/// Day-grouped markdown digest of captions and positions
///
/// Photos without a timestamp are listed last under their own heading.
pub fn render_descriptions_markdown(photos: &[Photo]) -> String {
    let mut lines: Vec<String> = vec!["# Photo descriptions".to_string()];

    let dated: Vec<&Photo> = photos.iter().filter(|p| p.timestamp.is_some()).collect();
    if let (Some(start), Some(end)) = (
        dated.iter().filter_map(|p| p.timestamp).min(),
        dated.iter().filter_map(|p| p.timestamp).max(),
    ) {
        lines.push(format!(
            "**Period**: {} - {}",
            start.format("%d. %m."),
            end.format("%d. %m. %Y")
        ));
    }

    let mut places: Vec<&str> = Vec::new();
    for name in photos
        .iter()
        .filter_map(|p| p.location_name.as_deref().or(p.place_name.as_deref()))
    {
        if !places.contains(&name) {
            places.push(name);
        }
    }
    if !places.is_empty() {
        let shown: Vec<&str> = places.into_iter().take(DIGEST_PLACE_LIMIT).collect();
        lines.push(format!("**Places**: {}", shown.join(", ")));
    }
    lines.push(format!("**Photos**: {}", photos.len()));
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push(String::new());

    let mut days: BTreeMap<NaiveDate, Vec<&Photo>> = BTreeMap::new();
    for photo in &dated {
        if let Some(ts) = photo.timestamp {
            days.entry(ts.date_naive()).or_default().push(photo);
        }
    }
    for day_photos in days.values_mut() {
        day_photos.sort_by_key(|p| p.timestamp);
    }

    for (day, day_photos) in &days {
        lines.push(format!("## {}", day.format("%d %B %Y")));
        lines.push(String::new());
        for photo in day_photos {
            push_photo_entry(&mut lines, photo);
        }
    }

    let undated: Vec<&Photo> = photos.iter().filter(|p| p.timestamp.is_none()).collect();
    if !undated.is_empty() {
        lines.push("## Undated".to_string());
        lines.push(String::new());
        for photo in undated {
            push_photo_entry(&mut lines, photo);
        }
    }

    lines.join("\n")
}

fn push_photo_entry(lines: &mut Vec<String>, photo: &Photo) {
    lines.push(format!("### {}", photo.filename));
    if let Some(resolved) = photo.effective_gps() {
        lines.push(format_gps_line(resolved.gps));
    }
    lines.push(String::new());
    lines.push(
        photo
            .description
            .clone()
            .unwrap_or_else(|| "(no description)".to_string()),
    );
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push(String::new());
}

fn format_gps_line(gps: GpsCoordinates) -> String {
    format!("GPS: {}", gps)
}

/// Render the digest into `<photos_dir>/descriptions.md`
pub async fn write_descriptions_file(store: &StateStore) -> EnrichResult<()> {
    let path = store.work_dir().descriptions_file();
    let markdown = render_descriptions_markdown(&store.photos().await);
    write_atomic(&path, markdown.as_bytes()).await?;
    tracing::info!(path = %path.display(), "Descriptions digest written");
    Ok(())
}
