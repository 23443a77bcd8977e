//! Service modules for the enrichment pipeline

pub mod ai_gateway;
pub mod batch_orchestrator;
pub mod collaborators;
pub mod context;
pub mod enrichment;
pub mod geocode_cache;
pub mod gps_resolver;
pub mod location_matcher;
pub mod state_store;
pub mod task_registry;

pub use ai_gateway::{AiError, AiGateway, AiRequest, PhotoAnalyzer, ProviderConfig};
pub use batch_orchestrator::BatchOrchestrator;
pub use collaborators::{
    Geocoder, JpegDirectoryScanner, MetadataWriter, PhotoMetadata, PhotoScanner, SourceImageThumbnails,
    ThumbnailGenerator, TimelineLoader,
};
pub use enrichment::{
    annotate_place_names, apply_timeline, export_metadata, render_descriptions_markdown,
    ExportSummary,
};
pub use geocode_cache::{CachedGeocoder, GeocodeCache, GeocodeError};
pub use gps_resolver::{GpsSource, ResolvedGps};
pub use location_matcher::{match_location, LocationMatch, TrackError, WaypointTrack};
pub use state_store::{StateStats, StateStore};
pub use task_registry::TaskRegistry;
