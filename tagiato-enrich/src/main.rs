//! tagiato-enrich - resumable photo enrichment
//!
//! Usage: `tagiato-enrich <photos_dir> <describe|locate>`
//!
//! Resumes the photo directory from `.tagiato/state.json`, picks up new JPEG
//! files, runs one batch of the given operation over every photo not yet done,
//! and saves the state and the descriptions digest. Ctrl-C stops dispatching;
//! in-flight backend calls finish first.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tagiato_common::config::{ConfigResolver, WorkDir};
use tagiato_common::events::{EnrichEvent, EventBus};
use tagiato_common::{AiOperation, ProcessingStatus};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use tagiato_enrich::services::ai_gateway::{self, AiGateway};
use tagiato_enrich::services::collaborators::{JpegDirectoryScanner, PhotoScanner};
use tagiato_enrich::services::enrichment::write_descriptions_file;
use tagiato_enrich::services::{BatchOrchestrator, SourceImageThumbnails, StateStore, TaskRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let (Some(photos_dir), Some(operation)) = (args.next(), args.next()) else {
        bail!("usage: tagiato-enrich <photos_dir> <describe|locate>");
    };
    let photos_dir = PathBuf::from(photos_dir);
    let operation: AiOperation = operation.parse()?;

    let work_dir = WorkDir::new(&photos_dir);
    let config = ConfigResolver::new(work_dir.clone())
        .resolve()
        .context("Failed to resolve configuration")?;
    tagiato_common::logging::init_tracing(&config.logging.level)?;

    info!("Starting tagiato-enrich");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Photos: {}", photos_dir.display());

    let available = ai_gateway::available_providers();
    let provider = ai_gateway::ProviderConfig::from_settings(match operation {
        AiOperation::Describe => &config.describe,
        AiOperation::Locate => &config.locate,
    });
    if !available.contains(&provider.kind) {
        warn!(provider = %provider.kind, "AI backend not found on PATH");
    }

    work_dir.ensure_dirs().await?;
    let event_bus = EventBus::default();
    let store = Arc::new(StateStore::open(work_dir.clone(), event_bus.clone()).await?);

    let scanned = JpegDirectoryScanner.scan(&photos_dir).await?;
    store.merge_scan(scanned).await;
    if store.is_empty().await {
        bail!("No JPEG files in {}", photos_dir.display());
    }

    let pending: Vec<String> = store
        .photos()
        .await
        .into_iter()
        .filter(|p| p.operation(operation).status != ProcessingStatus::Done)
        .map(|p| p.filename)
        .collect();
    if pending.is_empty() {
        info!(operation = %operation, "Nothing to do, every photo is done");
        return Ok(());
    }

    let orchestrator = BatchOrchestrator::new(
        Arc::clone(&store),
        Arc::new(AiGateway::from_config(&config)),
        Arc::new(SourceImageThumbnails::new(&photos_dir)),
        Arc::new(TaskRegistry::new()),
        event_bus.clone(),
        &config,
    );

    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EnrichEvent::BatchProgress {
                    total,
                    completed,
                    errored,
                    last_filename,
                    ..
                }) => {
                    info!("[{}/{}] {} ({} errors)", completed + errored, total, last_filename, errored);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Progress display lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    orchestrator.start(Some(pending), operation).await?;

    let stopper = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after in-flight tasks");
            if let Err(e) = stopper.stop().await {
                warn!(error = %e, "Stop request ignored");
            }
        }
    });

    let progress = orchestrator
        .wait()
        .await
        .context("Batch disappeared before finishing")?;

    store.save().await?;
    write_descriptions_file(&store).await?;

    info!(
        state = ?progress.state,
        completed = progress.completed,
        errored = progress.errored,
        not_started = progress.not_started,
        "Batch finished"
    );
    if let Some(failure) = progress.failure {
        bail!("Batch aborted: {}", failure);
    }
    Ok(())
}
