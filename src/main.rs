//! source-digest: binary entrypoint.
//! Loads config, seeds the store, starts the scheduler and the snapshot flusher, and
//! serves the admin router.

use shuttle_axum::ShuttleAxum;
use std::sync::Arc;
use std::time::Duration;

use source_digest::metrics::Metrics;
use source_digest::store::memory::spawn_flusher;
use source_digest::{create_router, init_tracing, AppConfig, AppState, MemoryStore, Pipeline, Scheduler};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default()?;
    let metrics = Metrics::init(cfg.scheduler.tick_secs)?;

    let store = Arc::new(
        MemoryStore::open(cfg.store.snapshot_path.clone())
            .map_err(shuttle_runtime::CustomError::new)?,
    );
    store
        .seed_from_config(&cfg)
        .map_err(shuttle_runtime::CustomError::new)?;
    spawn_flusher(Arc::clone(&store), Duration::from_secs(cfg.store.flush_secs));

    let pipeline = Arc::new(Pipeline::from_config(&cfg, store)?);
    Scheduler::new(
        Arc::clone(&pipeline),
        Duration::from_secs(cfg.scheduler.tick_secs),
    )
    .spawn();

    tracing::info!(
        sources = cfg.sources.len(),
        reports = cfg.reports.len(),
        destinations = cfg.destinations.len(),
        "source-digest started"
    );

    let router = create_router(AppState::new(pipeline), &metrics);
    Ok(router.into())
}
