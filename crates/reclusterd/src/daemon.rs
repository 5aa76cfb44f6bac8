//! `reclusterd run`: the long-running controller.
//!
//! 1. Resolves settings from the TOML file (or defaults)
//! 2. Opens the state store
//! 3. Spawns the feed syncer and the planning loop
//! 4. Waits for Ctrl-C, then signals both to stop

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use recluster_core::{BackendMode, ControllerConfig};
use recluster_feeds::FeedSyncer;
use recluster_planner::{Backend, Controller, DryRunBackend, Planner, PlannerConfig, StoreBackend};
use recluster_state::StateStore;

pub(crate) const DB_FILE: &str = "recluster.redb";

pub async fn run(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match &config_path {
        Some(path) => ControllerConfig::from_file(path)?,
        None => ControllerConfig::default(),
    };
    let mut settings = config.resolve()?;
    if let Some(dir) = data_dir {
        settings.data_dir = dir;
    }
    info!(
        config = ?config_path,
        step_interval_ms = settings.step_interval.as_millis() as u64,
        idle_cooldown_secs = settings.idle_cooldown.as_secs(),
        utc_offset = %settings.utc_offset,
        backend = ?settings.backend,
        "Recluster daemon starting"
    );

    std::fs::create_dir_all(&settings.data_dir)?;
    let db_path = settings.data_dir.join(DB_FILE);
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let backend: Box<dyn Backend> = match settings.backend {
        BackendMode::Simulated => Box::new(StoreBackend::new(store.clone())),
        BackendMode::DryRun => Box::new(DryRunBackend),
    };
    let planner = Planner::new(PlannerConfig {
        idle_cooldown: settings.idle_cooldown,
        utc_offset: settings.utc_offset,
    });
    let mut controller = Controller::new(Arc::new(store.clone()), backend, planner)
        .with_step_deadline(settings.step_deadline);
    let mut syncer = FeedSyncer::new(store, settings.feed_interval, settings.feed_timeout);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let feeds_shutdown = shutdown_rx.clone();

    // ── Background tasks ───────────────────────────────────────

    let feeds_handle = tokio::spawn(async move {
        syncer.run(feeds_shutdown).await;
    });

    let interval = settings.step_interval;
    let controller_handle = tokio::spawn(async move {
        controller.run(interval, shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = feeds_handle.await;
    let _ = controller_handle.await;

    info!("Recluster daemon stopped");
    Ok(())
}
