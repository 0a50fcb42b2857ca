//! sitewatch — competitor page monitoring daemon.
//! Boots the scheduler loop over a file-seeded target catalog and runs
//! until ctrl-c, then drains in-flight pipeline runs.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sitewatch::config::{load_targets, Settings};
use sitewatch::fetch::HttpFetcher;
use sitewatch::pipeline::{Pipeline, RetryPolicy};
use sitewatch::scheduler::{Monitor, SchedulerCfg};
use sitewatch::score::Scorer;
use sitewatch::store::{MemoryCatalog, MemoryChangeStore, MemoryObservationStore};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sitewatch=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::from_env();
    tracing::info!(
        pool = settings.worker_pool_size,
        tick_secs = settings.tick_interval.as_secs(),
        "starting sitewatch"
    );

    let targets = load_targets(&settings.targets_path)
        .with_context(|| format!("loading targets from {}", settings.targets_path.display()))?;
    anyhow::ensure!(!targets.is_empty(), "no targets configured");

    let catalog = Arc::new(MemoryCatalog::new());
    for target in targets {
        tracing::info!(target = %target.id, name = %target.name, url = %target.url, "tracking");
        catalog.insert(target).await;
    }

    let observations = Arc::new(MemoryObservationStore::new(settings.dedup_window));
    let changes = Arc::new(MemoryChangeStore::new());
    let fetcher = Arc::new(HttpFetcher::new(&settings)?);
    let scorer = Scorer::from_settings(&settings);

    let pipeline = Arc::new(Pipeline::new(
        fetcher,
        scorer,
        catalog.clone(),
        observations,
        changes,
        RetryPolicy::from(&settings),
    ));

    let monitor = Monitor::new(pipeline, catalog, SchedulerCfg::from(&settings));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    monitor.run(shutdown_rx).await;
    Ok(())
}
