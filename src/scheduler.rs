// src/scheduler.rs
// Due-target enumeration and bounded dispatch. One lightweight task per
// pipeline run; a fixed-size semaphore caps simultaneous runs (and with
// them outbound connections), independent of target count. Dispatch is
// fire-and-forget — completion feedback flows through the catalog.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Semaphore};

use crate::config::Settings;
use crate::metrics::ensure_metrics_described;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::store::TargetCatalog;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerCfg {
    pub tick_interval: std::time::Duration,
    pub worker_pool_size: usize,
    pub shutdown_grace: std::time::Duration,
}

impl From<&Settings> for SchedulerCfg {
    fn from(settings: &Settings) -> Self {
        Self {
            tick_interval: settings.tick_interval,
            worker_pool_size: settings.worker_pool_size,
            shutdown_grace: settings.shutdown_grace,
        }
    }
}

pub struct Monitor {
    pipeline: Arc<Pipeline>,
    catalog: Arc<dyn TargetCatalog>,
    permits: Arc<Semaphore>,
    cfg: SchedulerCfg,
}

impl Monitor {
    pub fn new(pipeline: Arc<Pipeline>, catalog: Arc<dyn TargetCatalog>, cfg: SchedulerCfg) -> Self {
        ensure_metrics_described();
        Self {
            pipeline,
            catalog,
            permits: Arc::new(Semaphore::new(cfg.worker_pool_size)),
            cfg,
        }
    }

    /// One scheduling pass: every due target yields exactly one run
    /// submission. Returns the number dispatched. Waiting for a permit here
    /// is what enforces the global concurrency bound.
    pub async fn tick_once(&self, now: DateTime<Utc>) -> usize {
        let due = match self.catalog.list_due_targets(now).await {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!(error = %e, "listing due targets failed");
                return 0;
            }
        };

        let mut dispatched = 0usize;
        for target in due {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break, // semaphore closed: shutting down
            };
            let pipeline = Arc::clone(&self.pipeline);
            tokio::spawn(async move {
                // Held for the whole run; dropped exactly once, even if the
                // run task unwinds.
                let _permit = permit;
                if let PipelineOutcome::Failed(err) = pipeline.run_target(&target).await {
                    tracing::debug!(target = %target.id, error = %err, "dispatched run failed");
                }
            });
            dispatched += 1;
        }

        metrics::counter!("sitewatch_dispatch_total").increment(dispatched as u64);
        metrics::gauge!("sitewatch_last_tick_ts").set(now.timestamp() as f64);
        if dispatched > 0 {
            tracing::info!(dispatched, "scheduler tick");
        }
        dispatched
    }

    /// Tick until shutdown flips, then give in-flight runs a grace period
    /// to drain.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.cfg.tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_once(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("scheduler stopping; draining in-flight runs");
        self.drain().await;
    }

    async fn drain(&self) {
        let all = self.cfg.worker_pool_size as u32;
        match tokio::time::timeout(self.cfg.shutdown_grace, self.permits.acquire_many(all)).await {
            Ok(Ok(_)) => tracing::info!("all in-flight runs drained"),
            Ok(Err(_)) => {}
            Err(_) => tracing::warn!("shutdown grace elapsed with runs still in flight"),
        }
    }
}
