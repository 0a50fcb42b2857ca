// src/pipeline.rs
// One scheduled execution per target: fetch → diff → score → persist.
//
// Retry discipline: fetch and persistence failures retry a bounded number
// of times with a fixed per-class delay; exhaustion marks the target
// erroring but still advances its schedule so a permanently broken target
// cannot monopolize scheduling capacity. A diff panic is a defect signal,
// fatal for the run, never retried.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::Settings;
use crate::diff;
use crate::error::{PersistenceError, PipelineError};
use crate::fetch::{Capture, PageFetcher};
use crate::metrics::ensure_metrics_described;
use crate::score::Scorer;
use crate::store::{ChangeStore, ObservationStore, TargetCatalog};
use crate::types::{
    ChangeAlert, Observation, ObservationId, PipelineRun, RunState, ScoreResult, Target,
    TargetStatus,
};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts per run, first try included.
    pub max_attempts: u32,
    pub fetch_retry_delay: Duration,
    pub persist_retry_delay: Duration,
}

impl From<&Settings> for RetryPolicy {
    fn from(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.fetch_retries,
            fetch_retry_delay: settings.fetch_retry_delay,
            persist_retry_delay: settings.persist_retry_delay,
        }
    }
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Succeeded {
        changed: bool,
        alert: Option<ChangeAlert>,
    },
    Failed(PipelineError),
}

pub struct Pipeline {
    fetcher: Arc<dyn PageFetcher>,
    scorer: Scorer,
    catalog: Arc<dyn TargetCatalog>,
    observations: Arc<dyn ObservationStore>,
    changes: Arc<dyn ChangeStore>,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        scorer: Scorer,
        catalog: Arc<dyn TargetCatalog>,
        observations: Arc<dyn ObservationStore>,
        changes: Arc<dyn ChangeStore>,
        retry: RetryPolicy,
    ) -> Self {
        ensure_metrics_described();
        Self {
            fetcher,
            scorer,
            catalog,
            observations,
            changes,
            retry,
        }
    }

    /// Execute one full run for a target. Safe to re-run at-least-once:
    /// observation inserts are idempotent per capture window, and schedule
    /// bookkeeping is only written on terminal outcomes.
    pub async fn run_target(&self, target: &Target) -> PipelineOutcome {
        metrics::counter!("sitewatch_runs_total").increment(1);
        let mut run = PipelineRun::new(target.id);

        run.advance(RunState::Fetching);
        let capture = match self.fetch_with_retries(target, &mut run).await {
            Ok(capture) => capture,
            Err(err) => return self.fail(target, run, err).await,
        };

        let captured_at = Utc::now();
        let observation = Observation {
            id: ObservationId::new(),
            target_id: target.id,
            captured_at,
            title: capture.title,
            text: capture.text,
            digest: capture.digest,
            artifact_path: capture.artifact_path,
            meta: capture.meta,
        };
        let previous = match self
            .with_persist_retries("latest_observation", || {
                self.observations.latest_observation(target.id)
            })
            .await
        {
            Ok(previous) => previous,
            Err(err) => return self.fail(target, run, err).await,
        };

        run.advance(RunState::Diffing);
        let delta = match panic::catch_unwind(AssertUnwindSafe(|| {
            diff::diff(previous.as_ref(), &observation)
        })) {
            Ok(delta) => delta,
            Err(payload) => {
                let detail = panic_detail(payload);
                tracing::error!(
                    target = %target.id,
                    run = %run.run_id,
                    defect = true,
                    detail = %detail,
                    "diff computation panicked"
                );
                return self.fail(target, run, PipelineError::DiffPanic(detail)).await;
            }
        };

        let score: Option<ScoreResult> = if delta.has_changes {
            run.advance(RunState::Scoring);
            let old_text = previous.as_ref().map(|o| o.text.as_str()).unwrap_or("");
            Some(
                self.scorer
                    .score(&target.name, old_text, &observation.text, &delta)
                    .await,
            )
        } else {
            None
        };

        run.advance(RunState::Completing);
        let observation_id = match self
            .with_persist_retries("insert_observation", || {
                self.observations.insert_observation(observation.clone())
            })
            .await
        {
            Ok(id) => id,
            Err(err) => return self.fail(target, run, err).await,
        };

        let mut alert = None;
        if let (Some(score), Some(previous)) = (&score, &previous) {
            metrics::counter!("sitewatch_changes_total").increment(1);
            alert = match self
                .with_persist_retries("insert_change", || {
                    self.changes
                        .insert_change(target, previous.id, observation_id, &delta, score)
                })
                .await
            {
                Ok(alert) => alert,
                Err(err) => return self.fail(target, run, err).await,
            };
            if let Some(alert) = &alert {
                metrics::counter!("sitewatch_alerts_total").increment(1);
                tracing::info!(
                    target = %target.id,
                    change = %alert.change_id,
                    score = alert.score,
                    category = ?alert.category,
                    "change met alert threshold"
                );
            }
        }

        let now = Utc::now();
        let next_due = now + target.scan_interval.as_duration();
        if let Err(err) = self
            .with_persist_retries("update_target_status", || {
                self.catalog
                    .update_target_status(target.id, TargetStatus::Active, now, next_due)
            })
            .await
        {
            return self.fail(target, run, err).await;
        }

        run.advance(RunState::Succeeded);
        tracing::info!(
            target = %target.id,
            run = %run.run_id,
            changed = delta.has_changes,
            similarity = delta.similarity,
            score = score.as_ref().map(|s| s.score),
            "run completed"
        );

        PipelineOutcome::Succeeded {
            changed: delta.has_changes,
            alert,
        }
    }

    async fn fetch_with_retries(
        &self,
        target: &Target,
        run: &mut PipelineRun,
    ) -> Result<Capture, PipelineError> {
        loop {
            run.attempt += 1;
            match self.fetcher.fetch(target).await {
                Ok(capture) => return Ok(capture),
                Err(err) => {
                    metrics::counter!("sitewatch_fetch_errors_total").increment(1);
                    tracing::warn!(
                        target = %target.id,
                        url = %target.url,
                        attempt = run.attempt,
                        error = %err,
                        "fetch attempt failed"
                    );
                    if run.attempt >= self.retry.max_attempts {
                        return Err(PipelineError::Fetch {
                            source: err,
                            attempts: run.attempt,
                        });
                    }
                    tokio::time::sleep(self.retry.fetch_retry_delay).await;
                }
            }
        }
    }

    async fn with_persist_retries<T, F, Fut>(
        &self,
        what: &'static str,
        mut op: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PersistenceError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(what, attempt, error = %err, "persistence attempt failed");
                    if attempt >= self.retry.max_attempts {
                        return Err(PipelineError::Persistence {
                            source: err,
                            attempts: attempt,
                        });
                    }
                    tokio::time::sleep(self.retry.persist_retry_delay).await;
                }
            }
        }
    }

    /// Terminal failure: mark the target erroring and still advance its
    /// schedule — availability over completeness.
    async fn fail(
        &self,
        target: &Target,
        mut run: PipelineRun,
        err: PipelineError,
    ) -> PipelineOutcome {
        run.failure = Some(err.to_string());
        run.advance(RunState::Failed);
        metrics::counter!("sitewatch_run_failures_total").increment(1);

        let now = Utc::now();
        let next_due = now + target.scan_interval.as_duration();
        if let Err(e) = self
            .catalog
            .update_target_status(target.id, TargetStatus::Erroring, now, next_due)
            .await
        {
            tracing::warn!(target = %target.id, error = %e, "marking target erroring failed");
        }

        tracing::warn!(
            target = %target.id,
            run = %run.run_id,
            error = %err,
            attempts = run.attempt,
            "run failed"
        );
        PipelineOutcome::Failed(err)
    }
}

fn panic_detail(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
