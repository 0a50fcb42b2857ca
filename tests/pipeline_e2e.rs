// tests/pipeline_e2e.rs
// Full pipeline runs over scripted fetchers and in-memory stores: first
// observation, detected change with fallback scoring, unchanged content,
// and retry exhaustion.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use url::Url;

use sitewatch::error::{FetchError, ModelError, PipelineError};
use sitewatch::fetch::{self, Capture, PageFetcher};
use sitewatch::pipeline::{Pipeline, PipelineOutcome, RetryPolicy};
use sitewatch::score::{ModelAssessment, ModelClient, ModelRequest, Scorer};
use sitewatch::store::{MemoryCatalog, MemoryChangeStore, MemoryObservationStore};
use sitewatch::types::{
    CaptureMeta, ChangeCategory, ContentDigest, EditKind, ScanInterval, ScoreOrigin, Target,
    TargetStatus,
};

fn capture(raw: &str) -> Capture {
    let markup = fetch::clean_markup(raw);
    let text = fetch::extract_text(&markup);
    let digest = ContentDigest::of(&markup);
    let bytes = markup.len();
    Capture {
        title: fetch::extract_title(raw),
        markup,
        text,
        digest,
        artifact_path: None,
        meta: CaptureMeta {
            http_status: 200,
            content_bytes: bytes,
            fetch_ms: 3,
        },
    }
}

/// Replays a scripted response sequence; times out once the script runs dry.
struct ScriptedFetcher {
    responses: Mutex<VecDeque<Result<Capture, FetchError>>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    fn new(responses: Vec<Result<Capture, FetchError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, _target: &Target) -> Result<Capture, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or(Err(FetchError::Timeout))
    }
}

/// Counts scoring invocations and always fails, forcing the fallback path.
struct FailingModel {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ModelClient for FailingModel {
    async fn assess(&self, _request: &ModelRequest) -> Result<ModelAssessment, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ModelError::Timeout)
    }
}

struct Harness {
    catalog: Arc<MemoryCatalog>,
    observations: Arc<MemoryObservationStore>,
    changes: Arc<MemoryChangeStore>,
    fetcher: Arc<ScriptedFetcher>,
    model_calls: Arc<AtomicUsize>,
    pipeline: Pipeline,
}

fn harness(responses: Vec<Result<Capture, FetchError>>) -> Harness {
    let catalog = Arc::new(MemoryCatalog::new());
    let observations = Arc::new(MemoryObservationStore::new(Duration::from_secs(300)));
    let changes = Arc::new(MemoryChangeStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new(responses));
    let model_calls = Arc::new(AtomicUsize::new(0));
    let scorer = Scorer::new(Arc::new(FailingModel {
        calls: model_calls.clone(),
    }));

    let pipeline = Pipeline::new(
        fetcher.clone(),
        scorer,
        catalog.clone(),
        observations.clone(),
        changes.clone(),
        RetryPolicy {
            max_attempts: 3,
            fetch_retry_delay: Duration::from_millis(1),
            persist_retry_delay: Duration::from_millis(1),
        },
    );

    Harness {
        catalog,
        observations,
        changes,
        fetcher,
        model_calls,
        pipeline,
    }
}

fn target() -> Target {
    Target::new("Acme", Url::parse("https://acme.example/pricing").unwrap())
        .with_interval(ScanInterval::Hourly)
        .with_alert_threshold(80)
}

const PAGE_V1: &str = "<html><head><title>Acme</title></head><body><p>Our price is $10/mo</p></body></html>";
const PAGE_V2: &str = "<html><head><title>Acme</title></head><body><p>Our price is $15/mo</p></body></html>";

#[tokio::test]
async fn first_observation_persists_without_scoring() {
    let h = harness(vec![Ok(capture(PAGE_V1))]);
    let t = target();
    h.catalog.insert(t.clone()).await;

    let outcome = h.pipeline.run_target(&t).await;
    assert!(matches!(
        outcome,
        PipelineOutcome::Succeeded { changed: false, .. }
    ));

    assert_eq!(h.observations.count(t.id).await, 1);
    assert!(h.changes.records_for(t.id).await.is_empty());
    assert_eq!(h.model_calls.load(Ordering::SeqCst), 0, "scorer never invoked");

    let stored = h.catalog.get(t.id).await.unwrap();
    assert_eq!(stored.status, TargetStatus::Active);
    assert!(stored.last_fetch_at.is_some());
    assert!(stored.next_due_at.unwrap() > stored.last_fetch_at.unwrap());
}

#[tokio::test]
async fn price_change_is_scored_by_fallback_and_alerts() {
    let h = harness(vec![Ok(capture(PAGE_V1)), Ok(capture(PAGE_V2))]);
    let t = target();
    h.catalog.insert(t.clone()).await;

    h.pipeline.run_target(&t).await;
    let outcome = h.pipeline.run_target(&t).await;

    let PipelineOutcome::Succeeded { changed, alert } = outcome else {
        panic!("second run should succeed");
    };
    assert!(changed);

    let records = h.changes.records_for(t.id).await;
    assert_eq!(records.len(), 1);
    let record = &records[0];

    assert_eq!(record.delta.edits.len(), 1);
    assert_eq!(record.delta.edits[0].kind, EditKind::Replace);
    assert_eq!(record.score.score, 85, "keyword 'price' wins the fallback table");
    assert_eq!(record.score.category, ChangeCategory::Pricing);
    assert_eq!(record.score.origin, ScoreOrigin::Fallback);
    assert_ne!(record.older, record.newer);

    let alert = alert.expect("85 >= threshold 80 must alert");
    assert_eq!(alert.score, 85);
    assert_eq!(h.model_calls.load(Ordering::SeqCst), 1, "model tried once, then fell back");
    assert_eq!(h.observations.count(t.id).await, 2);
}

#[tokio::test]
async fn identical_content_advances_schedule_without_change_record() {
    let h = harness(vec![Ok(capture(PAGE_V1)), Ok(capture(PAGE_V1))]);
    let t = target();
    h.catalog.insert(t.clone()).await;

    h.pipeline.run_target(&t).await;
    let first_due = h.catalog.get(t.id).await.unwrap().next_due_at;

    let outcome = h.pipeline.run_target(&t).await;
    assert!(matches!(
        outcome,
        PipelineOutcome::Succeeded { changed: false, .. }
    ));

    assert!(h.changes.records_for(t.id).await.is_empty());
    assert_eq!(h.model_calls.load(Ordering::SeqCst), 0);
    // Identical digest inside the capture window dedups to one observation.
    assert_eq!(h.observations.count(t.id).await, 1);

    let stored = h.catalog.get(t.id).await.unwrap();
    assert_eq!(stored.status, TargetStatus::Active);
    assert!(stored.next_due_at >= first_due, "schedule still advances");
}

#[tokio::test]
async fn fetch_retry_exhaustion_marks_target_erroring() {
    // Empty script: every attempt times out.
    let h = harness(Vec::new());
    let t = target();
    h.catalog.insert(t.clone()).await;

    let outcome = h.pipeline.run_target(&t).await;
    let PipelineOutcome::Failed(err) = outcome else {
        panic!("run must fail after exhausting retries");
    };
    assert!(matches!(
        err,
        PipelineError::Fetch {
            attempts: 3,
            source: FetchError::Timeout
        }
    ));
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 3);

    let stored = h.catalog.get(t.id).await.unwrap();
    assert_eq!(stored.status, TargetStatus::Erroring);
    assert!(stored.last_fetch_at.is_some(), "final attempt time recorded");
    assert!(stored.next_due_at.is_some(), "broken target still reschedules");
    assert_eq!(h.observations.count(t.id).await, 0, "no observation written");
    assert!(h.changes.records_for(t.id).await.is_empty());
}

#[tokio::test]
async fn erroring_target_recovers_on_next_successful_run() {
    let h = harness(Vec::new());
    // Script: three failures (first run), then success (second run).
    {
        let mut guard = h.fetcher.responses.lock().await;
        guard.push_back(Err(FetchError::HttpStatus(503)));
        guard.push_back(Err(FetchError::HttpStatus(503)));
        guard.push_back(Err(FetchError::HttpStatus(503)));
        guard.push_back(Ok(capture(PAGE_V1)));
    }
    let t = target();
    h.catalog.insert(t.clone()).await;

    assert!(matches!(
        h.pipeline.run_target(&t).await,
        PipelineOutcome::Failed(_)
    ));
    assert_eq!(
        h.catalog.get(t.id).await.unwrap().status,
        TargetStatus::Erroring
    );

    assert!(matches!(
        h.pipeline.run_target(&t).await,
        PipelineOutcome::Succeeded { .. }
    ));
    assert_eq!(
        h.catalog.get(t.id).await.unwrap().status,
        TargetStatus::Active
    );
    assert_eq!(h.observations.count(t.id).await, 1);
}
