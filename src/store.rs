// src/store.rs
// Narrow contracts to the excluded persistence layer, plus in-memory
// implementations backing standalone runs and the integration tests.
// Durable storage (SQL schema, queries) is an external collaborator; the
// pipeline only ever sees these traits.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::PersistenceError;
use crate::types::{
    ChangeAlert, ChangeId, Delta, Observation, ObservationId, ScoreResult, Target, TargetId,
    TargetStatus,
};

/// Catalog of tracked targets (owned by the excluded CRUD layer). The
/// pipeline reads due targets and writes back status + bookkeeping
/// timestamps, nothing else.
#[async_trait]
pub trait TargetCatalog: Send + Sync {
    async fn list_due_targets(&self, now: DateTime<Utc>) -> Result<Vec<Target>, PersistenceError>;

    async fn update_target_status(
        &self,
        id: TargetId,
        status: TargetStatus,
        last_fetch_at: DateTime<Utc>,
        next_due_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait ObservationStore: Send + Sync {
    async fn latest_observation(
        &self,
        target_id: TargetId,
    ) -> Result<Option<Observation>, PersistenceError>;

    /// Insert-if-absent keyed by (target, digest, capture window): a
    /// crash-retried completion returns the already-stored id instead of
    /// duplicating the observation.
    async fn insert_observation(
        &self,
        observation: Observation,
    ) -> Result<ObservationId, PersistenceError>;
}

#[async_trait]
pub trait ChangeStore: Send + Sync {
    /// Record a scored change. Returns the alert event when the score meets
    /// the target's threshold; the excluded notification collaborator
    /// consumes it.
    async fn insert_change(
        &self,
        target: &Target,
        older: ObservationId,
        newer: ObservationId,
        delta: &Delta,
        score: &ScoreResult,
    ) -> Result<Option<ChangeAlert>, PersistenceError>;
}

// ------------------------------------------------------------
// In-memory implementations
// ------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCatalog {
    inner: Mutex<HashMap<TargetId, Target>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, target: Target) {
        self.inner.lock().await.insert(target.id, target);
    }

    pub async fn get(&self, id: TargetId) -> Option<Target> {
        self.inner.lock().await.get(&id).cloned()
    }
}

#[async_trait]
impl TargetCatalog for MemoryCatalog {
    async fn list_due_targets(&self, now: DateTime<Utc>) -> Result<Vec<Target>, PersistenceError> {
        let guard = self.inner.lock().await;
        let mut due: Vec<Target> = guard.values().filter(|t| t.is_due(now)).cloned().collect();
        due.sort_by(|a, b| a.next_due_at.cmp(&b.next_due_at));
        Ok(due)
    }

    async fn update_target_status(
        &self,
        id: TargetId,
        status: TargetStatus,
        last_fetch_at: DateTime<Utc>,
        next_due_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let mut guard = self.inner.lock().await;
        let target = guard
            .get_mut(&id)
            .ok_or_else(|| PersistenceError(format!("unknown target {id}")))?;
        target.status = status;
        target.last_fetch_at = Some(last_fetch_at);
        target.next_due_at = Some(next_due_at);
        Ok(())
    }
}

pub struct MemoryObservationStore {
    dedup_window: chrono::Duration,
    inner: Mutex<HashMap<TargetId, Vec<Observation>>>,
}

impl MemoryObservationStore {
    pub fn new(dedup_window: std::time::Duration) -> Self {
        Self {
            dedup_window: chrono::Duration::from_std(dedup_window)
                .unwrap_or(chrono::Duration::MAX),
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub async fn count(&self, target_id: TargetId) -> usize {
        self.inner
            .lock()
            .await
            .get(&target_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ObservationStore for MemoryObservationStore {
    async fn latest_observation(
        &self,
        target_id: TargetId,
    ) -> Result<Option<Observation>, PersistenceError> {
        Ok(self
            .inner
            .lock()
            .await
            .get(&target_id)
            .and_then(|history| history.last())
            .cloned())
    }

    async fn insert_observation(
        &self,
        observation: Observation,
    ) -> Result<ObservationId, PersistenceError> {
        let mut guard = self.inner.lock().await;
        let history = guard.entry(observation.target_id).or_default();

        if let Some(existing) = history.iter().find(|o| {
            o.digest == observation.digest
                && (o.captured_at - observation.captured_at).abs() <= self.dedup_window
        }) {
            return Ok(existing.id);
        }

        let id = observation.id;
        history.push(observation);
        // History ordering invariant: observations sort by capture time even
        // when completions land out of order.
        history.sort_by_key(|o| o.captured_at);
        Ok(id)
    }
}

/// One persisted change, as the external change store would hold it.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub id: ChangeId,
    pub target_id: TargetId,
    pub older: ObservationId,
    pub newer: ObservationId,
    pub delta: Delta,
    pub score: ScoreResult,
    pub detected_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryChangeStore {
    inner: Mutex<Vec<ChangeRecord>>,
}

impl MemoryChangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records_for(&self, target_id: TargetId) -> Vec<ChangeRecord> {
        self.inner
            .lock()
            .await
            .iter()
            .filter(|r| r.target_id == target_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChangeStore for MemoryChangeStore {
    async fn insert_change(
        &self,
        target: &Target,
        older: ObservationId,
        newer: ObservationId,
        delta: &Delta,
        score: &ScoreResult,
    ) -> Result<Option<ChangeAlert>, PersistenceError> {
        let record = ChangeRecord {
            id: ChangeId::new(),
            target_id: target.id,
            older,
            newer,
            delta: delta.clone(),
            score: score.clone(),
            detected_at: Utc::now(),
        };
        let change_id = record.id;
        self.inner.lock().await.push(record);

        let alert = (score.score >= target.alert_threshold).then(|| ChangeAlert {
            target_id: target.id,
            change_id,
            score: score.score,
            category: score.category,
            summary: score.summary.clone(),
        });
        Ok(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CaptureMeta, ContentDigest, ScoreOrigin};
    use std::time::Duration;
    use url::Url;

    fn obs(target: TargetId, content: &str, captured_at: DateTime<Utc>) -> Observation {
        Observation {
            id: ObservationId::new(),
            target_id: target,
            captured_at,
            title: None,
            text: content.to_string(),
            digest: ContentDigest::of(content),
            artifact_path: None,
            meta: CaptureMeta {
                http_status: 200,
                content_bytes: content.len(),
                fetch_ms: 1,
            },
        }
    }

    #[tokio::test]
    async fn duplicate_digest_within_window_is_idempotent() {
        let store = MemoryObservationStore::new(Duration::from_secs(300));
        let target = TargetId::new();
        let now = Utc::now();

        let first = obs(target, "same", now);
        let first_id = store.insert_observation(first).await.unwrap();

        let retry = obs(target, "same", now + chrono::Duration::seconds(5));
        let second_id = store.insert_observation(retry).await.unwrap();

        assert_eq!(first_id, second_id);
        assert_eq!(store.count(target).await, 1);
    }

    #[tokio::test]
    async fn same_digest_outside_window_inserts() {
        let store = MemoryObservationStore::new(Duration::from_secs(60));
        let target = TargetId::new();
        let now = Utc::now();

        store.insert_observation(obs(target, "same", now)).await.unwrap();
        store
            .insert_observation(obs(target, "same", now + chrono::Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(store.count(target).await, 2);
    }

    #[tokio::test]
    async fn history_stays_ordered_by_capture_time() {
        let store = MemoryObservationStore::new(Duration::from_secs(1));
        let target = TargetId::new();
        let now = Utc::now();

        let late = obs(target, "late", now + chrono::Duration::minutes(10));
        let late_id = late.id;
        store.insert_observation(late).await.unwrap();
        store.insert_observation(obs(target, "early", now)).await.unwrap();

        let latest = store.latest_observation(target).await.unwrap().unwrap();
        assert_eq!(latest.id, late_id, "latest is by capture time, not insert order");
    }

    #[tokio::test]
    async fn change_store_alerts_at_threshold() {
        let changes = MemoryChangeStore::new();
        let target = Target::new("acme", Url::parse("https://acme.example").unwrap())
            .with_alert_threshold(85);
        let older = ObservationId::new();
        let newer = ObservationId::new();
        let delta = Delta {
            older: Some(older),
            newer,
            has_changes: true,
            is_first: false,
            similarity: 0.5,
            change_count: 1,
            edits: Vec::new(),
        };
        let mut score = ScoreResult {
            score: 85,
            category: crate::types::ChangeCategory::Pricing,
            summary: "price change".to_string(),
            justification: String::new(),
            recommended_action: String::new(),
            origin: ScoreOrigin::Fallback,
        };

        let alert = changes
            .insert_change(&target, older, newer, &delta, &score)
            .await
            .unwrap();
        assert!(alert.is_some(), "score equal to threshold alerts");

        score.score = 84;
        let alert = changes
            .insert_change(&target, older, newer, &delta, &score)
            .await
            .unwrap();
        assert!(alert.is_none());
        assert_eq!(changes.records_for(target.id).await.len(), 2);
    }
}
