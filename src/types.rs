// src/types.rs
// Core value records for the monitoring pipeline. All of these are plain
// immutable data: ownership of durable state lives behind the store
// contracts, not in object graphs.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

// ------------------------------------------------------------
// Identifiers
// ------------------------------------------------------------

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(TargetId);
id_newtype!(ObservationId);
id_newtype!(ChangeId);

// ------------------------------------------------------------
// Target
// ------------------------------------------------------------

/// Lifecycle status of a monitored target. The pipeline only ever writes
/// `Active` (successful completion) and `Erroring` (retries exhausted);
/// `Paused` is set by the owning catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Active,
    Paused,
    Erroring,
}

/// How often a target is rescanned. `next_due_at` is always derived as
/// `completed_at + interval` on a terminal pipeline outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanInterval {
    Hourly,
    Daily,
    Weekly,
    Every { secs: u64 },
}

impl ScanInterval {
    pub fn as_duration(&self) -> Duration {
        match self {
            ScanInterval::Hourly => Duration::hours(1),
            ScanInterval::Daily => Duration::days(1),
            ScanInterval::Weekly => Duration::weeks(1),
            ScanInterval::Every { secs } => Duration::seconds(*secs as i64),
        }
    }
}

impl FromStr for ScanInterval {
    type Err = String;

    /// Accepts the catalog's frequency words, or a raw number of seconds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(ScanInterval::Hourly),
            "daily" => Ok(ScanInterval::Daily),
            "weekly" => Ok(ScanInterval::Weekly),
            other => other
                .parse::<u64>()
                .map(|secs| ScanInterval::Every { secs })
                .map_err(|_| format!("unknown scan interval: {other:?}")),
        }
    }
}

/// A monitored entity. Owned by the external catalog; the pipeline reads it
/// and writes back only `status`, `last_fetch_at` and `next_due_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    pub url: Url,
    pub scan_interval: ScanInterval,
    /// Changes scoring at or above this value raise an alert event.
    pub alert_threshold: u8,
    pub status: TargetStatus,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub next_due_at: Option<DateTime<Utc>>,
}

impl Target {
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        Self {
            id: TargetId::new(),
            name: name.into(),
            url,
            scan_interval: ScanInterval::Daily,
            alert_threshold: 50,
            status: TargetStatus::Active,
            last_fetch_at: None,
            next_due_at: None,
        }
    }

    pub fn with_interval(mut self, interval: ScanInterval) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn with_alert_threshold(mut self, threshold: u8) -> Self {
        self.alert_threshold = threshold;
        self
    }

    /// Due when active and the next-due timestamp has passed. A target that
    /// has never completed a run (`next_due_at == None`) is due immediately.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TargetStatus::Active
            && self.next_due_at.map_or(true, |due| due <= now)
    }
}

// ------------------------------------------------------------
// Content digest
// ------------------------------------------------------------

/// Sha-256 over normalized markup. Pure function of the content: identical
/// normalized bytes always yield the same digest, which is the correctness
/// anchor for the cheap changed/unchanged short-circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub fn of(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("digest must be 32 bytes"))?;
        Ok(Self(arr))
    }
}

// ------------------------------------------------------------
// Observation
// ------------------------------------------------------------

/// Capture metadata kept alongside an observation; never interpreted by the
/// diffing or scoring stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMeta {
    pub http_status: u16,
    pub content_bytes: usize,
    pub fetch_ms: u64,
}

/// An immutable capture of one target's content at one point in time.
/// Created exactly once per successful fetch, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: ObservationId,
    pub target_id: TargetId,
    pub captured_at: DateTime<Utc>,
    pub title: Option<String>,
    /// Plain text extracted from the normalized markup; the diff input.
    pub text: String,
    pub digest: ContentDigest,
    /// Opaque artifact reference (raw capture on disk); not interpreted here.
    pub artifact_path: Option<PathBuf>,
    pub meta: CaptureMeta,
}

// ------------------------------------------------------------
// Delta
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditKind {
    Insert,
    Delete,
    Replace,
}

/// One aligned change between the two text bodies. Fragments are truncated
/// at capture time to bound storage and downstream prompt size; contexts
/// carry the surrounding text separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub kind: EditKind,
    pub old_fragment: String,
    pub new_fragment: String,
    pub old_context: String,
    pub new_context: String,
}

/// Structural difference between two observations of the same target,
/// ordered (older, newer) by capture timestamp. Ephemeral: scored and then
/// handed to the change store, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    pub older: Option<ObservationId>,
    pub newer: ObservationId,
    pub has_changes: bool,
    /// True for the first-ever observation of a target (nothing to compare).
    pub is_first: bool,
    /// LCS matching ratio in [0,1]: `2 * matched / (len_old + len_new)`.
    pub similarity: f64,
    /// Total aligned edits, counted before the list cap below.
    pub change_count: usize,
    pub edits: Vec<Edit>,
}

// ------------------------------------------------------------
// ScoreResult
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeCategory {
    Pricing,
    Product,
    Messaging,
    Team,
    Legal,
    Other,
}

impl ChangeCategory {
    /// Model output is free text; anything unrecognized coerces to `Other`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pricing" => ChangeCategory::Pricing,
            "product" => ChangeCategory::Product,
            "messaging" => ChangeCategory::Messaging,
            "team" => ChangeCategory::Team,
            "legal" => ChangeCategory::Legal,
            _ => ChangeCategory::Other,
        }
    }
}

/// Which scoring path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreOrigin {
    Model,
    Fallback,
}

/// Significance assessment for one delta with `has_changes = true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Clamped to 0..=100.
    pub score: u8,
    pub category: ChangeCategory,
    pub summary: String,
    pub justification: String,
    pub recommended_action: String,
    pub origin: ScoreOrigin,
}

// ------------------------------------------------------------
// PipelineRun
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Fetching,
    Diffing,
    Scoring,
    Completing,
    Succeeded,
    Failed,
}

/// Transient unit of work tying one target, one fetch, and the downstream
/// delta/score together. Lives only for the duration of one scheduled
/// execution.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub target_id: TargetId,
    pub state: RunState,
    pub attempt: u32,
    pub failure: Option<String>,
}

impl PipelineRun {
    pub fn new(target_id: TargetId) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target_id,
            state: RunState::Pending,
            attempt: 0,
            failure: None,
        }
    }

    pub fn advance(&mut self, state: RunState) {
        tracing::debug!(run = %self.run_id, from = ?self.state, to = ?state, "run state");
        self.state = state;
    }
}

/// Event returned by the change store when a scored change meets the
/// target's alert threshold; consumed by the external notification
/// collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeAlert {
    pub target_id: TargetId,
    pub change_id: ChangeId,
    pub score: u8,
    pub category: ChangeCategory,
    pub summary: String,
}
