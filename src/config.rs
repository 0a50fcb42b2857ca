// src/config.rs
// Environment-sourced settings plus the TOML seed file for standalone runs.
// Env names are SITEWATCH_*; every knob has a default so a bare process
// starts up. Load order: process env (after dotenvy in main) only — the
// algorithmic core never reads the environment itself.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use crate::types::{ScanInterval, Target};

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_u64(key, default))
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Total bound on one page retrieval (the quiescence bound).
    pub fetch_timeout: Duration,
    pub connect_timeout: Duration,
    /// Independent bound on one scoring-model call.
    pub model_timeout: Duration,
    pub model_endpoint: String,
    pub model_api_key: Option<String>,
    pub model_name: String,
    /// Global concurrency cap on simultaneous pipeline runs.
    pub worker_pool_size: usize,
    /// Maximum fetch attempts per run (first try included).
    pub fetch_retries: u32,
    pub fetch_retry_delay: Duration,
    pub persist_retry_delay: Duration,
    /// Scheduler tick period.
    pub tick_interval: Duration,
    /// How long in-flight runs get to drain on shutdown.
    pub shutdown_grace: Duration,
    pub artifact_dir: PathBuf,
    /// Window within which a re-inserted observation with the same digest
    /// is treated as the same capture (crash-retry idempotency).
    pub dedup_window: Duration,
    pub targets_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(4),
            model_timeout: Duration::from_secs(10),
            model_endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model_api_key: None,
            model_name: "gpt-4o-mini".to_string(),
            worker_pool_size: 4,
            fetch_retries: 3,
            fetch_retry_delay: Duration::from_secs(300),
            persist_retry_delay: Duration::from_secs(60),
            tick_interval: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(10),
            artifact_dir: PathBuf::from("artifacts"),
            dedup_window: Duration::from_secs(300),
            targets_path: PathBuf::from("config/targets.toml"),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let d = Settings::default();
        Self {
            fetch_timeout: env_secs("SITEWATCH_FETCH_TIMEOUT_SECS", 30),
            connect_timeout: env_secs("SITEWATCH_CONNECT_TIMEOUT_SECS", 4),
            model_timeout: env_secs("SITEWATCH_MODEL_TIMEOUT_SECS", 10),
            model_endpoint: std::env::var("SITEWATCH_MODEL_ENDPOINT")
                .unwrap_or(d.model_endpoint),
            model_api_key: std::env::var("SITEWATCH_MODEL_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            model_name: std::env::var("SITEWATCH_MODEL_NAME").unwrap_or(d.model_name),
            worker_pool_size: env_u64("SITEWATCH_WORKER_POOL_SIZE", 4).max(1) as usize,
            fetch_retries: env_u64("SITEWATCH_FETCH_RETRIES", 3).max(1) as u32,
            fetch_retry_delay: env_secs("SITEWATCH_FETCH_RETRY_DELAY_SECS", 300),
            persist_retry_delay: env_secs("SITEWATCH_PERSIST_RETRY_DELAY_SECS", 60),
            tick_interval: env_secs("SITEWATCH_TICK_INTERVAL_SECS", 60),
            shutdown_grace: env_secs("SITEWATCH_SHUTDOWN_GRACE_SECS", 10),
            artifact_dir: std::env::var("SITEWATCH_ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.artifact_dir),
            dedup_window: env_secs("SITEWATCH_DEDUP_WINDOW_SECS", 300),
            targets_path: std::env::var("SITEWATCH_TARGETS_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.targets_path),
        }
    }
}

// ------------------------------------------------------------
// Targets seed file
// ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TargetsFile {
    #[serde(default)]
    targets: Vec<TargetSeed>,
}

#[derive(Debug, Deserialize)]
struct TargetSeed {
    name: String,
    url: String,
    interval: Option<String>,
    alert_threshold: Option<u8>,
}

/// Load the `[[targets]]` seed list for standalone runs. In deployments the
/// catalog is an external collaborator; this only feeds the in-memory one.
pub fn load_targets(path: &Path) -> Result<Vec<Target>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading targets from {}", path.display()))?;
    parse_targets(&content)
}

fn parse_targets(content: &str) -> Result<Vec<Target>> {
    let file: TargetsFile = toml::from_str(content).context("parsing targets file")?;
    let mut out = Vec::with_capacity(file.targets.len());
    for seed in file.targets {
        let url = Url::parse(&seed.url)
            .with_context(|| format!("invalid url for target {:?}", seed.name))?;
        let interval = match seed.interval.as_deref() {
            Some(s) => ScanInterval::from_str(s)
                .map_err(|e| anyhow::anyhow!("target {:?}: {e}", seed.name))?,
            None => ScanInterval::Daily,
        };
        let mut target = Target::new(seed.name, url).with_interval(interval);
        if let Some(threshold) = seed.alert_threshold {
            target = target.with_alert_threshold(threshold.min(100));
        }
        out.push(target);
    }
    Ok(out)
}
