// src/error.rs
// Failure taxonomy for the pipeline. Fetch and persistence failures are
// retryable and owned by the orchestrator; model failures never escape the
// scorer; a diff panic is a defect signal, fatal for the run and never
// retried.

use thiserror::Error;

/// Failure of a single page retrieval. Retry policy lives in the
/// orchestrator, never inside the fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No complete response within the configured bound.
    #[error("fetch timed out")]
    Timeout,

    /// Any non-success HTTP response.
    #[error("http status {0}")]
    HttpStatus(u16),

    /// DNS, connect, or transport failure.
    #[error("network failure: {0}")]
    Network(#[source] reqwest::Error),
}

impl FetchError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(err)
        }
    }
}

/// Failure of the external scoring model. Always degrades to the rule-based
/// fallback inside the scorer.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model call timed out")]
    Timeout,

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("model transport failure: {0}")]
    Transport(#[source] reqwest::Error),

    /// No client configured (missing API key / disabled).
    #[error("model scoring disabled")]
    Disabled,
}

impl ModelError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ModelError::Timeout
        } else {
            ModelError::Transport(err)
        }
    }
}

/// Failure of a store contract call. Retryable at the orchestrator level
/// with the same bounded policy as fetches.
#[derive(Debug, Error)]
#[error("persistence failure: {0}")]
pub struct PersistenceError(pub String);

/// Terminal failure reason recorded on a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch failed after {attempts} attempts: {source}")]
    Fetch {
        #[source]
        source: FetchError,
        attempts: u32,
    },

    #[error("persistence failed after {attempts} attempts: {source}")]
    Persistence {
        #[source]
        source: PersistenceError,
        attempts: u32,
    },

    /// The differ panicked over already-fetched data. A programming defect,
    /// not an operational failure; never retried.
    #[error("diff computation panicked: {0}")]
    DiffPanic(String),
}
