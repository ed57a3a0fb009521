//! Error taxonomy for the monitor
//!
//! Every layer returns its own error type so callers decide by type, not by
//! message text:
//! - `StoreError` - SQLite failures, split into transient (busy/locked) and permanent
//! - `FetchError` - views endpoint failures, with a dedicated rate-limit variant
//! - `SourceError` - order source / catalog failures
//! - `DeliveryError` - notifier failures
//! - `ReportError` - report build/send failures (trigger claim rollback)
//! - `CycleError` - anything that escapes one monitor cycle
//! - `ConfigError` - missing or unparsable environment configuration

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Database temporarily busy or locked by another connection
    #[error("transient store error: {0}")]
    Transient(String),

    /// Anything else (I/O, permissions, corrupt file, SQL errors)
    #[error("permanent store error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                StoreError::Transient(err.to_string())
            }
            _ => StoreError::Permanent(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP 429 or equivalent; `retry_after` is the server hint when present
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Timeouts, connection resets, 5xx
    #[error("transient fetch error: {0}")]
    Transient(String),

    #[error("fetch error: {0}")]
    Permanent(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            FetchError::Transient(err.to_string())
        } else {
            FetchError::Permanent(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("notification target is not configured")]
    NoTarget,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to build report: {0}")]
    Build(String),

    #[error("failed to send report: {0}")]
    Send(#[from] DeliveryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SourceError> for ReportError {
    fn from(err: SourceError) -> Self {
        ReportError::Build(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("order source failed: {0}")]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}
