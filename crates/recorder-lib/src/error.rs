//! Error types for the recording engine
//!
//! Each external collaborator (source, sink, alert delivery) and the
//! configuration layer gets its own error type so callers can decide
//! locally whether a failure skips a cycle or stops a worker.

use thiserror::Error;

/// Configuration rejected during validation
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("metric name must not be empty")]
    EmptyMetricName,

    #[error("metric '{metric}' has no channels configured")]
    NoChannels { metric: String },

    #[error("metric '{metric}' declares channel '{channel}' more than once")]
    DuplicateChannel { metric: String, channel: String },

    #[error("metric '{metric}' channel '{channel}': low trigger {low} must be below high trigger {high}")]
    InvalidWindow {
        metric: String,
        channel: String,
        low: f64,
        high: f64,
    },

    #[error("metric '{metric}' channel '{channel}': variance {variance} must be a finite value >= 0")]
    InvalidVariance {
        metric: String,
        channel: String,
        variance: f64,
    },

    #[error("metric '{metric}': interval {seconds}s must be a positive, representable number of seconds")]
    InvalidInterval { metric: String, seconds: f64 },

    #[error("alert resend interval {hours}h must be a finite number of hours")]
    InvalidResendInterval { hours: f64 },

    #[error("supervisor max_restarts must be at least 1")]
    InvalidRestartPolicy,
}

/// Failure reading a metric source
///
/// Always treated as transient by the workers: the cycle is skipped and
/// the loop continues at the next interval.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse reading from {origin}: {detail}")]
    Parse { origin: String, detail: String },

    #[error("source returned a non-finite value for channel {channel}")]
    NonFinite { channel: usize },

    #[error("{0}")]
    Other(String),
}

/// Failure persisting a row
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("storage lock poisoned")]
    Poisoned,
}

/// Failure delivering an alert
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("alert webhook returned status {0}")]
    Status(u16),

    #[error("{0}")]
    Other(String),
}
