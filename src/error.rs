// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for the pipeline.
//!
//! Each collaborator has its own error type so callers can decide what is
//! retryable. [`PipelineError`] wraps all of them for the public operations
//! on [`SyncEngine`](crate::SyncEngine) and [`SyncControl`](crate::SyncControl).

use thiserror::Error;

/// Convenience alias used by the producer and control surfaces.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures talking to the upstream record source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Network failure, timeout or a 5xx/408/429 from the source.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// The source rejected the request (4xx). Not retried.
    #[error("source rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The response body was not a page of records.
    #[error("malformed source response: {0}")]
    Decode(String),
}

impl SourceError {
    /// Classify an HTTP status returned by the source.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if is_transient_status(status) {
            Self::Unavailable(format!("HTTP {status}: {message}"))
        } else {
            Self::Rejected { status, message }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

/// Failures handing an envelope to the message log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("message log unavailable: {0}")]
    Unavailable(String),

    #[error("message log rejected envelope: {0}")]
    Rejected(String),

    #[error("failed to encode envelope: {0}")]
    Encode(String),

    /// The background delivery task went away before reporting a result.
    #[error("delivery result dropped before completion")]
    Dropped,
}

impl From<LogError> for PublishError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::UnknownTopic(topic) => Self::Rejected(format!("unknown topic {topic}")),
            LogError::Unavailable(msg) => Self::Unavailable(msg),
        }
    }
}

/// Failures delivering a merged payload to the analytics sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Network failure, timeout or a 5xx/408/429. Retried with backoff.
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// 4xx from the sink. The payload is dropped without retry.
    #[error("sink rejected payload (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed sink response: {0}")]
    Decode(String),
}

impl SinkError {
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if is_transient_status(status) {
            Self::Unavailable(format!("HTTP {status}: {message}"))
        } else {
            Self::Rejected { status, message }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

/// Failures in the sync-state store or the merge buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("state backend failure: {0}")]
    Backend(String),

    /// A merge buffer was asked to hold records for a domain it was not built with.
    #[error("no buffer registered for domain {0}")]
    UnknownBucket(String),
}

/// Failures in the message log itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("message log unavailable: {0}")]
    Unavailable(String),
}

/// Top-level error for pipeline operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

fn is_transient_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}
