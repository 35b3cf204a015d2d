// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Downstream analytics sink.
//!
//! The consumer posts each [`MergedPayload`] to a [`Sink`]. When every retry
//! fails the payload is handed to a [`FailedFlushHandler`] and dropped from
//! the pipeline; [`LogFailedFlush`] only logs it.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::error;

use crate::error::SinkError;
use crate::merge::MergedPayload;

/// Body returned by the sink on success. Missing fields default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkAck {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub records_processed: u64,
}

#[async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, payload: &MergedPayload) -> Result<SinkAck, SinkError>;

    /// Startup health check. A failure is logged, not fatal.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Receives payloads that could not be delivered.
#[async_trait]
pub trait FailedFlushHandler: Send + Sync {
    async fn handle(&self, payload: MergedPayload, error: &SinkError);
}

/// Logs the lost payload at error level and discards it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailedFlush;

#[async_trait]
impl FailedFlushHandler for LogFailedFlush {
    async fn handle(&self, payload: MergedPayload, error: &SinkError) {
        let counts: Vec<String> = payload
            .sections
            .iter()
            .map(|s| format!("{}={}", s.domain, s.records.len()))
            .collect();
        error!(
            event_id = %payload.event_id,
            records = payload.record_count(),
            counts = %counts.join(","),
            error = %error,
            "Dropping merged payload after sink delivery failed"
        );
    }
}
