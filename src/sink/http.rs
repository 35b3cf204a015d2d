// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Sink, SinkAck};
use crate::config::PipelineConfig;
use crate::error::SinkError;
use crate::merge::MergedPayload;

/// POSTs merged payloads as JSON to the analytics service.
///
/// Retries are the caller's concern; this makes exactly one request per call.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    health_url: String,
}

impl HttpSink {
    pub fn new(
        url: impl Into<String>,
        health_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            health_url: health_url.into(),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, SinkError> {
        Self::new(
            config.sink_url(),
            config.sink_health_url(),
            Duration::from_millis(config.sink_timeout_ms),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn send(&self, payload: &MergedPayload) -> Result<SinkAck, SinkError> {
        debug!(url = %self.url, event_id = %payload.event_id, "Posting merged payload");
        let response = self.client.post(&self.url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::from_status(status.as_u16(), body));
        }

        // Some deployments answer with an empty body
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(SinkAck::default());
        }
        serde_json::from_slice(&body).map_err(|e| SinkError::Decode(e.to_string()))
    }

    async fn health_check(&self) -> bool {
        match self.client.get(&self.health_url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(url = %self.health_url, status = %response.status(), "Sink health check failed");
                false
            }
            Err(e) => {
                warn!(url = %self.health_url, error = %e, "Sink health check failed");
                false
            }
        }
    }
}
