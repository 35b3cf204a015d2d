// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for producers and the consumer.
//!
//! # Example
//!
//! ```
//! use sync_pipeline::PipelineConfig;
//! use std::time::Duration;
//!
//! // Defaults
//! let config = PipelineConfig::default();
//! assert_eq!(config.merge_batch_size, 100);
//! assert_eq!(config.flush_interval(), Duration::from_secs(30));
//!
//! // Partial JSON, everything else defaulted
//! let config: PipelineConfig = serde_json::from_str(r#"{
//!     "source_base_url": "http://inventory:8080",
//!     "sync_interval_overrides": { "product": 60 }
//! }"#).unwrap();
//! assert_eq!(config.sync_interval_for("product"), Duration::from_secs(60));
//! assert_eq!(config.sync_interval_for("customer"), Duration::from_secs(300));
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::PipelineError;

/// Floor for timer periods; tokio intervals panic on zero.
pub(crate) const MIN_TICK: Duration = Duration::from_millis(1);

/// Pipeline configuration.
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Name stamped into merged payload metadata as `source`
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Version stamped into merged payload metadata as `version`
    #[serde(default = "default_version")]
    pub app_version: String,

    /// `producerVersion` written into every envelope
    #[serde(default = "default_version")]
    pub producer_version: String,

    /// Base URL of the record source service
    #[serde(default = "default_source_base_url")]
    pub source_base_url: String,

    #[serde(default = "default_source_page_size")]
    pub source_page_size: usize,

    #[serde(default = "default_http_timeout_ms")]
    pub source_timeout_ms: u64,

    /// Ask the source to filter by modification time (`updatedAfter`)
    /// instead of scanning everything on incremental syncs.
    #[serde(default)]
    pub source_server_side_filter: bool,

    /// Default sync period per domain
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Per-domain sync periods, keyed by domain name
    #[serde(default)]
    pub sync_interval_overrides: HashMap<String, u64>,

    /// Delay before the first scheduled run
    #[serde(default = "default_sync_initial_delay_secs")]
    pub sync_initial_delay_secs: u64,

    /// Window used by incremental syncs when a domain has no recorded sync time
    #[serde(default = "default_incremental_lookback_secs")]
    pub incremental_lookback_secs: u64,

    /// Retry policy shared by source fetches and sink sends
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: usize,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,

    /// Consumer group used when committing offsets
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Idle wait between empty polls
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    #[serde(default = "default_poll_max_records")]
    pub poll_max_records: usize,

    /// Idempotency store bound (oldest evicted first)
    #[serde(default = "default_idempotency_max_entries")]
    pub idempotency_max_entries: usize,

    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,

    /// Flush early once this many records are buffered across all domains
    #[serde(default = "default_merge_batch_size")]
    pub merge_batch_size: usize,

    #[serde(default = "default_merge_flush_interval_secs")]
    pub merge_flush_interval_secs: u64,

    /// Base URL of the analytics sink
    #[serde(default = "default_sink_base_url")]
    pub sink_base_url: String,

    #[serde(default = "default_sink_endpoint")]
    pub sink_endpoint: String,

    #[serde(default = "default_sink_health_path")]
    pub sink_health_path: String,

    #[serde(default = "default_http_timeout_ms")]
    pub sink_timeout_ms: u64,
}

fn default_app_name() -> String { "sync-pipeline".to_string() }
fn default_version() -> String { "1.0.0".to_string() }
fn default_source_base_url() -> String { "http://localhost:8080".to_string() }
fn default_source_page_size() -> usize { 100 }
fn default_http_timeout_ms() -> u64 { 30_000 }
fn default_sync_interval_secs() -> u64 { 300 }
fn default_sync_initial_delay_secs() -> u64 { 5 }
fn default_incremental_lookback_secs() -> u64 { 300 }
fn default_retry_max_attempts() -> usize { 3 }
fn default_retry_initial_delay_ms() -> u64 { 1_000 }
fn default_retry_max_delay_ms() -> u64 { 30_000 }
fn default_retry_multiplier() -> f64 { 2.0 }
fn default_consumer_group() -> String { "analytics-consumers".to_string() }
fn default_poll_timeout_ms() -> u64 { 1_000 }
fn default_poll_max_records() -> usize { 100 }
fn default_idempotency_max_entries() -> usize { 10_000 }
fn default_idempotency_ttl_secs() -> u64 { 3_600 }
fn default_merge_batch_size() -> usize { 100 }
fn default_merge_flush_interval_secs() -> u64 { 30 }
fn default_sink_base_url() -> String { "http://localhost:8081".to_string() }
fn default_sink_endpoint() -> String { "/api/analytics/data".to_string() }
fn default_sink_health_path() -> String { "/actuator/health".to_string() }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            app_version: default_version(),
            producer_version: default_version(),
            source_base_url: default_source_base_url(),
            source_page_size: default_source_page_size(),
            source_timeout_ms: default_http_timeout_ms(),
            source_server_side_filter: false,
            sync_interval_secs: default_sync_interval_secs(),
            sync_interval_overrides: HashMap::new(),
            sync_initial_delay_secs: default_sync_initial_delay_secs(),
            incremental_lookback_secs: default_incremental_lookback_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_multiplier: default_retry_multiplier(),
            consumer_group: default_consumer_group(),
            poll_timeout_ms: default_poll_timeout_ms(),
            poll_max_records: default_poll_max_records(),
            idempotency_max_entries: default_idempotency_max_entries(),
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
            merge_batch_size: default_merge_batch_size(),
            merge_flush_interval_secs: default_merge_flush_interval_secs(),
            sink_base_url: default_sink_base_url(),
            sink_endpoint: default_sink_endpoint(),
            sink_health_path: default_sink_health_path(),
            sink_timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl PipelineConfig {
    /// Parse a JSON config document, then validate it.
    pub fn from_json(raw: &str) -> Result<Self, PipelineError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or spin the pipeline.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let checks = [
            (self.source_page_size == 0, "source_page_size must be positive"),
            (self.sync_interval_secs == 0, "sync_interval_secs must be positive"),
            (
                self.sync_interval_overrides.values().any(|&secs| secs == 0),
                "sync_interval_overrides must be positive",
            ),
            (self.retry_max_attempts == 0, "retry_max_attempts must be at least 1"),
            (self.retry_multiplier < 1.0, "retry_multiplier must be >= 1.0"),
            (self.poll_timeout_ms == 0, "poll_timeout_ms must be positive"),
            (self.poll_max_records == 0, "poll_max_records must be positive"),
            (self.idempotency_max_entries == 0, "idempotency_max_entries must be positive"),
            (self.merge_batch_size == 0, "merge_batch_size must be positive"),
            (self.merge_flush_interval_secs == 0, "merge_flush_interval_secs must be positive"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(PipelineError::Config((*reason).to_string())),
            None => Ok(()),
        }
    }

    pub fn sync_interval_for(&self, domain: &str) -> Duration {
        let secs = self
            .sync_interval_overrides
            .get(domain)
            .copied()
            .unwrap_or(self.sync_interval_secs);
        Duration::from_secs(secs)
    }

    pub fn sync_initial_delay(&self) -> Duration {
        Duration::from_secs(self.sync_initial_delay_secs)
    }

    pub fn incremental_lookback(&self) -> Duration {
        Duration::from_secs(self.incremental_lookback_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.merge_flush_interval_secs)
    }

    pub fn sink_url(&self) -> String {
        join_url(&self.sink_base_url, &self.sink_endpoint)
    }

    pub fn sink_health_url(&self) -> String {
        join_url(&self.sink_base_url, &self.sink_health_path)
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
