// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Consumer engine.
//!
//! The [`ConsumerEngine`] polls one topic per registered domain, drops
//! duplicate deliveries, buffers records in the [`MergeBuffer`] and
//! periodically flushes a merged payload to the [`Sink`].
//!
//! # Delivery
//!
//! ```text
//! poll → decode → seen id? ─yes→ skip, commit
//!                   │no
//!                   ▼
//!            seen content? ─yes→ mark, skip, commit
//!                   │no
//!                   ▼
//!         buffer → mark → commit
//! ```
//!
//! A message that cannot be decoded or buffered is not committed; the poll
//! loop rewinds so it is delivered again. A message that was buffered but
//! whose commit failed is caught as a duplicate on redelivery.
//!
//! The sink side is at-most-once: a payload that exhausts its retries is
//! handed to the [`FailedFlushHandler`] and not re-buffered.

mod flush;
mod lifecycle;
mod types;

pub use types::{ConsumerStats, FlushOutcome, IngestOutcome, PollSummary};

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::config::{PipelineConfig, MIN_TICK};
use crate::domain::Domain;
use crate::envelope::Envelope;
use crate::error::LogError;
use crate::idempotency::IdempotencyStore;
use crate::merge::MergeBuffer;
use crate::message_log::{LogRecord, MessageLog};
use crate::resilience::retry::RetryConfig;
use crate::sink::{FailedFlushHandler, LogFailedFlush, Sink};

pub struct ConsumerEngine {
    /// Domains consumed, one poll loop each
    pub(super) domains: Vec<Domain>,

    pub(super) log: Arc<dyn MessageLog>,

    /// Consumer group for commits
    pub(super) group: String,

    pub(super) idempotency: Arc<IdempotencyStore>,

    pub(super) buffer: Arc<MergeBuffer>,

    pub(super) sink: Arc<dyn Sink>,

    /// Receives payloads that exhausted sink retries
    pub(super) failed_flush: Arc<dyn FailedFlushHandler>,

    pub(super) sink_retry: RetryConfig,

    /// Idle wait after an empty poll
    pub(super) poll_timeout: Duration,

    pub(super) poll_max_records: usize,

    pub(super) flush_interval: Duration,

    pub(super) stats: DashMap<String, ConsumerStats>,

    /// Wakes the flush loop when the buffer crosses its threshold
    pub(super) flush_notify: Notify,

    /// Serializes flushes so payloads go out one at a time
    pub(super) flush_lock: tokio::sync::Mutex<()>,

    pub(super) running: AtomicBool,
}

impl ConsumerEngine {
    /// Build an engine consuming the domains the buffer was built with.
    pub fn new(
        log: Arc<dyn MessageLog>,
        idempotency: Arc<IdempotencyStore>,
        buffer: Arc<MergeBuffer>,
        sink: Arc<dyn Sink>,
        config: &PipelineConfig,
    ) -> Self {
        let domains = buffer.domains().to_vec();
        let stats = domains
            .iter()
            .map(|d| (d.name.clone(), ConsumerStats::default()))
            .collect();
        Self {
            domains,
            log,
            group: config.consumer_group.clone(),
            idempotency,
            buffer,
            sink,
            failed_flush: Arc::new(LogFailedFlush),
            sink_retry: RetryConfig::from_config(config),
            poll_timeout: config.poll_timeout().max(MIN_TICK),
            poll_max_records: config.poll_max_records.max(1),
            flush_interval: config.flush_interval().max(MIN_TICK),
            stats,
            flush_notify: Notify::new(),
            flush_lock: tokio::sync::Mutex::new(()),
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_failed_flush_handler(mut self, handler: Arc<dyn FailedFlushHandler>) -> Self {
        self.failed_flush = handler;
        self
    }

    #[must_use]
    pub fn with_sink_retry(mut self, retry: RetryConfig) -> Self {
        self.sink_retry = retry;
        self
    }

    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    pub fn domain(&self, name: &str) -> Option<&Domain> {
        self.domains.iter().find(|d| d.name == name)
    }

    pub fn buffer(&self) -> &MergeBuffer {
        &self.buffer
    }

    pub fn idempotency(&self) -> &IdempotencyStore {
        &self.idempotency
    }

    pub fn stats(&self, domain: &str) -> ConsumerStats {
        self.stats.get(domain).map(|s| *s).unwrap_or_default()
    }

    pub fn all_stats(&self) -> BTreeMap<String, ConsumerStats> {
        self.stats
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Decode and ingest one delivered log record.
    pub fn ingest(&self, domain: &Domain, record: &LogRecord) -> IngestOutcome {
        match Envelope::from_bytes(&record.value) {
            Ok(envelope) => self.ingest_envelope(domain, envelope),
            Err(e) => {
                error!(
                    domain = %domain,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Failed to decode envelope"
                );
                self.finish(domain, IngestOutcome::Rejected)
            }
        }
    }

    /// Deduplicate and buffer one envelope.
    pub fn ingest_envelope(&self, domain: &Domain, envelope: Envelope) -> IngestOutcome {
        let message_id = envelope.message_id;
        if self.idempotency.is_processed(&message_id) {
            warn!(domain = %domain, message_id = %message_id, "Message already processed, skipping");
            return self.finish(domain, IngestOutcome::DuplicateMessage);
        }

        let records = envelope.payload;
        let count = records.len();
        let fingerprint = IdempotencyStore::fingerprint(&records);
        if self.idempotency.is_duplicate_content(&fingerprint) {
            warn!(domain = %domain, message_id = %message_id, "Duplicate content detected, skipping");
            self.idempotency
                .mark_processed(&message_id, &domain.name, count, &fingerprint);
            return self.finish(domain, IngestOutcome::DuplicateContent);
        }

        match self.buffer.append(&domain.name, records) {
            Ok(flush) => {
                self.idempotency
                    .mark_processed(&message_id, &domain.name, count, &fingerprint);
                debug!(
                    domain = %domain,
                    message_id = %message_id,
                    count,
                    sync_type = %envelope.metadata.sync_type,
                    "Buffered records"
                );
                if flush.is_some() {
                    self.flush_notify.notify_one();
                }
                self.finish(domain, IngestOutcome::Buffered { records: count, flush })
            }
            Err(e) => {
                error!(domain = %domain, message_id = %message_id, error = %e, "Failed to buffer records");
                self.finish(domain, IngestOutcome::Rejected)
            }
        }
    }

    /// Ingest, then commit unless rejected.
    pub async fn process(&self, domain: &Domain, record: &LogRecord) -> Result<IngestOutcome, LogError> {
        let outcome = self.ingest(domain, record);
        if outcome.should_commit() {
            self.log.commit(record, &self.group).await?;
        }
        Ok(outcome)
    }

    /// Poll one batch for `domain` and process it.
    ///
    /// Stops at the first rejected record and rewinds the group so it and
    /// everything after it are delivered again. A failed commit rewinds the
    /// same way before the error is returned.
    pub async fn poll_once(&self, domain: &Domain) -> Result<PollSummary, LogError> {
        let records = self
            .log
            .poll(&domain.topic, &self.group, self.poll_max_records)
            .await?;
        let mut summary = PollSummary {
            fetched: records.len(),
            ..Default::default()
        };

        for record in &records {
            let outcome = match self.process(domain, record).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Uncommitted records in this batch must come back
                    if let Err(rewind_err) = self.log.rewind(&domain.topic, &self.group).await {
                        warn!(domain = %domain, error = %rewind_err, "Rewind after commit failure failed");
                    }
                    return Err(e);
                }
            };
            summary.record(&outcome);
            if !outcome.should_commit() {
                warn!(
                    domain = %domain,
                    partition = record.partition,
                    offset = record.offset,
                    "Leaving offset uncommitted; rewinding for redelivery"
                );
                self.log.rewind(&domain.topic, &self.group).await?;
                break;
            }
        }
        Ok(summary)
    }

    fn finish(&self, domain: &Domain, outcome: IngestOutcome) -> IngestOutcome {
        {
            let mut stats = self.stats.entry(domain.name.clone()).or_default();
            match outcome {
                IngestOutcome::Buffered { .. } => stats.processed += 1,
                IngestOutcome::DuplicateMessage | IngestOutcome::DuplicateContent => stats.skipped += 1,
                IngestOutcome::Rejected => stats.errors += 1,
            }
        }
        crate::metrics::record_ingest(&domain.name, outcome.as_str());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::SyncType;
    use crate::message_log::memory::InMemoryLog;
    use crate::sink::memory::RecordingSink;
    use chrono::Utc;
    use serde_json::json;

    fn engine(batch_size: usize) -> (ConsumerEngine, Arc<InMemoryLog>) {
        let log = Arc::new(InMemoryLog::new());
        let buffer = Arc::new(MergeBuffer::new(
            vec![Domain::customers(), Domain::products()],
            batch_size,
        ));
        let idempotency = Arc::new(IdempotencyStore::new(100, Duration::from_secs(3600)));
        let engine = ConsumerEngine::new(
            log.clone(),
            idempotency,
            buffer,
            Arc::new(RecordingSink::new()),
            &PipelineConfig::default(),
        );
        (engine, log)
    }

    fn envelope(source: &str, payload: Vec<serde_json::Value>) -> Envelope {
        Envelope::new(source, "X", Utc::now(), payload, SyncType::Incremental, false, "1.0.0")
    }

    #[test]
    fn test_buffers_new_message() {
        let (engine, _) = engine(100);
        let domain = Domain::customers();
        let outcome = engine.ingest_envelope(&domain, envelope("customer", vec![json!({"id": 1})]));

        assert_eq!(outcome, IngestOutcome::Buffered { records: 1, flush: None });
        assert_eq!(engine.buffer().len(), 1);
        assert_eq!(engine.stats("customer").processed, 1);
    }

    #[test]
    fn test_redelivered_id_is_skipped() {
        let (engine, _) = engine(100);
        let domain = Domain::customers();
        let env = envelope("customer", vec![json!({"id": 1})]);

        engine.ingest_envelope(&domain, env.clone());
        let outcome = engine.ingest_envelope(&domain, env);

        assert_eq!(outcome, IngestOutcome::DuplicateMessage);
        assert_eq!(engine.buffer().len(), 1);
        assert_eq!(engine.stats("customer").skipped, 1);
    }

    #[test]
    fn test_same_content_new_id_is_skipped_and_marked() {
        let (engine, _) = engine(100);
        let domain = Domain::products();
        let first = envelope("product", vec![json!({"id": "P1", "qty": 2})]);
        let second = envelope("product", vec![json!({"qty": 2, "id": "P1"})]);
        let second_id = second.message_id.clone();

        engine.ingest_envelope(&domain, first);
        assert_eq!(engine.ingest_envelope(&domain, second), IngestOutcome::DuplicateContent);
        assert!(engine.idempotency().is_processed(&second_id));
        assert_eq!(engine.buffer().len(), 1);
    }

    #[test]
    fn test_threshold_reported() {
        let (engine, _) = engine(2);
        let outcome = engine.ingest_envelope(
            &Domain::customers(),
            envelope("customer", vec![json!({"id": 1}), json!({"id": 2})]),
        );
        assert!(matches!(
            outcome,
            IngestOutcome::Buffered { flush: Some(crate::merge::FlushReason::Threshold), .. }
        ));
    }

    #[test]
    fn test_unregistered_domain_rejected() {
        let (engine, _) = engine(100);
        let orders = Domain::new("order", "ORDER", "order_data", "/api/orders", "updatedAt", "orders");
        let outcome = engine.ingest_envelope(&orders, envelope("order", vec![json!({})]));
        assert_eq!(outcome, IngestOutcome::Rejected);
        assert_eq!(engine.stats("order").errors, 1);
    }

    #[tokio::test]
    async fn test_poll_commits_and_rewinds_on_garbage() {
        let (engine, log) = engine(100);
        let domain = Domain::customers();
        let good = envelope("customer", vec![json!({"id": 1})]).to_bytes().unwrap();
        log.send("customer_data", "k1", good).await.unwrap();
        log.send("customer_data", "k2", b"garbage".to_vec()).await.unwrap();

        let summary = engine.poll_once(&domain).await.unwrap();
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.buffered, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(log.committed("customer_data", "analytics-consumers"), vec![1]);

        // The bad record comes back
        let again = engine.poll_once(&domain).await.unwrap();
        assert_eq!(again.fetched, 1);
        assert_eq!(again.rejected, 1);
        assert_eq!(engine.stats("customer").errors, 2);
    }

    /// Delegates to an [`InMemoryLog`], failing the first commit of `fail_offset`.
    struct FlakyCommitLog {
        inner: InMemoryLog,
        fail_offset: u64,
        failed: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl MessageLog for FlakyCommitLog {
        async fn send(
            &self,
            topic: &str,
            key: &str,
            value: Vec<u8>,
        ) -> Result<crate::message_log::DeliveryReceipt, LogError> {
            self.inner.send(topic, key, value).await
        }

        async fn poll(
            &self,
            topic: &str,
            group: &str,
            max_records: usize,
        ) -> Result<Vec<LogRecord>, LogError> {
            self.inner.poll(topic, group, max_records).await
        }

        async fn commit(&self, record: &LogRecord, group: &str) -> Result<(), LogError> {
            use std::sync::atomic::Ordering;
            if record.offset == self.fail_offset && !self.failed.swap(true, Ordering::SeqCst) {
                return Err(LogError::Unavailable("commit timed out".into()));
            }
            self.inner.commit(record, group).await
        }

        async fn rewind(&self, topic: &str, group: &str) -> Result<(), LogError> {
            self.inner.rewind(topic, group).await
        }
    }

    #[tokio::test]
    async fn test_commit_failure_redelivers_rest_of_batch() {
        let log = Arc::new(FlakyCommitLog {
            inner: InMemoryLog::new(),
            fail_offset: 1,
            failed: std::sync::atomic::AtomicBool::new(false),
        });
        let engine = ConsumerEngine::new(
            log.clone(),
            Arc::new(IdempotencyStore::new(100, Duration::from_secs(3600))),
            Arc::new(MergeBuffer::new(vec![Domain::customers()], 100)),
            Arc::new(RecordingSink::new()),
            &PipelineConfig::default(),
        );
        let domain = Domain::customers();
        for i in 0..3 {
            let bytes = envelope("customer", vec![json!({ "id": i })]).to_bytes().unwrap();
            log.send("customer_data", "k", bytes).await.unwrap();
        }

        let err = engine.poll_once(&domain).await.unwrap_err();
        assert_eq!(err, LogError::Unavailable("commit timed out".into()));
        assert_eq!(log.inner.committed("customer_data", "analytics-consumers"), vec![1]);

        // Offset 1 was buffered before its commit failed: it comes back as a duplicate
        let summary = engine.poll_once(&domain).await.unwrap();
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.buffered, 1);
        assert_eq!(engine.buffer().len(), 3);
        assert_eq!(log.inner.committed("customer_data", "analytics-consumers"), vec![3]);
    }
}
