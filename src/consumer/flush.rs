// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Draining the merge buffer to the sink.

use std::time::Instant;

use tracing::{debug, error, info};

use super::{ConsumerEngine, FlushOutcome};
use crate::error::SinkError;
use crate::merge::FlushReason;
use crate::resilience::retry::retry;

impl ConsumerEngine {
    /// Drain the buffer into one payload and deliver it.
    ///
    /// Retryable sink failures are retried with backoff. When delivery
    /// finally fails the payload goes to the failed-flush handler; it is
    /// never put back in the buffer.
    #[tracing::instrument(skip(self, reason), fields(reason = %reason))]
    pub async fn flush(&self, reason: FlushReason) -> FlushOutcome {
        let _guard = self.flush_lock.lock().await;

        let Some(payload) = self.buffer.drain_to_payload() else {
            debug!("No data to merge yet");
            return FlushOutcome::Empty;
        };

        let event_id = payload.event_id.clone();
        let records = payload.record_count();
        let counts: Vec<String> = payload
            .sections
            .iter()
            .map(|s| format!("{}={}", s.domain, s.records.len()))
            .collect();
        info!(event_id = %event_id, records, counts = %counts.join(","), "Sending merged payload");

        let start = Instant::now();
        let sink = &self.sink;
        let payload_ref = &payload;
        let result = retry("sink send", &self.sink_retry, SinkError::is_retryable, move || {
            sink.send(payload_ref)
        })
        .await;

        match result {
            Ok(ack) => {
                info!(
                    event_id = %event_id,
                    records,
                    records_processed = ack.records_processed,
                    status = %ack.status,
                    "Merged payload delivered"
                );
                crate::metrics::record_flush(reason.as_str(), "delivered", records, start.elapsed());
                FlushOutcome::Delivered {
                    event_id,
                    records,
                    reason,
                    ack,
                }
            }
            Err(error) => {
                error!(event_id = %event_id, records, error = %error, "Failed to deliver merged payload");
                crate::metrics::record_flush(reason.as_str(), "dropped", records, start.elapsed());
                self.failed_flush.handle(payload, &error).await;
                FlushOutcome::Dropped {
                    event_id,
                    records,
                    reason,
                    error,
                }
            }
        }
    }

    /// Flush only when there is something buffered.
    pub async fn flush_if_data(&self, reason: FlushReason) -> Option<FlushOutcome> {
        if self.buffer.has_data() {
            Some(self.flush(reason).await)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::domain::Domain;
    use crate::idempotency::IdempotencyStore;
    use crate::merge::MergeBuffer;
    use crate::message_log::memory::InMemoryLog;
    use crate::resilience::retry::RetryConfig;
    use crate::sink::memory::{CollectingFailedFlush, RecordingSink};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn engine() -> (ConsumerEngine, Arc<RecordingSink>, Arc<CollectingFailedFlush>) {
        let sink = Arc::new(RecordingSink::new());
        let failed = Arc::new(CollectingFailedFlush::new());
        let engine = ConsumerEngine::new(
            Arc::new(InMemoryLog::new()),
            Arc::new(IdempotencyStore::new(100, Duration::from_secs(60))),
            Arc::new(MergeBuffer::new(vec![Domain::customers(), Domain::products()], 100)),
            sink.clone(),
            &PipelineConfig::default(),
        )
        .with_sink_retry(RetryConfig::immediate(3))
        .with_failed_flush_handler(failed.clone());
        (engine, sink, failed)
    }

    #[tokio::test]
    async fn test_flush_empty_buffer_sends_nothing() {
        let (engine, sink, _) = engine();
        assert_eq!(engine.flush(FlushReason::Interval).await, FlushOutcome::Empty);
        assert!(engine.flush_if_data(FlushReason::Interval).await.is_none());
        assert_eq!(sink.attempts(), 0);
    }

    #[tokio::test]
    async fn test_flush_delivers_and_clears() {
        let (engine, sink, _) = engine();
        engine.buffer().append("customer", vec![json!({"id": 1})]).unwrap();

        let outcome = engine.flush(FlushReason::Manual).await;
        assert!(outcome.is_delivered());
        assert_eq!(sink.payloads().len(), 1);
        assert!(!engine.buffer().has_data());
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let (engine, sink, failed) = engine();
        sink.fail_next(SinkError::Unavailable("503".into()));
        engine.buffer().append("product", vec![json!({"id": "P1"})]).unwrap();

        assert!(engine.flush(FlushReason::Interval).await.is_delivered());
        assert_eq!(sink.attempts(), 2);
        assert!(failed.failed().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_drop_payload() {
        let (engine, sink, failed) = engine();
        sink.fail_always(Some(SinkError::Unavailable("down".into())));
        engine.buffer().append("customer", vec![json!({"id": 1})]).unwrap();

        let outcome = engine.flush(FlushReason::Interval).await;
        assert!(matches!(outcome, FlushOutcome::Dropped { records: 1, .. }));
        assert_eq!(sink.attempts(), 3);
        assert!(!engine.buffer().has_data());
        assert_eq!(failed.failed().len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_not_retried() {
        let (engine, sink, failed) = engine();
        sink.fail_next(SinkError::Rejected {
            status: 400,
            message: "bad".into(),
        });
        engine.buffer().append("customer", vec![json!({"id": 1})]).unwrap();

        let outcome = engine.flush(FlushReason::Threshold).await;
        assert!(matches!(outcome, FlushOutcome::Dropped { .. }));
        assert_eq!(sink.attempts(), 1);
        assert_eq!(failed.failed()[0].1.to_string(), "sink rejected payload (HTTP 400): bad");
    }
}
