// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Consumer run loops and shutdown.
//!
//! [`ConsumerEngine::run`] spawns one poll loop per domain plus a flush
//! loop, and returns after the shutdown signal once every loop has stopped
//! and the final flush has run.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::ConsumerEngine;
use crate::domain::Domain;
use crate::merge::FlushReason;

impl ConsumerEngine {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn [`run`](Self::run) on the runtime.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Consume until `shutdown` becomes `true` (or its sender is dropped).
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        self.running.store(true, Ordering::SeqCst);
        info!(
            domains = self.domains.len(),
            group = %self.group,
            flush_interval = ?self.flush_interval,
            "Starting consumer"
        );

        if !self.sink.health_check().await {
            warn!("Sink health check failed; continuing, sends will be retried");
        }

        let mut tasks: Vec<(String, JoinHandle<()>)> = Vec::new();
        for domain in self.domains.clone() {
            let engine = Arc::clone(&self);
            let rx = shutdown.clone();
            let name = domain.name.clone();
            tasks.push((name, tokio::spawn(async move { engine.poll_loop(domain, rx).await })));
        }
        let engine = Arc::clone(&self);
        tasks.push((
            "flush".to_string(),
            tokio::spawn(async move { engine.flush_loop(shutdown).await }),
        ));

        for (name, task) in tasks {
            if let Err(e) = task.await {
                error!(task = %name, error = %e, "Consumer task panicked");
            }
        }

        self.shutdown_flush().await;
        self.running.store(false, Ordering::SeqCst);
        info!("Consumer stopped");
    }

    /// Flush whatever is left. A failed delivery is handed to the
    /// failed-flush handler like any other.
    pub async fn shutdown_flush(&self) {
        match self.flush_if_data(FlushReason::Shutdown).await {
            Some(outcome) if outcome.is_delivered() => info!("Final flush delivered"),
            Some(_) => warn!("Final flush could not be delivered; buffered data abandoned"),
            None => debug!("Nothing buffered at shutdown"),
        }
    }

    async fn poll_loop(&self, domain: Domain, mut shutdown: watch::Receiver<bool>) {
        info!(domain = %domain, topic = %domain.topic, "Starting poll loop");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.poll_once(&domain).await {
                Ok(summary) => summary.fetched == 0 || summary.rejected > 0,
                Err(e) => {
                    error!(domain = %domain, error = %e, "Poll failed");
                    crate::metrics::record_error("consumer", "poll");
                    true
                }
            };

            if idle {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = sleep(self.poll_timeout) => {}
                }
            }
        }

        info!(domain = %domain, "Poll loop stopped");
    }

    async fn flush_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = self.flush_notify.notified() => {
                    if self.buffer.has_enough() {
                        self.flush(FlushReason::Threshold).await;
                    }
                }

                _ = ticker.tick() => {
                    if self.flush_if_data(FlushReason::Interval).await.is_none() {
                        debug!("No data to merge yet");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::envelope::{Envelope, SyncType};
    use crate::idempotency::IdempotencyStore;
    use crate::merge::MergeBuffer;
    use crate::message_log::memory::InMemoryLog;
    use crate::message_log::MessageLog;
    use crate::resilience::retry::RetryConfig;
    use crate::sink::memory::RecordingSink;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    async fn publish(log: &InMemoryLog, domain: &Domain, n: usize) {
        let payload = (0..n).map(|i| json!({ "id": i, "src": domain.name })).collect();
        let env = Envelope::new(&domain.name, &domain.event_type, Utc::now(), payload, SyncType::InitialFull, true, "1.0.0");
        log.send(&domain.topic, "k", env.to_bytes().unwrap()).await.unwrap();
    }

    fn consumer(log: Arc<InMemoryLog>, sink: Arc<RecordingSink>, config: &PipelineConfig) -> Arc<ConsumerEngine> {
        let buffer = Arc::new(MergeBuffer::from_config(vec![Domain::customers(), Domain::products()], config));
        Arc::new(
            ConsumerEngine::new(log, Arc::new(IdempotencyStore::from_config(config)), buffer, sink, config)
                .with_sink_retry(RetryConfig::immediate(2)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flush_merges_domains() {
        let log = Arc::new(InMemoryLog::new());
        let sink = Arc::new(RecordingSink::new());
        let config = PipelineConfig {
            poll_timeout_ms: 100,
            ..Default::default()
        };
        let engine = consumer(log.clone(), sink.clone(), &config);
        publish(&log, &Domain::customers(), 2).await;
        publish(&log, &Domain::products(), 3).await;

        let (tx, rx) = watch::channel(false);
        let handle = engine.clone().spawn(rx);

        tokio::time::sleep(Duration::from_secs(31)).await;
        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 1);
        let payload = &payloads[0];
        assert_eq!(payload.count_for("customer"), 2);
        assert_eq!(payload.count_for("product"), 3);

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_triggers_early_flush() {
        let log = Arc::new(InMemoryLog::new());
        let sink = Arc::new(RecordingSink::new());
        let config = PipelineConfig {
            merge_batch_size: 4,
            poll_timeout_ms: 100,
            ..Default::default()
        };
        let engine = consumer(log.clone(), sink.clone(), &config);
        publish(&log, &Domain::customers(), 5).await;

        let (tx, rx) = watch::channel(false);
        let handle = engine.clone().spawn(rx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.payloads().len(), 1);
        assert_eq!(sink.payloads()[0].record_count(), 5);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_remaining() {
        let log = Arc::new(InMemoryLog::new());
        let sink = Arc::new(RecordingSink::new());
        let config = PipelineConfig {
            poll_timeout_ms: 100,
            ..Default::default()
        };
        let engine = consumer(log.clone(), sink.clone(), &config);
        publish(&log, &Domain::products(), 1).await;

        let (tx, rx) = watch::channel(false);
        let handle = engine.clone().spawn(rx);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(sink.payloads().is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(sink.payloads().len(), 1);
        assert!(!engine.buffer().has_data());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_intervals_are_clamped() {
        let log = Arc::new(InMemoryLog::new());
        let sink = Arc::new(RecordingSink::new());
        let config = PipelineConfig {
            merge_flush_interval_secs: 0,
            poll_timeout_ms: 0,
            ..Default::default()
        };
        let engine = consumer(log.clone(), sink.clone(), &config);
        publish(&log, &Domain::customers(), 1).await;

        let (tx, rx) = watch::channel(false);
        let handle = engine.clone().spawn(rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.payloads().len(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
