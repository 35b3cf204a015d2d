// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wraps fetched records in an [`Envelope`] and hands them to the message log.
//!
//! Publishing never blocks the caller: [`Publisher::publish`] spawns the
//! send and returns a [`DeliveryHandle`] that resolves to the log's receipt
//! or a [`PublishError`]. Each publish uses a fresh random key, so records
//! spread across partitions and ordering across envelopes is not guaranteed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::domain::{Domain, Record};
use crate::envelope::{Envelope, SyncType};
use crate::error::PublishError;
use crate::message_log::{DeliveryReceipt, MessageLog};

/// Pending result of a publish. Await it to learn whether the log accepted the envelope.
#[derive(Debug)]
pub struct DeliveryHandle {
    message_id: String,
    rx: oneshot::Receiver<Result<DeliveryReceipt, PublishError>>,
}

impl DeliveryHandle {
    /// `messageId` of the envelope being delivered.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }
}

impl Future for DeliveryHandle {
    type Output = Result<DeliveryReceipt, PublishError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(PublishError::Dropped)))
    }
}

pub struct Publisher {
    log: Arc<dyn MessageLog>,
    producer_version: String,
    clock: Arc<dyn Clock>,
}

impl Publisher {
    pub fn new(log: Arc<dyn MessageLog>, producer_version: impl Into<String>) -> Self {
        Self {
            log,
            producer_version: producer_version.into(),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish `records` for `domain` as one envelope.
    ///
    /// Must be called from within a tokio runtime.
    pub fn publish(
        &self,
        domain: &Domain,
        records: Vec<Record>,
        sync_type: SyncType,
        is_full_sync: bool,
    ) -> DeliveryHandle {
        let envelope = Envelope::new(
            domain.name.clone(),
            domain.event_type.clone(),
            self.clock.now(),
            records,
            sync_type,
            is_full_sync,
            self.producer_version.clone(),
        );
        let message_id = envelope.message_id.clone();
        let record_count = envelope.record_count();
        let (tx, rx) = oneshot::channel();

        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(domain = %domain, message_id = %message_id, error = %e, "Failed to encode envelope");
                crate::metrics::record_publish_failure(&domain.name);
                let _ = tx.send(Err(PublishError::Encode(e.to_string())));
                return DeliveryHandle { message_id, rx };
            }
        };

        let key = Uuid::new_v4().to_string();
        let log = Arc::clone(&self.log);
        let topic = domain.topic.clone();
        let domain_name = domain.name.clone();
        let id = message_id.clone();
        debug!(domain = %domain_name, topic = %topic, record_count, %sync_type, "Publishing envelope");

        tokio::spawn(async move {
            let result = log
                .send(&topic, &key, bytes)
                .await
                .map_err(PublishError::from);
            match &result {
                Ok(receipt) => {
                    info!(
                        domain = %domain_name,
                        message_id = %id,
                        key = %key,
                        partition = receipt.partition,
                        offset = receipt.offset,
                        record_count,
                        "Envelope delivered"
                    );
                    crate::metrics::record_published(&domain_name, record_count);
                }
                Err(e) => {
                    error!(domain = %domain_name, message_id = %id, error = %e, "Envelope delivery failed");
                    crate::metrics::record_publish_failure(&domain_name);
                }
            }
            // Receiver may have been dropped by a caller that stopped caring
            let _ = tx.send(result);
        });

        DeliveryHandle { message_id, rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_log::memory::InMemoryLog;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_lands_on_domain_topic() {
        let log = Arc::new(InMemoryLog::new());
        let publisher = Publisher::new(log.clone(), "1.0.0");
        let domain = Domain::customers();

        let handle = publisher.publish(
            &domain,
            vec![json!({"id": "C1"})],
            SyncType::InitialFull,
            true,
        );
        let message_id = handle.message_id().to_string();
        let receipt = handle.await.unwrap();

        assert_eq!(receipt.topic, "customer_data");
        let stored = log.values("customer_data");
        assert_eq!(stored.len(), 1);
        let envelope = Envelope::from_bytes(&stored[0]).unwrap();
        assert_eq!(envelope.message_id, message_id);
        assert_eq!(envelope.event_type, "CUSTOMER");
        assert!(envelope.metadata.is_full_sync);
        assert_eq!(envelope.metadata.producer_version, "1.0.0");
    }

    #[tokio::test]
    async fn test_publish_failure_resolves_handle_with_error() {
        let log = Arc::new(InMemoryLog::new());
        log.set_unavailable(true);
        let publisher = Publisher::new(log.clone(), "1.0.0");

        let result = publisher
            .publish(&Domain::products(), vec![json!({})], SyncType::Incremental, false)
            .await;

        assert!(matches!(result, Err(PublishError::Unavailable(_))));
        assert!(log.is_empty("inventory_data"));
    }

    #[tokio::test]
    async fn test_unknown_topic_is_rejected() {
        let log = Arc::new(InMemoryLog::new().require_topics());
        let publisher = Publisher::new(log, "1.0.0");

        let result = publisher
            .publish(&Domain::products(), vec![], SyncType::Incremental, false)
            .await;

        assert!(matches!(result, Err(PublishError::Rejected(_))));
    }
}
