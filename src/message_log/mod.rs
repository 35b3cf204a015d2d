// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The durable message log between producers and the consumer.
//!
//! Delivery is at-least-once: records are redelivered to a consumer group
//! until committed. Committing a record commits everything before it on the
//! same partition, so a consumer that cannot process a record must
//! [`rewind`](MessageLog::rewind) instead of skipping past it.

pub mod memory;

use async_trait::async_trait;

use crate::error::LogError;

/// Where an accepted record landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

/// A record handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub value: Vec<u8>,
}

#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Append a record. Resolves once the log has accepted it.
    async fn send(&self, topic: &str, key: &str, value: Vec<u8>)
        -> Result<DeliveryReceipt, LogError>;

    /// Next uncommitted records for `group`, at most `max_records`.
    async fn poll(&self, topic: &str, group: &str, max_records: usize)
        -> Result<Vec<LogRecord>, LogError>;

    /// Mark `record` and everything before it on its partition as processed.
    async fn commit(&self, record: &LogRecord, group: &str) -> Result<(), LogError>;

    /// Reset the group's read position to its committed offsets so
    /// uncommitted records are delivered again.
    async fn rewind(&self, topic: &str, group: &str) -> Result<(), LogError>;
}
