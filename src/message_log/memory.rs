// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DeliveryReceipt, LogRecord, MessageLog};
use crate::error::LogError;

struct StoredRecord {
    key: String,
    value: Vec<u8>,
}

/// Per-group cursor: `committed[p]` is the next offset a restarted reader
/// would see, `position[p]` the next offset this reader will see.
struct GroupCursor {
    committed: Vec<u64>,
    position: Vec<u64>,
}

impl GroupCursor {
    fn new(partitions: usize) -> Self {
        Self {
            committed: vec![0; partitions],
            position: vec![0; partitions],
        }
    }
}

struct TopicLog {
    partitions: Vec<Vec<StoredRecord>>,
    groups: HashMap<String, GroupCursor>,
}

impl TopicLog {
    fn new(partitions: u32) -> Self {
        Self {
            partitions: (0..partitions).map(|_| Vec::new()).collect(),
            groups: HashMap::new(),
        }
    }

    fn cursor(&mut self, group: &str) -> &mut GroupCursor {
        let partitions = self.partitions.len();
        self.groups
            .entry(group.to_string())
            .or_insert_with(|| GroupCursor::new(partitions))
    }
}

/// In-process message log with Kafka-like partitions and consumer groups.
///
/// Records are partitioned by key hash. Topics are created on first send
/// unless the log was built with [`InMemoryLog::require_topics`].
pub struct InMemoryLog {
    partitions: u32,
    auto_create: bool,
    topics: Mutex<HashMap<String, TopicLog>>,
    unavailable: AtomicBool,
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    pub fn with_partitions(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            auto_create: true,
            topics: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Reject sends to topics that were not created up front.
    #[must_use]
    pub fn require_topics(mut self) -> Self {
        self.auto_create = false;
        self
    }

    pub fn create_topic(&self, topic: &str) {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog::new(self.partitions));
    }

    /// Simulate a broker outage: every call fails until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Records stored on `topic` across all partitions.
    pub fn len(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map(|t| t.partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    /// Stored values on `topic`, partition by partition in offset order.
    pub fn values(&self, topic: &str) -> Vec<Vec<u8>> {
        self.topics
            .lock()
            .get(topic)
            .map(|t| {
                t.partitions
                    .iter()
                    .flat_map(|p| p.iter().map(|r| r.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Committed offsets of `group` on `topic`, one per partition.
    pub fn committed(&self, topic: &str, group: &str) -> Vec<u64> {
        self.topics
            .lock()
            .get(topic)
            .and_then(|t| t.groups.get(group))
            .map(|c| c.committed.clone())
            .unwrap_or_default()
    }

    fn partition_for(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(self.partitions)) as u32
    }

    fn check_available(&self) -> Result<(), LogError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(LogError::Unavailable("in-memory log marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessageLog for InMemoryLog {
    async fn send(
        &self,
        topic: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<DeliveryReceipt, LogError> {
        self.check_available()?;
        let partition = self.partition_for(key);
        let mut topics = self.topics.lock();
        if !topics.contains_key(topic) {
            if !self.auto_create {
                return Err(LogError::UnknownTopic(topic.to_string()));
            }
            topics.insert(topic.to_string(), TopicLog::new(self.partitions));
        }
        let log = topics
            .get_mut(topic)
            .ok_or_else(|| LogError::UnknownTopic(topic.to_string()))?;

        let records = &mut log.partitions[partition as usize];
        records.push(StoredRecord {
            key: key.to_string(),
            value,
        });
        Ok(DeliveryReceipt {
            topic: topic.to_string(),
            partition,
            offset: (records.len() - 1) as u64,
        })
    }

    async fn poll(
        &self,
        topic: &str,
        group: &str,
        max_records: usize,
    ) -> Result<Vec<LogRecord>, LogError> {
        self.check_available()?;
        let mut topics = self.topics.lock();
        let Some(log) = topics.get_mut(topic) else {
            return Ok(Vec::new());
        };

        let mut batch = Vec::new();
        let partition_count = log.partitions.len();
        for partition in 0..partition_count {
            let available = log.partitions[partition].len() as u64;
            let start = log.cursor(group).position[partition];
            let mut next = start;
            while next < available && batch.len() < max_records {
                let stored = &log.partitions[partition][next as usize];
                batch.push(LogRecord {
                    topic: topic.to_string(),
                    partition: partition as u32,
                    offset: next,
                    key: stored.key.clone(),
                    value: stored.value.clone(),
                });
                next += 1;
            }
            log.cursor(group).position[partition] = next;
            if batch.len() >= max_records {
                break;
            }
        }
        Ok(batch)
    }

    async fn commit(&self, record: &LogRecord, group: &str) -> Result<(), LogError> {
        self.check_available()?;
        let mut topics = self.topics.lock();
        let log = topics
            .get_mut(&record.topic)
            .ok_or_else(|| LogError::UnknownTopic(record.topic.clone()))?;
        let cursor = log.cursor(group);
        let partition = record.partition as usize;
        if partition >= cursor.committed.len() {
            return Err(LogError::Unavailable(format!(
                "partition {} out of range for {}",
                record.partition, record.topic
            )));
        }
        cursor.committed[partition] = cursor.committed[partition].max(record.offset + 1);
        cursor.position[partition] = cursor.position[partition].max(cursor.committed[partition]);
        Ok(())
    }

    async fn rewind(&self, topic: &str, group: &str) -> Result<(), LogError> {
        self.check_available()?;
        let mut topics = self.topics.lock();
        if let Some(log) = topics.get_mut(topic) {
            let cursor = log.cursor(group);
            cursor.position = cursor.committed.clone();
        }
        Ok(())
    }
}
