// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded record of processed messages.
//!
//! Answers two questions for the consumer:
//!
//! - has this `messageId` been processed? (redelivery by the log)
//! - has a payload with this content been processed? (a producer re-publishing
//!   the same records under a new id)
//!
//! Entries expire after a TTL and the store never holds more than
//! `max_entries`; the least recently marked entry is evicted first.
//! Expiry is lazy: expired entries are purged on the next access.
//!
//! # Example
//!
//! ```
//! use sync_pipeline::IdempotencyStore;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let store = IdempotencyStore::new(2, Duration::from_secs(3600));
//! let fp = IdempotencyStore::fingerprint(&[json!({"id": 1})]);
//!
//! store.mark_processed("m1", "customer", 1, &fp);
//! assert!(store.is_processed("m1"));
//! assert!(store.is_duplicate_content(&fp));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::domain::Record;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub message_id: String,
    pub domain: String,
    pub record_count: usize,
    pub fingerprint: String,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IdempotencyStats {
    pub entries: usize,
    pub fingerprints: usize,
    pub max_entries: usize,
    /// `entries` as a percentage of `max_entries`
    pub utilization_percent: f64,
    pub evicted: u64,
    pub expired: u64,
}

struct Entry {
    record: IdempotencyRecord,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Marking order. Stale `(id, seq)` pairs left behind by re-marks are skipped.
    order: VecDeque<(String, u64)>,
    /// Live entries per fingerprint.
    fingerprints: HashMap<String, usize>,
    next_seq: u64,
    evicted: u64,
    expired: u64,
}

impl Inner {
    fn remove(&mut self, message_id: &str) -> Option<IdempotencyRecord> {
        let entry = self.entries.remove(message_id)?;
        if let Some(count) = self.fingerprints.get_mut(&entry.record.fingerprint) {
            *count -= 1;
            if *count == 0 {
                self.fingerprints.remove(&entry.record.fingerprint);
            }
        }
        Some(entry.record)
    }

    /// Front of `order` that still refers to a live entry.
    fn oldest_live(&mut self) -> Option<(String, u64)> {
        while let Some((id, seq)) = self.order.front() {
            let live = self.entries.get(id).is_some_and(|e| e.seq == *seq);
            if live {
                return Some((id.clone(), *seq));
            }
            self.order.pop_front();
        }
        None
    }

    fn purge_expired(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut purged = 0;
        while let Some((id, _)) = self.oldest_live() {
            let expired = self
                .entries
                .get(&id)
                .is_some_and(|e| e.record.processed_at <= cutoff);
            if !expired {
                break;
            }
            self.order.pop_front();
            self.remove(&id);
            purged += 1;
        }
        self.expired += purged as u64;
        purged
    }

    fn evict_oldest(&mut self) -> bool {
        match self.oldest_live() {
            Some((id, _)) => {
                self.order.pop_front();
                self.remove(&id);
                self.evicted += 1;
                true
            }
            None => false,
        }
    }

    fn compact_order(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(id, seq)| entries.get(id).is_some_and(|e| e.seq == *seq));
    }
}

pub struct IdempotencyStore {
    inner: Mutex<Inner>,
    max_entries: usize,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl IdempotencyStore {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_entries: max_entries.max(1),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.idempotency_max_entries, config.idempotency_ttl())
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// SHA-256 hex of the payload's canonical JSON (keys sorted at every level).
    ///
    /// Two payloads differing only in key order share a fingerprint; any change
    /// in values, nesting or array order produces a different one.
    pub fn fingerprint(payload: &[Record]) -> String {
        let mut canonical = String::new();
        canonical.push('[');
        for (i, record) in payload.iter().enumerate() {
            if i > 0 {
                canonical.push(',');
            }
            write_canonical(record, &mut canonical);
        }
        canonical.push(']');
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    pub fn is_processed(&self, message_id: &str) -> bool {
        let inner = self.lock_fresh();
        inner.entries.contains_key(message_id)
    }

    pub fn is_duplicate_content(&self, fingerprint: &str) -> bool {
        let inner = self.lock_fresh();
        inner.fingerprints.contains_key(fingerprint)
    }

    pub fn get(&self, message_id: &str) -> Option<IdempotencyRecord> {
        let inner = self.lock_fresh();
        inner.entries.get(message_id).map(|e| e.record.clone())
    }

    /// Record a processed message. Re-marking an id refreshes it to newest.
    pub fn mark_processed(
        &self,
        message_id: &str,
        domain: &str,
        record_count: usize,
        fingerprint: &str,
    ) {
        let now = self.clock.now();
        let mut inner = self.lock_fresh();
        inner.remove(message_id);

        let mut evicted = 0;
        while inner.entries.len() >= self.max_entries && inner.evict_oldest() {
            evicted += 1;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.push_back((message_id.to_string(), seq));
        *inner.fingerprints.entry(fingerprint.to_string()).or_insert(0) += 1;
        inner.entries.insert(
            message_id.to_string(),
            Entry {
                record: IdempotencyRecord {
                    message_id: message_id.to_string(),
                    domain: domain.to_string(),
                    record_count,
                    fingerprint: fingerprint.to_string(),
                    processed_at: now,
                },
                seq,
            },
        );

        if inner.order.len() > self.max_entries.saturating_mul(2) {
            inner.compact_order();
        }

        let entries = inner.entries.len();
        drop(inner);

        if evicted > 0 {
            debug!(evicted, "Evicted oldest idempotency entries");
        }
        crate::metrics::record_idempotency_evictions("capacity", evicted);
        crate::metrics::set_idempotency_entries(entries);
    }

    pub fn len(&self) -> usize {
        self.lock_fresh().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.fingerprints.clear();
        crate::metrics::set_idempotency_entries(0);
    }

    pub fn stats(&self) -> IdempotencyStats {
        let inner = self.lock_fresh();
        let entries = inner.entries.len();
        IdempotencyStats {
            entries,
            fingerprints: inner.fingerprints.len(),
            max_entries: self.max_entries,
            utilization_percent: entries as f64 / self.max_entries as f64 * 100.0,
            evicted: inner.evicted,
            expired: inner.expired,
        }
    }

    /// Lock and drop anything past its TTL.
    fn lock_fresh(&self) -> parking_lot::MutexGuard<'_, Inner> {
        let mut inner = self.inner.lock();
        let Some(cutoff) = self.clock.now().checked_sub_signed(self.ttl) else {
            return inner;
        };
        let purged = inner.purge_expired(cutoff);
        if purged > 0 {
            debug!(purged, "Expired idempotency entries");
            crate::metrics::record_idempotency_evictions("expired", purged);
        }
        inner
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
