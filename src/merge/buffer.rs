// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-domain record buffer with a count threshold.
//!
//! The [`MergeBuffer`] collects records per registered domain and is drained
//! into a single [`MergedPayload`] either on a timer or once the total number
//! of buffered records reaches the batch size, whichever comes first.
//!
//! # Example
//!
//! ```
//! use sync_pipeline::{Domain, MergeBuffer, FlushReason};
//! use serde_json::json;
//!
//! let buffer = MergeBuffer::new(vec![Domain::customers(), Domain::products()], 3);
//! assert_eq!(buffer.append("customer", vec![json!({"id": "C1"})]).unwrap(), None);
//! assert_eq!(
//!     buffer.append("product", vec![json!({"id": "P1"}), json!({"id": "P2"})]).unwrap(),
//!     Some(FlushReason::Threshold)
//! );
//!
//! let payload = buffer.drain_to_payload().unwrap();
//! assert_eq!(payload.record_count(), 3);
//! assert!(!buffer.has_data());
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::payload::{DomainSection, MergedPayload};
use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::domain::{Domain, Record};
use crate::error::StoreError;

/// Why a flush happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Flush interval elapsed
    Interval,
    /// Buffered record count reached the batch size
    Threshold,
    /// Flush requested by a caller
    Manual,
    /// Final flush on shutdown
    Shutdown,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interval => "interval",
            Self::Threshold => "threshold",
            Self::Manual => "manual",
            Self::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of what is currently buffered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub per_domain: BTreeMap<String, usize>,
    pub total: usize,
    /// Time since the oldest buffered record arrived
    pub age: Option<Duration>,
}

#[derive(Default)]
struct Buckets {
    /// One bucket per registered domain, same order as `MergeBuffer::domains`
    records: Vec<Vec<Record>>,
    total: usize,
    first_at: Option<Instant>,
}

impl Buckets {
    fn take(&mut self) -> Vec<Vec<Record>> {
        self.total = 0;
        self.first_at = None;
        self.records.iter_mut().map(std::mem::take).collect()
    }
}

pub struct MergeBuffer {
    domains: Vec<Domain>,
    batch_size: usize,
    source: String,
    version: String,
    clock: Arc<dyn Clock>,
    inner: Mutex<Buckets>,
}

impl MergeBuffer {
    pub fn new(domains: Vec<Domain>, batch_size: usize) -> Self {
        let buckets = Buckets {
            records: domains.iter().map(|_| Vec::new()).collect(),
            ..Default::default()
        };
        Self {
            domains,
            batch_size: batch_size.max(1),
            source: "sync-pipeline".to_string(),
            version: "1.0.0".to_string(),
            clock: Arc::new(SystemClock),
            inner: Mutex::new(buckets),
        }
    }

    pub fn from_config(domains: Vec<Domain>, config: &PipelineConfig) -> Self {
        Self::new(domains, config.merge_batch_size)
            .with_identity(config.app_name.clone(), config.app_version.clone())
    }

    /// `source` and `version` written into payload metadata.
    #[must_use]
    pub fn with_identity(mut self, source: impl Into<String>, version: impl Into<String>) -> Self {
        self.source = source.into();
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Buffer records for `domain`. Returns `Threshold` once the total
    /// buffered count has reached the batch size.
    pub fn append(&self, domain: &str, records: Vec<Record>) -> Result<Option<FlushReason>, StoreError> {
        let index = self
            .domains
            .iter()
            .position(|d| d.name == domain)
            .ok_or_else(|| StoreError::UnknownBucket(domain.to_string()))?;

        let added = records.len();
        let mut inner = self.inner.lock();
        if added > 0 && inner.first_at.is_none() {
            inner.first_at = Some(Instant::now());
        }
        inner.records[index].extend(records);
        inner.total += added;
        let total = inner.total;
        drop(inner);

        debug!(domain, added, total, "Buffered records");
        crate::metrics::set_buffered_records(total);

        Ok((total >= self.batch_size).then_some(FlushReason::Threshold))
    }

    pub fn has_data(&self) -> bool {
        self.inner.lock().total > 0
    }

    /// Whether the total buffered count has reached the batch size.
    pub fn has_enough(&self) -> bool {
        self.inner.lock().total >= self.batch_size
    }

    pub fn len(&self) -> usize {
        self.inner.lock().total
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.inner.lock();
        BufferStats {
            per_domain: self
                .domains
                .iter()
                .zip(&inner.records)
                .map(|(d, bucket)| (d.name.clone(), bucket.len()))
                .collect(),
            total: inner.total,
            age: inner.first_at.map(|t| t.elapsed()),
        }
    }

    /// Atomically take everything buffered and build a payload from it.
    ///
    /// Returns `None` when nothing is buffered. Records appended after the
    /// drain land in the next payload.
    pub fn drain_to_payload(&self) -> Option<MergedPayload> {
        let taken = {
            let mut inner = self.inner.lock();
            if inner.total == 0 {
                return None;
            }
            inner.take()
        };
        crate::metrics::set_buffered_records(0);

        let now = self.clock.now();
        let sections = self
            .domains
            .iter()
            .zip(taken)
            .map(|(domain, records)| DomainSection {
                domain: domain.name.clone(),
                field: domain.payload_field.clone(),
                count_key: domain.count_key.clone(),
                records,
            })
            .collect();

        Some(MergedPayload {
            event_id: MergedPayload::generate_event_id(now),
            timestamp: now,
            sections,
            source: self.source.clone(),
            version: self.version.clone(),
            merged_at: now,
        })
    }

    /// Drop everything buffered. Returns how many records were discarded.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let total = inner.total;
        inner.take();
        crate::metrics::set_buffered_records(0);
        total
    }
}
