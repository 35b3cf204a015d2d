// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::RecordSource;
use crate::domain::{Domain, Record};
use crate::error::SourceError;

/// In-memory record source with injectable failures.
///
/// Records are keyed by domain name. Queued failures are returned by the
/// next fetches, one per call, before any data is served.
#[derive(Default)]
pub struct InMemorySource {
    records: DashMap<String, Vec<Record>>,
    failures: Mutex<VecDeque<SourceError>>,
    fetches: AtomicUsize,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_records(&self, domain: &str, records: Vec<Record>) {
        self.records.insert(domain.to_string(), records);
    }

    pub fn push_record(&self, domain: &str, record: Record) {
        self.records.entry(domain.to_string()).or_default().push(record);
    }

    /// Fail the next fetch with `err`.
    pub fn fail_next(&self, err: SourceError) {
        self.failures.lock().push_back(err);
    }

    /// Number of fetch calls served (including failed ones).
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for InMemorySource {
    async fn fetch_all(&self, domain: &Domain) -> Result<Vec<Record>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self
            .records
            .get(&domain.name)
            .map(|records| records.clone())
            .unwrap_or_default())
    }
}
