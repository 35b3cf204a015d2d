// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{SyncState, SyncStateStore};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;

/// DashMap-backed sync state. The entry API gives per-domain atomic upserts.
pub struct InMemorySyncStateStore {
    states: DashMap<String, SyncState>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemorySyncStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySyncStateStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            states: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl SyncStateStore for InMemorySyncStateStore {
    async fn get(&self, domain: &str) -> Result<Option<SyncState>, StoreError> {
        Ok(self.states.get(domain).map(|state| state.clone()))
    }

    async fn record_sync(
        &self,
        domain: &str,
        sync_start: DateTime<Utc>,
        record_count: u64,
    ) -> Result<SyncState, StoreError> {
        let now = self.clock.now();
        let mut entry = self
            .states
            .entry(domain.to_string())
            .or_insert_with(|| SyncState::new(domain, sync_start, now));
        entry.apply_sync(sync_start, record_count, now);
        Ok(entry.clone())
    }

    async fn all(&self) -> Result<Vec<SyncState>, StoreError> {
        let mut states: Vec<SyncState> = self.states.iter().map(|e| e.value().clone()).collect();
        states.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(states)
    }
}
