// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-domain sync progress.
//!
//! One [`SyncState`] row per domain. The producer reads it to choose between
//! a full and an incremental sync, and records every successful run through
//! [`SyncStateStore::record_sync`], which must be an atomic upsert.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub domain: String,
    pub initial_sync_done: bool,
    /// Start time of the last successful sync. Only moves forward.
    #[serde(with = "crate::clock::iso_seconds")]
    pub last_sync_time: DateTime<Utc>,
    pub total_records_synced: u64,
    pub last_sync_record_count: u64,
    #[serde(with = "crate::clock::iso_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::clock::iso_seconds")]
    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    pub fn new(domain: impl Into<String>, sync_start: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            domain: domain.into(),
            initial_sync_done: false,
            last_sync_time: sync_start,
            total_records_synced: 0,
            last_sync_record_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply one successful sync that started at `sync_start` and published `count` records.
    pub fn apply_sync(&mut self, sync_start: DateTime<Utc>, count: u64, now: DateTime<Utc>) {
        self.initial_sync_done = true;
        self.last_sync_time = self.last_sync_time.max(sync_start);
        self.total_records_synced = self.total_records_synced.saturating_add(count);
        self.last_sync_record_count = count;
        self.updated_at = now;
    }
}

#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn get(&self, domain: &str) -> Result<Option<SyncState>, StoreError>;

    /// Upsert: create the row if missing, then apply the sync. Returns the new row.
    async fn record_sync(
        &self,
        domain: &str,
        sync_start: DateTime<Utc>,
        record_count: u64,
    ) -> Result<SyncState, StoreError>;

    async fn all(&self) -> Result<Vec<SyncState>, StoreError>;

    async fn is_initial_sync_done(&self, domain: &str) -> Result<bool, StoreError> {
        Ok(self
            .get(domain)
            .await?
            .is_some_and(|state| state.initial_sync_done))
    }

    async fn last_sync_time(&self, domain: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.get(domain).await?.map(|state| state.last_sync_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_apply_sync_never_moves_backwards() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap();
        let mut state = SyncState::new("customer", t0, t0);

        state.apply_sync(t1, 5, t1);
        state.apply_sync(t0, 2, t1);

        assert_eq!(state.last_sync_time, t1);
        assert_eq!(state.total_records_synced, 7);
        assert_eq!(state.last_sync_record_count, 2);
        assert!(state.initial_sync_done);
    }

    #[test]
    fn test_serializes_camel_case() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let value = serde_json::to_value(SyncState::new("product", t0, t0)).unwrap();
        assert_eq!(value["lastSyncTime"], "2024-01-01T10:00:00Z");
        assert_eq!(value["initialSyncDone"], false);
        assert_eq!(value["totalRecordsSynced"], 0);
    }
}
