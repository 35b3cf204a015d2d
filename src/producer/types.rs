// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the producer side.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::envelope::SyncType;
use crate::message_log::DeliveryReceipt;
use crate::state::SyncState;

/// Per-domain producer phase.
///
/// ```text
/// Uninitialized → FullSyncInProgress → Steady ⇄ IncrementalInProgress
/// ```
///
/// An empty or failed full sync drops back to `Uninitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncPhase {
    Uninitialized,
    FullSyncInProgress,
    IncrementalInProgress,
    Steady,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::FullSyncInProgress => write!(f, "FullSyncInProgress"),
            Self::IncrementalInProgress => write!(f, "IncrementalInProgress"),
            Self::Steady => write!(f, "Steady"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Full,
    Incremental,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }

    pub fn sync_type(&self) -> SyncType {
        match self {
            Self::Full => SyncType::InitialFull,
            Self::Incremental => SyncType::Incremental,
        }
    }
}

impl std::fmt::Display for SyncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one sync run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub domain: String,
    pub kind: SyncKind,
    /// When the run started; becomes `last_sync_time` if the state advanced.
    pub started_at: DateTime<Utc>,
    /// Records published (0 when nothing changed).
    pub records: usize,
    /// Log receipt, present only when an envelope was published.
    pub receipt: Option<DeliveryReceipt>,
    /// Whether the sync-state row was updated.
    pub state_advanced: bool,
}

impl SyncReport {
    pub fn published(&self) -> bool {
        self.receipt.is_some()
    }
}

/// Externally visible sync status of a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// No successful sync recorded yet.
    NotSynced,
    /// Synced, but no records have ever been published.
    #[serde(rename_all = "camelCase")]
    SyncedEmpty {
        #[serde(with = "crate::clock::iso_seconds")]
        last_sync_time: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Synced {
        #[serde(with = "crate::clock::iso_seconds")]
        last_sync_time: DateTime<Utc>,
        total_records: u64,
        last_sync_records: u64,
    },
}

impl SyncStatus {
    pub fn from_state(state: Option<&SyncState>) -> Self {
        match state {
            Some(state) if state.initial_sync_done && state.total_records_synced > 0 => Self::Synced {
                last_sync_time: state.last_sync_time,
                total_records: state.total_records_synced,
                last_sync_records: state.last_sync_record_count,
            },
            Some(state) if state.initial_sync_done => Self::SyncedEmpty {
                last_sync_time: state.last_sync_time,
            },
            _ => Self::NotSynced,
        }
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::NotSynced => None,
            Self::SyncedEmpty { last_sync_time } | Self::Synced { last_sync_time, .. } => {
                Some(*last_sync_time)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_from_state() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(SyncStatus::from_state(None), SyncStatus::NotSynced);

        let mut state = SyncState::new("customer", t0, t0);
        assert_eq!(SyncStatus::from_state(Some(&state)), SyncStatus::NotSynced);

        state.apply_sync(t0, 0, t0);
        assert_eq!(
            SyncStatus::from_state(Some(&state)),
            SyncStatus::SyncedEmpty { last_sync_time: t0 }
        );

        state.apply_sync(t0, 4, t0);
        let status = SyncStatus::from_state(Some(&state));
        assert!(matches!(status, SyncStatus::Synced { total_records: 4, .. }));
        assert_eq!(status.last_sync_time(), Some(t0));
    }

    #[test]
    fn test_status_json() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let value = serde_json::to_value(SyncStatus::Synced {
            last_sync_time: t0,
            total_records: 7,
            last_sync_records: 2,
        })
        .unwrap();
        assert_eq!(value["status"], "SYNCED");
        assert_eq!(value["lastSyncTime"], "2024-01-01T10:00:00Z");
        assert_eq!(value["totalRecords"], 7);

        let value = serde_json::to_value(SyncStatus::NotSynced).unwrap();
        assert_eq!(value["status"], "NOT_SYNCED");
    }

    #[test]
    fn test_kind_maps_to_sync_type() {
        assert_eq!(SyncKind::Full.sync_type(), SyncType::InitialFull);
        assert_eq!(SyncKind::Incremental.to_string(), "incremental");
        assert_eq!(SyncPhase::Steady.to_string(), "Steady");
    }
}
