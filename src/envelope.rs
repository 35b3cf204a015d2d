// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The message carried on the log between producers and the consumer.
//!
//! Serialized as camelCase JSON:
//!
//! ```json
//! {
//!   "messageId": "8d0e…",
//!   "source": "customer",
//!   "eventType": "CUSTOMER",
//!   "timestamp": "2024-01-01T10:00:00Z",
//!   "payload": [ … ],
//!   "metadata": {
//!     "producerVersion": "1.0.0",
//!     "isFullSync": true,
//!     "isIncrementalSync": false,
//!     "recordCount": 5,
//!     "syncType": "INITIAL_FULL"
//!   }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Record;

/// Kind of sync that produced an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncType {
    InitialFull,
    Incremental,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialFull => "INITIAL_FULL",
            Self::Incremental => "INCREMENTAL",
        }
    }
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    #[serde(default)]
    pub producer_version: String,
    pub is_full_sync: bool,
    pub is_incremental_sync: bool,
    pub record_count: usize,
    pub sync_type: SyncType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Fresh UUID per publish. Redeliveries of the same message share it.
    pub message_id: String,
    /// Producing domain name.
    pub source: String,
    pub event_type: String,
    #[serde(with = "crate::clock::iso_seconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Vec<Record>,
    pub metadata: EnvelopeMetadata,
}

impl Envelope {
    /// Build an envelope with a new message id.
    ///
    /// `is_full_sync` and `is_incremental_sync` are always opposites.
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: Vec<Record>,
        sync_type: SyncType,
        is_full_sync: bool,
        producer_version: impl Into<String>,
    ) -> Self {
        let record_count = payload.len();
        Self {
            message_id: Uuid::new_v4().to_string(),
            source: source.into(),
            event_type: event_type.into(),
            timestamp,
            payload,
            metadata: EnvelopeMetadata {
                producer_version: producer_version.into(),
                is_full_sync,
                is_incremental_sync: !is_full_sync,
                record_count,
                sync_type,
            },
        }
    }

    pub fn record_count(&self) -> usize {
        self.payload.len()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
