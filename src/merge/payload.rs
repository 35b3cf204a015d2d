// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The payload posted to the analytics sink.
//!
//! ```json
//! {
//!   "eventId": "EVT-20240101100000-1a2b3c4d",
//!   "timestamp": "2024-01-01T10:00:00Z",
//!   "customers": [ … ],
//!   "products": [ … ],
//!   "metadata": {
//!     "source": "sync-pipeline",
//!     "version": "1.0.0",
//!     "customerCount": 2,
//!     "productCount": 3,
//!     "mergedAt": "2024-01-01T10:00:00Z"
//!   }
//! }
//! ```
//!
//! There is one record field and one count key per registered domain, in
//! registration order, present even when that domain contributed nothing.

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::clock::format_iso_seconds;
use crate::domain::Record;

/// Records contributed by one domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainSection {
    pub domain: String,
    /// Payload field, e.g. `customers`
    pub field: String,
    /// Metadata count key, e.g. `customerCount`
    pub count_key: String,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedPayload {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub sections: Vec<DomainSection>,
    pub source: String,
    pub version: String,
    pub merged_at: DateTime<Utc>,
}

impl MergedPayload {
    /// `EVT-<YYYYMMDDHHMMSS>-<8 hex>`
    pub fn generate_event_id(now: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("EVT-{}-{}", now.format("%Y%m%d%H%M%S"), &suffix[..8])
    }

    pub fn record_count(&self) -> usize {
        self.sections.iter().map(|s| s.records.len()).sum()
    }

    pub fn count_for(&self, domain: &str) -> usize {
        self.records_for(domain).len()
    }

    pub fn records_for(&self, domain: &str) -> &[Record] {
        self.sections
            .iter()
            .find(|s| s.domain == domain)
            .map(|s| s.records.as_slice())
            .unwrap_or(&[])
    }

    pub fn metadata(&self) -> Value {
        let mut metadata = Map::new();
        metadata.insert("source".into(), Value::from(self.source.clone()));
        metadata.insert("version".into(), Value::from(self.version.clone()));
        for section in &self.sections {
            metadata.insert(section.count_key.clone(), Value::from(section.records.len()));
        }
        metadata.insert("mergedAt".into(), Value::from(format_iso_seconds(self.merged_at)));
        Value::Object(metadata)
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl Serialize for MergedPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.sections.len() + 3))?;
        map.serialize_entry("eventId", &self.event_id)?;
        map.serialize_entry("timestamp", &format_iso_seconds(self.timestamp))?;
        for section in &self.sections {
            map.serialize_entry(&section.field, &section.records)?;
        }
        map.serialize_entry("metadata", &self.metadata())?;
        map.end()
    }
}
