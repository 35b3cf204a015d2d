// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Domain descriptors.
//!
//! A [`Domain`] names one class of records flowing through the pipeline:
//! where the producer fetches it, which topic carries it, and which field
//! of the merged payload it lands in on the consumer side.
//!
//! # Example
//!
//! ```
//! use sync_pipeline::Domain;
//! use serde_json::json;
//!
//! let customers = Domain::customers();
//! assert_eq!(customers.topic, "customer_data");
//!
//! let record = json!({"id": "C1", "createdDate": "2024-01-01T10:00:00Z"});
//! assert!(customers.modified_at(&record).is_some());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::parse_timestamp;

/// An opaque record. The pipeline never inspects it beyond the modified field.
pub type Record = serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Domain {
    /// Short name, also the sync-state key (`customer`, `product`).
    pub name: String,
    /// `eventType` stamped on envelopes.
    pub event_type: String,
    /// Message log topic.
    pub topic: String,
    /// Path on the source service, e.g. `/api/customers`.
    pub endpoint: String,
    /// Record field holding the last-modified timestamp.
    pub modified_field: String,
    /// Field of the merged payload that holds this domain's records.
    pub payload_field: String,
    /// Metadata key for this domain's record count in the merged payload.
    pub count_key: String,
}

impl Domain {
    pub fn new(
        name: impl Into<String>,
        event_type: impl Into<String>,
        topic: impl Into<String>,
        endpoint: impl Into<String>,
        modified_field: impl Into<String>,
        payload_field: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let count_key = format!("{name}Count");
        Self {
            name,
            event_type: event_type.into(),
            topic: topic.into(),
            endpoint: endpoint.into(),
            modified_field: modified_field.into(),
            payload_field: payload_field.into(),
            count_key,
        }
    }

    pub fn customers() -> Self {
        Self::new(
            "customer",
            "CUSTOMER",
            "customer_data",
            "/api/customers",
            "createdDate",
            "customers",
        )
    }

    pub fn products() -> Self {
        Self::new(
            "product",
            "INVENTORY",
            "inventory_data",
            "/api/products",
            "lastUpdated",
            "products",
        )
    }

    /// Parsed value of the record's modified field, if present and parseable.
    pub fn modified_at(&self, record: &Record) -> Option<DateTime<Utc>> {
        record
            .get(&self.modified_field)
            .and_then(|v| v.as_str())
            .and_then(parse_timestamp)
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
