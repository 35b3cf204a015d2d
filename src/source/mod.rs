// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Upstream record sources.
//!
//! A [`RecordSource`] returns every record of a domain, or those modified
//! after a point in time. [`HttpSourceClient`](http::HttpSourceClient) talks
//! to the paginated REST service; [`InMemorySource`](memory::InMemorySource)
//! backs tests and demos.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Domain, Record};
use crate::error::SourceError;

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Every record of the domain. All pages or nothing.
    async fn fetch_all(&self, domain: &Domain) -> Result<Vec<Record>, SourceError>;

    /// Records whose modified field is strictly after `since`.
    ///
    /// Default scans the full dataset and filters locally.
    async fn fetch_since(
        &self,
        domain: &Domain,
        since: DateTime<Utc>,
    ) -> Result<Vec<Record>, SourceError> {
        let all = self.fetch_all(domain).await?;
        Ok(filter_modified_since(domain, all, since))
    }
}

/// Keep records modified strictly after `since`.
///
/// Records with a missing or unparseable modified field are dropped.
pub fn filter_modified_since(
    domain: &Domain,
    records: Vec<Record>,
    since: DateTime<Utc>,
) -> Vec<Record> {
    records
        .into_iter()
        .filter(|record| domain.modified_at(record).is_some_and(|ts| ts > since))
        .collect()
}
