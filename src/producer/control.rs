// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Operator surface: trigger syncs and read status by domain name.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::{SyncEngine, SyncReport, SyncStatus};
use crate::error::{PipelineError, Result};

/// Registry of producer engines keyed by domain name.
#[derive(Default)]
pub struct SyncControl {
    engines: BTreeMap<String, Arc<SyncEngine>>,
}

impl SyncControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine. A second engine for the same domain replaces the first.
    pub fn register(&mut self, engine: Arc<SyncEngine>) {
        self.engines.insert(engine.domain().name.clone(), engine);
    }

    pub fn engine(&self, domain: &str) -> Result<&Arc<SyncEngine>> {
        self.engines
            .get(domain)
            .ok_or_else(|| PipelineError::UnknownDomain(domain.to_string()))
    }

    pub fn engines(&self) -> impl Iterator<Item = &Arc<SyncEngine>> {
        self.engines.values()
    }

    pub fn domains(&self) -> Vec<String> {
        self.engines.keys().cloned().collect()
    }

    pub async fn trigger_full_sync(&self, domain: &str) -> Result<SyncReport> {
        let engine = self.engine(domain)?;
        info!(domain, "Manual full sync requested");
        engine.run_full_sync().await
    }

    pub async fn trigger_incremental_sync(&self, domain: &str) -> Result<SyncReport> {
        let engine = self.engine(domain)?;
        info!(domain, "Manual incremental sync requested");
        engine.run_incremental_sync().await
    }

    pub async fn status(&self, domain: &str) -> Result<SyncStatus> {
        self.engine(domain)?.status().await
    }

    /// Status of every registered domain.
    pub async fn status_all(&self) -> Result<BTreeMap<String, SyncStatus>> {
        let mut statuses = BTreeMap::new();
        for (name, engine) in &self.engines {
            statuses.insert(name.clone(), engine.status().await?);
        }
        Ok(statuses)
    }
}
