// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Producer side: hybrid full/incremental sync per domain.
//!
//! A [`SyncEngine`] owns one domain. Until that domain has a successful sync
//! recorded, every scheduled run is a full sync; afterwards runs are
//! incremental, fetching records modified since the last recorded sync start.
//!
//! Two asymmetric rules govern state:
//!
//! - a full sync that finds **no** records leaves the state untouched, so the
//!   next tick tries the full sync again;
//! - an incremental sync that finds no changes still advances
//!   `last_sync_time`, so the next window starts from this run.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sync_pipeline::{Domain, InMemoryLog, InMemorySource, InMemorySyncStateStore, Publisher, SyncEngine};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = SyncEngine::new(
//!     Domain::customers(),
//!     Arc::new(InMemorySource::new()),
//!     Arc::new(InMemorySyncStateStore::new()),
//!     Arc::new(Publisher::new(Arc::new(InMemoryLog::new()), "1.0.0")),
//! );
//! let report = engine.scheduled_run().await;
//! # }
//! ```

mod control;
mod scheduler;
mod types;

pub use control::SyncControl;
pub use scheduler::Scheduler;
pub use types::{SyncKind, SyncPhase, SyncReport, SyncStatus};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::clock::{format_iso_seconds, Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::domain::Domain;
use crate::error::Result;
use crate::metrics::SyncTimer;
use crate::publisher::Publisher;
use crate::source::RecordSource;
use crate::state::SyncStateStore;

/// Default incremental window when a domain has no recorded sync time.
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(5 * 60);

pub struct SyncEngine {
    domain: Domain,
    source: Arc<dyn RecordSource>,
    state: Arc<dyn SyncStateStore>,
    publisher: Arc<Publisher>,
    clock: Arc<dyn Clock>,
    lookback: Duration,

    /// Phase (broadcast to watchers)
    phase: watch::Sender<SyncPhase>,

    /// Serializes runs for this domain
    run_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        domain: Domain,
        source: Arc<dyn RecordSource>,
        state: Arc<dyn SyncStateStore>,
        publisher: Arc<Publisher>,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Uninitialized);
        Self {
            domain,
            source,
            state,
            publisher,
            clock: Arc::new(SystemClock),
            lookback: DEFAULT_LOOKBACK,
            phase,
            run_lock: Mutex::new(()),
        }
    }

    /// Build an engine with the incremental lookback taken from `config`.
    pub fn from_config(
        domain: Domain,
        source: Arc<dyn RecordSource>,
        state: Arc<dyn SyncStateStore>,
        publisher: Arc<Publisher>,
        config: &PipelineConfig,
    ) -> Self {
        Self::new(domain, source, state, publisher).with_lookback(config.incremental_lookback())
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions.
    pub fn phase_receiver(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        let state = self.state.get(&self.domain.name).await?;
        Ok(SyncStatus::from_state(state.as_ref()))
    }

    /// Fetch everything and publish it as one `INITIAL_FULL` envelope.
    ///
    /// Zero records leaves the sync state untouched.
    #[tracing::instrument(skip(self), fields(domain = %self.domain))]
    pub async fn run_full_sync(&self) -> Result<SyncReport> {
        let _guard = self.run_lock.lock().await;
        self.full_sync_locked().await
    }

    /// Fetch records modified since the last sync and publish them as one
    /// `INCREMENTAL` envelope. Always advances `last_sync_time` on success.
    #[tracing::instrument(skip(self), fields(domain = %self.domain))]
    pub async fn run_incremental_sync(&self) -> Result<SyncReport> {
        let _guard = self.run_lock.lock().await;
        self.incremental_sync_locked().await
    }

    /// One scheduler tick: full sync until the initial sync is recorded,
    /// incremental afterwards. Errors are logged, never propagated; the
    /// next tick tries again.
    #[tracing::instrument(skip(self), fields(domain = %self.domain))]
    pub async fn scheduled_run(&self) -> Option<SyncReport> {
        let _guard = self.run_lock.lock().await;

        let result = match self.state.is_initial_sync_done(&self.domain.name).await {
            Ok(false) => {
                info!("Initial sync not completed, performing full sync");
                self.full_sync_locked().await
            }
            Ok(true) => self.incremental_sync_locked().await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "Scheduled sync failed; will retry on next tick");
                crate::metrics::record_error("producer", "scheduled_run");
                None
            }
        }
    }

    async fn full_sync_locked(&self) -> Result<SyncReport> {
        let started_at = self.clock.now();
        let mut timer = SyncTimer::new(&self.domain.name, SyncKind::Full.as_str());
        info!(started_at = %format_iso_seconds(started_at), "Starting full sync");
        self.set_phase(SyncPhase::FullSyncInProgress);

        let result = self.full_sync_inner(started_at).await;
        self.settle_phase().await;

        match &result {
            Ok(report) if report.published() => timer.set_outcome("published"),
            Ok(_) => timer.set_outcome("empty"),
            Err(e) => error!(error = %e, "Full sync failed"),
        }
        result
    }

    async fn full_sync_inner(&self, started_at: DateTime<Utc>) -> Result<SyncReport> {
        let records = self.source.fetch_all(&self.domain).await?;
        let mut report = SyncReport {
            domain: self.domain.name.clone(),
            kind: SyncKind::Full,
            started_at,
            records: records.len(),
            receipt: None,
            state_advanced: false,
        };

        if records.is_empty() {
            warn!("No records found during full sync; state not advanced");
            return Ok(report);
        }

        info!(count = records.len(), "Publishing full sync");
        let receipt = self
            .publisher
            .publish(&self.domain, records, SyncKind::Full.sync_type(), true)
            .await?;
        let state = self
            .state
            .record_sync(&self.domain.name, started_at, report.records as u64)
            .await?;
        crate::metrics::set_records_synced(&self.domain.name, state.total_records_synced);

        info!(
            count = report.records,
            total = state.total_records_synced,
            "Full sync completed"
        );
        report.receipt = Some(receipt);
        report.state_advanced = true;
        Ok(report)
    }

    async fn incremental_sync_locked(&self) -> Result<SyncReport> {
        let mut timer = SyncTimer::new(&self.domain.name, SyncKind::Incremental.as_str());
        self.set_phase(SyncPhase::IncrementalInProgress);

        let result = self.incremental_sync_inner().await;
        self.settle_phase().await;

        match &result {
            Ok(report) if report.published() => timer.set_outcome("published"),
            Ok(_) => timer.set_outcome("empty"),
            Err(e) => error!(error = %e, "Incremental sync failed"),
        }
        result
    }

    async fn incremental_sync_inner(&self) -> Result<SyncReport> {
        let since = match self.state.last_sync_time(&self.domain.name).await? {
            Some(last) => last,
            None => {
                let lookback = chrono::Duration::from_std(self.lookback)
                    .unwrap_or_else(|_| chrono::Duration::minutes(5));
                self.clock.now() - lookback
            }
        };
        let started_at = self.clock.now();
        info!(since = %format_iso_seconds(since), "Starting incremental sync");

        let records = self.source.fetch_since(&self.domain, since).await?;
        let mut report = SyncReport {
            domain: self.domain.name.clone(),
            kind: SyncKind::Incremental,
            started_at,
            records: records.len(),
            receipt: None,
            state_advanced: false,
        };

        if records.is_empty() {
            info!("No changes since last sync");
        } else {
            info!(count = records.len(), "Publishing incremental changes");
            let receipt = self
                .publisher
                .publish(&self.domain, records, SyncKind::Incremental.sync_type(), false)
                .await?;
            report.receipt = Some(receipt);
        }

        let state = self
            .state
            .record_sync(&self.domain.name, started_at, report.records as u64)
            .await?;
        crate::metrics::set_records_synced(&self.domain.name, state.total_records_synced);
        report.state_advanced = true;

        info!(
            count = report.records,
            total = state.total_records_synced,
            "Incremental sync completed"
        );
        Ok(report)
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase.send_replace(phase);
    }

    /// Leave the in-progress phase according to what the store now says.
    async fn settle_phase(&self) {
        let next = match self.state.is_initial_sync_done(&self.domain.name).await {
            Ok(true) => SyncPhase::Steady,
            Ok(false) => SyncPhase::Uninitialized,
            Err(e) => {
                warn!(error = %e, "Could not read sync state after run");
                SyncPhase::Uninitialized
            }
        };
        self.set_phase(next);
    }
}
