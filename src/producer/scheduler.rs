// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Periodic driver for [`SyncEngine::scheduled_run`].
//!
//! One task per domain. Ticks that fire while a run is still in progress
//! are delayed, never stacked. Shutdown lets an in-flight run finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info};

use super::{SyncControl, SyncEngine};
use crate::config::{PipelineConfig, MIN_TICK};

pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Start ticking `engine` every `every`, after `initial_delay`.
    pub fn spawn(&mut self, engine: Arc<SyncEngine>, every: Duration, initial_delay: Duration) {
        let every = every.max(MIN_TICK);
        let domain = engine.domain().name.clone();
        info!(domain = %domain, interval = ?every, initial_delay = ?initial_delay, "Scheduling sync");
        let shutdown = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(run_schedule(engine, every, initial_delay, shutdown));
        self.tasks.push((domain, handle));
    }

    /// Schedule every engine registered with `control` using the configured intervals.
    pub fn spawn_all(&mut self, control: &SyncControl, config: &PipelineConfig) {
        for engine in control.engines() {
            let every = config.sync_interval_for(&engine.domain().name);
            self.spawn(Arc::clone(engine), every, config.sync_initial_delay());
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stop ticking and wait for in-flight runs to finish.
    pub async fn shutdown(self) {
        info!(schedules = self.tasks.len(), "Stopping sync schedules");
        self.shutdown_tx.send_replace(true);
        for (domain, handle) in self.tasks {
            if let Err(e) = handle.await {
                error!(domain = %domain, error = %e, "Sync schedule task panicked");
            }
        }
    }
}

async fn run_schedule(
    engine: Arc<SyncEngine>,
    every: Duration,
    initial_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let domain = engine.domain().name.clone();

    if !initial_delay.is_zero() {
        tokio::select! {
            _ = sleep(initial_delay) => {}
            _ = shutdown.changed() => {
                info!(domain = %domain, "Sync schedule stopped before first run");
                return;
            }
        }
    }

    let mut ticker = interval(every.max(MIN_TICK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                engine.scheduled_run().await;
            }
        }
    }

    info!(domain = %domain, "Sync schedule stopped");
}
