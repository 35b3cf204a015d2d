// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{FailedFlushHandler, Sink, SinkAck};
use crate::error::SinkError;
use crate::merge::MergedPayload;

/// Sink that keeps every accepted payload in memory.
///
/// Failures can be queued (one per call) or made permanent.
#[derive(Default)]
pub struct RecordingSink {
    accepted: Mutex<Vec<MergedPayload>>,
    queued_failures: Mutex<VecDeque<SinkError>>,
    always_fail: Mutex<Option<SinkError>>,
    attempts: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, err: SinkError) {
        self.queued_failures.lock().push_back(err);
    }

    /// Fail every call with `err` until cleared with `None`.
    pub fn fail_always(&self, err: Option<SinkError>) {
        *self.always_fail.lock() = err;
    }

    pub fn payloads(&self) -> Vec<MergedPayload> {
        self.accepted.lock().clone()
    }

    /// Calls to `send`, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn send(&self, payload: &MergedPayload) -> Result<SinkAck, SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.always_fail.lock().clone() {
            return Err(err);
        }
        if let Some(err) = self.queued_failures.lock().pop_front() {
            return Err(err);
        }
        let records = payload.record_count() as u64;
        self.accepted.lock().push(payload.clone());
        Ok(SinkAck {
            status: "success".into(),
            message: "Data received".into(),
            records_processed: records,
        })
    }
}

/// Failed-flush handler that keeps what it was given.
#[derive(Default)]
pub struct CollectingFailedFlush {
    failed: Mutex<Vec<(MergedPayload, SinkError)>>,
}

impl CollectingFailedFlush {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failed(&self) -> Vec<(MergedPayload, SinkError)> {
        self.failed.lock().clone()
    }
}

#[async_trait]
impl FailedFlushHandler for CollectingFailedFlush {
    async fn handle(&self, payload: MergedPayload, error: &SinkError) {
        self.failed.lock().push((payload, error.clone()));
    }
}
