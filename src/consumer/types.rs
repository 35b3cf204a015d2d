// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the consumer engine.

use crate::error::SinkError;
use crate::merge::FlushReason;
use crate::sink::SinkAck;

/// What happened to one delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Records added to the merge buffer.
    Buffered {
        records: usize,
        /// Set when this append pushed the buffer over its threshold
        flush: Option<FlushReason>,
    },
    /// Same `messageId` already processed (log redelivery).
    DuplicateMessage,
    /// Same payload content already processed under another id.
    DuplicateContent,
    /// Could not be decoded or buffered. Not committed.
    Rejected,
}

impl IngestOutcome {
    /// Only rejected messages are left uncommitted for redelivery.
    pub fn should_commit(&self) -> bool {
        !matches!(self, Self::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buffered { .. } => "buffered",
            Self::DuplicateMessage => "duplicate_message",
            Self::DuplicateContent => "duplicate_content",
            Self::Rejected => "rejected",
        }
    }
}

/// Result of one [`flush`](super::ConsumerEngine::flush).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered.
    Empty,
    Delivered {
        event_id: String,
        records: usize,
        reason: FlushReason,
        ack: SinkAck,
    },
    /// Retries exhausted or a non-retryable rejection; the payload was handed
    /// to the failed-flush handler.
    Dropped {
        event_id: String,
        records: usize,
        reason: FlushReason,
        error: SinkError,
    },
}

impl FlushOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Per-domain consumer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Messages whose records were buffered
    pub processed: u64,
    /// Duplicates skipped (by id or content)
    pub skipped: u64,
    /// Messages rejected
    pub errors: u64,
}

/// Summary of one poll batch for a domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub fetched: usize,
    pub buffered: usize,
    pub skipped: usize,
    pub rejected: usize,
}

impl PollSummary {
    pub(super) fn record(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Buffered { .. } => self.buffered += 1,
            IngestOutcome::DuplicateMessage | IngestOutcome::DuplicateContent => self.skipped += 1,
            IngestOutcome::Rejected => self.rejected += 1,
        }
    }
}
