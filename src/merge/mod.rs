// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Consumer-side merge of per-domain records into one analytics payload.

pub mod buffer;
pub mod payload;

pub use buffer::{BufferStats, FlushReason, MergeBuffer};
pub use payload::{DomainSection, MergedPayload};
