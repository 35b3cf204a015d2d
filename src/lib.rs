//! # Sync Pipeline
//!
//! Moves master data from a REST source to an analytics sink through a
//! partitioned message log, with hybrid full/incremental sync on the producer
//! side and deduplicate-and-merge on the consumer side.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Producer                            │
//! │  • One SyncEngine per domain (customer, product)            │
//! │  • Full sync until the first non-empty run, then incremental│
//! │  • Sync state records lastSyncTime and running totals       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   (Envelope per sync run, JSON)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Message Log                           │
//! │  • One topic per domain, partitioned                        │
//! │  • At-least-once: consumers commit after processing         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Consumer                            │
//! │  • Idempotency store: drop redelivered ids and content      │
//! │  • Merge buffer: per-domain buckets, flush on count or timer│
//! │  • One merged payload per flush, retried then dropped       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                       Analytics sink
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sync_pipeline::{
//!     ConsumerEngine, Domain, IdempotencyStore, InMemoryLog, InMemorySource,
//!     InMemorySyncStateStore, MergeBuffer, PipelineConfig, Publisher, RecordingSink, SyncEngine,
//! };
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = PipelineConfig::default();
//!     let log = Arc::new(InMemoryLog::new());
//!
//!     let producer = SyncEngine::from_config(
//!         Domain::customers(),
//!         Arc::new(InMemorySource::new()),
//!         Arc::new(InMemorySyncStateStore::new()),
//!         Arc::new(Publisher::new(log.clone(), &config.producer_version)),
//!         &config,
//!     );
//!     producer.run_full_sync().await.expect("sync failed");
//!
//!     let consumer = Arc::new(ConsumerEngine::new(
//!         log,
//!         Arc::new(IdempotencyStore::from_config(&config)),
//!         Arc::new(MergeBuffer::from_config(vec![Domain::customers()], &config)),
//!         Arc::new(RecordingSink::new()),
//!         &config,
//!     ));
//!     let (tx, rx) = watch::channel(false);
//!     let running = consumer.spawn(rx);
//!     tx.send(true).ok();
//!     running.await.ok();
//! }
//! ```
//!
//! ## Modules
//!
//! - [`producer`]: sync engines, manual control and the scheduler
//! - [`source`]: paginated REST source client
//! - [`state`]: per-domain sync state store
//! - [`publisher`]: envelope publishing to the message log
//! - [`message_log`]: log abstraction and in-memory implementation
//! - [`consumer`]: poll, dedup, buffer and flush loops
//! - [`idempotency`]: processed-message and content fingerprint store
//! - [`merge`]: merge buffer and merged payload
//! - [`sink`]: analytics sink client
//! - [`resilience`]: retry with exponential backoff

pub mod clock;
pub mod config;
pub mod consumer;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod idempotency;
pub mod merge;
pub mod message_log;
pub mod metrics;
pub mod producer;
pub mod publisher;
pub mod resilience;
pub mod sink;
pub mod source;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PipelineConfig;
pub use consumer::{ConsumerEngine, ConsumerStats, FlushOutcome, IngestOutcome, PollSummary};
pub use domain::{Domain, Record};
pub use envelope::{Envelope, EnvelopeMetadata, SyncType};
pub use error::{LogError, PipelineError, PublishError, SinkError, SourceError, StoreError};
pub use idempotency::{IdempotencyRecord, IdempotencyStats, IdempotencyStore};
pub use merge::{BufferStats, DomainSection, FlushReason, MergeBuffer, MergedPayload};
pub use message_log::memory::InMemoryLog;
pub use message_log::{DeliveryReceipt, LogRecord, MessageLog};
pub use producer::{Scheduler, SyncControl, SyncEngine, SyncKind, SyncPhase, SyncReport, SyncStatus};
pub use publisher::{DeliveryHandle, Publisher};
pub use resilience::retry::RetryConfig;
pub use sink::http::HttpSink;
pub use sink::memory::{CollectingFailedFlush, RecordingSink};
pub use sink::{FailedFlushHandler, LogFailedFlush, Sink, SinkAck};
pub use source::http::HttpSourceClient;
pub use source::memory::InMemorySource;
pub use source::RecordSource;
pub use state::memory::InMemorySyncStateStore;
pub use state::{SyncState, SyncStateStore};
