// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! End-to-end pipeline walkthrough over in-memory collaborators.
//!
//! Demonstrates:
//! 1. An empty full sync that leaves state untouched
//! 2. A full sync per domain, then an incremental sync
//! 3. The consumer merging both domains into one payload
//! 4. A redelivered message being skipped
//! 5. Captured metrics
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=sync_pipeline=debug cargo run --example pipeline
//! ```

use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;
use sync_pipeline::{
    ConsumerEngine, Domain, IdempotencyStore, InMemoryLog, InMemorySource, InMemorySyncStateStore,
    MergeBuffer, MessageLog, PipelineConfig, Publisher, RecordingSink, Scheduler, SyncControl,
    SyncEngine,
};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           sync-pipeline: End-to-end Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Wire producer and consumer around one log
    // ─────────────────────────────────────────────────────────────────────────
    let config = PipelineConfig {
        merge_flush_interval_secs: 1,
        poll_timeout_ms: 100,
        ..Default::default()
    };
    config.validate()?;

    let source = Arc::new(InMemorySource::new());
    let state = Arc::new(InMemorySyncStateStore::new());
    let log = Arc::new(InMemoryLog::new());
    let publisher = Arc::new(Publisher::new(log.clone(), &config.producer_version));

    let mut control = SyncControl::new();
    for domain in [Domain::customers(), Domain::products()] {
        control.register(Arc::new(SyncEngine::from_config(
            domain,
            source.clone(),
            state.clone(),
            publisher.clone(),
            &config,
        )));
    }

    let sink = Arc::new(RecordingSink::new());
    let consumer = Arc::new(ConsumerEngine::new(
        log.clone(),
        Arc::new(IdempotencyStore::from_config(&config)),
        Arc::new(MergeBuffer::from_config(
            vec![Domain::customers(), Domain::products()],
            &config,
        )),
        sink.clone(),
        &config,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task = consumer.clone().spawn(shutdown_rx);

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Empty full sync: nothing published, state not advanced
    // ─────────────────────────────────────────────────────────────────────────
    println!("📭 Full sync with an empty source...");
    let report = control.trigger_full_sync("customer").await?;
    println!("   └─ records={} state_advanced={}", report.records, report.state_advanced);
    println!("   └─ status: {:?}", control.status("customer").await?);

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Seed the source and run the scheduler once per domain
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Seeding source and starting the scheduler...");
    source.set_records(
        "customer",
        vec![
            json!({"id": "C1", "name": "Alice", "createdDate": "2024-01-01T09:00:00"}),
            json!({"id": "C2", "name": "Bob", "createdDate": "2024-01-01T09:30:00"}),
        ],
    );
    source.set_records(
        "product",
        vec![
            json!({"id": "P1", "sku": "SKU-1", "lastUpdated": "2024-01-01T08:00:00"}),
            json!({"id": "P2", "sku": "SKU-2", "lastUpdated": "2024-01-01T08:15:00"}),
            json!({"id": "P3", "sku": "SKU-3", "lastUpdated": "2024-01-01T08:30:00"}),
        ],
    );

    let mut scheduler = Scheduler::new();
    for engine in control.engines() {
        scheduler.spawn(engine.clone(), Duration::from_secs(60), Duration::ZERO);
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    for (domain, status) in control.status_all().await? {
        println!("   └─ {domain}: {status:?}");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. A change, picked up incrementally
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔁 Incremental sync after a product change...");
    let changed_at = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();
    source.push_record(
        "product",
        json!({"id": "P4", "sku": "SKU-4", "lastUpdated": changed_at}),
    );
    let report = control.trigger_incremental_sync("product").await?;
    println!("   └─ records={} published={}", report.records, report.published());

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Redeliver everything: the consumer skips it all
    // ─────────────────────────────────────────────────────────────────────────
    tokio::time::sleep(Duration::from_millis(1500)).await;
    println!("\n♻️  Replaying the customer topic...");
    for value in log.values("customer_data") {
        log.send("customer_data", "replay", value).await?;
    }
    tokio::time::sleep(Duration::from_millis(1500)).await;
    println!("   └─ consumer stats: {:?}", consumer.all_stats());

    // ─────────────────────────────────────────────────────────────────────────
    // 6. What reached the sink
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📦 Payloads delivered to the sink:");
    for payload in sink.payloads() {
        println!(
            "   └─ {} customers={} products={}",
            payload.event_id,
            payload.count_for("customer"),
            payload.count_for("product")
        );
    }

    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 7. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    scheduler.shutdown().await;
    shutdown_tx.send(true)?;
    consumer_task.await?;
    println!("   ✅ Shutdown complete! consumer running={}", consumer.is_running());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Print captured counters, gauges and histogram summaries sorted by name
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        let rendered = match value {
            DebugValue::Counter(v) => format!("{v}"),
            DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
            DebugValue::Histogram(samples) => {
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                format!("count={} sum={:.4}", samples.len(), sum)
            }
        };
        lines.push(format!("{}{} = {}", key.name(), label_str, rendered));
    }

    lines.sort();
    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
    for line in lines {
        println!("   └─ {line}");
    }
}
