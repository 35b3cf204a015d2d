//! Property-based tests (fuzzing) for pipeline invariants.
//!
//! Uses proptest to generate random payloads and operation sequences and
//! verify decoding never panics, fingerprints ignore key order, and the
//! stores keep their bounds.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::time::Duration;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{Map, Value};

use sync_pipeline::{Domain, Envelope, IdempotencyStore, MergeBuffer, SyncState};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Generate arbitrary JSON values (including nested structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,   // depth
        64,  // max nodes
        10,  // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..10)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

/// Flat records as the source returns them
fn record_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-zA-Z]{1,8}", arbitrary_json_strategy(), 1..6)
        .prop_map(|m| Value::Object(m.into_iter().collect()))
}

/// Rebuild every object with its keys inserted in reverse order
fn reverse_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut reversed = Map::new();
            let entries: Vec<_> = map.iter().collect();
            for (k, v) in entries.into_iter().rev() {
                reversed.insert(k.clone(), reverse_keys(v));
            }
            Value::Object(reversed)
        }
        Value::Array(items) => Value::Array(items.iter().map(reverse_keys).collect()),
        other => other.clone(),
    }
}

// =============================================================================
// Decoding Fuzz Tests
// =============================================================================

proptest! {
    /// Envelope decoding should never panic on arbitrary bytes
    #[test]
    fn fuzz_envelope_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..10000)) {
        let _ = Envelope::from_bytes(&bytes);
    }

    /// Envelope decoding should handle arbitrary JSON gracefully
    #[test]
    fn fuzz_envelope_from_arbitrary_json(json in arbitrary_json_strategy()) {
        let serialized = serde_json::to_vec(&json).unwrap();
        let _ = Envelope::from_bytes(&serialized);
    }
}

// =============================================================================
// Idempotency Properties
// =============================================================================

proptest! {
    /// Fingerprints depend on content, not on key insertion order
    #[test]
    fn prop_fingerprint_ignores_key_order(records in prop::collection::vec(record_strategy(), 0..8)) {
        let reordered: Vec<Value> = records.iter().map(reverse_keys).collect();
        prop_assert_eq!(
            IdempotencyStore::fingerprint(&records),
            IdempotencyStore::fingerprint(&reordered)
        );
    }

    /// Fingerprints are lowercase hex SHA-256
    #[test]
    fn prop_fingerprint_shape(records in prop::collection::vec(record_strategy(), 0..4)) {
        let fp = IdempotencyStore::fingerprint(&records);
        prop_assert_eq!(fp.len(), 64);
        prop_assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    /// The store never holds more than max_entries, and the newest id survives
    #[test]
    fn prop_idempotency_store_is_bounded(
        max_entries in 1usize..20,
        ids in prop::collection::vec("[a-f0-9]{4}", 1..100),
    ) {
        let store = IdempotencyStore::new(max_entries, Duration::from_secs(3600));
        for (i, id) in ids.iter().enumerate() {
            store.mark_processed(id, "customer", 1, &format!("fp-{i}"));
            prop_assert!(store.len() <= max_entries);
        }
        prop_assert!(store.is_processed(ids.last().unwrap()));
    }
}

// =============================================================================
// Merge Buffer Properties
// =============================================================================

proptest! {
    /// Every appended record appears exactly once in the drained payloads
    #[test]
    fn prop_merge_buffer_loses_nothing(
        batch_size in 1usize..10,
        appends in prop::collection::vec((any::<bool>(), 0usize..5), 0..30),
    ) {
        let buffer = MergeBuffer::new(vec![Domain::customers(), Domain::products()], batch_size);
        let mut appended = 0usize;
        let mut drained = 0usize;

        for (is_customer, n) in appends {
            let domain = if is_customer { "customer" } else { "product" };
            let records = (0..n).map(|i| Value::from(i as u64)).collect();
            let flush = buffer.append(domain, records).unwrap();
            appended += n;

            prop_assert_eq!(flush.is_some(), buffer.len() >= batch_size);
            if flush.is_some() {
                drained += buffer.drain_to_payload().map_or(0, |p| p.record_count());
            }
        }
        drained += buffer.drain_to_payload().map_or(0, |p| p.record_count());

        prop_assert_eq!(appended, drained);
        prop_assert!(buffer.is_empty());
    }
}

// =============================================================================
// Sync State Properties
// =============================================================================

proptest! {
    /// Totals only grow and lastSyncTime never moves backwards
    #[test]
    fn prop_sync_state_is_monotonic(runs in prop::collection::vec((0i64..100_000, 0u64..1000), 1..50)) {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut state = SyncState::new("product", base, base);
        let mut previous_total = 0;
        let mut previous_time = state.last_sync_time;

        for (offset, count) in runs {
            let started = base + chrono::Duration::seconds(offset);
            state.apply_sync(started, count, started);

            prop_assert!(state.total_records_synced >= previous_total);
            prop_assert!(state.last_sync_time >= previous_time);
            prop_assert_eq!(state.last_sync_record_count, count);
            previous_total = state.total_records_synced;
            previous_time = state.last_sync_time;
        }
        prop_assert!(state.initial_sync_done);
    }
}
