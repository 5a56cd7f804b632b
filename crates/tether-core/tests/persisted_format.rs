//! Persisted-format tests for tether-core
//!
//! Queues and dead letters outlive app upgrades. These tests pin the JSON
//! shape of the persisted records so that a refactor cannot silently strand
//! data written by an earlier build.

use chrono::{TimeZone, Utc};
use serde_json::json;

use tether_core::{
    DeadLetterItem, EntityKind, EntityRecord, ErrorClass, Operation, Payload, SyncQueueItem,
};

#[test]
fn test_queue_item_from_stored_json() {
    let stored = json!({
        "id": "6f1d4c2e-8a4b-4c55-9d8e-0b7a1e2f3c4d",
        "entity": "mood_entry",
        "operation": "CREATE",
        "payload": {"kind": "plain", "data": {"id": "m1", "mood": 75}},
        "record_id": "m1",
        "created_at": "2024-05-01T09:00:00Z",
        "retry_count": 3,
        "max_retries": 8,
        "last_error": "offline",
        "last_error_class": "network"
    });

    let item: SyncQueueItem = serde_json::from_value(stored).unwrap();
    assert_eq!(item.entity, EntityKind::MoodEntry);
    assert_eq!(item.operation, Operation::Create);
    assert_eq!(item.payload, Payload::from(json!({"id": "m1", "mood": 75})));
    assert_eq!(item.created_at, Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
    assert_eq!(item.retry_count, 3);
    assert_eq!(item.last_error_class, Some(ErrorClass::Network));
}

#[test]
fn test_sealed_payload_shape() {
    let stored = json!({
        "kind": "sealed",
        "data": {
            "ciphertext": "3q2+7w==",
            "iv": "AAECAwQFBgcICQoL",
            "algorithm": "chacha20-poly1305",
            "version": 1
        }
    });

    let payload: Payload = serde_json::from_value(stored.clone()).unwrap();
    let Payload::Sealed(blob) = &payload else {
        panic!("expected a sealed payload");
    };
    assert_eq!(blob.ciphertext, vec![0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(blob.iv.len(), 12);
    assert_eq!(serde_json::to_value(&payload).unwrap(), stored);
}

/// Records written by a newer build still load
#[test]
fn test_unknown_entity_and_algorithm_still_load() {
    let stored = json!({
        "id": "0b7a1e2f-3c4d-4c55-9d8e-6f1d4c2e8a4b",
        "entity": "sleep_log",
        "operation": "UPDATE",
        "payload": {
            "kind": "sealed",
            "data": {"ciphertext": "", "iv": "", "algorithm": "post-quantum-9000", "version": 2}
        },
        "record_id": null,
        "error_message": "boom",
        "error_class": "unknown",
        "failed_at": "2024-05-01T09:00:00Z",
        "retry_count": 8,
        "can_retry": true,
        "archived": false
    });

    let dead: DeadLetterItem = serde_json::from_value(stored).unwrap();
    assert_eq!(dead.entity, EntityKind::Other("sleep_log".to_string()));
    assert_eq!(dead.entity.to_string(), "sleep_log");
    assert!(dead.is_sweepable());
}

#[test]
fn test_entity_record_flattens_fields() {
    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    let record = EntityRecord::new("c1", ts)
        .with_field("urge", 7)
        .with_field("resisted", true);

    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(
        value,
        json!({"id": "c1", "timestamp": "2024-05-01T09:00:00Z", "urge": 7, "resisted": true})
    );
    assert_eq!(serde_json::from_value::<EntityRecord>(value).unwrap(), record);
}
