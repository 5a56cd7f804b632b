//! Integration tests for the sync engine
//!
//! Every test runs a full engine against the in-memory record store and the
//! scripted mock backend. Time-dependent behaviour uses a manual clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::json;

use tether_core::{
    EntityKind, EntityRecord, ErrorClass, ManualClock, MockBackend, Operation, RemoteError,
    SyncEvent, SyncEventKind, UserId,
};
use tether_crypto::{MemoryKeyStore, SecureStore, SecureStoreConfig};
use tether_storage::{InMemoryRecordStore, RecordStore};
use tether_sync::{
    Notification, QueueConfig, SyncConfig, SyncEngine, UserNotifier, lww_merge,
};

// ============================================================================
// Harness
// ============================================================================

#[derive(Default)]
struct RecordingNotifier(Mutex<Vec<Notification>>);

impl UserNotifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.0.lock().push(notification.clone());
    }
}

struct Harness {
    engine: SyncEngine,
    backend: Arc<MockBackend>,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

fn harness_with(config: SyncConfig, secure: SecureStoreConfig) -> Harness {
    tether_logging::init_testing();

    let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
    let backend = Arc::new(MockBackend::new());
    let clock = Arc::new(ManualClock::new(start_time()));
    let notifier = Arc::new(RecordingNotifier::default());
    let secure = Arc::new(SecureStore::new(secure, Arc::new(MemoryKeyStore::new())));

    let engine = SyncEngine::builder(UserId::new("alice").unwrap(), store, backend.clone(), secure)
        .with_clock(clock.clone())
        .with_config(config)
        .with_notifier(notifier.clone())
        .build();

    Harness {
        engine,
        backend,
        clock,
        notifier,
    }
}

fn harness() -> Harness {
    harness_with(SyncConfig::testing(), SecureStoreConfig::default())
}

fn offline() -> RemoteError {
    RemoteError::Network("offline".into())
}

fn rec(id: &str, value: i64, ts: DateTime<Utc>) -> EntityRecord {
    EntityRecord::new(id, ts).with_field("value", value)
}

// ============================================================================
// Queue and processor
// ============================================================================

#[tokio::test]
async fn test_delivered_items_leave_the_queue_and_skip_the_dlq() {
    let h = harness();
    for mood in [40, 55, 75] {
        h.engine
            .enqueue(
                EntityKind::MoodEntry,
                Operation::Create,
                json!({"id": format!("m{mood}"), "mood": mood}),
            )
            .await
            .unwrap();
    }

    let summary = h.engine.process_queue().await.unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(h.engine.pending_count().await.unwrap(), 0);
    assert_eq!(h.engine.dead_letter_stats().await.unwrap().total, 0);
    assert_eq!(
        h.backend.record(&EntityKind::MoodEntry, "m75"),
        Some(json!({"id": "m75", "mood": 75}))
    );
}

/// Eight consecutive network failures move the item to the DLQ once
#[tokio::test]
async fn test_eight_network_failures_dead_letter_the_item() {
    let h = harness();
    let id = h
        .engine
        .enqueue(EntityKind::MoodEntry, Operation::Create, json!({"mood": 75}))
        .await
        .unwrap();
    h.backend.fail_always(offline());

    for pass in 1..=7 {
        let summary = h.engine.process_queue().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.moved_to_dlq, 0);
        let queued = &h.engine.pending().await.unwrap()[0];
        assert_eq!(queued.retry_count, pass);
    }

    let summary = h.engine.process_queue().await.unwrap();
    assert_eq!(summary.moved_to_dlq, 1);
    assert!(h.engine.pending().await.unwrap().is_empty());

    let dead = h.engine.dead_letters(None).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, id);
    assert_eq!(dead[0].entity, EntityKind::MoodEntry);
    assert_eq!(dead[0].error_class, ErrorClass::Network);
    assert!(dead[0].can_retry);

    // Further passes find nothing to escalate
    h.engine.process_queue().await.unwrap();
    assert_eq!(h.engine.dead_letter_stats().await.unwrap().total, 1);
}

/// `can_retry` follows the class of the last failure, not the first
#[tokio::test]
async fn test_final_failure_decides_retryability() {
    let h = harness();
    h.engine
        .enqueue(EntityKind::Compulsion, Operation::Update, json!({"id": "c1"}))
        .await
        .unwrap();
    h.backend.fail_next_n(7, offline());
    h.backend.fail_always(RemoteError::Rejected("urge must be 0-10".into()));

    for _ in 0..8 {
        h.engine.process_queue().await.unwrap();
    }

    let dead = h.engine.dead_letters(None).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].error_class, ErrorClass::Validation);
    assert!(!dead[0].can_retry);
}

/// A failed CREATE must not be overtaken by the DELETE queued after it
#[tokio::test]
async fn test_failed_create_is_not_overtaken_by_delete() {
    let h = harness();
    h.engine
        .enqueue(EntityKind::MoodEntry, Operation::Create, json!({"id": "m1", "mood": 50}))
        .await
        .unwrap();
    h.engine
        .enqueue(EntityKind::MoodEntry, Operation::Delete, json!({"id": "m1"}))
        .await
        .unwrap();
    h.backend.fail_next(offline());

    let first = h.engine.process_queue().await.unwrap();
    assert_eq!(first.processed, 0);
    assert_eq!(first.failed, 1);
    assert_eq!(first.deferred, 1);
    assert_eq!(h.backend.attempts(), 1);

    let second = h.engine.process_queue().await.unwrap();
    assert_eq!(second.processed, 2);
    assert_eq!(second.deferred, 0);

    let order: Vec<_> = h.backend.applied().iter().map(|m| m.operation).collect();
    assert_eq!(order, vec![Operation::Create, Operation::Delete]);
    assert!(h.backend.record(&EntityKind::MoodEntry, "m1").is_none());
}

#[tokio::test]
async fn test_blocked_entity_does_not_hold_back_others() {
    let h = harness();
    h.engine
        .enqueue(EntityKind::MoodEntry, Operation::Create, json!({"id": "m1", "mood": 40}))
        .await
        .unwrap();
    h.engine
        .enqueue(EntityKind::Compulsion, Operation::Create, json!({"id": "c1", "urge": 3}))
        .await
        .unwrap();
    h.engine
        .enqueue(EntityKind::MoodEntry, Operation::Update, json!({"id": "m1", "mood": 65}))
        .await
        .unwrap();
    h.engine
        .enqueue(EntityKind::Compulsion, Operation::Update, json!({"id": "c1", "urge": 1}))
        .await
        .unwrap();
    h.backend.fail_entity(EntityKind::MoodEntry, offline());

    let summary = h.engine.process_queue().await.unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.deferred, 1);
    assert_eq!(
        h.backend.record(&EntityKind::Compulsion, "c1"),
        Some(json!({"id": "c1", "urge": 1}))
    );
    assert!(h.backend.record(&EntityKind::MoodEntry, "m1").is_none());

    h.backend.recover();
    let summary = h.engine.process_queue().await.unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(
        h.backend.record(&EntityKind::MoodEntry, "m1"),
        Some(json!({"id": "m1", "mood": 65}))
    );
}

/// Once the head item is dead-lettered its successors are delivered
#[tokio::test]
async fn test_dead_lettered_item_releases_successors() {
    let config = SyncConfig {
        queue: QueueConfig::default().with_max_retries(1),
        ..SyncConfig::testing()
    };
    let h = harness_with(config, SecureStoreConfig::default());
    let rejected = h
        .engine
        .enqueue(EntityKind::MoodEntry, Operation::Create, json!({"id": "m1", "mood": 500}))
        .await
        .unwrap();
    h.engine
        .enqueue(EntityKind::MoodEntry, Operation::Create, json!({"id": "m2", "mood": 60}))
        .await
        .unwrap();
    h.backend.fail_next(RemoteError::Rejected("mood must be 0-100".into()));

    let summary = h.engine.process_queue().await.unwrap();
    assert_eq!(summary.moved_to_dlq, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.deferred, 0);
    assert_eq!(h.engine.dead_letters(None).await.unwrap()[0].id, rejected);
    assert_eq!(
        h.backend.record(&EntityKind::MoodEntry, "m2"),
        Some(json!({"id": "m2", "mood": 60}))
    );
}

#[tokio::test]
async fn test_sync_completed_lists_delivered_entities() {
    let h = harness();
    let mut events = h.engine.bus().watch();
    h.engine
        .enqueue(EntityKind::MoodEntry, Operation::Create, json!({"id": "m1"}))
        .await
        .unwrap();
    h.engine
        .enqueue(EntityKind::Compulsion, Operation::Create, json!({"id": "c1"}))
        .await
        .unwrap();
    h.backend.fail_entity(EntityKind::Compulsion, offline());

    h.engine.process_queue().await.unwrap();

    match events.recv().await.unwrap() {
        SyncEvent::SyncCompleted {
            entities,
            user_id,
            timestamp,
        } => {
            assert_eq!(entities, vec![EntityKind::MoodEntry]);
            assert_eq!(user_id.as_str(), "alice");
            assert_eq!(timestamp, start_time());
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_pass_without_deliveries_publishes_nothing() {
    let h = harness();
    let mut events = h.engine.bus().watch();
    h.engine
        .enqueue(EntityKind::MoodEntry, Operation::Create, json!({}))
        .await
        .unwrap();
    h.backend.fail_next(offline());

    h.engine.process_queue().await.unwrap();
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_pass_is_skipped() {
    let h = harness();
    h.engine
        .enqueue(EntityKind::MoodEntry, Operation::Create, json!({"id": "m1"}))
        .await
        .unwrap();
    h.backend.set_delay(Some(Duration::from_millis(500)));

    let (first, second) = tokio::join!(h.engine.process_queue(), h.engine.process_queue());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(!first.skipped);
    assert_eq!(first.processed, 1);
    assert!(second.skipped);
    assert_eq!(h.backend.attempts(), 1);

    // The guard is released once the pass completes
    assert!(!h.engine.process_queue().await.unwrap().skipped);
}

#[tokio::test(start_paused = true)]
async fn test_slow_delivery_times_out_as_network_failure() {
    let h = harness();
    let id = h
        .engine
        .enqueue(EntityKind::MoodEntry, Operation::Create, json!({"id": "m1"}))
        .await
        .unwrap();
    h.backend.set_delay(Some(Duration::from_secs(60)));

    let summary = h.engine.process_queue().await.unwrap();
    assert_eq!(summary.failed, 1);

    let item = h
        .engine
        .pending()
        .await
        .unwrap()
        .into_iter()
        .find(|i| i.id == id)
        .unwrap();
    assert_eq!(item.retry_count, 1);
    assert_eq!(item.last_error_class, Some(ErrorClass::Network));
}

// ============================================================================
// Encryption
// ============================================================================

#[tokio::test]
async fn test_sealed_mutation_is_delivered_in_plaintext() {
    let h = harness();
    h.engine
        .enqueue_sealed(
            EntityKind::VoiceCheckin,
            Operation::Create,
            &json!({"id": "vc1", "transcript": "slept badly", "mood": 30}),
        )
        .await
        .unwrap();

    let queued = h.engine.pending().await.unwrap();
    assert!(queued[0].payload.is_sealed());

    h.engine.process_queue().await.unwrap();
    assert_eq!(
        h.backend.record(&EntityKind::VoiceCheckin, "vc1"),
        Some(json!({"id": "vc1", "transcript": "slept badly", "mood": 30}))
    );
}

#[tokio::test]
async fn test_encryption_unavailable_persists_nothing() {
    let h = harness_with(
        SyncConfig::testing(),
        SecureStoreConfig::default().with_available([]),
    );

    let err = h
        .engine
        .enqueue_sealed(EntityKind::VoiceCheckin, Operation::Create, &json!({"id": "vc1"}))
        .await
        .unwrap_err();

    assert!(err.is_encryption_unavailable());
    assert_eq!(h.engine.pending_count().await.unwrap(), 0);
}

// ============================================================================
// Dead letters
// ============================================================================

async fn dead_letter_one(h: &Harness, error: RemoteError) -> tether_core::ItemId {
    let id = h
        .engine
        .enqueue(EntityKind::MoodEntry, Operation::Create, json!({"id": "m1", "mood": 75}))
        .await
        .unwrap();
    h.backend.fail_next_n(8, error);
    for _ in 0..8 {
        h.engine.process_queue().await.unwrap();
    }
    id
}

#[tokio::test]
async fn test_manual_retry_redelivers_with_same_key() {
    let h = harness();
    let id = dead_letter_one(&h, offline()).await;

    h.engine.retry_dead_letter(id).await.unwrap();
    assert_eq!(h.engine.dead_letter_stats().await.unwrap().total, 0);

    let queued = h.engine.pending().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].retry_count, 0);

    h.engine.process_queue().await.unwrap();
    let applied = h.backend.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].idempotency_key, id);
}

#[tokio::test]
async fn test_sweep_skips_auth_failures() {
    let h = harness();
    let network = dead_letter_one(&h, offline()).await;
    let auth = dead_letter_one(&h, RemoteError::Unauthenticated("token expired".into())).await;

    let stats = h.engine.dead_letter_stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.retryable, 1);

    let sweep = h.engine.process_dead_letter_queue().await.unwrap();
    assert_eq!(sweep.retried, 1);

    let queued: Vec<_> = h.engine.pending().await.unwrap().iter().map(|i| i.id).collect();
    assert_eq!(queued, vec![network]);
    let remaining: Vec<_> = h
        .engine
        .dead_letters(None)
        .await
        .unwrap()
        .iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(remaining, vec![auth]);
}

/// Only the item older than the retention window is archived
#[tokio::test]
async fn test_archive_old_items() {
    let h = harness();
    let old = dead_letter_one(&h, offline()).await;
    h.clock.advance(chrono::Duration::days(8));
    let recent = dead_letter_one(&h, offline()).await;

    assert_eq!(h.engine.archive_old_dead_letters().await.unwrap(), 1);

    let items = h.engine.dead_letters(None).await.unwrap();
    let archived = |id| items.iter().find(|i| i.id == id).unwrap().archived;
    assert!(archived(old));
    assert!(!archived(recent));

    // Archived items are left out of the sweep
    let sweep = h.engine.process_dead_letter_queue().await.unwrap();
    assert_eq!(sweep.retried, 1);
    assert_eq!(h.engine.pending().await.unwrap()[0].id, recent);
}

#[tokio::test]
async fn test_dead_letter_notifies_user() {
    let h = harness();
    dead_letter_one(&h, RemoteError::Status {
        code: 401,
        message: "unauthorized".into(),
    })
    .await;

    let sent = h.notifier.0.lock().clone();
    assert_eq!(
        sent,
        vec![Notification::DeadLettered {
            entity: EntityKind::MoodEntry,
            class: ErrorClass::Auth,
        }]
    );
}

#[tokio::test]
async fn test_repeated_high_severity_failures_notify_user() {
    let h = harness();
    for entity in [
        EntityKind::MoodEntry,
        EntityKind::Compulsion,
        EntityKind::VoiceCheckin,
    ] {
        h.engine
            .enqueue(entity, Operation::Create, json!({"id": "x1"}))
            .await
            .unwrap();
    }
    h.backend.fail_always(RemoteError::Status {
        code: 429,
        message: "slow down".into(),
    });

    h.engine.process_queue().await.unwrap();
    assert_eq!(
        h.notifier.0.lock().as_slice(),
        &[Notification::RepeatedFailures { count: 3 }]
    );
}

// ============================================================================
// Merge
// ============================================================================

/// Newer remote copy wins and the divergence is logged once
#[tokio::test]
async fn test_lww_remote_newer() {
    let h = harness();
    let t = start_time();
    let local = vec![rec("1", 5, t)];
    let remote = vec![rec("1", 7, t + chrono::Duration::seconds(1))];

    let merged = h.engine.merge(&EntityKind::MoodEntry, &local, &remote).await;
    assert_eq!(merged, remote);

    let history = h.engine.conflict_history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].entity, EntityKind::MoodEntry);
    assert_eq!(history[0].conflicts.len(), 1);
    assert_eq!(history[0].conflicts[0].id, "1");
    assert_eq!(history[0].conflicts[0].local, local[0]);
    assert_eq!(history[0].conflicts[0].remote, remote[0]);
}

#[tokio::test]
async fn test_identical_collections_log_nothing() {
    let h = harness();
    let t = start_time();
    let records = vec![rec("1", 5, t), rec("2", 6, t)];

    let merged = h.engine.merge(&EntityKind::MoodEntry, &records, &records).await;
    assert_eq!(merged.len(), 2);
    assert!(h.engine.conflict_history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_one_conflict_entry_per_divergent_id() {
    let h = harness();
    let t = start_time();
    let local: Vec<_> = (0..6).map(|i| rec(&i.to_string(), i, t)).collect();
    let remote: Vec<_> = (0..6)
        .map(|i| rec(&i.to_string(), if i % 2 == 0 { i + 100 } else { i }, t))
        .collect();

    h.engine.merge(&EntityKind::Compulsion, &local, &remote).await;

    let history = h.engine.conflict_history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].count, 3);
    let ids: Vec<_> = history[0].conflicts.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["0", "2", "4"]);
}

#[test]
fn test_merge_is_idempotent() {
    let t = start_time();
    let s = chrono::Duration::seconds;
    let cases = vec![
        (vec![], vec![rec("a", 1, t)]),
        (vec![rec("a", 1, t)], vec![]),
        (vec![rec("a", 1, t + s(5))], vec![rec("a", 2, t)]),
        (vec![rec("a", 1, t)], vec![rec("a", 2, t + s(5))]),
        (vec![rec("a", 1, t)], vec![rec("a", 2, t)]),
        (
            vec![rec("a", 1, t), rec("b", 2, t + s(1)), rec("c", 3, t + s(9))],
            vec![rec("b", 20, t + s(2)), rec("c", 30, t + s(3)), rec("d", 4, t)],
        ),
    ];

    for (local, remote) in cases {
        let once = lww_merge(&local, &remote).records;
        let twice = lww_merge(&once, &remote).records;
        assert_eq!(once, twice, "local={local:?} remote={remote:?}");
    }
}

#[tokio::test]
async fn test_reconcile_updates_cache_and_publishes() {
    let h = harness();
    let t = start_time();
    let s = chrono::Duration::seconds;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    h.engine
        .bus()
        .subscribe(SyncEventKind::EntityMerged, move |event| {
            sink.lock().push(event.clone());
        });

    h.engine
        .cache_local(
            &EntityKind::MoodEntry,
            &[rec("1", 5, t), rec("2", 8, t + s(10))],
        )
        .await
        .unwrap();
    h.backend.set_remote(
        EntityKind::MoodEntry,
        vec![rec("1", 7, t + s(1)), rec("2", 1, t), rec("3", 4, t)],
    );

    let merged = h.engine.reconcile(&EntityKind::MoodEntry).await.unwrap();
    assert_eq!(
        merged,
        vec![rec("2", 8, t + s(10)), rec("1", 7, t + s(1)), rec("3", 4, t)]
    );
    assert_eq!(h.engine.cached(&EntityKind::MoodEntry).await.unwrap(), merged);

    let events = seen.lock().clone();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        SyncEvent::EntityMerged { entity, conflicts: 2, .. } if *entity == EntityKind::MoodEntry
    ));
}

#[tokio::test]
async fn test_reconcile_surfaces_fetch_errors() {
    let h = harness();
    h.backend.fail_fetch(offline());
    assert!(h.engine.reconcile(&EntityKind::MoodEntry).await.is_err());
    assert!(h.engine.cached(&EntityKind::MoodEntry).await.unwrap().is_empty());
}

// ============================================================================
// Housekeeping
// ============================================================================

#[tokio::test]
async fn test_clear_user_data() {
    let h = harness();
    let t = start_time();
    dead_letter_one(&h, offline()).await;
    h.engine
        .enqueue(EntityKind::MoodEntry, Operation::Create, json!({"id": "m2"}))
        .await
        .unwrap();
    h.engine
        .merge(&EntityKind::MoodEntry, &[rec("1", 1, t)], &[rec("1", 2, t)])
        .await;
    h.engine
        .cache_local(&EntityKind::MoodEntry, &[rec("1", 2, t)])
        .await
        .unwrap();

    h.engine.clear_user_data().await.unwrap();

    assert_eq!(h.engine.pending_count().await.unwrap(), 0);
    assert_eq!(h.engine.dead_letter_stats().await.unwrap().total, 0);
    assert!(h.engine.conflict_history().await.unwrap().is_empty());
    assert!(h.engine.cached(&EntityKind::MoodEntry).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ai_invalidation_event() {
    let h = harness();
    let mut events = h.engine.bus().watch();
    h.engine.invalidate_ai("weekly-insights");

    match events.recv().await.unwrap() {
        SyncEvent::AiInvalidation { hook, .. } => assert_eq!(hook, "weekly-insights"),
        other => panic!("unexpected event {other:?}"),
    }
}
