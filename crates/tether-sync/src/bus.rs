//! In-process invalidation bus
//!
//! Producers publish typed [`SyncEvent`]s; consumers either register a
//! synchronous handler per [`SyncEventKind`] or take a broadcast receiver
//! with [`InvalidationBus::watch`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use tether_core::{SyncEvent, SyncEventKind};

/// Capacity of the broadcast channel behind [`InvalidationBus::watch`]
const WATCH_CAPACITY: usize = 256;

/// Handle returned by [`InvalidationBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Publish/subscribe hub for cache invalidation
pub struct InvalidationBus {
    handlers: DashMap<SyncEventKind, Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl InvalidationBus {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            handlers: DashMap::new(),
            next_id: AtomicU64::new(0),
            event_tx,
        }
    }

    /// Deliver an event to every handler of its kind and every watcher
    ///
    /// Fire-and-forget: having nobody listening is fine. Handlers run on
    /// the caller's task and must be cheap.
    pub fn publish(&self, event: SyncEvent) {
        let kind = event.kind();
        // Clone the list out so a handler may (un)subscribe without deadlocking
        let handlers: Vec<Handler> = self
            .handlers
            .get(&kind)
            .map(|entry| entry.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        trace!(%kind, handlers = handlers.len(), "Publishing event");
        for handler in &handlers {
            handler(&event);
        }

        // Err only means there are no watchers
        let _ = self.event_tx.send(event);
    }

    /// Register a handler for one event kind
    pub fn subscribe<F>(&self, kind: SyncEventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Drop a handler; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for mut entry in self.handlers.iter_mut() {
            let before = entry.len();
            entry.retain(|(sid, _)| *sid != id);
            removed |= entry.len() != before;
        }
        removed
    }

    /// Receive every published event asynchronously
    pub fn watch(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Number of handlers registered for a kind
    pub fn subscriber_count(&self, kind: SyncEventKind) -> usize {
        self.handlers.get(&kind).map(|h| h.len()).unwrap_or(0)
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InvalidationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationBus")
            .field("kinds", &self.handlers.len())
            .field("watchers", &self.event_tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tether_core::{EntityKind, UserId};

    fn alice() -> UserId {
        UserId::new("alice").unwrap()
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = InvalidationBus::new();
        bus.publish(SyncEvent::ai_invalidation("insights", alice()));
    }

    #[test]
    fn test_handlers_are_routed_by_kind() {
        let bus = InvalidationBus::new();
        let completed = Arc::new(AtomicUsize::new(0));
        let merged = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let completed = completed.clone();
            bus.subscribe(SyncEventKind::SyncCompleted, move |_| {
                completed.fetch_add(1, Ordering::SeqCst);
            });
        }
        let m = merged.clone();
        bus.subscribe(SyncEventKind::EntityMerged, move |event| {
            assert!(event.touches(&EntityKind::MoodEntry));
            m.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(SyncEvent::sync_completed(vec![EntityKind::Compulsion], alice()));
        bus.publish(SyncEvent::entity_merged(EntityKind::MoodEntry, alice(), 0));

        assert_eq!(completed.load(Ordering::SeqCst), 2);
        assert_eq!(merged.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = InvalidationBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let id = bus.subscribe(SyncEventKind::AiInvalidation, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.subscriber_count(SyncEventKind::AiInvalidation), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(SyncEvent::ai_invalidation("insights", alice()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_may_subscribe_while_publishing() {
        let bus = Arc::new(InvalidationBus::new());
        let inner = bus.clone();
        bus.subscribe(SyncEventKind::SyncCompleted, move |_| {
            inner.subscribe(SyncEventKind::SyncCompleted, |_| {});
        });

        bus.publish(SyncEvent::sync_completed(vec![], alice()));
        assert_eq!(bus.subscriber_count(SyncEventKind::SyncCompleted), 2);
    }

    #[tokio::test]
    async fn test_watch_receives_events() {
        let bus = InvalidationBus::new();
        let mut rx = bus.watch();

        bus.publish(SyncEvent::entity_merged(EntityKind::Compulsion, alice(), 3));

        match rx.recv().await.unwrap() {
            SyncEvent::EntityMerged {
                entity, conflicts, ..
            } => {
                assert_eq!(entity, EntityKind::Compulsion);
                assert_eq!(conflicts, 3);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
