//! User-facing failure notifications
//!
//! Most failures stay silent and are retried. The user hears about it when
//! an item is dead-lettered, or when a single pass produces enough
//! high-severity failures to suggest something is wrong with the account
//! rather than the network. Notifications are rate-limited.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tether_core::{Clock, DeadLetterItem, EntityKind, ErrorClass};

/// Configuration for the error reporter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// High-severity failures in one pass that trigger a notification
    pub threshold: usize,
    /// Minimum time between two notifications
    pub min_interval: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            min_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl NotifierConfig {
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }
}

/// What the user is told
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A change could not be saved after all retries
    DeadLettered {
        entity: EntityKind,
        class: ErrorClass,
    },
    /// Several changes failed in one pass with non-network errors
    RepeatedFailures { count: usize },
}

impl Notification {
    /// Human-readable text for a toast or banner
    pub fn message(&self) -> String {
        match self {
            Notification::DeadLettered { class, .. } => match class {
                ErrorClass::Auth => {
                    "Some changes could not be saved. Please sign in again.".to_string()
                }
                ErrorClass::Quota => {
                    "Some changes could not be saved because storage is full.".to_string()
                }
                ErrorClass::Validation => {
                    "Some changes could not be saved and need your attention.".to_string()
                }
                ErrorClass::Network | ErrorClass::Unknown => {
                    "Some changes have not synced yet. We'll keep trying.".to_string()
                }
            },
            Notification::RepeatedFailures { count } => {
                format!("{count} changes failed to sync. Check your account and connection.")
            }
        }
    }
}

/// Presentation layer hook
pub trait UserNotifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Notifier that only logs; the default when no UI is attached
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl UserNotifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        warn!(message = %notification.message(), "User notification");
    }
}

/// Decides when failures are worth interrupting the user for
pub struct ErrorReporter {
    notifier: Arc<dyn UserNotifier>,
    config: NotifierConfig,
    clock: Arc<dyn Clock>,
    last_sent: Mutex<Option<DateTime<Utc>>>,
}

impl ErrorReporter {
    pub fn new(notifier: Arc<dyn UserNotifier>, config: NotifierConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            notifier,
            config,
            clock,
            last_sent: Mutex::new(None),
        }
    }

    /// Report an item that reached the dead-letter queue
    ///
    /// Returns whether the user was notified.
    pub fn report_dead_letter(&self, item: &DeadLetterItem) -> bool {
        self.send(Notification::DeadLettered {
            entity: item.entity.clone(),
            class: item.error_class,
        })
    }

    /// Report the number of high-severity failures seen in one pass
    pub fn report_pass(&self, high_severity: usize) -> bool {
        if high_severity == 0 || high_severity < self.config.threshold {
            return false;
        }
        self.send(Notification::RepeatedFailures {
            count: high_severity,
        })
    }

    fn send(&self, notification: Notification) -> bool {
        let now = self.clock.now();
        {
            let mut last = self.last_sent.lock();
            if let Some(prev) = *last {
                let elapsed = (now - prev).to_std().unwrap_or(Duration::ZERO);
                if elapsed < self.config.min_interval {
                    debug!(?notification, "Notification suppressed by rate limit");
                    return false;
                }
            }
            *last = Some(now);
        }
        self.notifier.notify(&notification);
        true
    }
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("config", &self.config)
            .field("last_sent", &*self.last_sent.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_core::{ManualClock, Operation, Payload, SyncQueueItem};

    #[derive(Default)]
    struct Recording(Mutex<Vec<Notification>>);

    impl UserNotifier for Recording {
        fn notify(&self, notification: &Notification) {
            self.0.lock().push(notification.clone());
        }
    }

    fn reporter() -> (ErrorReporter, Arc<Recording>, Arc<ManualClock>) {
        let notifier = Arc::new(Recording::default());
        let clock = Arc::new(ManualClock::default());
        let reporter = ErrorReporter::new(notifier.clone(), NotifierConfig::default(), clock.clone());
        (reporter, notifier, clock)
    }

    fn dead_letter(class: ErrorClass) -> DeadLetterItem {
        let mut item = SyncQueueItem::new(
            EntityKind::MoodEntry,
            Operation::Create,
            Payload::from(json!({"mood": 75})),
            1,
            Utc::now(),
        );
        item.record_failure("nope", class);
        DeadLetterItem::from_exhausted(item, Utc::now())
    }

    #[test]
    fn test_threshold() {
        let (reporter, notifier, _) = reporter();
        assert!(!reporter.report_pass(0));
        assert!(!reporter.report_pass(2));
        assert!(reporter.report_pass(3));
        assert_eq!(
            notifier.0.lock().as_slice(),
            &[Notification::RepeatedFailures { count: 3 }]
        );
    }

    #[test]
    fn test_rate_limited() {
        let (reporter, notifier, clock) = reporter();
        assert!(reporter.report_dead_letter(&dead_letter(ErrorClass::Auth)));
        assert!(!reporter.report_dead_letter(&dead_letter(ErrorClass::Auth)));
        assert!(!reporter.report_pass(5));

        clock.advance(chrono::Duration::minutes(5));
        assert!(reporter.report_pass(5));
        assert_eq!(notifier.0.lock().len(), 2);
    }

    #[test]
    fn test_messages_follow_class() {
        let auth = Notification::DeadLettered {
            entity: EntityKind::MoodEntry,
            class: ErrorClass::Auth,
        };
        assert!(auth.message().contains("sign in"));

        let many = Notification::RepeatedFailures { count: 4 };
        assert!(many.message().starts_with("4 changes"));
    }
}
