//! Background timers driving the engine
//!
//! The engine itself never schedules anything. [`SyncScheduler`] owns two
//! tokio tasks that call its entry points on a fixed cadence:
//! - queue processing every `queue_interval`, plus once per
//!   [`SyncScheduler::on_foreground`] call
//! - dead-letter archival and sweep after `dlq_startup_delay`, then every
//!   `dlq_interval`

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::SyncEngine;

/// Timer cadence for the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub queue_interval: Duration,
    pub dlq_interval: Duration,
    /// Delay before the first dead-letter pass after start
    pub dlq_startup_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_interval: Duration::from_secs(30),
            dlq_interval: Duration::from_secs(60),
            dlq_startup_delay: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    pub fn with_queue_interval(mut self, interval: Duration) -> Self {
        self.queue_interval = interval;
        self
    }

    pub fn with_dlq_interval(mut self, interval: Duration) -> Self {
        self.dlq_interval = interval;
        self
    }

    pub fn with_dlq_startup_delay(mut self, delay: Duration) -> Self {
        self.dlq_startup_delay = delay;
        self
    }
}

/// Handle to the running timers
///
/// Dropping the handle stops the timers. A pass that is already running is
/// allowed to finish.
pub struct SyncScheduler {
    shutdown_tx: broadcast::Sender<()>,
    foreground: Arc<Notify>,
    handles: Vec<JoinHandle<()>>,
}

impl SyncScheduler {
    /// Spawn the queue and dead-letter tasks on the current runtime
    pub fn start(engine: Arc<SyncEngine>, config: SchedulerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let foreground = Arc::new(Notify::new());

        let queue_task = tokio::spawn(run_queue_task(
            engine.clone(),
            config.queue_interval,
            foreground.clone(),
            shutdown_tx.subscribe(),
        ));
        let dlq_task = tokio::spawn(run_dead_letter_task(
            engine,
            config.dlq_startup_delay,
            config.dlq_interval,
            shutdown_tx.subscribe(),
        ));

        info!(
            queue_interval_secs = config.queue_interval.as_secs(),
            dlq_interval_secs = config.dlq_interval.as_secs(),
            "Sync scheduler started"
        );

        Self {
            shutdown_tx,
            foreground,
            handles: vec![queue_task, dlq_task],
        }
    }

    /// Run one queue pass now (app returned to the foreground)
    pub fn on_foreground(&self) {
        self.foreground.notify_one();
    }

    /// Stop both timers and wait for the tasks to exit
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        for handle in std::mem::take(&mut self.handles) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("tasks", &self.handles.len())
            .finish_non_exhaustive()
    }
}

async fn run_queue_task(
    engine: Arc<SyncEngine>,
    period: Duration,
    foreground: Arc<Notify>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Queue timer stopping");
                break;
            }
            _ = interval.tick() => {}
            _ = foreground.notified() => {
                debug!("Foreground trigger");
            }
        }

        if let Err(e) = engine.process_queue().await {
            warn!(error = %e, "Scheduled queue pass failed");
        }
    }
}

async fn run_dead_letter_task(
    engine: Arc<SyncEngine>,
    startup_delay: Duration,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + startup_delay, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Dead-letter timer stopping");
                break;
            }
            _ = interval.tick() => {}
        }

        if let Err(e) = engine.archive_old_dead_letters().await {
            warn!(error = %e, "Scheduled dead-letter archival failed");
        }
        if let Err(e) = engine.process_dead_letter_queue().await {
            warn!(error = %e, "Scheduled dead-letter sweep failed");
        }
    }
}
