//! Background Scheduler
//!
//! One repeating tokio task that runs store maintenance (eviction, then
//! metadata persistence) every `cleanup_interval_ms`.
//!
//! # Lifecycle
//!
//! - `start` spawns the loop; the first tick fires one interval after start
//! - `stop` cancels the loop and awaits it, so no tick runs after it returns
//! - The loop holds only a `Weak` reference to its task; once the owner is
//!   dropped the next tick ends the loop
//!
//! A failing tick is logged and reported to the task; it never ends the loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// Work performed on every scheduler tick
#[async_trait]
pub trait MaintenanceTask: Send + Sync + 'static {
    /// Run one round of maintenance
    async fn run_maintenance(&self) -> Result<()>;

    /// Called when `run_maintenance` fails
    fn on_tick_error(&self, _error: &Error) {}
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Cancelable periodic maintenance loop
pub struct BackgroundScheduler {
    period: Duration,
    running: Mutex<Option<Running>>,
    ticks: Arc<AtomicU64>,
}

impl BackgroundScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            running: Mutex::new(None),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Tick interval
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Spawn the loop. Returns false if it is already running.
    pub fn start(&self, task: Weak<dyn MaintenanceTask>) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(Self::run(
            self.period,
            task,
            token.clone(),
            Arc::clone(&self.ticks),
        ));
        *running = Some(Running { token, handle });
        info!(interval_ms = self.period.as_millis() as u64, "Started background scheduler");
        true
    }

    async fn run(
        period: Duration,
        task: Weak<dyn MaintenanceTask>,
        token: CancellationToken,
        ticks: Arc<AtomicU64>,
    ) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!("Background scheduler cancelled");
                    break;
                }

                _ = ticker.tick() => {
                    let Some(task) = task.upgrade() else {
                        debug!("Maintenance owner dropped, background scheduler exiting");
                        break;
                    };

                    let tick = ticks.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Err(e) = task.run_maintenance().await {
                        error!(tick, error = %e, "Background maintenance tick failed");
                        task.on_tick_error(&e);
                    }
                }
            }
        }
    }

    /// Cancel the loop and wait for it to finish. No-op when not running.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(Running { token, handle }) = running {
            token.cancel();
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(error = %e, "Background scheduler task panicked");
                }
            }
            info!(ticks = self.tick_count(), "Stopped background scheduler");
        }
    }

    /// Whether the loop is alive
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Ticks started so far
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.token.cancel();
        }
    }
}

impl std::fmt::Debug for BackgroundScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundScheduler")
            .field("period", &self.period)
            .field("running", &self.is_running())
            .field("ticks", &self.tick_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        runs: AtomicUsize,
        errors: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MaintenanceTask for Counter {
        async fn run_maintenance(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::Internal("tick failed".into()))
            } else {
                Ok(())
            }
        }

        fn on_tick_error(&self, _error: &Error) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn weak(task: &Arc<Counter>) -> Weak<dyn MaintenanceTask> {
        let task: Arc<dyn MaintenanceTask> = task.clone();
        Arc::downgrade(&task)
    }

    #[tokio::test]
    async fn test_ticks_until_stopped() {
        let counter = Arc::new(Counter::default());
        let scheduler = BackgroundScheduler::new(Duration::from_millis(10));

        assert!(scheduler.start(weak(&counter)));
        assert!(!scheduler.start(weak(&counter)), "already running");
        tokio::time::sleep(Duration::from_millis(80)).await;
        scheduler.stop().await;

        let runs = counter.runs.load(Ordering::SeqCst);
        assert!(runs >= 2, "expected several ticks, got {}", runs);
        assert!(!scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), runs, "tick after stop");
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let scheduler = BackgroundScheduler::new(Duration::from_millis(10));
        scheduler.stop().await;
        scheduler.stop().await;
        assert_eq!(scheduler.tick_count(), 0);
    }

    #[tokio::test]
    async fn test_errors_do_not_stop_loop() {
        let counter = Arc::new(Counter {
            fail: true,
            ..Default::default()
        });
        let scheduler = BackgroundScheduler::new(Duration::from_millis(10));
        scheduler.start(weak(&counter));
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(scheduler.is_running());
        assert!(counter.errors.load(Ordering::SeqCst) >= 2);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_dropped_owner_ends_loop() {
        let counter = Arc::new(Counter::default());
        let scheduler = BackgroundScheduler::new(Duration::from_millis(10));
        scheduler.start(weak(&counter));

        drop(counter);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.tick_count(), 0);
    }
}
