//! Background eviction of inactive workspace pools.
//!
//! The scheduler holds only a `Weak` reference to the [`PoolManager`], so the
//! task exits on its own once the manager is dropped.

use crate::config::{DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_INACTIVITY_TIMEOUT_SECS};
use crate::db::pool::PoolManager;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at, timeout};
use tracing::{debug, info, warn};

/// How long `stop` waits for the task before aborting it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

struct RunningTask {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Scheduler state for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupStatus {
    pub active: bool,
    pub task_alive: bool,
    pub interval_secs: u64,
    pub inactivity_timeout_secs: u64,
}

/// Periodically closes pools idle for longer than the inactivity timeout.
pub struct CleanupScheduler {
    manager: Weak<PoolManager>,
    interval: Duration,
    inactivity_timeout: Duration,
    /// std Mutex: never held across an await.
    task: std::sync::Mutex<Option<RunningTask>>,
}

impl CleanupScheduler {
    pub fn new(manager: &Arc<PoolManager>, interval: Duration, inactivity_timeout: Duration) -> Self {
        Self {
            manager: Arc::downgrade(manager),
            interval,
            inactivity_timeout,
            task: std::sync::Mutex::new(None),
        }
    }

    /// Scheduler with the default 60s period and 600s inactivity timeout.
    pub fn with_defaults(manager: &Arc<PoolManager>) -> Self {
        Self::new(
            manager,
            Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            Duration::from_secs(DEFAULT_INACTIVITY_TIMEOUT_SECS),
        )
    }

    /// Spawn the periodic task. Returns false if it is already running or the
    /// interval is zero.
    pub fn start(&self) -> bool {
        if self.interval.is_zero() {
            warn!("Cleanup interval is zero, scheduler not started");
            return false;
        }

        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("Cleanup scheduler already running");
            return false;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(
            self.manager.clone(),
            self.interval,
            self.inactivity_timeout,
            shutdown_rx,
        ));
        *task = Some(RunningTask { handle, shutdown });

        info!(
            interval_secs = self.interval.as_secs(),
            inactivity_timeout_secs = self.inactivity_timeout.as_secs(),
            "Cleanup scheduler started"
        );
        true
    }

    /// Signal the task to stop and wait up to [`STOP_TIMEOUT`] for it, then
    /// abort. A sweep in progress may finish first. No-op if not running.
    pub async fn stop(&self) {
        let running = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(RunningTask {
            mut handle,
            shutdown,
        }) = running
        else {
            return;
        };

        let _ = shutdown.send(true);
        if timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
            warn!("Cleanup task did not stop in time, aborting");
            handle.abort();
        }
        info!("Cleanup scheduler stopped");
    }

    /// Run one sweep immediately, independent of the timer.
    pub async fn force_cleanup(&self) -> Vec<String> {
        match self.manager.upgrade() {
            Some(manager) => sweep(&manager, self.inactivity_timeout).await,
            None => Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub fn status(&self) -> CleanupStatus {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        CleanupStatus {
            active: task.is_some(),
            task_alive: task.as_ref().is_some_and(|t| !t.handle.is_finished()),
            interval_secs: self.interval.as_secs(),
            inactivity_timeout_secs: self.inactivity_timeout.as_secs(),
        }
    }
}

impl Drop for CleanupScheduler {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.handle.abort();
        }
    }
}

impl std::fmt::Debug for CleanupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupScheduler")
            .field("interval", &self.interval)
            .field("inactivity_timeout", &self.inactivity_timeout)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run(
    manager: Weak<PoolManager>,
    period: Duration,
    inactivity_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    // First sweep one full period after start.
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Cleanup task received shutdown signal");
                    return;
                }
                continue;
            }
        }

        let Some(manager) = manager.upgrade() else {
            info!("Pool manager dropped, cleanup task exiting");
            return;
        };
        sweep(&manager, inactivity_timeout).await;
    }
}

async fn sweep(manager: &PoolManager, inactivity_timeout: Duration) -> Vec<String> {
    let closed = manager.close_idle(inactivity_timeout).await;
    if closed.is_empty() {
        debug!("Cleanup sweep found no inactive pools");
    } else {
        info!(closed = closed.len(), workspaces = ?closed, "Cleanup sweep closed inactive pools");
    }
    closed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_twice_and_stop() {
        let manager = Arc::new(PoolManager::new());
        let scheduler =
            CleanupScheduler::new(&manager, Duration::from_secs(60), Duration::from_secs(600));

        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert!(scheduler.status().task_alive);

        scheduler.stop().await;
        assert!(!scheduler.is_running());
        assert!(!scheduler.status().active);

        // Restartable after stop.
        assert!(scheduler.start());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_zero_interval_refuses_to_start() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = Arc::new(PoolManager::new());
        let config = crate::models::DatabaseConfig::sqlite(
            dir.path().join("z.db").to_string_lossy().to_string(),
        );
        assert!(manager.create("w1", config).await);
        let scheduler = CleanupScheduler::new(&manager, Duration::ZERO, Duration::ZERO);

        assert!(!scheduler.start());
        let status = scheduler.status();
        assert!(!status.active);
        assert!(!status.task_alive);

        // Manual sweeps still work.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(scheduler.force_cleanup().await, vec!["w1".to_string()]);
    }

    #[tokio::test]
    async fn test_stop_when_not_running_is_noop() {
        let manager = Arc::new(PoolManager::new());
        let scheduler = CleanupScheduler::with_defaults(&manager);
        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_task_exits_when_manager_dropped() {
        let manager = Arc::new(PoolManager::new());
        let scheduler =
            CleanupScheduler::new(&manager, Duration::from_millis(10), Duration::from_secs(600));
        assert!(scheduler.start());
        drop(manager);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!scheduler.is_running());
        assert!(scheduler.force_cleanup().await.is_empty());
    }
}
