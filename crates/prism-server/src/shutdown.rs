//! Graceful shutdown coordination.
//!
//! Shutdown is a state machine: `Running → Draining → Stopped`. Entering
//! `Draining` cancels the shared token — listeners stop accepting, timers
//! and bridges exit — then registered task handles are awaited under a hard
//! deadline, and stragglers are aborted.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default deadline for graceful shutdown before force-aborting.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the process is in its shutdown lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    Draining,
    Stopped,
}

/// Coordinates graceful shutdown across all background tasks.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    phase: Mutex<ShutdownPhase>,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            task_handles: Mutex::new(Vec::new()),
            phase: Mutex::new(ShutdownPhase::Running),
        }
    }

    /// Register a background task handle for graceful shutdown.
    pub fn register_task(&self, handle: JoinHandle<()>) {
        self.task_handles.lock().push(handle);
    }

    /// Take all registered task handles (drains the list).
    pub fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.task_handles.lock())
    }

    /// Get a clone of the cancellation token.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.lock()
    }

    /// Enter `Draining`: cancel the token so every loop observes shutdown.
    /// Idempotent.
    pub fn begin_drain(&self) {
        let mut phase = self.phase.lock();
        if *phase == ShutdownPhase::Running {
            *phase = ShutdownPhase::Draining;
            info!("shutdown initiated, draining");
        }
        drop(phase);
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Drain and stop.
    ///
    /// 1. Enter `Draining` (cancels the token)
    /// 2. Wait up to `timeout` for all handles to complete
    /// 3. Abort any remaining tasks, then enter `Stopped`
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.begin_drain();

        let mut all_handles = handles;
        all_handles.extend(self.take_tasks());

        info!(
            task_count = all_handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let abort_handles: Vec<_> = all_handles.iter().map(JoinHandle::abort_handle).collect();

        match tokio::time::timeout(timeout, futures::future::join_all(all_handles)).await {
            Ok(_) => {
                info!("all shutdown tasks completed");
            }
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "shutdown timed out, aborting remaining tasks"
                );
                for handle in &abort_handles {
                    handle.abort();
                }
            }
        }

        *self.phase.lock() = ShutdownPhase::Stopped;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
