use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

#[derive(Debug, Default)]
struct TaskSupervisorState {
    /// Number of currently running tasks.
    running: AtomicU64,
    /// Token cancelled when stop is requested.
    stop: CancellationToken,
    /// Token cancelled when all tasks have stopped.
    stopped: CancellationToken,
}

/// Task lifecycle supervisor for graceful shutdown.
///
/// Tracks spawned background loops (receive loops, accept loops, dispatches)
/// so that `stop` cancels them and `all_stopped` resolves once every one of
/// them has returned.
///
/// # Examples
///
/// ```rust,no_run
/// # use hubwire::TaskSupervisor;
/// # #[tokio::main]
/// # async fn main() {
/// let supervisor = TaskSupervisor::create();
/// supervisor.spawn(async {
///     // Task work here, cancelled on stop.
/// });
/// supervisor.stop();
/// supervisor.all_stopped().await;
/// # }
/// ```
#[derive(Debug)]
pub struct TaskSupervisor(Arc<TaskSupervisorState>);

/// RAII guard for tracking individual async tasks.
#[derive(Debug)]
pub struct TaskSupervisorGuard(Arc<TaskSupervisorState>);

impl TaskSupervisorState {
    fn finish_async_task(&self) {
        let running = self.running.fetch_sub(1, Ordering::AcqRel) - 1;
        if running == 0 {
            self.stopped.cancel();
        }
    }
}

impl TaskSupervisor {
    /// Creates a new task supervisor.
    ///
    /// Starts with one guard task that holds the count above zero until
    /// stop is requested.
    #[must_use]
    pub fn create() -> Self {
        let supervisor = Self(Arc::default());

        let guard = supervisor.start_async_task();
        tokio::spawn(async move {
            guard.stopped().await;
        });

        supervisor
    }

    pub fn stop(&self) {
        self.0.stop.cancel();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.stop.is_cancelled()
    }

    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stop.cancelled()
    }

    /// Resolves when the running task count reaches zero.
    pub fn all_stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stopped.cancelled()
    }

    #[must_use]
    pub fn start_async_task(&self) -> TaskSupervisorGuard {
        self.0.running.fetch_add(1, Ordering::AcqRel);
        TaskSupervisorGuard(self.0.clone())
    }

    /// Spawns a tracked task that is dropped as soon as stop is requested.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.start_async_task();
        tokio::spawn(async move {
            tokio::select! {
                () = guard.stopped() => {}
                () = fut => {}
            }
        });
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl TaskSupervisorGuard {
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stop.cancelled()
    }
}

impl Drop for TaskSupervisorGuard {
    fn drop(&mut self) {
        self.0.finish_async_task();
    }
}
