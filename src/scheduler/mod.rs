//! Shared delayed/periodic task scheduler.
//!
//! Heartbeats and keep-alive probes for every non-blocking connection run on
//! one background thread driving a single-threaded tokio runtime. Cancelling a
//! task aborts it, which drops its future together with its timer entry, so a
//! high churn of short-lived connections never leaves dead tasks behind.
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use comet::scheduler::Scheduler;
//!
//! let scheduler = Scheduler::new()?;
//! let task = scheduler.schedule(Duration::from_secs(30), || println!("heartbeat"));
//! task.cancel();
//! ```

use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{CometError, Result};

/// Cloneable handle to the shared scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    handle: Handle,
    pending: Arc<AtomicUsize>,
    /// Dropping the sender stops the scheduler thread.
    _shutdown: Option<oneshot::Sender<()>>,
}

impl Scheduler {
    /// Start a dedicated scheduler thread.
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| CometError::Server(format!("Failed to build scheduler runtime: {e}")))?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        std::thread::Builder::new()
            .name("comet-scheduler".to_string())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
                tracing::debug!("Scheduler thread stopped");
            })
            .map_err(|e| CometError::Server(format!("Failed to spawn scheduler thread: {e}")))?;

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                handle,
                pending: Arc::new(AtomicUsize::new(0)),
                _shutdown: Some(shutdown_tx),
            }),
        })
    }

    /// Schedule onto an existing runtime instead of a dedicated thread.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                handle,
                pending: Arc::new(AtomicUsize::new(0)),
                _shutdown: None,
            }),
        }
    }

    /// Run `task` once after `delay`.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> Cancelable
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.track();
        let handle = self.inner.handle.spawn(async move {
            let _guard = guard;
            tokio::time::sleep(delay).await;
            task();
        });
        Cancelable {
            handle: handle.abort_handle(),
        }
    }

    /// Run `task` after `initial`, then every `period` until it breaks or is
    /// cancelled. A slow run delays the following ticks rather than bursting.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        initial: Duration,
        period: Duration,
        mut task: F,
    ) -> Cancelable
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let guard = self.track();
        let handle = self.inner.handle.spawn(async move {
            let _guard = guard;
            let start = tokio::time::Instant::now() + initial;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if task().is_break() {
                    break;
                }
            }
        });
        Cancelable {
            handle: handle.abort_handle(),
        }
    }

    /// Number of tasks that have neither completed nor been purged.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    fn track(&self) -> PendingGuard {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        PendingGuard(Arc::clone(&self.inner.pending))
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Decrements the pending count when the task future is dropped, whether it
/// ran to completion or was aborted.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handle to a scheduled task.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug)]
pub struct Cancelable {
    handle: AbortHandle,
}

impl Cancelable {
    /// Cancel the task and purge it from the scheduler.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether the task has completed or been purged.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    fn wait_for_pending(scheduler: &Scheduler, expected: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if scheduler.pending() == expected {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_schedule_runs_once_after_delay() {
        let scheduler = Scheduler::new().unwrap();
        let (tx, rx) = mpsc::channel();
        let started = Instant::now();

        scheduler.schedule(Duration::from_millis(30), move || {
            tx.send(Instant::now()).unwrap();
        });

        let fired = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(fired.duration_since(started) >= Duration::from_millis(30));
        assert!(wait_for_pending(&scheduler, 0));
    }

    #[test]
    fn test_cancel_purges_task() {
        let scheduler = Scheduler::new().unwrap();
        let (tx, rx) = mpsc::channel::<()>();

        let task = scheduler.schedule(Duration::from_millis(50), move || {
            tx.send(()).unwrap();
        });
        assert_eq!(scheduler.pending(), 1);

        task.cancel();
        assert!(wait_for_pending(&scheduler, 0));
        assert!(task.is_finished());
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }

    #[test]
    fn test_churn_leaves_nothing_pending() {
        let scheduler = Scheduler::new().unwrap();

        let tasks: Vec<_> = (0..500)
            .map(|_| scheduler.schedule(Duration::from_secs(3600), || {}))
            .collect();
        assert_eq!(scheduler.pending(), 500);

        for task in &tasks {
            task.cancel();
        }
        assert!(wait_for_pending(&scheduler, 0));
    }

    #[test]
    fn test_fixed_rate_until_break() {
        let scheduler = Scheduler::new().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut runs = 0;

        scheduler.schedule_at_fixed_rate(
            Duration::from_millis(5),
            Duration::from_millis(10),
            move || {
                runs += 1;
                tx.send(runs).unwrap();
                if runs == 3 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
        );

        let seen: Vec<i32> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(wait_for_pending(&scheduler, 0));
    }

    #[tokio::test]
    async fn test_with_handle_uses_current_runtime() {
        let scheduler = Scheduler::with_handle(Handle::current());
        let (tx, rx) = tokio::sync::oneshot::channel();

        scheduler.schedule(Duration::from_millis(5), move || {
            let _ = tx.send(42);
        });

        let value = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, 42);
    }
}
