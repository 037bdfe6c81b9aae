//! Clock and timer service.
//!
//! Every time-dependent code path in this crate goes through this module
//! rather than calling platform clocks directly, so tests can drive all of
//! it deterministically with Tokio's paused clock
//! (`#[tokio::test(start_paused = true)]` + `tokio::time::advance`).
//!
//! Scheduled timers are non-retaining: they live on the runtime and are
//! abandoned when the runtime shuts down. Nothing scheduled here can keep
//! the process alive on its own.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Current instant on the (possibly paused) runtime clock.
pub fn now() -> Instant {
    Instant::now()
}

/// Sleep on the runtime clock.
pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Handle to a scheduled timer. Cancellation is explicit; dropping the
/// handle leaves the timer running.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Cancel the timer. A no-op if it already fired.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Whether the timer task has run to completion or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Run `task` after `delay` on the runtime clock.
pub fn schedule<F>(delay: Duration, task: F) -> TimerHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    TimerHandle {
        task: tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        schedule(Duration::from_millis(500), async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_millis(499)).await;
        settle().await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handle = schedule(Duration::from_millis(100), async move {
            flag.store(true, Ordering::SeqCst);
        });

        handle.cancel();
        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        assert!(!fired.load(Ordering::SeqCst));
        assert!(handle.is_finished());
    }
}
