//! Cancellable background loops tied to the runtime lifecycle.
//!
//! Every unit of work is a spawned tokio task owning a
//! [`CancellationToken`]. The token is shared by the [`TaskHandle`] handed to
//! the caller and by the scheduler's own table, so either side can cancel:
//! the caller early, the runtime on stop/purge via [`BackgroundScheduler::cancel_all`].
//!
//! Cancellation is cooperative. It is observed at iteration boundaries and
//! during the sleep between iterations, never in the middle of a unit.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::registry::extract_panic_message;

/// Caller-side capability to stop a scheduled unit.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: Uuid,
    token: CancellationToken,
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop the unit at its next boundary. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Table of live background units.
#[derive(Debug, Clone, Default)]
pub struct BackgroundScheduler {
    tasks: Arc<DashMap<Uuid, CancellationToken>>,
}

impl BackgroundScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self) -> (Uuid, CancellationToken) {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        self.tasks.insert(id, token.clone());
        (id, token)
    }

    /// Run `unit` repeatedly until it returns `Ok(true)` or the handle is
    /// cancelled.
    ///
    /// With an `interval`, each completed run is followed by a sleep of that
    /// length; without one the next run starts right after yielding to the
    /// executor. A unit returning `Err` is logged and the loop continues.
    /// A panicking unit ends the loop.
    pub fn schedule<F, Fut>(&self, mut unit: F, interval: Option<Duration>) -> TaskHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let (id, token) = self.register();
        let tasks = self.tasks.clone();
        let loop_token = token.clone();

        tokio::spawn(async move {
            let mut iterations: u64 = 0;
            loop {
                if loop_token.is_cancelled() {
                    debug!(task_id = %id, iterations, "background unit cancelled");
                    break;
                }

                iterations += 1;
                match AssertUnwindSafe(async { unit().await }).catch_unwind().await {
                    Ok(Ok(true)) => {
                        debug!(task_id = %id, iterations, "background unit finished");
                        break;
                    }
                    Ok(Ok(false)) => {}
                    Ok(Err(e)) => {
                        warn!(task_id = %id, iteration = iterations, error = %e, "background unit failed");
                    }
                    Err(panic_info) => {
                        error!(task_id = %id, panic = %extract_panic_message(&panic_info), "background unit panicked");
                        break;
                    }
                }

                match interval {
                    Some(interval) => {
                        tokio::select! {
                            _ = loop_token.cancelled() => {
                                debug!(task_id = %id, iterations, "background unit cancelled");
                                break;
                            }
                            _ = tokio::time::sleep(interval) => {}
                        }
                    }
                    None => tokio::task::yield_now().await,
                }
            }
            tasks.remove(&id);
        });

        TaskHandle { id, token }
    }

    /// Run `f` once after `delay`, unless cancelled first.
    pub fn schedule_once<F, Fut>(&self, f: F, delay: Duration) -> TaskHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (id, token) = self.register();
        let tasks = self.tasks.clone();
        let wait_token = token.clone();

        tokio::spawn(async move {
            let fire = tokio::select! {
                _ = wait_token.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            };

            if fire {
                match AssertUnwindSafe(async move { f().await }).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(task_id = %id, error = %e, "delayed unit failed"),
                    Err(panic_info) => {
                        error!(task_id = %id, panic = %extract_panic_message(&panic_info), "delayed unit panicked")
                    }
                }
            }
            tasks.remove(&id);
        });

        TaskHandle { id, token }
    }

    /// Cancel every outstanding unit. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<Uuid> = self.tasks.iter().map(|entry| *entry.key()).collect();
        let mut cancelled = 0;
        for id in ids {
            if let Some((_, token)) = self.tasks.remove(&id) {
                token.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(count = cancelled, "cancelled background units");
        }
        cancelled
    }

    /// Number of units that have not yet finished or been cancelled.
    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_returning_true_on_third_call_runs_three_times() {
        let scheduler = BackgroundScheduler::new();
        let calls = counter();

        let c = calls.clone();
        scheduler.schedule(
            move || {
                let c = c.clone();
                async move { Ok(c.fetch_add(1, Ordering::SeqCst) + 1 == 3) }
            },
            Some(Duration::from_millis(10)),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_further_invocations() {
        let scheduler = BackgroundScheduler::new();
        let calls = counter();

        let c = calls.clone();
        let handle = scheduler.schedule(
            move || {
                let c = c.clone();
                async move { Ok(c.fetch_add(1, Ordering::SeqCst) + 1 == 3) }
            },
            Some(Duration::from_millis(10)),
        );

        // Runs at t=0 and t=10; cancel before the t=20 run.
        tokio::time::sleep(Duration::from_millis(15)).await;
        handle.cancel();
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_without_interval_reinvokes_immediately() {
        let scheduler = BackgroundScheduler::new();
        let calls = counter();

        let c = calls.clone();
        scheduler.schedule(
            move || {
                let c = c.clone();
                async move { Ok(c.fetch_add(1, Ordering::SeqCst) + 1 >= 5) }
            },
            None,
        );

        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) >= 5 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_unit_keeps_looping() {
        let scheduler = BackgroundScheduler::new();
        let calls = counter();

        let c = calls.clone();
        scheduler.schedule(
            move || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        anyhow::bail!("host not ready");
                    }
                    Ok(true)
                }
            },
            Some(Duration::from_millis(5)),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_once_fires_after_delay() {
        let scheduler = BackgroundScheduler::new();
        let calls = counter();

        let c = calls.clone();
        scheduler.schedule_once(
            move || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Duration::from_millis(50),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_schedule_once_never_fires() {
        let scheduler = BackgroundScheduler::new();
        let calls = counter();

        let c = calls.clone();
        let handle = scheduler.schedule_once(
            move || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Duration::from_millis(50),
        );
        handle.cancel();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_stops_every_unit() {
        let scheduler = BackgroundScheduler::new();
        let calls = counter();

        for _ in 0..3 {
            let c = calls.clone();
            scheduler.schedule(
                move || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(false)
                    }
                },
                Some(Duration::from_millis(10)),
            );
        }
        let delayed = calls.clone();
        scheduler.schedule_once(
            move || async move {
                delayed.fetch_add(100, Ordering::SeqCst);
                Ok(())
            },
            Duration::from_secs(1),
        );

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(scheduler.active_count(), 4);
        assert_eq!(scheduler.cancel_all(), 4);

        let after_cancel = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_cancel);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_unit_runs_to_completion() {
        let scheduler = BackgroundScheduler::new();
        let finished = counter();

        let f = finished.clone();
        let handle = scheduler.schedule(
            move || {
                let f = f.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    f.fetch_add(1, Ordering::SeqCst);
                    Ok(false)
                }
            },
            Some(Duration::from_millis(10)),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
