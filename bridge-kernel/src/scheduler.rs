//! Bounded task scheduler for tool invocations.

use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEFAULT_MAX_CONCURRENCY: NonZeroUsize = NonZeroUsize::new(64).unwrap();

/// Maximum number of invocations allowed to run at once.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    max_concurrency: NonZeroUsize,
}

impl SchedulerConfig {
    /// Creates a new configuration with the supplied concurrency limit.
    #[must_use]
    pub const fn new(max_concurrency: NonZeroUsize) -> Self {
        Self { max_concurrency }
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub const fn max_concurrency(self) -> NonZeroUsize {
        self.max_concurrency
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

/// Wrapper around `tokio::spawn` that bounds concurrency and supports
/// cooperative shutdown.
///
/// Tasks past the limit wait for a permit. [`close`](Self::close) stops new
/// submissions while letting admitted work finish; [`cancel_all`](Self::cancel_all)
/// additionally stops everything still running.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    semaphore: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    cancel: CancellationToken,
    config: SchedulerConfig,
}

impl TaskScheduler {
    /// Constructs a scheduler using the provided configuration.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        let permits = config.max_concurrency().get();
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            closed: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            cancel: CancellationToken::new(),
            config,
        }
    }

    /// Returns the associated configuration.
    #[must_use]
    pub const fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Returns `true` if the scheduler has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of admitted tasks that have not finished, including queued ones.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Closes the scheduler, preventing new tasks from being spawned.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Closes the scheduler and cancels every admitted task.
    pub fn cancel_all(&self) {
        self.close();
        self.cancel.cancel();
        self.semaphore.close();
    }

    /// Spawns a future, respecting the configured concurrency limit.
    ///
    /// Dropping the returned [`ScheduledTask`] aborts the future.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Closed`] when the scheduler is closed before
    /// the task is enqueued.
    pub fn spawn<F, T>(&self, future: F) -> SchedulerResult<ScheduledTask<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(SchedulerError::Closed);
        }

        let semaphore = Arc::clone(&self.semaphore);
        let cancel = self.cancel.clone();
        let guard = InFlightGuard::enter(Arc::clone(&self.in_flight));

        let handle = tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(SchedulerError::Cancelled),
                output = async {
                    let permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| SchedulerError::Cancelled)?;
                    let output = future.await;
                    drop(permit);
                    Ok::<_, SchedulerError>(output)
                } => output,
            }
        });

        Ok(ScheduledTask { handle })
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handle to a scheduled task. Aborts the task when dropped.
#[derive(Debug)]
pub struct ScheduledTask<T> {
    handle: JoinHandle<SchedulerResult<T>>,
}

impl<T> Future for ScheduledTask<T> {
    type Output = SchedulerResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(output) => output,
            Err(err) if err.is_panic() => Err(SchedulerError::Panicked),
            Err(_) => Err(SchedulerError::Cancelled),
        })
    }
}

impl<T> Drop for ScheduledTask<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Errors produced by the scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// Scheduler is closed and will not accept new tasks.
    #[error("scheduler closed")]
    Closed,
    /// Task was cancelled before it completed.
    #[error("task cancelled")]
    Cancelled,
    /// Task panicked.
    #[error("task panicked")]
    Panicked,
}

/// Result alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn respects_max_concurrency() {
        let config = SchedulerConfig::new(NonZeroUsize::new(2).unwrap());
        let scheduler = TaskScheduler::new(config);
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            handles.push(
                scheduler
                    .spawn(async move {
                        let current = running.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(current, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap(),
            );
        }
        assert_eq!(scheduler.in_flight(), 3);

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn close_prevents_new_tasks() {
        let scheduler = TaskScheduler::default();
        scheduler.close();

        let result = scheduler.spawn(async move {});
        assert_eq!(result.unwrap_err(), SchedulerError::Closed);
    }

    #[tokio::test]
    async fn close_lets_admitted_work_finish() {
        let scheduler = TaskScheduler::default();
        let task = scheduler
            .spawn(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                7
            })
            .unwrap();
        scheduler.close();
        assert_eq!(task.await, Ok(7));
    }

    #[tokio::test]
    async fn cancel_all_stops_running_tasks() {
        let scheduler = TaskScheduler::default();
        let task = scheduler
            .spawn(std::future::pending::<()>())
            .unwrap();

        scheduler.cancel_all();
        assert_eq!(task.await, Err(SchedulerError::Cancelled));
        assert!(scheduler.is_closed());
    }

    #[tokio::test]
    async fn dropping_the_handle_aborts_the_task() {
        let scheduler = TaskScheduler::default();
        let task = scheduler.spawn(std::future::pending::<()>()).unwrap();
        assert_eq!(scheduler.in_flight(), 1);

        drop(task);
        for _ in 0..100 {
            if scheduler.in_flight() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn panics_are_reported() {
        let scheduler = TaskScheduler::default();
        let task = scheduler.spawn::<_, ()>(async { panic!("boom") }).unwrap();
        assert_eq!(task.await, Err(SchedulerError::Panicked));
    }
}
