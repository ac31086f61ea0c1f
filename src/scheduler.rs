//! Scheduler abstraction.
//!
//! A scheduler turns "run this later, possibly elsewhere, possibly
//! periodically, possibly cancellably" into one contract. Every `schedule*`
//! method returns a [`DynDisposable`]: disposing it before the action runs
//! prevents the run, and disposing it while a periodic action is running
//! prevents future recurrences without interrupting the current one.
//!
//! Actions receive a [`CancellationToken`] that is cancelled when their
//! disposable is disposed, so long-running actions can stop cooperatively.
//!
//! Operators never pick a scheduler on their own; callers inject one. The
//! lazily-created process-wide instances returned by [`immediate`],
//! [`current_thread`] and [`task_pool`] are meant for the outermost API
//! boundary.

use std::{future::Future, sync::Arc};

pub use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use tokio_util::sync::CancellationToken;

use crate::{disposable::DynDisposable, error::RxError};

mod current_thread;
mod immediate;
mod task_pool;
mod virtual_time;

pub use current_thread::CurrentThreadScheduler;
pub use immediate::ImmediateScheduler;
pub use task_pool::TaskPoolScheduler;
pub use virtual_time::VirtualTimeScheduler;

/// A unit of scheduled work.
pub type Action = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

/// A unit of work run on every period.
pub type PeriodicAction = Box<dyn FnMut(CancellationToken) -> BoxFuture<'static, ()> + Send>;

/// Boxes an async closure into an [`Action`].
pub fn action<F, Fut>(f: F) -> Action
where
  F: FnOnce(CancellationToken) -> Fut + Send + 'static,
  Fut: Future<Output = ()> + Send + 'static,
{
  Box::new(move |token| Box::pin(f(token)) as BoxFuture<'static, ()>)
}

/// Boxes an async closure into a [`PeriodicAction`].
pub fn periodic<F, Fut>(mut f: F) -> PeriodicAction
where
  F: FnMut(CancellationToken) -> Fut + Send + 'static,
  Fut: Future<Output = ()> + Send + 'static,
{
  Box::new(move |token| Box::pin(f(token)) as BoxFuture<'static, ()>)
}

#[async_trait]
pub trait AsyncScheduler: Send + Sync {
  /// Current time on this scheduler's clock, measured from its epoch.
  fn now(&self) -> Duration;

  async fn schedule(&self, action: Action) -> DynDisposable;

  /// Runs `action` once `due` has elapsed. Returns before the action runs, so
  /// the caller may cancel it and may call this while holding its own gate.
  async fn schedule_after(&self, due: Duration, action: Action) -> DynDisposable;

  async fn schedule_periodic(&self, period: Duration, action: PeriodicAction) -> DynDisposable;

  /// Suspends until `due` has elapsed on this scheduler's clock or `token` is
  /// cancelled, whichever comes first. Cancellation surfaces as
  /// [`RxError::Cancelled`].
  async fn delay(&self, due: Duration, token: CancellationToken) -> Result<(), RxError>;
}

pub type SchedulerRef = Arc<dyn AsyncScheduler>;

static IMMEDIATE: Lazy<SchedulerRef> = Lazy::new(|| Arc::new(ImmediateScheduler));
static CURRENT_THREAD: Lazy<SchedulerRef> = Lazy::new(|| Arc::new(CurrentThreadScheduler::new()));
static TASK_POOL: Lazy<SchedulerRef> = Lazy::new(|| Arc::new(TaskPoolScheduler));

/// Shared [`ImmediateScheduler`].
pub fn immediate() -> SchedulerRef { IMMEDIATE.clone() }

/// Shared [`CurrentThreadScheduler`].
pub fn current_thread() -> SchedulerRef { CURRENT_THREAD.clone() }

/// Shared [`TaskPoolScheduler`].
pub fn task_pool() -> SchedulerRef { TASK_POOL.clone() }

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Wall-clock time since the process-wide scheduler epoch.
pub(crate) fn wall_clock_now() -> Duration { EPOCH.elapsed() }

/// Sleeps on the tokio timer unless `token` fires first.
pub(crate) async fn sleep_or_cancel(due: Duration, token: &CancellationToken) -> Result<(), RxError> {
  tokio::select! {
    _ = token.cancelled() => Err(RxError::Cancelled),
    _ = tokio::time::sleep(due) => Ok(()),
  }
}
