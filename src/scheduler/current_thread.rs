use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{
  sleep_or_cancel, task_pool::spawn_periodic, wall_clock_now, Action, AsyncScheduler, Duration,
  PeriodicAction,
};
use crate::{
  disposable::{CancellationDisposable, DynDisposable, IntoDynDisposable},
  error::RxError,
  gate::AsyncQueueLock,
};

tokio::task_local! {
  static TRAMPOLINE: AsyncQueueLock;
}

/// Trampolining scheduler.
///
/// The first `schedule` call on a task drains a work queue in a loop; actions
/// scheduled while the queue is being drained, including from inside a running
/// action, are appended and run afterwards instead of recursing. Recursive
/// self-scheduling therefore runs in constant stack depth.
///
/// The queue belongs to the task that started draining it, so work scheduled
/// by one task never runs inside another task's flow. Delayed work waits on a
/// tokio timer task and is trampolined there.
#[derive(Clone, Copy, Debug, Default)]
pub struct CurrentThreadScheduler;

impl CurrentThreadScheduler {
  pub fn new() -> Self { Self }
}

async fn trampoline(token: CancellationToken, action: Action) {
  let job = async move {
    if !token.is_cancelled() {
      action(token).await;
    }
  };
  match TRAMPOLINE.try_with(AsyncQueueLock::clone) {
    // queued behind the action currently running on this task
    Ok(queue) => queue.run(job).await,
    Err(_) => {
      let queue = AsyncQueueLock::new();
      TRAMPOLINE.scope(queue.clone(), async move { queue.run(job).await }).await
    }
  }
}

#[async_trait]
impl AsyncScheduler for CurrentThreadScheduler {
  fn now(&self) -> Duration { wall_clock_now() }

  async fn schedule(&self, action: Action) -> DynDisposable {
    let token = CancellationToken::new();
    trampoline(token.clone(), action).await;
    CancellationDisposable::from_token(token).into_dyn()
  }

  async fn schedule_after(&self, due: Duration, action: Action) -> DynDisposable {
    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async move {
      if sleep_or_cancel(due, &t).await.is_ok() {
        trampoline(t, action).await;
      }
    });
    CancellationDisposable::from_token(token).into_dyn()
  }

  async fn schedule_periodic(&self, period: Duration, action: PeriodicAction) -> DynDisposable {
    spawn_periodic(period, action)
  }

  async fn delay(&self, due: Duration, token: CancellationToken) -> Result<(), RxError> {
    sleep_or_cancel(due, &token).await
  }
}
