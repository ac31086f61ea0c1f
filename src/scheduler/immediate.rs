use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{
  sleep_or_cancel, task_pool::spawn_periodic, wall_clock_now, Action, AsyncScheduler, Duration,
  PeriodicAction,
};
use crate::{
  disposable::{self, CancellationDisposable, DynDisposable, IntoDynDisposable},
  error::RxError,
};

/// Runs work inline, in the caller's flow.
///
/// `schedule` completes only after the action finished, so the returned
/// disposable has nothing left to cancel. Delayed and periodic work cannot run
/// inline without blocking its caller until it is due; it waits on a tokio
/// timer task instead and runs there, so it can still be cancelled.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateScheduler;

#[async_trait]
impl AsyncScheduler for ImmediateScheduler {
  fn now(&self) -> Duration { wall_clock_now() }

  async fn schedule(&self, action: Action) -> DynDisposable {
    action(CancellationToken::new()).await;
    disposable::empty()
  }

  async fn schedule_after(&self, due: Duration, action: Action) -> DynDisposable {
    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async move {
      if sleep_or_cancel(due, &t).await.is_ok() {
        action(t).await;
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
