use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{sleep_or_cancel, wall_clock_now, Action, AsyncScheduler, Duration, PeriodicAction};
use crate::{
  disposable::{CancellationDisposable, DynDisposable, IntoDynDisposable},
  error::RxError,
};

/// Runs every action on its own tokio task.
///
/// Must be used from within a tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct TaskPoolScheduler;

#[async_trait]
impl AsyncScheduler for TaskPoolScheduler {
  fn now(&self) -> Duration { wall_clock_now() }

  async fn schedule(&self, action: Action) -> DynDisposable {
    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async move {
      if !t.is_cancelled() {
        action(t).await;
      }
    });
    CancellationDisposable::from_token(token).into_dyn()
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

/// Drives `action` every `period` on a tokio task until the returned
/// disposable is disposed. A run already in progress is never interrupted.
pub(crate) fn spawn_periodic(period: Duration, mut action: PeriodicAction) -> DynDisposable {
  let token = CancellationToken::new();
  let t = token.clone();
  tokio::spawn(async move {
    let start = tokio::time::Instant::now() + period;
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      tokio::select! {
        _ = t.cancelled() => break,
        _ = ticker.tick() => {}
      }
      action(t.clone()).await;
    }
    log::trace!("periodic task stopped");
  });
  CancellationDisposable::from_token(token).into_dyn()
}

#[cfg(test)]
mod test {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use super::*;
  use crate::scheduler::{action, periodic};

  #[tokio::test(start_paused = true)]
  async fn dispose_before_due_prevents_run() {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let d = TaskPoolScheduler
      .schedule_after(
        Duration::from_millis(50),
        action(move |_| async move {
          h.fetch_add(1, Ordering::SeqCst);
        }),
      )
      .await;
    d.dispose().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn periodic_stops_after_dispose() {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let d = TaskPoolScheduler
      .schedule_periodic(
        Duration::from_millis(10),
        periodic(move |_| {
          let h = h.clone();
          async move {
            h.fetch_add(1, Ordering::SeqCst);
          }
        }),
      )
      .await;
    tokio::time::sleep(Duration::from_millis(35)).await;
    d.dispose().await;
    let seen = hits.load(Ordering::SeqCst);
    assert_eq!(seen, 3);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits.load(Ordering::SeqCst), seen);
  }

  #[tokio::test]
  async fn schedule_runs_on_another_task() {
    let (tx, rx) = futures::channel::oneshot::channel();
    TaskPoolScheduler
      .schedule(action(move |_| async move {
        let _ = tx.send(7);
      }))
      .await;
    assert_eq!(rx.await.unwrap(), 7);
  }
}
