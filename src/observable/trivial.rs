use super::{create, DynObservable};
use crate::{
  disposable,
  error::RxError,
  scheduler::{action, SchedulerRef},
};

/// Emits `value` on `scheduler`, then completes.
pub fn return_value<T>(value: T, scheduler: SchedulerRef) -> DynObservable<T>
where
  T: Clone + Send + Sync + 'static,
{
  create(move |observer| {
    let value = value.clone();
    let scheduler = scheduler.clone();
    async move {
      Ok(
        scheduler
          .schedule(action(move |token| async move {
            if token.is_cancelled() {
              return;
            }
            observer.on_next(value).await;
            observer.on_completed().await;
          }))
          .await,
      )
    }
  })
}

/// Completes as soon as it is subscribed.
pub fn empty<T: Send + 'static>() -> DynObservable<T> {
  create(|observer| async move {
    observer.on_completed().await;
    Ok(disposable::empty())
  })
}

/// Never emits and never terminates.
pub fn never<T: Send + 'static>() -> DynObservable<T> {
  create(|_observer| async { Ok(disposable::empty()) })
}

/// Fails with `error` as soon as it is subscribed.
pub fn throw<T: Send + 'static>(error: RxError) -> DynObservable<T> {
  create(move |observer| {
    let error = error.clone();
    async move {
      observer.on_error(error).await;
      Ok(disposable::empty())
    }
  })
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{
    disposable::AsyncDisposable,
    observable::AsyncObservable,
    observer::Notification,
    scheduler::{self, VirtualTimeScheduler},
    test_util::Recorder,
  };

  #[tokio::test]
  async fn return_value_waits_for_its_scheduler() {
    let vt = VirtualTimeScheduler::new();
    let recorder = Recorder::new();
    return_value(7, std::sync::Arc::new(vt.clone())).subscribe(recorder.observer()).await.unwrap();
    assert!(recorder.take().is_empty());
    vt.advance_by(scheduler::Duration::ZERO).await.unwrap();
    assert_eq!(recorder.take(), vec![Notification::Next(7), Notification::Completed]);
  }

  #[tokio::test]
  async fn disposed_before_run_emits_nothing() {
    let vt = VirtualTimeScheduler::new();
    let recorder = Recorder::new();
    let d = return_value(7, std::sync::Arc::new(vt.clone()))
      .subscribe(recorder.observer())
      .await
      .unwrap();
    d.dispose().await;
    vt.advance_by(scheduler::Duration::ZERO).await.unwrap();
    assert!(recorder.take().is_empty());
  }

  #[tokio::test]
  async fn trivial_sources() {
    let recorder = Recorder::<i32>::new();
    empty().subscribe(recorder.observer()).await.unwrap();
    assert_eq!(recorder.take(), vec![Notification::Completed]);

    never().subscribe(recorder.observer()).await.unwrap();
    assert!(recorder.take().is_empty());

    throw(RxError::msg("nope")).subscribe(recorder.observer()).await.unwrap();
    assert_eq!(recorder.take(), vec![Notification::Error(RxError::msg("nope"))]);
  }
}
