use std::sync::Arc;

use async_trait::async_trait;

use super::{AsyncObservable, DynObservable};
use crate::{disposable::DynDisposable, error::RxError, observer::DynObserver};

type Factory<T> = Box<dyn Fn() -> Result<DynObservable<T>, RxError> + Send + Sync>;

struct Defer<T> {
  factory: Factory<T>,
}

#[async_trait]
impl<T: Send + 'static> AsyncObservable<T> for Defer<T> {
  async fn subscribe(&self, observer: DynObserver<T>) -> Result<DynDisposable, RxError> {
    let source = (self.factory)()?;
    source.subscribe(observer).await
  }
}

/// Creates the actual observable lazily, once per subscription.
///
/// A factory error fails the subscription; [`subscribe_safe`] turns that into
/// an `on_error`.
///
/// [`subscribe_safe`]: super::subscribe_safe
pub fn defer<T, F>(factory: F) -> DynObservable<T>
where
  T: Send + 'static,
  F: Fn() -> Result<DynObservable<T>, RxError> + Send + Sync + 'static,
{
  Arc::new(Defer { factory: Box::new(factory) })
}

#[cfg(test)]
mod test {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;
  use crate::{
    observable::{from_iter, subscribe_safe},
    observer::Notification,
    scheduler,
    test_util::Recorder,
  };

  #[tokio::test]
  async fn factory_runs_per_subscription() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let source = defer(move || {
      let n = c.fetch_add(1, Ordering::SeqCst);
      Ok(from_iter(vec![n], scheduler::immediate()))
    });
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let recorder = Recorder::new();
    source.subscribe(recorder.observer()).await.unwrap();
    source.subscribe(recorder.observer()).await.unwrap();
    assert_eq!(recorder.values(), vec![0, 1]);
  }

  #[tokio::test]
  async fn factory_error_surfaces_through_safe_subscribe() {
    let source = defer(|| Err::<DynObservable<i32>, _>(RxError::msg("no source")));
    let recorder = Recorder::new();
    subscribe_safe(&source, recorder.observer()).await;
    assert_eq!(recorder.take(), vec![Notification::Error(RxError::msg("no source"))]);
  }
}
