use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::{AsyncObservable, DynObservable};
use crate::{
  disposable::{DynDisposable, StableCompositeDisposable},
  error::RxError,
  observer::{DynObserver, Subscriber},
};

type SubscribeFn<T> =
  Box<dyn Fn(DynObserver<T>) -> BoxFuture<'static, Result<DynDisposable, RxError>> + Send + Sync>;

/// Observable backed by an async subscribe closure.
///
/// The closure receives a [`Subscriber`] rather than the raw downstream
/// observer, so calls made after a terminal notification or after the
/// subscription was disposed never reach downstream.
pub struct AnonymousObservable<T> {
  subscribe: SubscribeFn<T>,
}

impl<T: Send + 'static> AnonymousObservable<T> {
  pub fn new<F, Fut>(f: F) -> Self
  where
    F: Fn(DynObserver<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<DynDisposable, RxError>> + Send + 'static,
  {
    AnonymousObservable {
      subscribe: Box::new(move |observer| Box::pin(f(observer)) as BoxFuture<'static, _>),
    }
  }
}

#[async_trait]
impl<T: Send + 'static> AsyncObservable<T> for AnonymousObservable<T> {
  async fn subscribe(&self, observer: DynObserver<T>) -> Result<DynDisposable, RxError> {
    let subscriber = Subscriber::new(observer);
    let inner = (self.subscribe)(subscriber.clone()).await?;
    Ok(StableCompositeDisposable::pair(subscriber, inner))
  }
}

/// Creates an observable from an async subscribe function.
///
/// `f` runs once per subscription and returns the disposable releasing
/// whatever it started. Returning `Err` fails the subscription.
pub fn create<T, F, Fut>(f: F) -> DynObservable<T>
where
  T: Send + 'static,
  F: Fn(DynObserver<T>) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<DynDisposable, RxError>> + Send + 'static,
{
  std::sync::Arc::new(AnonymousObservable::new(f))
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{
    disposable::{self, AsyncDisposable},
    observer::{AsyncObserver, Notification},
    test_util::{CountingDisposable, Recorder},
  };

  #[tokio::test]
  async fn emits_through_closure() {
    let source = create(|observer: DynObserver<i32>| async move {
      observer.on_next(1).await;
      observer.on_next(2).await;
      observer.on_completed().await;
      observer.on_next(3).await;
      Ok(disposable::empty())
    });
    let recorder = Recorder::new();
    source.subscribe(recorder.observer()).await.unwrap();
    assert_eq!(
      recorder.take(),
      vec![Notification::Next(1), Notification::Next(2), Notification::Completed]
    );
  }

  #[tokio::test]
  async fn dispose_detaches_and_releases() {
    let teardown = CountingDisposable::new();
    let slot = crate::rc::MutArc::own(None::<DynObserver<i32>>);
    let (t, s) = (teardown.clone(), slot.clone());
    let source = create(move |observer: DynObserver<i32>| {
      *s.rc_deref_mut() = Some(observer);
      let t = t.clone();
      async move { Ok(std::sync::Arc::new(t) as DynDisposable) }
    });
    let recorder = Recorder::new();
    let subscription = source.subscribe(recorder.observer()).await.unwrap();
    let observer = slot.rc_deref_mut().clone().unwrap();
    observer.on_next(1).await;
    subscription.dispose().await;
    subscription.dispose().await;
    observer.on_next(2).await;
    observer.on_completed().await;
    assert_eq!(teardown.count(), 1);
    assert_eq!(recorder.take(), vec![Notification::Next(1)]);
  }
}
