//! WithLatestFrom: combine each source value with the latest value of a
//! second sequence.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
  disposable::{
    AsyncDisposable, CompositeDisposable, DynDisposable, IntoDynDisposable, SingleAssignmentDisposable,
    StableCompositeDisposable,
  },
  error::RxError,
  gate::AsyncGate,
  observable::{subscribe_safe, AsyncObservable, DynObservable},
  observer::{AsyncObserver, DynObserver, Subscriber},
};

type Selector<T, U, O> = Arc<dyn Fn(T, U) -> Result<O, RxError> + Send + Sync>;

/// Source values arriving before `other` produced anything are dropped.
/// Completion of `other` is ignored; errors from either side terminate.
pub fn with_latest_from<T, U, O, F>(
  source: DynObservable<T>, other: DynObservable<U>, selector: F,
) -> DynObservable<O>
where
  T: Send + 'static,
  U: Clone + Send + 'static,
  O: Send + 'static,
  F: Fn(T, U) -> Result<O, RxError> + Send + Sync + 'static,
{
  Arc::new(WithLatestFromObservable { source, other, selector: Arc::new(selector) })
}

struct WithLatestFromObservable<T, U, O> {
  source: DynObservable<T>,
  other: DynObservable<U>,
  selector: Selector<T, U, O>,
}

struct LatestState<U> {
  latest: Option<U>,
  done: bool,
}

struct WithLatestFromSink<T, U, O> {
  downstream: Arc<Subscriber<O>>,
  selector: Selector<T, U, O>,
  resources: CompositeDisposable,
  other_subscription: SingleAssignmentDisposable,
  gate: AsyncGate<LatestState<U>>,
}

#[async_trait]
impl<T, U, O> AsyncObservable<O> for WithLatestFromObservable<T, U, O>
where
  T: Send + 'static,
  U: Clone + Send + 'static,
  O: Send + 'static,
{
  async fn subscribe(&self, observer: DynObserver<O>) -> Result<DynDisposable, RxError> {
    let downstream = Subscriber::new(observer);
    let resources = CompositeDisposable::new();
    let handle = StableCompositeDisposable::pair(downstream.clone(), resources.clone().into_dyn());
    let sink = Arc::new(WithLatestFromSink {
      downstream,
      selector: self.selector.clone(),
      resources,
      other_subscription: SingleAssignmentDisposable::new(),
      gate: AsyncGate::new(LatestState { latest: None, done: false }),
    });
    sink.resources.add(Arc::new(sink.other_subscription.clone())).await;

    // `other` first, so a value it produces on subscription is already seen
    let other: DynObserver<U> = Arc::new(OtherObserver(sink.clone()));
    let subscription = subscribe_safe(&self.other, other).await;
    if sink.other_subscription.assign(subscription).await.is_err() {
      log::warn!("companion subscription was assigned twice");
    }

    let source: DynObserver<T> = Arc::new(SourceObserver(sink.clone()));
    let subscription = subscribe_safe(&self.source, source).await;
    sink.resources.add(subscription).await;
    Ok(handle)
  }
}

impl<T: Send + 'static, U: Clone + Send + 'static, O: Send + 'static> WithLatestFromSink<T, U, O> {
  async fn terminate(&self, error: Option<RxError>) {
    let mut state = self.gate.acquire().await;
    if std::mem::replace(&mut state.done, true) {
      return;
    }
    match error {
      Some(error) => self.downstream.on_error(error).await,
      None => self.downstream.on_completed().await,
    }
    self.resources.dispose().await;
  }
}

struct SourceObserver<T, U, O>(Arc<WithLatestFromSink<T, U, O>>);

#[async_trait]
impl<T, U, O> AsyncObserver<T> for SourceObserver<T, U, O>
where
  T: Send + 'static,
  U: Clone + Send + 'static,
  O: Send + 'static,
{
  async fn on_next(&self, value: T) {
    let sink = &self.0;
    let state = sink.gate.acquire().await;
    if state.done {
      return;
    }
    let Some(latest) = state.latest.clone() else {
      return;
    };
    match (sink.selector)(value, latest) {
      Ok(out) => sink.downstream.on_next(out).await,
      Err(error) => {
        drop(state);
        sink.terminate(Some(error)).await;
      }
    }
  }

  async fn on_error(&self, error: RxError) { self.0.terminate(Some(error)).await }

  async fn on_completed(&self) { self.0.terminate(None).await }
}

struct OtherObserver<T, U, O>(Arc<WithLatestFromSink<T, U, O>>);

#[async_trait]
impl<T: Send + 'static, U: Clone + Send + 'static, O: Send + 'static> AsyncObserver<U> for OtherObserver<T, U, O> {
  async fn on_next(&self, value: U) {
    let mut state = self.0.gate.acquire().await;
    state.latest = Some(value);
  }

  async fn on_error(&self, error: RxError) { self.0.terminate(Some(error)).await }

  async fn on_completed(&self) { self.0.other_subscription.dispose().await }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{observable, observer::Notification::*, scheduler, subject::SequentialSubject, test_util::Recorder};

  #[tokio::test]
  async fn pairs_with_latest_other_value() {
    let source = SequentialSubject::new();
    let other = SequentialSubject::new();
    let recorder = Recorder::new();
    with_latest_from(source.as_observable(), other.as_observable(), |s: i32, o: &str| {
      Ok(format!("{s}{o}"))
    })
    .subscribe(recorder.observer())
    .await
    .unwrap();
    source.on_next(1).await;
    other.on_next("a").await;
    source.on_next(2).await;
    other.on_next("b").await;
    other.on_completed().await;
    source.on_next(3).await;
    source.on_completed().await;
    assert_eq!(
      recorder.take(),
      vec![Next("2a".to_string()), Next("3b".to_string()), Completed]
    );
  }

  #[tokio::test]
  async fn other_emitting_on_subscribe_is_seen_first() {
    let recorder = Recorder::new();
    with_latest_from(
      observable::from_iter(vec![1, 2], scheduler::immediate()),
      observable::return_value(10, scheduler::immediate()),
      |a, b| Ok(a + b),
    )
    .subscribe(recorder.observer())
    .await
    .unwrap();
    assert_eq!(recorder.take(), vec![Next(11), Next(12), Completed]);
  }

  #[tokio::test]
  async fn other_error_terminates() {
    let source = SequentialSubject::<i32>::new();
    let other = SequentialSubject::<i32>::new();
    let recorder = Recorder::<i32>::new();
    with_latest_from(source.as_observable(), other.as_observable(), |a, b| Ok(a * b))
      .subscribe(recorder.observer())
      .await
      .unwrap();
    other.on_error(RxError::msg("other")).await;
    assert_eq!(recorder.take(), vec![Error(RxError::msg("other"))]);
    assert_eq!(source.observer_count(), 0);
  }
}
