//! SelectMany: project every element to an inner observable and merge all
//! of them into one sequence.
//!
//! The result completes when the source and every inner sequence have
//! completed. Calls into the downstream observer are serialised by one gate,
//! however many inners emit concurrently.

use std::{marker::PhantomData, sync::Arc};

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

type Selector<T, U> = Arc<dyn Fn(T) -> Result<DynObservable<U>, RxError> + Send + Sync>;

pub fn select_many<T, U, F>(source: DynObservable<T>, selector: F) -> DynObservable<U>
where
  T: Send + 'static,
  U: Send + 'static,
  F: Fn(T) -> Result<DynObservable<U>, RxError> + Send + Sync + 'static,
{
  Arc::new(SelectManyObservable { source, selector: Arc::new(selector) })
}

/// Flattens an observable of observables, mirroring every inner concurrently.
pub fn merge<T: Send + 'static>(source: DynObservable<DynObservable<T>>) -> DynObservable<T> {
  select_many(source, Ok)
}

struct SelectManyObservable<T, U> {
  source: DynObservable<T>,
  selector: Selector<T, U>,
}

struct MergeState {
  /// The source plus every inner sequence still running.
  active: usize,
  done: bool,
}

struct SelectManySink<T, U> {
  downstream: Arc<Subscriber<U>>,
  selector: Selector<T, U>,
  resources: CompositeDisposable,
  gate: AsyncGate<MergeState>,
}

#[async_trait]
impl<T: Send + 'static, U: Send + 'static> AsyncObservable<U> for SelectManyObservable<T, U> {
  async fn subscribe(&self, observer: DynObserver<U>) -> Result<DynDisposable, RxError> {
    let downstream = Subscriber::new(observer);
    let resources = CompositeDisposable::new();
    let handle = StableCompositeDisposable::pair(downstream.clone(), resources.clone().into_dyn());
    let sink = Arc::new(SelectManySink {
      downstream,
      selector: self.selector.clone(),
      resources,
      gate: AsyncGate::new(MergeState { active: 1, done: false }),
    });
    let observer: DynObserver<T> = Arc::new(SourceObserver(sink.clone()));
    let subscription = subscribe_safe(&self.source, observer).await;
    sink.resources.add(subscription).await;
    Ok(handle)
  }
}

impl<T: Send + 'static, U: Send + 'static> SelectManySink<T, U> {
  async fn fail(&self, error: RxError) {
    let mut state = self.gate.acquire().await;
    if std::mem::replace(&mut state.done, true) {
      return;
    }
    self.downstream.on_error(error).await;
    self.resources.dispose().await;
  }

  /// One sequence finished; completes downstream if it was the last.
  async fn release(&self) {
    let mut state = self.gate.acquire().await;
    if state.done {
      return;
    }
    state.active -= 1;
    if state.active == 0 {
      state.done = true;
      self.downstream.on_completed().await;
      self.resources.dispose().await;
    }
  }
}

struct SourceObserver<T, U>(Arc<SelectManySink<T, U>>);

#[async_trait]
impl<T: Send + 'static, U: Send + 'static> AsyncObserver<T> for SourceObserver<T, U> {
  async fn on_next(&self, value: T) {
    let sink = &self.0;
    let inner = match (sink.selector)(value) {
      Ok(inner) => inner,
      Err(error) => return sink.fail(error).await,
    };
    {
      let mut state = sink.gate.acquire().await;
      if state.done {
        return;
      }
      state.active += 1;
    }
    let subscription = SingleAssignmentDisposable::new();
    let handle: DynDisposable = Arc::new(subscription.clone());
    sink.resources.add(handle.clone()).await;
    let observer: DynObserver<U> = Arc::new(InnerObserver { sink: sink.clone(), handle, _item: PhantomData });
    let inner = subscribe_safe(&inner, observer).await;
    if subscription.assign(inner).await.is_err() {
      log::warn!("inner subscription was assigned twice");
    }
  }

  async fn on_error(&self, error: RxError) { self.0.fail(error).await }

  async fn on_completed(&self) { self.0.release().await }
}

struct InnerObserver<T, U> {
  sink: Arc<SelectManySink<T, U>>,
  handle: DynDisposable,
  _item: PhantomData<fn(T)>,
}

#[async_trait]
impl<T: Send + 'static, U: Send + 'static> AsyncObserver<U> for InnerObserver<T, U> {
  async fn on_next(&self, value: U) {
    let state = self.sink.gate.acquire().await;
    if !state.done {
      self.sink.downstream.on_next(value).await;
    }
  }

  async fn on_error(&self, error: RxError) { self.sink.fail(error).await }

  async fn on_completed(&self) {
    self.sink.resources.remove(&self.handle).await;
    self.sink.release().await;
  }
}

#[cfg(test)]
mod test {
  use std::time::Duration;

  use super::*;
  use crate::{
    observable::{self, FlattenExt},
    observer::Notification::*,
    scheduler::{self, VirtualTimeScheduler},
    subject::SequentialSubject,
    test_util::Recorder,
  };

  #[tokio::test]
  async fn completes_after_source_and_all_inners() {
    let source = SequentialSubject::new();
    let inners: Vec<SequentialSubject<String>> = (0..2).map(|_| SequentialSubject::new()).collect();
    let lookup = inners.clone();
    let recorder = Recorder::new();
    select_many(source.as_observable(), move |i: usize| Ok(lookup[i].as_observable()))
      .subscribe(recorder.observer())
      .await
      .unwrap();
    source.on_next(0).await;
    source.on_next(1).await;
    inners[1].on_next("b".to_string()).await;
    inners[0].on_next("a".to_string()).await;
    source.on_completed().await;
    inners[0].on_completed().await;
    assert!(!recorder.is_terminated());
    inners[1].on_completed().await;
    assert_eq!(
      recorder.take(),
      vec![Next("b".to_string()), Next("a".to_string()), Completed]
    );
  }

  #[tokio::test]
  async fn synchronous_inners_complete_the_merge() {
    let recorder = Recorder::new();
    select_many(observable::from_iter(vec![1, 2], scheduler::immediate()), |v| {
      Ok(observable::from_iter(vec![v * 10, v * 10 + 1], scheduler::immediate()))
    })
    .subscribe(recorder.observer())
    .await
    .unwrap();
    assert_eq!(recorder.take(), vec![Next(10), Next(11), Next(20), Next(21), Completed]);
  }

  #[tokio::test]
  async fn selector_error_terminates_and_unsubscribes() {
    let source = SequentialSubject::new();
    let inner = SequentialSubject::<i32>::new();
    let selected = inner.clone();
    let recorder = Recorder::new();
    select_many(source.as_observable(), move |v: i32| {
      if v < 0 {
        Err(RxError::msg("negative"))
      } else {
        Ok(selected.as_observable())
      }
    })
    .subscribe(recorder.observer())
    .await
    .unwrap();
    source.on_next(1).await;
    assert_eq!(inner.observer_count(), 1);
    source.on_next(-1).await;
    assert_eq!(recorder.take(), vec![Error(RxError::msg("negative"))]);
    assert_eq!(inner.observer_count(), 0);
    assert_eq!(source.observer_count(), 0);
  }

  #[tokio::test]
  async fn merge_interleaves_timers() {
    let vt = VirtualTimeScheduler::new();
    let outer = SequentialSubject::<DynObservable<u64>>::new();
    let recorder = Recorder::new();
    outer.clone().merge().subscribe(recorder.observer()).await.unwrap();
    let at = |ms| observable::timer(Duration::from_millis(ms), Arc::new(vt.clone()));
    outer.on_next(at(30)).await;
    outer.on_next(at(10)).await;
    outer.on_completed().await;
    vt.advance_to(Duration::from_millis(10)).await.unwrap();
    assert_eq!(recorder.len(), 1);
    vt.advance_to(Duration::from_millis(30)).await.unwrap();
    assert_eq!(recorder.take(), vec![Next(0), Next(0), Completed]);
  }
}
