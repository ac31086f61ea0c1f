//! Switch: mirror only the most recent inner observable.
//!
//! Every inner observable gets an id. Notifications from an inner that is no
//! longer the latest are discarded, and subscribing to a new inner disposes
//! the previous inner subscription. The result completes once the outer
//! sequence and the latest inner have both completed.

use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;

use crate::{
  disposable::{
    AsyncDisposable, CompositeDisposable, DynDisposable, IntoDynDisposable, SerialDisposable,
    SingleAssignmentDisposable, StableCompositeDisposable,
  },
  error::RxError,
  gate::AsyncGate,
  observable::{subscribe_safe, AsyncObservable, DynObservable},
  observer::{AsyncObserver, DynObserver, Subscriber},
};

pub fn switch<T: Send + 'static>(source: DynObservable<DynObservable<T>>) -> DynObservable<T> {
  Arc::new(SwitchObservable { source })
}

struct SwitchObservable<T> {
  source: DynObservable<DynObservable<T>>,
}

#[derive(Default)]
struct SwitchState {
  latest: u64,
  has_latest: bool,
  outer_done: bool,
  done: bool,
}

struct SwitchSink<T> {
  downstream: Arc<Subscriber<T>>,
  gate: AsyncGate<SwitchState>,
  inner: SerialDisposable,
  resources: CompositeDisposable,
}

#[async_trait]
impl<T: Send + 'static> AsyncObservable<T> for SwitchObservable<T> {
  async fn subscribe(&self, observer: DynObserver<T>) -> Result<DynDisposable, RxError> {
    let downstream = Subscriber::new(observer);
    let resources = CompositeDisposable::new();
    let handle = StableCompositeDisposable::pair(downstream.clone(), resources.clone().into_dyn());
    let sink = Arc::new(SwitchSink {
      downstream,
      gate: AsyncGate::default(),
      inner: SerialDisposable::new(),
      resources,
    });
    sink.resources.add(Arc::new(sink.inner.clone())).await;
    let outer: DynObserver<DynObservable<T>> = Arc::new(OuterObserver(sink.clone()));
    let subscription = subscribe_safe(&self.source, outer).await;
    sink.resources.add(subscription).await;
    Ok(handle)
  }
}

impl<T: Send + 'static> SwitchSink<T> {
  async fn fail(&self, error: RxError) {
    let mut state = self.gate.acquire().await;
    if std::mem::replace(&mut state.done, true) {
      return;
    }
    self.downstream.on_error(error).await;
    self.resources.dispose().await;
  }

  /// Completes if `state` says nothing is left to mirror. Gate must be held.
  async fn complete_if_idle(&self, state: &mut SwitchState) {
    if state.outer_done && !state.has_latest && !state.done {
      state.done = true;
      self.downstream.on_completed().await;
      self.resources.dispose().await;
    }
  }
}

struct OuterObserver<T>(Arc<SwitchSink<T>>);

#[async_trait]
impl<T: Send + 'static> AsyncObserver<DynObservable<T>> for OuterObserver<T> {
  async fn on_next(&self, inner: DynObservable<T>) {
    let sink = &self.0;
    let id = {
      let mut state = sink.gate.acquire().await;
      if state.done {
        return;
      }
      state.latest += 1;
      state.has_latest = true;
      state.latest
    };
    log::trace!("switching to inner #{id}");
    let subscription = SingleAssignmentDisposable::new();
    sink.inner.assign(Arc::new(subscription.clone())).await;
    let observer: DynObserver<T> = Arc::new(InnerObserver { sink: sink.clone(), id, _item: PhantomData });
    let inner = subscribe_safe(&inner, observer).await;
    if subscription.assign(inner).await.is_err() {
      log::warn!("inner subscription was assigned twice");
    }
  }

  async fn on_error(&self, error: RxError) { self.0.fail(error).await }

  async fn on_completed(&self) {
    let mut state = self.0.gate.acquire().await;
    state.outer_done = true;
    self.0.complete_if_idle(&mut state).await;
  }
}

struct InnerObserver<T> {
  sink: Arc<SwitchSink<T>>,
  id: u64,
  _item: PhantomData<fn(T)>,
}

#[async_trait]
impl<T: Send + 'static> AsyncObserver<T> for InnerObserver<T> {
  async fn on_next(&self, value: T) {
    let state = self.sink.gate.acquire().await;
    if state.latest == self.id && !state.done {
      self.sink.downstream.on_next(value).await;
    }
  }

  async fn on_error(&self, error: RxError) {
    let is_latest = self.sink.gate.acquire().await.latest == self.id;
    if is_latest {
      self.sink.fail(error).await;
    }
  }

  async fn on_completed(&self) {
    let mut state = self.sink.gate.acquire().await;
    if state.latest == self.id {
      state.has_latest = false;
      self.sink.complete_if_idle(&mut state).await;
    }
  }
}
