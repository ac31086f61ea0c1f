//! Join: pair up elements of two sequences whose lifetimes overlap.
//!
//! Every element lives from its arrival until its duration sequence produces
//! an element or completes. An arriving element is paired with every live
//! element of the other side that arrived before it, so each overlapping
//! pair is emitted exactly once.

use std::{
  collections::BTreeMap,
  marker::PhantomData,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

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

type DurationSelector<V, D> = Arc<dyn Fn(&V) -> Result<DynObservable<D>, RxError> + Send + Sync>;
type ResultSelector<L, R, O> = Arc<dyn Fn(&L, &R) -> Result<O, RxError> + Send + Sync>;

pub fn join<L, R, LD, RD, O, LF, RF, SF>(
  left: DynObservable<L>, right: DynObservable<R>, left_duration: LF, right_duration: RF, result_selector: SF,
) -> DynObservable<O>
where
  L: Clone + Send + 'static,
  R: Clone + Send + 'static,
  LD: Send + 'static,
  RD: Send + 'static,
  O: Send + 'static,
  LF: Fn(&L) -> Result<DynObservable<LD>, RxError> + Send + Sync + 'static,
  RF: Fn(&R) -> Result<DynObservable<RD>, RxError> + Send + Sync + 'static,
  SF: Fn(&L, &R) -> Result<O, RxError> + Send + Sync + 'static,
{
  Arc::new(JoinObservable {
    left,
    right,
    left_duration: Arc::new(left_duration),
    right_duration: Arc::new(right_duration),
    result_selector: Arc::new(result_selector),
  })
}

struct JoinObservable<L, R, LD, RD, O> {
  left: DynObservable<L>,
  right: DynObservable<R>,
  left_duration: DurationSelector<L, LD>,
  right_duration: DurationSelector<R, RD>,
  result_selector: ResultSelector<L, R, O>,
}

/// The live elements of one side, keyed by arrival order.
struct Side<V> {
  live: BTreeMap<u64, V>,
  next_id: u64,
  done: bool,
}

impl<V> Default for Side<V> {
  fn default() -> Self { Side { live: BTreeMap::new(), next_id: 0, done: false } }
}

struct JoinState<L, R> {
  left: Side<L>,
  right: Side<R>,
  done: bool,
}

struct JoinSink<L, R, LD, RD, O> {
  downstream: Arc<Subscriber<O>>,
  resources: CompositeDisposable,
  left_duration: DurationSelector<L, LD>,
  right_duration: DurationSelector<R, RD>,
  result_selector: ResultSelector<L, R, O>,
  gate: AsyncGate<JoinState<L, R>>,
}

#[async_trait]
impl<L, R, LD, RD, O> AsyncObservable<O> for JoinObservable<L, R, LD, RD, O>
where
  L: Clone + Send + 'static,
  R: Clone + Send + 'static,
  LD: Send + 'static,
  RD: Send + 'static,
  O: Send + 'static,
{
  async fn subscribe(&self, observer: DynObserver<O>) -> Result<DynDisposable, RxError> {
    let downstream = Subscriber::new(observer);
    let resources = CompositeDisposable::new();
    let handle = StableCompositeDisposable::pair(downstream.clone(), resources.clone().into_dyn());
    let sink = Arc::new(JoinSink {
      downstream,
      resources,
      left_duration: self.left_duration.clone(),
      right_duration: self.right_duration.clone(),
      result_selector: self.result_selector.clone(),
      gate: AsyncGate::new(JoinState { left: Side::default(), right: Side::default(), done: false }),
    });
    let left: DynObserver<L> = Arc::new(LeftObserver(sink.clone()));
    let subscription = subscribe_safe(&self.left, left).await;
    sink.resources.add(subscription).await;
    let right: DynObserver<R> = Arc::new(RightObserver(sink.clone()));
    let subscription = subscribe_safe(&self.right, right).await;
    sink.resources.add(subscription).await;
    Ok(handle)
  }
}

impl<L, R, LD, RD, O> JoinSink<L, R, LD, RD, O>
where
  L: Clone + Send + 'static,
  R: Clone + Send + 'static,
  LD: Send + 'static,
  RD: Send + 'static,
  O: Send + 'static,
{
  async fn fail(&self, error: RxError) {
    let mut state = self.gate.acquire().await;
    if std::mem::replace(&mut state.done, true) {
      return;
    }
    self.downstream.on_error(error).await;
    self.resources.dispose().await;
  }

  /// Completes downstream. Gate must be held.
  async fn complete(&self, state: &mut JoinState<L, R>) {
    if !std::mem::replace(&mut state.done, true) {
      self.downstream.on_completed().await;
      self.resources.dispose().await;
    }
  }

  /// Subscribes to the duration of one element. Expiry is handled by `expire`.
  async fn watch<D: Send + 'static>(self: Arc<Self>, duration: DynObservable<D>, side: Which, id: u64) {
    let subscription = SingleAssignmentDisposable::new();
    let handle: DynDisposable = Arc::new(subscription.clone());
    self.resources.add(handle.clone()).await;
    let observer: DynObserver<D> = Arc::new(DurationObserver {
      sink: self.clone(),
      side,
      id,
      handle,
      fired: AtomicBool::new(false),
      _duration: PhantomData,
    });
    let inner = subscribe_safe(&duration, observer).await;
    if subscription.assign(inner).await.is_err() {
      log::warn!("duration subscription was assigned twice");
    }
  }

  async fn expire(&self, side: Which, id: u64) {
    let mut state = self.gate.acquire().await;
    if state.done {
      return;
    }
    let exhausted = match side {
      Which::Left => state.left.live.remove(&id).is_some() && state.left.live.is_empty() && state.left.done,
      Which::Right => state.right.live.remove(&id).is_some() && state.right.live.is_empty() && state.right.done,
    };
    if exhausted {
      self.complete(&mut state).await;
    }
  }
}

#[derive(Clone, Copy, Debug)]
enum Which {
  Left,
  Right,
}

struct LeftObserver<L, R, LD, RD, O>(Arc<JoinSink<L, R, LD, RD, O>>);

#[async_trait]
impl<L, R, LD, RD, O> AsyncObserver<L> for LeftObserver<L, R, LD, RD, O>
where
  L: Clone + Send + 'static,
  R: Clone + Send + 'static,
  LD: Send + 'static,
  RD: Send + 'static,
  O: Send + 'static,
{
  async fn on_next(&self, value: L) {
    let sink = &self.0;
    let (id, right_cursor) = {
      let mut state = sink.gate.acquire().await;
      if state.done {
        return;
      }
      let id = state.left.next_id;
      state.left.next_id += 1;
      state.left.live.insert(id, value.clone());
      (id, state.right.next_id)
    };

    let duration = match (sink.left_duration)(&value) {
      Ok(duration) => duration,
      Err(error) => return sink.fail(error).await,
    };
    sink.clone().watch(duration, Which::Left, id).await;

    let state = sink.gate.acquire().await;
    if state.done {
      return;
    }
    let pairs: Result<Vec<O>, RxError> = state
      .right
      .live
      .range(..right_cursor)
      .map(|(_, v)| (sink.result_selector)(&value, v))
      .collect();
    match pairs {
      Ok(pairs) => {
        for out in pairs {
          sink.downstream.on_next(out).await;
        }
      }
      Err(error) => {
        drop(state);
        sink.fail(error).await;
      }
    }
  }

  async fn on_error(&self, error: RxError) { self.0.fail(error).await }

  async fn on_completed(&self) {
    let mut state = self.0.gate.acquire().await;
    state.left.done = true;
    if state.right.done || state.left.live.is_empty() {
      self.0.complete(&mut state).await;
    }
  }
}

struct RightObserver<L, R, LD, RD, O>(Arc<JoinSink<L, R, LD, RD, O>>);

#[async_trait]
impl<L, R, LD, RD, O> AsyncObserver<R> for RightObserver<L, R, LD, RD, O>
where
  L: Clone + Send + 'static,
  R: Clone + Send + 'static,
  LD: Send + 'static,
  RD: Send + 'static,
  O: Send + 'static,
{
  async fn on_next(&self, value: R) {
    let sink = &self.0;
    let (id, left_cursor) = {
      let mut state = sink.gate.acquire().await;
      if state.done {
        return;
      }
      let id = state.right.next_id;
      state.right.next_id += 1;
      state.right.live.insert(id, value.clone());
      (id, state.left.next_id)
    };

    let duration = match (sink.right_duration)(&value) {
      Ok(duration) => duration,
      Err(error) => return sink.fail(error).await,
    };
    sink.clone().watch(duration, Which::Right, id).await;

    let state = sink.gate.acquire().await;
    if state.done {
      return;
    }
    let pairs: Result<Vec<O>, RxError> = state
      .left
      .live
      .range(..left_cursor)
      .map(|(_, v)| (sink.result_selector)(v, &value))
      .collect();
    match pairs {
      Ok(pairs) => {
        for out in pairs {
          sink.downstream.on_next(out).await;
        }
      }
      Err(error) => {
        drop(state);
        sink.fail(error).await;
      }
    }
  }

  async fn on_error(&self, error: RxError) { self.0.fail(error).await }

  async fn on_completed(&self) {
    let mut state = self.0.gate.acquire().await;
    state.right.done = true;
    if state.left.done || state.right.live.is_empty() {
      self.0.complete(&mut state).await;
    }
  }
}

struct DurationObserver<L, R, LD, RD, O, D> {
  sink: Arc<JoinSink<L, R, LD, RD, O>>,
  side: Which,
  id: u64,
  handle: DynDisposable,
  fired: AtomicBool,
  _duration: PhantomData<fn(D)>,
}

impl<L, R, LD, RD, O, D> DurationObserver<L, R, LD, RD, O, D>
where
  L: Clone + Send + 'static,
  R: Clone + Send + 'static,
  LD: Send + 'static,
  RD: Send + 'static,
  O: Send + 'static,
  D: Send + 'static,
{
  async fn fire(&self) {
    if self.fired.swap(true, Ordering::AcqRel) {
      return;
    }
    self.sink.expire(self.side, self.id).await;
    self.sink.resources.remove(&self.handle).await;
  }
}

#[async_trait]
impl<L, R, LD, RD, O, D> AsyncObserver<D> for DurationObserver<L, R, LD, RD, O, D>
where
  L: Clone + Send + 'static,
  R: Clone + Send + 'static,
  LD: Send + 'static,
  RD: Send + 'static,
  O: Send + 'static,
  D: Send + 'static,
{
  async fn on_next(&self, _: D) { self.fire().await }

  async fn on_error(&self, error: RxError) {
    if !self.fired.swap(true, Ordering::AcqRel) {
      log::debug!("{:?} duration #{} failed", self.side, self.id);
      self.sink.fail(error).await;
    }
  }

  async fn on_completed(&self) { self.fire().await }
}
