use std::{
  marker::PhantomData,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use async_trait::async_trait;

use super::{Partition, PartitionCore};
use crate::{
  disposable::{AsyncDisposable, DynDisposable, SerialDisposable, SingleAssignmentDisposable},
  error::RxError,
  gate::AsyncQueueLock,
  observable::{subscribe_safe, AsyncObservable, DynObservable},
  observer::{AsyncObserver, DynObserver},
};

type ClosingSelector<C> = Arc<dyn Fn() -> Result<DynObservable<C>, RxError> + Send + Sync>;

/// Back-to-back partitions, each closed by the first element or the
/// completion of a fresh sequence obtained from `selector`.
pub(crate) struct ClosingPartitioned<T, C, P> {
  source: DynObservable<T>,
  selector: ClosingSelector<C>,
  partition: P,
}

impl<T, C, P> ClosingPartitioned<T, C, P> {
  pub(crate) fn new<F>(source: DynObservable<T>, selector: F, partition: P) -> Self
  where
    F: Fn() -> Result<DynObservable<C>, RxError> + Send + Sync + 'static,
  {
    ClosingPartitioned { source, selector: Arc::new(selector), partition }
  }
}

struct ClosingState<A> {
  current: Option<A>,
  done: bool,
}

struct ClosingSink<T: Send + 'static, C, P: Partition<T>> {
  core: PartitionCore<T, P, ClosingState<P::Acc>>,
  selector: ClosingSelector<C>,
  /// Subscription to the closing sequence of the current epoch.
  closing: SerialDisposable,
  /// Runs the "subscribe to the next closing sequence" steps one at a time.
  epochs: AsyncQueueLock,
}

impl<T, C, P> ClosingSink<T, C, P>
where
  T: Clone + Send + 'static,
  C: Send + 'static,
  P: Partition<T>,
{
  async fn finish(&self, error: Option<RxError>) {
    let mut state = self.core.gate.acquire().await;
    if std::mem::replace(&mut state.done, true) {
      return;
    }
    let open = state.current.take().into_iter().collect();
    match error {
      Some(error) => self.core.fail(open, error).await,
      None => self.core.complete(open, false).await,
    }
  }

  /// Queues the subscription to the next closing sequence.
  async fn next_epoch(self: Arc<Self>) {
    let sink = self.clone();
    self.epochs.run(async move { sink.subscribe_closing().await }).await;
  }

  async fn subscribe_closing(self: Arc<Self>) {
    let closing = match (self.selector)() {
      Ok(closing) => closing,
      Err(error) => return self.finish(Some(error)).await,
    };
    let subscription = SingleAssignmentDisposable::new();
    self.closing.assign(Arc::new(subscription.clone())).await;
    let observer: DynObserver<C> = Arc::new(ClosingObserver {
      sink: self.clone(),
      subscription: subscription.clone(),
      fired: AtomicBool::new(false),
      _closing: PhantomData,
    });
    let inner = subscribe_safe(&closing, observer).await;
    if subscription.assign(inner).await.is_err() {
      log::warn!("closing subscription was assigned twice");
    }
  }

  async fn close_epoch(self: Arc<Self>) {
    {
      let mut state = self.core.gate.acquire().await;
      if state.done {
        return;
      }
      if let Some(acc) = state.current.take() {
        self.core.close(acc).await;
      }
      state.current = Some(self.core.open().await);
    }
    self.next_epoch().await;
  }
}

#[async_trait]
impl<T, C, P> AsyncObservable<P::Output> for ClosingPartitioned<T, C, P>
where
  T: Clone + Send + 'static,
  C: Send + 'static,
  P: Partition<T>,
{
  async fn subscribe(&self, observer: DynObserver<P::Output>) -> Result<DynDisposable, RxError> {
    let state = ClosingState { current: None, done: false };
    let (core, handle) = PartitionCore::new(self.partition.clone(), observer, state);
    let sink = Arc::new(ClosingSink {
      core,
      selector: self.selector.clone(),
      closing: SerialDisposable::new(),
      epochs: AsyncQueueLock::new(),
    });
    sink.core.resources.add(Arc::new(sink.closing.clone())).await;
    {
      let mut state = sink.core.gate.acquire().await;
      state.current = Some(sink.core.open().await);
    }

    let source: DynObserver<T> = Arc::new(SourceObserver(sink.clone()));
    let subscription = subscribe_safe(&self.source, source).await;
    sink.core.resources.add(subscription).await;

    sink.next_epoch().await;
    Ok(handle)
  }
}

struct SourceObserver<T: Send + 'static, C, P: Partition<T>>(Arc<ClosingSink<T, C, P>>);

#[async_trait]
impl<T, C, P> AsyncObserver<T> for SourceObserver<T, C, P>
where
  T: Clone + Send + 'static,
  C: Send + 'static,
  P: Partition<T>,
{
  async fn on_next(&self, value: T) {
    let mut state = self.0.core.gate.acquire().await;
    if state.done {
      return;
    }
    if let Some(acc) = state.current.as_mut() {
      self.0.core.partition.push(acc, value).await;
    }
  }

  async fn on_error(&self, error: RxError) { self.0.finish(Some(error)).await }

  async fn on_completed(&self) { self.0.finish(None).await }
}

/// One-shot observer of a single closing sequence.
struct ClosingObserver<T: Send + 'static, C, P: Partition<T>> {
  sink: Arc<ClosingSink<T, C, P>>,
  subscription: SingleAssignmentDisposable,
  fired: AtomicBool,
  _closing: PhantomData<fn(C)>,
}

impl<T, C, P> ClosingObserver<T, C, P>
where
  T: Clone + Send + 'static,
  C: Send + 'static,
  P: Partition<T>,
{
  async fn close(&self) {
    if self.fired.swap(true, Ordering::AcqRel) {
      return;
    }
    self.subscription.dispose().await;
    self.sink.clone().close_epoch().await;
  }
}

#[async_trait]
impl<T, C, P> AsyncObserver<C> for ClosingObserver<T, C, P>
where
  T: Clone + Send + 'static,
  C: Send + 'static,
  P: Partition<T>,
{
  async fn on_next(&self, _: C) { self.close().await }

  async fn on_error(&self, error: RxError) {
    if !self.fired.swap(true, Ordering::AcqRel) {
      self.sink.finish(Some(error)).await;
    }
  }

  async fn on_completed(&self) { self.close().await }
}
