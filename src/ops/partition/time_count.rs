use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::{ensure, Partition, PartitionCore};
use crate::{
  disposable::{DynDisposable, SerialDisposable},
  error::RxError,
  observable::{subscribe_safe, AsyncObservable, DynObservable},
  observer::{AsyncObserver, DynObserver},
  scheduler::{action, SchedulerRef},
};

/// Back-to-back partitions closed by whichever comes first: `count` elements
/// or `span` of scheduler time since the partition opened.
pub(crate) struct TimeOrCountPartitioned<T, P> {
  source: DynObservable<T>,
  span: Duration,
  count: usize,
  scheduler: SchedulerRef,
  partition: P,
}

impl<T, P> TimeOrCountPartitioned<T, P> {
  pub(crate) fn new(
    source: DynObservable<T>, span: Duration, count: usize, scheduler: SchedulerRef, partition: P,
  ) -> Self {
    TimeOrCountPartitioned { source, span, count, scheduler, partition }
  }
}

struct TimeCountState<A> {
  current: Option<A>,
  n: usize,
  /// Identifies the open partition; a timer armed for an older one is stale.
  id: u64,
  done: bool,
}

struct TimeCountSink<T: Send + 'static, P: Partition<T>> {
  core: PartitionCore<T, P, TimeCountState<P::Acc>>,
  scheduler: SchedulerRef,
  span: Duration,
  count: usize,
  timer: SerialDisposable,
}

impl<T, P> TimeCountSink<T, P>
where
  T: Clone + Send + 'static,
  P: Partition<T>,
{
  /// Closes the open partition and opens the next one. Gate must be held.
  async fn rotate(&self, state: &mut TimeCountState<P::Acc>) -> u64 {
    state.n = 0;
    state.id += 1;
    if let Some(acc) = state.current.take() {
      self.core.close(acc).await;
    }
    state.current = Some(self.core.open().await);
    state.id
  }

  /// Starts the span timer of partition `id`. Gate must be held, so timers
  /// replace each other in the order their partitions opened.
  fn arm(self: Arc<Self>, id: u64) -> BoxFuture<'static, ()> {
    Box::pin(async move {
      let sink = self.clone();
      let timer = self
        .scheduler
        .schedule_after(self.span, action(move |_| sink.fire(id)))
        .await;
      self.timer.assign(timer).await;
    })
  }

  fn fire(self: Arc<Self>, id: u64) -> BoxFuture<'static, ()> {
    Box::pin(async move {
      let mut state = self.core.gate.acquire().await;
      if state.done || state.id != id {
        return;
      }
      let next = self.rotate(&mut state).await;
      self.clone().arm(next).await;
    })
  }
}

#[async_trait]
impl<T, P> AsyncObservable<P::Output> for TimeOrCountPartitioned<T, P>
where
  T: Clone + Send + 'static,
  P: Partition<T>,
{
  async fn subscribe(&self, observer: DynObserver<P::Output>) -> Result<DynDisposable, RxError> {
    ensure(!self.span.is_zero(), "time span")?;
    ensure(self.count > 0, "count")?;
    let state = TimeCountState { current: None, n: 0, id: 0, done: false };
    let (core, handle) = PartitionCore::new(self.partition.clone(), observer, state);
    let sink = Arc::new(TimeCountSink {
      core,
      scheduler: self.scheduler.clone(),
      span: self.span,
      count: self.count,
      timer: SerialDisposable::new(),
    });
    sink.core.resources.add(Arc::new(sink.timer.clone())).await;
    {
      let mut state = sink.core.gate.acquire().await;
      state.current = Some(sink.core.open().await);
      sink.clone().arm(0).await;
    }

    let source: DynObserver<T> = Arc::new(TimeCountObserver(sink.clone()));
    let subscription = subscribe_safe(&self.source, source).await;
    sink.core.resources.add(subscription).await;
    Ok(handle)
  }
}

struct TimeCountObserver<T: Send + 'static, P: Partition<T>>(Arc<TimeCountSink<T, P>>);

#[async_trait]
impl<T, P> AsyncObserver<T> for TimeCountObserver<T, P>
where
  T: Clone + Send + 'static,
  P: Partition<T>,
{
  async fn on_next(&self, value: T) {
    let sink = &self.0;
    let mut state = sink.core.gate.acquire().await;
    if state.done {
      return;
    }
    if let Some(acc) = state.current.as_mut() {
      sink.core.partition.push(acc, value).await;
    }
    state.n += 1;
    if state.n == sink.count {
      let id = sink.rotate(&mut state).await;
      // rearm relative to the moment the new partition opened
      sink.clone().arm(id).await;
    }
  }

  async fn on_error(&self, error: RxError) {
    let mut state = self.0.core.gate.acquire().await;
    if std::mem::replace(&mut state.done, true) {
      return;
    }
    let open = state.current.take().into_iter().collect();
    self.0.core.fail(open, error).await;
  }

  async fn on_completed(&self) {
    let mut state = self.0.core.gate.acquire().await;
    if std::mem::replace(&mut state.done, true) {
      return;
    }
    let open = state.current.take().into_iter().collect();
    self.0.core.complete(open, false).await;
  }
}
