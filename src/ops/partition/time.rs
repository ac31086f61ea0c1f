use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::{ensure, Partition, PartitionCore};
use crate::{
  disposable::{DynDisposable, SerialDisposable},
  error::RxError,
  observable::{subscribe_safe, AsyncObservable, DynObservable},
  observer::{AsyncObserver, DynObserver},
  scheduler::{action, periodic, SchedulerRef},
};

/// Partitions spanning `span` of scheduler time, a new one starting every
/// `shift`.
pub(crate) struct TimePartitioned<T, P> {
  source: DynObservable<T>,
  span: Duration,
  shift: Duration,
  scheduler: SchedulerRef,
  partition: P,
}

impl<T, P> TimePartitioned<T, P> {
  pub(crate) fn new(
    source: DynObservable<T>, span: Duration, shift: Duration, scheduler: SchedulerRef, partition: P,
  ) -> Self {
    TimePartitioned { source, span, shift, scheduler, partition }
  }
}

/// The two infinite series of due times: closes at `span + k * shift`,
/// opens at `(k + 1) * shift`. Each timer serves the earlier of the two, or
/// both when they coincide.
struct TimeState<A> {
  queue: VecDeque<A>,
  next_span: Duration,
  next_shift: Duration,
  total: Duration,
  done: bool,
}

#[derive(Clone, Copy)]
struct Tick {
  close: bool,
  open: bool,
  after: Duration,
}

impl<A> TimeState<A> {
  fn next_tick(&mut self, shift: Duration) -> Tick {
    let close = self.next_span <= self.next_shift;
    let open = self.next_shift <= self.next_span;
    let due = if close { self.next_span } else { self.next_shift };
    let after = due - self.total;
    self.total = due;
    if close {
      self.next_span += shift;
    }
    if open {
      self.next_shift += shift;
    }
    Tick { close, open, after }
  }
}

struct TimeSink<T: Send + 'static, P: Partition<T>> {
  core: PartitionCore<T, P, TimeState<P::Acc>>,
  scheduler: SchedulerRef,
  shift: Duration,
  timer: SerialDisposable,
}

impl<T, P> TimeSink<T, P>
where
  T: Clone + Send + 'static,
  P: Partition<T>,
{
  /// Starts the timer for `tick`. Gate must be held.
  fn arm(self: Arc<Self>, tick: Tick) -> BoxFuture<'static, ()> {
    Box::pin(async move {
      let sink = self.clone();
      let timer = self
        .scheduler
        .schedule_after(tick.after, action(move |_| sink.fire(tick)))
        .await;
      self.timer.assign(timer).await;
    })
  }

  fn fire(self: Arc<Self>, tick: Tick) -> BoxFuture<'static, ()> {
    Box::pin(async move {
      let mut state = self.core.gate.acquire().await;
      if state.done {
        return;
      }
      if tick.close {
        if let Some(acc) = state.queue.pop_front() {
          self.core.close(acc).await;
        }
      }
      if tick.open {
        let acc = self.core.open().await;
        state.queue.push_back(acc);
      }
      let next = state.next_tick(self.shift);
      self.clone().arm(next).await;
    })
  }

  /// `span == shift`: back-to-back partitions driven by one periodic timer.
  async fn roll(&self) {
    let mut state = self.core.gate.acquire().await;
    if state.done {
      return;
    }
    if let Some(acc) = state.queue.pop_front() {
      self.core.close(acc).await;
    }
    let acc = self.core.open().await;
    state.queue.push_back(acc);
  }
}

#[async_trait]
impl<T, P> AsyncObservable<P::Output> for TimePartitioned<T, P>
where
  T: Clone + Send + 'static,
  P: Partition<T>,
{
  async fn subscribe(&self, observer: DynObserver<P::Output>) -> Result<DynDisposable, RxError> {
    ensure(!self.span.is_zero(), "time span")?;
    ensure(!self.shift.is_zero(), "time shift")?;
    let state = TimeState {
      queue: VecDeque::new(),
      next_span: self.span,
      next_shift: self.shift,
      total: Duration::ZERO,
      done: false,
    };
    let (core, handle) = PartitionCore::new(self.partition.clone(), observer, state);
    let sink = Arc::new(TimeSink {
      core,
      scheduler: self.scheduler.clone(),
      shift: self.shift,
      timer: SerialDisposable::new(),
    });
    sink.core.resources.add(Arc::new(sink.timer.clone())).await;

    let mut state = sink.core.gate.acquire().await;
    let first = sink.core.open().await;
    state.queue.push_back(first);
    let first_tick = state.next_tick(self.shift);
    if self.span == self.shift {
      let roller = sink.clone();
      let timer = self
        .scheduler
        .schedule_periodic(
          self.span,
          periodic(move |_| {
            let roller = roller.clone();
            async move { roller.roll().await }
          }),
        )
        .await;
      sink.timer.assign(timer).await;
    } else {
      sink.clone().arm(first_tick).await;
    }
    drop(state);

    let source: DynObserver<T> = sink.clone();
    let subscription = subscribe_safe(&self.source, source).await;
    sink.core.resources.add(subscription).await;
    Ok(handle)
  }
}

#[async_trait]
impl<T, P> AsyncObserver<T> for TimeSink<T, P>
where
  T: Clone + Send + 'static,
  P: Partition<T>,
{
  async fn on_next(&self, value: T) {
    let mut state = self.core.gate.acquire().await;
    if state.done {
      return;
    }
    for acc in state.queue.iter_mut() {
      self.core.partition.push(acc, value.clone()).await;
    }
  }

  async fn on_error(&self, error: RxError) {
    let mut state = self.core.gate.acquire().await;
    if std::mem::replace(&mut state.done, true) {
      return;
    }
    let open = state.queue.drain(..).collect();
    self.core.fail(open, error).await;
  }

  async fn on_completed(&self) {
    let mut state = self.core.gate.acquire().await;
    if std::mem::replace(&mut state.done, true) {
      return;
    }
    let open = state.queue.drain(..).collect();
    self.core.complete(open, false).await;
  }
}
