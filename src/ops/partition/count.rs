use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;

use super::{ensure, Partition, PartitionCore};
use crate::{
  disposable::DynDisposable,
  error::RxError,
  observable::{subscribe_safe, AsyncObservable, DynObservable},
  observer::{AsyncObserver, DynObserver},
};

/// Partitions of `count` elements, a new one starting every `skip` elements.
pub(crate) struct CountPartitioned<T, P> {
  source: DynObservable<T>,
  count: usize,
  skip: usize,
  partition: P,
}

impl<T, P> CountPartitioned<T, P> {
  pub(crate) fn new(source: DynObservable<T>, count: usize, skip: usize, partition: P) -> Self {
    CountPartitioned { source, count, skip, partition }
  }
}

struct CountState<A> {
  queue: VecDeque<A>,
  n: usize,
  done: bool,
}

struct CountSink<T: Send + 'static, P: Partition<T>> {
  core: PartitionCore<T, P, CountState<P::Acc>>,
  count: usize,
  skip: usize,
}

#[async_trait]
impl<T, P> AsyncObservable<P::Output> for CountPartitioned<T, P>
where
  T: Clone + Send + 'static,
  P: Partition<T>,
{
  async fn subscribe(&self, observer: DynObserver<P::Output>) -> Result<DynDisposable, RxError> {
    ensure(self.count > 0, "count")?;
    ensure(self.skip > 0, "skip")?;
    let state = CountState { queue: VecDeque::new(), n: 0, done: false };
    let (core, handle) = PartitionCore::new(self.partition.clone(), observer, state);
    let sink = Arc::new(CountSink { core, count: self.count, skip: self.skip });
    {
      let mut state = sink.core.gate.acquire().await;
      let first = sink.core.open().await;
      state.queue.push_back(first);
    }
    let observer: DynObserver<T> = sink.clone();
    let subscription = subscribe_safe(&self.source, observer).await;
    sink.core.resources.add(subscription).await;
    Ok(handle)
  }
}

#[async_trait]
impl<T, P> AsyncObserver<T> for CountSink<T, P>
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

    // element index relative to the oldest open partition
    let c = state.n as isize - self.count as isize + 1;
    if c >= 0 && c as usize % self.skip == 0 {
      if let Some(full) = state.queue.pop_front() {
        self.core.close(full).await;
      }
    }

    state.n += 1;
    if state.n % self.skip == 0 {
      let next = self.core.open().await;
      state.queue.push_back(next);
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
    self.core.complete(open, true).await;
  }
}
