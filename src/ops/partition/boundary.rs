use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;

use super::{Partition, PartitionCore};
use crate::{
  disposable::DynDisposable,
  error::RxError,
  observable::{subscribe_safe, AsyncObservable, DynObservable},
  observer::{AsyncObserver, DynObserver},
};

/// Back-to-back partitions; every element of `boundaries` closes the open
/// partition and opens the next.
pub(crate) struct BoundaryPartitioned<T, B, P> {
  source: DynObservable<T>,
  boundaries: DynObservable<B>,
  partition: P,
}

impl<T, B, P> BoundaryPartitioned<T, B, P> {
  pub(crate) fn new(source: DynObservable<T>, boundaries: DynObservable<B>, partition: P) -> Self {
    BoundaryPartitioned { source, boundaries, partition }
  }
}

struct BoundaryState<A> {
  current: Option<A>,
  done: bool,
}

type BoundarySink<T, P> = PartitionCore<T, P, BoundaryState<<P as Partition<T>>::Acc>>;

/// Receives the boundary sequence on behalf of a [`BoundarySink`].
struct BoundaryObserver<T: Send + 'static, B, P: Partition<T>> {
  sink: Arc<BoundarySink<T, P>>,
  _boundary: PhantomData<fn(B)>,
}

async fn finish<T, P>(sink: &BoundarySink<T, P>, error: Option<RxError>)
where
  T: Clone + Send + 'static,
  P: Partition<T>,
{
  let mut state = sink.gate.acquire().await;
  if std::mem::replace(&mut state.done, true) {
    return;
  }
  let open = state.current.take().into_iter().collect();
  match error {
    Some(error) => sink.fail(open, error).await,
    None => sink.complete(open, false).await,
  }
}

#[async_trait]
impl<T, B, P> AsyncObservable<P::Output> for BoundaryPartitioned<T, B, P>
where
  T: Clone + Send + 'static,
  B: Send + 'static,
  P: Partition<T>,
{
  async fn subscribe(&self, observer: DynObserver<P::Output>) -> Result<DynDisposable, RxError> {
    let state = BoundaryState { current: None, done: false };
    let (core, handle) = PartitionCore::new(self.partition.clone(), observer, state);
    let sink = Arc::new(core);
    {
      let mut state = sink.gate.acquire().await;
      state.current = Some(sink.open().await);
    }

    let source: DynObserver<T> = sink.clone();
    let subscription = subscribe_safe(&self.source, source).await;
    sink.resources.add(subscription).await;

    let boundary: DynObserver<B> =
      Arc::new(BoundaryObserver { sink: sink.clone(), _boundary: PhantomData });
    let subscription = subscribe_safe(&self.boundaries, boundary).await;
    sink.resources.add(subscription).await;
    Ok(handle)
  }
}

#[async_trait]
impl<T, P> AsyncObserver<T> for BoundarySink<T, P>
where
  T: Clone + Send + 'static,
  P: Partition<T>,
{
  async fn on_next(&self, value: T) {
    let mut state = self.gate.acquire().await;
    if state.done {
      return;
    }
    if let Some(acc) = state.current.as_mut() {
      self.partition.push(acc, value).await;
    }
  }

  async fn on_error(&self, error: RxError) { finish(self, Some(error)).await }

  async fn on_completed(&self) { finish(self, None).await }
}

#[async_trait]
impl<T, B, P> AsyncObserver<B> for BoundaryObserver<T, B, P>
where
  T: Clone + Send + 'static,
  B: Send + 'static,
  P: Partition<T>,
{
  async fn on_next(&self, _: B) {
    let mut state = self.sink.gate.acquire().await;
    if state.done {
      return;
    }
    if let Some(acc) = state.current.take() {
      self.sink.close(acc).await;
    }
    state.current = Some(self.sink.open().await);
  }

  async fn on_error(&self, error: RxError) { finish(&*self.sink, Some(error)).await }

  async fn on_completed(&self) { finish(&*self.sink, None).await }
}
