//! Shared engine behind Window and Buffer.
//!
//! Both operators split one source into consecutive or overlapping
//! partitions. They only differ in what a partition is: a live
//! [`SequentialSubject`] emitted downstream the moment it opens (Window), or a
//! `Vec` emitted when it closes (Buffer). [`Partition`] captures that
//! difference; the sub-modules implement each way of deciding when a
//! partition opens and closes, once, for both operators.
//!
//! [`SequentialSubject`]: crate::subject::SequentialSubject

use std::marker::PhantomData;

use async_trait::async_trait;

use crate::{
  disposable::{
    AsyncDisposable, CompositeDisposable, DynDisposable, IntoDynDisposable, RefCountDisposable,
    StableCompositeDisposable,
  },
  error::RxError,
  gate::AsyncGate,
  observer::{DynObserver, Subscriber},
};

mod boundary;
mod closing;
mod count;
mod time;
mod time_count;

pub(crate) use boundary::BoundaryPartitioned;
pub(crate) use closing::ClosingPartitioned;
pub(crate) use count::CountPartitioned;
pub(crate) use time::TimePartitioned;
pub(crate) use time_count::TimeOrCountPartitioned;

/// What a partition is and how it is delivered downstream.
#[async_trait]
pub(crate) trait Partition<T: Send + 'static>: Clone + Send + Sync + 'static {
  type Output: Send + 'static;
  type Acc: Send + 'static;

  /// Starts a partition. The second half is emitted downstream right away.
  fn open(&self, lifetime: &RefCountDisposable) -> (Self::Acc, Option<Self::Output>);

  async fn push(&self, acc: &mut Self::Acc, value: T);

  /// Ends a partition, returning what to emit downstream, if anything.
  async fn close(&self, acc: Self::Acc) -> Option<Self::Output>;

  async fn fail(&self, acc: Self::Acc, error: RxError);

  /// Whether a partition still open when a count-driven source completes
  /// may be dropped silently.
  fn is_empty(&self, _acc: &Self::Acc) -> bool { false }
}

/// Per-subscription core shared by every partitioning strategy.
///
/// `S` is the strategy's own state, guarded by the gate together with the
/// open partitions. Every method that talks to `downstream` expects the caller
/// to hold the gate.
pub(crate) struct PartitionCore<T, P: Partition<T>, S>
where
  T: Send + 'static,
{
  pub(crate) partition: P,
  pub(crate) downstream: DynObserver<P::Output>,
  pub(crate) lifetime: RefCountDisposable,
  pub(crate) resources: CompositeDisposable,
  pub(crate) gate: AsyncGate<S>,
  _item: PhantomData<fn(T)>,
}

impl<T, P, S> PartitionCore<T, P, S>
where
  T: Send + 'static,
  P: Partition<T>,
  S: Send,
{
  /// Builds the core and the disposable handed back to the subscriber.
  ///
  /// Disposing the handle stops downstream delivery at once. The resources
  /// (source subscription, timers, closing sequences) are released once the
  /// handle and every subscription to an emitted window are gone.
  pub(crate) fn new(partition: P, observer: DynObserver<P::Output>, state: S) -> (Self, DynDisposable) {
    let downstream = Subscriber::new(observer);
    let resources = CompositeDisposable::new();
    let lifetime = RefCountDisposable::new(resources.clone().into_dyn());
    let handle = StableCompositeDisposable::pair(downstream.clone(), lifetime.clone().into_dyn());
    let core = PartitionCore {
      partition,
      downstream,
      lifetime,
      resources,
      gate: AsyncGate::new(state),
      _item: PhantomData,
    };
    (core, handle)
  }

  pub(crate) async fn open(&self) -> P::Acc {
    let (acc, emitted) = self.partition.open(&self.lifetime);
    if let Some(emitted) = emitted {
      self.downstream.on_next(emitted).await;
    }
    acc
  }

  pub(crate) async fn close(&self, acc: P::Acc) {
    if let Some(emitted) = self.partition.close(acc).await {
      self.downstream.on_next(emitted).await;
    }
  }

  /// Closes every open partition, completes downstream and releases the
  /// resources.
  pub(crate) async fn complete(&self, open: Vec<P::Acc>, drop_empty: bool) {
    for acc in open {
      if drop_empty && self.partition.is_empty(&acc) {
        continue;
      }
      self.close(acc).await;
    }
    self.downstream.on_completed().await;
    self.resources.dispose().await;
  }

  /// Fails every open partition and downstream, then releases the resources.
  pub(crate) async fn fail(&self, open: Vec<P::Acc>, error: RxError) {
    log::debug!("partitioning failed with {} open partition(s): {error}", open.len());
    for acc in open {
      self.partition.fail(acc, error.clone()).await;
    }
    self.downstream.on_error(error).await;
    self.resources.dispose().await;
  }
}

/// Validates a count or a span before subscribing.
pub(crate) fn ensure(valid: bool, what: &str) -> Result<(), RxError> {
  if valid {
    Ok(())
  } else {
    Err(RxError::Subscribe(format!("{what} must be greater than zero").into()))
  }
}
