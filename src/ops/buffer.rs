//! Buffer: like Window, but each partition is collected into a `Vec` and
//! emitted once it closes.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use super::partition::{
  BoundaryPartitioned, ClosingPartitioned, CountPartitioned, Partition, TimeOrCountPartitioned,
  TimePartitioned,
};
use crate::{
  disposable::RefCountDisposable, error::RxError, observable::DynObservable, scheduler::SchedulerRef,
};

#[derive(Clone, Copy)]
pub(crate) struct BufferPartition;

#[async_trait]
impl<T: Send + 'static> Partition<T> for BufferPartition {
  type Output = Vec<T>;
  type Acc = Vec<T>;

  fn open(&self, _: &RefCountDisposable) -> (Self::Acc, Option<Self::Output>) { (vec![], None) }

  async fn push(&self, acc: &mut Self::Acc, value: T) { acc.push(value) }

  async fn close(&self, acc: Self::Acc) -> Option<Self::Output> { Some(acc) }

  async fn fail(&self, acc: Self::Acc, _: RxError) {
    if !acc.is_empty() {
      log::debug!("dropping a buffer of {} element(s) on error", acc.len());
    }
  }

  fn is_empty(&self, acc: &Self::Acc) -> bool { acc.is_empty() }
}

/// Buffers of `count` elements, a new one starting every `skip` elements.
///
/// Buffers still open when the source completes are emitted, except empty
/// ones.
pub fn buffer_with_count<T>(source: DynObservable<T>, count: usize, skip: usize) -> DynObservable<Vec<T>>
where
  T: Clone + Send + 'static,
{
  Arc::new(CountPartitioned::new(source, count, skip, BufferPartition))
}

/// Buffers spanning `span`, a new one starting every `shift`. Empty buffers
/// are emitted when their time is up.
pub fn buffer_with_time<T>(
  source: DynObservable<T>, span: Duration, shift: Duration, scheduler: SchedulerRef,
) -> DynObservable<Vec<T>>
where
  T: Clone + Send + 'static,
{
  Arc::new(TimePartitioned::new(source, span, shift, scheduler, BufferPartition))
}

pub fn buffer_with_time_or_count<T>(
  source: DynObservable<T>, span: Duration, count: usize, scheduler: SchedulerRef,
) -> DynObservable<Vec<T>>
where
  T: Clone + Send + 'static,
{
  Arc::new(TimeOrCountPartitioned::new(source, span, count, scheduler, BufferPartition))
}

pub fn buffer_with_boundaries<T, B>(
  source: DynObservable<T>, boundaries: DynObservable<B>,
) -> DynObservable<Vec<T>>
where
  T: Clone + Send + 'static,
  B: Send + 'static,
{
  Arc::new(BoundaryPartitioned::new(source, boundaries, BufferPartition))
}

pub fn buffer_with_closing<T, C, F>(source: DynObservable<T>, closing_selector: F) -> DynObservable<Vec<T>>
where
  T: Clone + Send + 'static,
  C: Send + 'static,
  F: Fn() -> Result<DynObservable<C>, RxError> + Send + Sync + 'static,
{
  Arc::new(ClosingPartitioned::new(source, closing_selector, BufferPartition))
}
