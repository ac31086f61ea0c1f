//! Window: split a sequence into a sequence of live sub-sequences.
//!
//! Every window is emitted downstream the moment it opens and receives the
//! source elements that fall into it until it closes, at which point it
//! completes. An error fails every open window and the outer sequence.
//!
//! Windows share the lifetime of the outer subscription: the source stays
//! subscribed as long as either the outer subscription or any subscription to
//! an emitted window is alive.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use super::partition::{
  BoundaryPartitioned, ClosingPartitioned, CountPartitioned, Partition, TimeOrCountPartitioned,
  TimePartitioned,
};
use crate::{
  disposable::{DynDisposable, RefCountDisposable, StableCompositeDisposable},
  error::RxError,
  observable::{AsyncObservable, DynObservable},
  observer::{AsyncObserver, DynObserver},
  scheduler::SchedulerRef,
  subject::SequentialSubject,
};

/// A window handed downstream.
struct WindowObservable<T> {
  subject: SequentialSubject<T>,
  lifetime: RefCountDisposable,
}

#[async_trait]
impl<T: Clone + Send + 'static> AsyncObservable<T> for WindowObservable<T> {
  async fn subscribe(&self, observer: DynObserver<T>) -> Result<DynDisposable, RxError> {
    let keep_alive = self.lifetime.get_dependent_disposable();
    let subscription = self.subject.subscribe(observer).await?;
    Ok(StableCompositeDisposable::pair(keep_alive, subscription))
  }
}

#[derive(Clone, Copy)]
pub(crate) struct WindowPartition;

#[async_trait]
impl<T: Clone + Send + 'static> Partition<T> for WindowPartition {
  type Output = DynObservable<T>;
  type Acc = SequentialSubject<T>;

  fn open(&self, lifetime: &RefCountDisposable) -> (Self::Acc, Option<Self::Output>) {
    let subject = SequentialSubject::new();
    let window = WindowObservable { subject: subject.clone(), lifetime: lifetime.clone() };
    log::debug!("window opened");
    (subject, Some(Arc::new(window)))
  }

  async fn push(&self, acc: &mut Self::Acc, value: T) { acc.on_next(value).await }

  async fn close(&self, acc: Self::Acc) -> Option<Self::Output> {
    acc.on_completed().await;
    None
  }

  async fn fail(&self, acc: Self::Acc, error: RxError) { acc.on_error(error).await }
}

/// Windows of `count` elements, a new one opening every `skip` elements.
///
/// The first window opens on subscription. With `skip > count` some elements
/// fall into no window; with `skip < count` windows overlap.
pub fn window_with_count<T>(source: DynObservable<T>, count: usize, skip: usize) -> DynObservable<DynObservable<T>>
where
  T: Clone + Send + 'static,
{
  Arc::new(CountPartitioned::new(source, count, skip, WindowPartition))
}

/// Windows lasting `span`, a new one opening every `shift`.
pub fn window_with_time<T>(
  source: DynObservable<T>, span: Duration, shift: Duration, scheduler: SchedulerRef,
) -> DynObservable<DynObservable<T>>
where
  T: Clone + Send + 'static,
{
  Arc::new(TimePartitioned::new(source, span, shift, scheduler, WindowPartition))
}

/// Back-to-back windows, each closed after `count` elements or `span`,
/// whichever comes first.
pub fn window_with_time_or_count<T>(
  source: DynObservable<T>, span: Duration, count: usize, scheduler: SchedulerRef,
) -> DynObservable<DynObservable<T>>
where
  T: Clone + Send + 'static,
{
  Arc::new(TimeOrCountPartitioned::new(source, span, count, scheduler, WindowPartition))
}

/// Back-to-back windows, rotated by each element of `boundaries`.
pub fn window_with_boundaries<T, B>(
  source: DynObservable<T>, boundaries: DynObservable<B>,
) -> DynObservable<DynObservable<T>>
where
  T: Clone + Send + 'static,
  B: Send + 'static,
{
  Arc::new(BoundaryPartitioned::new(source, boundaries, WindowPartition))
}

/// Back-to-back windows, each closed by a sequence from `closing_selector`.
pub fn window_with_closing<T, C, F>(
  source: DynObservable<T>, closing_selector: F,
) -> DynObservable<DynObservable<T>>
where
  T: Clone + Send + 'static,
  C: Send + 'static,
  F: Fn() -> Result<DynObservable<C>, RxError> + Send + Sync + 'static,
{
  Arc::new(ClosingPartitioned::new(source, closing_selector, WindowPartition))
}
