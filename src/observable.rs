//! Async observables: the producer side of the pipeline.
//!
//! [`AsyncObservable::subscribe`] attaches an observer and returns a
//! [`DynDisposable`] owning every resource created for that subscription.
//! Failures while establishing the subscription come back as `Err`;
//! [`subscribe_safe`] is the wrapper operators use to turn such a failure into
//! an `on_error` notification instead.
//!
//! [`ObservableExt`] is a thin fluent façade wiring the operators in
//! [`crate::ops`].

use std::{future::Future, hash::Hash, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::{
  disposable::{self, DynDisposable},
  error::RxError,
  observer::{self, DynObserver},
  ops::{self, group_by::GroupedObservable},
  scheduler::SchedulerRef,
};

mod create;
mod defer;
mod from_iter;
mod generate;
mod start;
mod timer;
mod trivial;

pub use create::{create, AnonymousObservable};
pub use defer::defer;
pub use from_iter::from_iter;
pub use generate::generate;
pub use start::start_async;
pub use timer::{interval, timer};
pub use trivial::{empty, never, return_value, throw};

#[async_trait]
pub trait AsyncObservable<T: Send + 'static>: Send + Sync {
  /// Attaches `observer`. The caller owns the returned disposable and must
  /// dispose it to release everything created for this subscription.
  async fn subscribe(&self, observer: DynObserver<T>) -> Result<DynDisposable, RxError>;
}

/// Shared handle to a type-erased observable.
pub type DynObservable<T> = Arc<dyn AsyncObservable<T>>;

#[async_trait]
impl<T: Send + 'static> AsyncObservable<T> for DynObservable<T> {
  async fn subscribe(&self, observer: DynObserver<T>) -> Result<DynDisposable, RxError> {
    (**self).subscribe(observer).await
  }
}

/// Subscribes without ever failing: a subscription error is delivered to
/// `observer.on_error` and an empty disposable is returned.
pub async fn subscribe_safe<T, S>(source: &S, observer: DynObserver<T>) -> DynDisposable
where
  T: Send + 'static,
  S: AsyncObservable<T> + ?Sized,
{
  match source.subscribe(observer.clone()).await {
    Ok(subscription) => subscription,
    Err(err) => {
      log::warn!("subscription failed, forwarding to on_error: {err}");
      observer.on_error(err).await;
      disposable::empty()
    }
  }
}

/// Fluent operator façade available on every observable.
pub trait ObservableExt<T: Send + 'static>: AsyncObservable<T> + Sized + 'static {
  fn into_dyn(self) -> DynObservable<T> { Arc::new(self) }

  /// [`subscribe_safe`] with the given observer.
  fn subscribe_observer(&self, observer: DynObserver<T>) -> BoxFuture<'_, DynDisposable> {
    Box::pin(subscribe_safe(self, observer))
  }

  /// [`subscribe_safe`] with a closure triple.
  fn subscribe_with<N, NF, E, EF, C, CF>(
    &self, next: N, error: E, completed: C,
  ) -> BoxFuture<'_, DynDisposable>
  where
    N: Fn(T) -> NF + Send + Sync + 'static,
    NF: Future<Output = ()> + Send + 'static,
    E: Fn(RxError) -> EF + Send + Sync + 'static,
    EF: Future<Output = ()> + Send + 'static,
    C: Fn() -> CF + Send + Sync + 'static,
    CF: Future<Output = ()> + Send + 'static,
  {
    self.subscribe_observer(observer::create(next, error, completed))
  }

  fn window_with_count(self, count: usize, skip: usize) -> DynObservable<DynObservable<T>>
  where
    T: Clone,
  {
    ops::window::window_with_count(self.into_dyn(), count, skip)
  }

  fn window_with_time(
    self, span: Duration, shift: Duration, scheduler: SchedulerRef,
  ) -> DynObservable<DynObservable<T>>
  where
    T: Clone,
  {
    ops::window::window_with_time(self.into_dyn(), span, shift, scheduler)
  }

  fn window_with_time_or_count(
    self, span: Duration, count: usize, scheduler: SchedulerRef,
  ) -> DynObservable<DynObservable<T>>
  where
    T: Clone,
  {
    ops::window::window_with_time_or_count(self.into_dyn(), span, count, scheduler)
  }

  fn window_with_boundaries<B: Send + 'static>(
    self, boundaries: DynObservable<B>,
  ) -> DynObservable<DynObservable<T>>
  where
    T: Clone,
  {
    ops::window::window_with_boundaries(self.into_dyn(), boundaries)
  }

  fn window_with_closing<C, F>(self, closing_selector: F) -> DynObservable<DynObservable<T>>
  where
    T: Clone,
    C: Send + 'static,
    F: Fn() -> Result<DynObservable<C>, RxError> + Send + Sync + 'static,
  {
    ops::window::window_with_closing(self.into_dyn(), closing_selector)
  }

  fn buffer_with_count(self, count: usize, skip: usize) -> DynObservable<Vec<T>>
  where
    T: Clone,
  {
    ops::buffer::buffer_with_count(self.into_dyn(), count, skip)
  }

  fn buffer_with_time(
    self, span: Duration, shift: Duration, scheduler: SchedulerRef,
  ) -> DynObservable<Vec<T>>
  where
    T: Clone,
  {
    ops::buffer::buffer_with_time(self.into_dyn(), span, shift, scheduler)
  }

  fn buffer_with_time_or_count(
    self, span: Duration, count: usize, scheduler: SchedulerRef,
  ) -> DynObservable<Vec<T>>
  where
    T: Clone,
  {
    ops::buffer::buffer_with_time_or_count(self.into_dyn(), span, count, scheduler)
  }

  fn buffer_with_boundaries<B: Send + 'static>(
    self, boundaries: DynObservable<B>,
  ) -> DynObservable<Vec<T>>
  where
    T: Clone,
  {
    ops::buffer::buffer_with_boundaries(self.into_dyn(), boundaries)
  }

  fn buffer_with_closing<C, F>(self, closing_selector: F) -> DynObservable<Vec<T>>
  where
    T: Clone,
    C: Send + 'static,
    F: Fn() -> Result<DynObservable<C>, RxError> + Send + Sync + 'static,
  {
    ops::buffer::buffer_with_closing(self.into_dyn(), closing_selector)
  }

  fn group_by<K, F>(self, key_selector: F) -> DynObservable<GroupedObservable<K, T>>
  where
    T: Clone,
    K: Hash + Eq + Clone + Send + Sync + 'static,
    F: Fn(&T) -> Result<K, RxError> + Send + Sync + 'static,
  {
    ops::group_by::group_by(self.into_dyn(), key_selector)
  }

  fn group_by_until<K, D, F, DF>(
    self, key_selector: F, duration_selector: DF,
  ) -> DynObservable<GroupedObservable<K, T>>
  where
    T: Clone,
    K: Hash + Eq + Clone + Send + Sync + 'static,
    D: Send + 'static,
    F: Fn(&T) -> Result<K, RxError> + Send + Sync + 'static,
    DF: Fn(&GroupedObservable<K, T>) -> Result<DynObservable<D>, RxError> + Send + Sync + 'static,
  {
    ops::group_by_until::group_by_until(self.into_dyn(), key_selector, Ok, duration_selector)
  }

  fn select_many<U, F>(self, selector: F) -> DynObservable<U>
  where
    U: Send + 'static,
    F: Fn(T) -> Result<DynObservable<U>, RxError> + Send + Sync + 'static,
  {
    ops::select_many::select_many(self.into_dyn(), selector)
  }

  fn join<R, LD, RD, O, LF, RF, SF>(
    self, right: DynObservable<R>, left_duration: LF, right_duration: RF, result_selector: SF,
  ) -> DynObservable<O>
  where
    T: Clone + Sync,
    R: Clone + Send + Sync + 'static,
    LD: Send + 'static,
    RD: Send + 'static,
    O: Send + 'static,
    LF: Fn(&T) -> Result<DynObservable<LD>, RxError> + Send + Sync + 'static,
    RF: Fn(&R) -> Result<DynObservable<RD>, RxError> + Send + Sync + 'static,
    SF: Fn(&T, &R) -> Result<O, RxError> + Send + Sync + 'static,
  {
    ops::join::join(self.into_dyn(), right, left_duration, right_duration, result_selector)
  }

  fn sample<S: Send + 'static>(self, sampler: DynObservable<S>) -> DynObservable<T> {
    ops::sample::sample(self.into_dyn(), sampler)
  }

  fn sample_interval(self, period: Duration, scheduler: SchedulerRef) -> DynObservable<T> {
    ops::sample::sample_interval(self.into_dyn(), period, scheduler)
  }

  fn with_latest_from<U, O, F>(self, other: DynObservable<U>, selector: F) -> DynObservable<O>
  where
    U: Clone + Send + 'static,
    O: Send + 'static,
    F: Fn(T, U) -> Result<O, RxError> + Send + Sync + 'static,
  {
    ops::with_latest_from::with_latest_from(self.into_dyn(), other, selector)
  }

  fn catch<F>(self, handler: F) -> DynObservable<T>
  where
    F: Fn(RxError) -> Result<DynObservable<T>, RxError> + Send + Sync + 'static,
  {
    ops::catch::catch(self.into_dyn(), handler)
  }

  fn do_while<F, Fut>(self, condition: F) -> DynObservable<T>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, RxError>> + Send + 'static,
  {
    ops::do_while::do_while(self.into_dyn(), condition)
  }

  fn subscribe_on(self, scheduler: SchedulerRef) -> DynObservable<T> {
    ops::subscribe_on::subscribe_on(self.into_dyn(), scheduler)
  }

  fn synchronize(self) -> DynObservable<T> { ops::synchronize::synchronize(self.into_dyn()) }
}

impl<T: Send + 'static, O: AsyncObservable<T> + 'static> ObservableExt<T> for O {}

/// Operators over an observable of observables.
pub trait FlattenExt<T: Send + 'static>: AsyncObservable<DynObservable<T>> + Sized + 'static {
  /// Mirrors the most recent inner observable.
  fn switch(self) -> DynObservable<T> { ops::switch::switch(Arc::new(self)) }

  /// Mirrors every inner observable concurrently.
  fn merge(self) -> DynObservable<T> { ops::select_many::merge(Arc::new(self)) }
}

impl<T: Send + 'static, O: AsyncObservable<DynObservable<T>> + 'static> FlattenExt<T> for O {}
