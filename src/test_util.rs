//! Recording doubles shared by the unit tests.

use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};

use async_trait::async_trait;

use crate::{
  disposable::{AsyncDisposable, DynDisposable},
  error::RxError,
  observable::{AsyncObservable, DynObservable},
  observer::{AsyncObserver, DynObserver, Notification},
  rc::MutArc,
};

/// Records every call it receives as a [`Notification`].
pub struct Recorder<T> {
  log: MutArc<Vec<Notification<T>>>,
}

impl<T> Clone for Recorder<T> {
  fn clone(&self) -> Self { Recorder { log: self.log.clone() } }
}

impl<T: Send + 'static> Recorder<T> {
  pub fn new() -> Self { Recorder { log: MutArc::own(vec![]) } }

  pub fn observer(&self) -> DynObserver<T> { Arc::new(self.clone()) }

  /// Drains what was recorded so far.
  pub fn take(&self) -> Vec<Notification<T>> { std::mem::take(&mut *self.log.rc_deref_mut()) }

  pub fn len(&self) -> usize { self.log.rc_deref_mut().len() }

  pub fn is_terminated(&self) -> bool { self.log.rc_deref_mut().iter().any(Notification::is_terminal) }

  /// Everything recorded so far, leaving the log untouched.
  pub fn snapshot(&self) -> Vec<Notification<T>>
  where
    T: Clone,
  {
    self.log.rc_deref_mut().clone()
  }

  /// The values recorded so far, leaving the log untouched.
  pub fn values(&self) -> Vec<T>
  where
    T: Clone,
  {
    self
      .log
      .rc_deref_mut()
      .iter()
      .filter_map(|n| match n {
        Notification::Next(v) => Some(v.clone()),
        _ => None,
      })
      .collect()
  }
}

#[async_trait]
impl<T: Send + 'static> AsyncObserver<T> for Recorder<T> {
  async fn on_next(&self, value: T) { self.log.rc_deref_mut().push(Notification::Next(value)); }

  async fn on_error(&self, error: RxError) { self.log.rc_deref_mut().push(Notification::Error(error)); }

  async fn on_completed(&self) { self.log.rc_deref_mut().push(Notification::Completed); }
}

/// Counts raw `dispose` calls, so double releases show up as a count above
/// one.
#[derive(Clone, Default)]
pub struct CountingDisposable {
  calls: Arc<AtomicUsize>,
}

impl CountingDisposable {
  pub fn new() -> Self { Self::default() }

  pub fn count(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl AsyncDisposable for CountingDisposable {
  async fn dispose(&self) { self.calls.fetch_add(1, Ordering::SeqCst); }

  fn is_disposed(&self) -> bool { self.count() > 0 }
}

/// Subscribes a fresh [`Recorder`] to every inner observable it receives, as
/// soon as it receives it.
pub struct InnerCollector<O, T> {
  inners: MutArc<Vec<(O, Recorder<T>, DynDisposable)>>,
  outer: Recorder<()>,
}

/// Collects the windows of a Window operator.
pub type WindowCollector<T> = InnerCollector<DynObservable<T>, T>;

impl<O, T> Clone for InnerCollector<O, T> {
  fn clone(&self) -> Self { InnerCollector { inners: self.inners.clone(), outer: self.outer.clone() } }
}

impl<O, T> InnerCollector<O, T>
where
  O: AsyncObservable<T> + Clone + Send + Sync + 'static,
  T: Clone + Send + 'static,
{
  pub fn new() -> Self { InnerCollector { inners: MutArc::own(vec![]), outer: Recorder::new() } }

  pub fn observer(&self) -> DynObserver<O> { Arc::new(self.clone()) }

  /// What every inner observable delivered so far, in emission order.
  pub fn snapshot(&self) -> Vec<Vec<Notification<T>>> {
    self.inners.rc_deref_mut().iter().map(|(_, r, _)| r.snapshot()).collect()
  }

  pub fn inners(&self) -> Vec<O> { self.inners.rc_deref_mut().iter().map(|(o, _, _)| o.clone()).collect() }

  /// Terminal notifications of the outer sequence.
  pub fn outer(&self) -> Vec<Notification<()>> { self.outer.snapshot() }

  pub fn outer_completed(&self) -> bool { self.outer() == vec![Notification::Completed] }

  pub async fn dispose_windows(&self) {
    let subscriptions: Vec<_> = self.inners.rc_deref_mut().iter().map(|(_, _, d)| d.clone()).collect();
    for d in subscriptions {
      d.dispose().await;
    }
  }
}

#[async_trait]
impl<O, T> AsyncObserver<O> for InnerCollector<O, T>
where
  O: AsyncObservable<T> + Clone + Send + Sync + 'static,
  T: Clone + Send + 'static,
{
  async fn on_next(&self, inner: O) {
    let recorder = Recorder::new();
    let subscription = inner.subscribe(recorder.observer()).await.expect("inner subscription failed");
    self.inners.rc_deref_mut().push((inner, recorder, subscription));
  }

  async fn on_error(&self, error: RxError) { self.outer.on_error(error).await }

  async fn on_completed(&self) { self.outer.on_completed().await }
}
