//! Observer trait and implementations
//!
//! An observer is the three-callback sink of an async observable. Each
//! callback is itself asynchronous: a producer awaits the observer before
//! delivering the next notification, which is what keeps a pipeline ordered
//! without buffering.

use std::{
  future::Future,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::{disposable::AsyncDisposable, error::RxError, gate::AsyncGate};

// ============================================================================
// Observer Trait
// ============================================================================

/// The consumer side of an async observable.
///
/// A well-behaved producer makes at most one terminal call (`on_error` or
/// `on_completed`) per subscription and never calls `on_next` after it. Calls
/// for one subscription are never concurrent with each other.
#[async_trait]
pub trait AsyncObserver<T: Send + 'static>: Send + Sync {
  async fn on_next(&self, value: T);

  async fn on_error(&self, error: RxError);

  async fn on_completed(&self);
}

/// Shared handle to a type-erased observer.
pub type DynObserver<T> = Arc<dyn AsyncObserver<T>>;

// ============================================================================
// Notification
// ============================================================================

/// A reified observer call.
#[derive(Debug, Clone)]
pub enum Notification<T> {
  Next(T),
  Error(RxError),
  Completed,
}

impl<T: Send + 'static> Notification<T> {
  /// Replays this notification on `observer`.
  pub async fn accept(self, observer: &dyn AsyncObserver<T>) {
    match self {
      Notification::Next(v) => observer.on_next(v).await,
      Notification::Error(e) => observer.on_error(e).await,
      Notification::Completed => observer.on_completed().await,
    }
  }

  pub fn is_terminal(&self) -> bool { !matches!(self, Notification::Next(_)) }
}

/// Errors compare by their rendered message.
impl<T: PartialEq> PartialEq for Notification<T> {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Notification::Next(a), Notification::Next(b)) => a == b,
      (Notification::Error(a), Notification::Error(b)) => a.to_string() == b.to_string(),
      (Notification::Completed, Notification::Completed) => true,
      _ => false,
    }
  }
}

// ============================================================================
// AnonymousObserver - Closure adapter
// ============================================================================

type NextFn<T> = Box<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;
type ErrorFn = Box<dyn Fn(RxError) -> BoxFuture<'static, ()> + Send + Sync>;
type CompletedFn = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Observer assembled from three async closures.
pub struct AnonymousObserver<T> {
  next: NextFn<T>,
  error: ErrorFn,
  completed: CompletedFn,
}

impl<T: Send + 'static> AnonymousObserver<T> {
  pub fn new<N, NF, E, EF, C, CF>(next: N, error: E, completed: C) -> Self
  where
    N: Fn(T) -> NF + Send + Sync + 'static,
    NF: Future<Output = ()> + Send + 'static,
    E: Fn(RxError) -> EF + Send + Sync + 'static,
    EF: Future<Output = ()> + Send + 'static,
    C: Fn() -> CF + Send + Sync + 'static,
    CF: Future<Output = ()> + Send + 'static,
  {
    AnonymousObserver {
      next: Box::new(move |v| Box::pin(next(v)) as BoxFuture<'static, ()>),
      error: Box::new(move |e| Box::pin(error(e)) as BoxFuture<'static, ()>),
      completed: Box::new(move || Box::pin(completed()) as BoxFuture<'static, ()>),
    }
  }
}

#[async_trait]
impl<T: Send + 'static> AsyncObserver<T> for AnonymousObserver<T> {
  async fn on_next(&self, value: T) { (self.next)(value).await }

  async fn on_error(&self, error: RxError) { (self.error)(error).await }

  async fn on_completed(&self) { (self.completed)().await }
}

/// Builds a [`DynObserver`] from three async closures.
pub fn create<T, N, NF, E, EF, C, CF>(next: N, error: E, completed: C) -> DynObserver<T>
where
  T: Send + 'static,
  N: Fn(T) -> NF + Send + Sync + 'static,
  NF: Future<Output = ()> + Send + 'static,
  E: Fn(RxError) -> EF + Send + Sync + 'static,
  EF: Future<Output = ()> + Send + 'static,
  C: Fn() -> CF + Send + Sync + 'static,
  CF: Future<Output = ()> + Send + 'static,
{
  Arc::new(AnonymousObserver::new(next, error, completed))
}

/// Builds a [`DynObserver`] that only cares about values. Errors are logged
/// and completion is ignored.
pub fn from_fn<T, N, NF>(next: N) -> DynObserver<T>
where
  T: Send + 'static,
  N: Fn(T) -> NF + Send + Sync + 'static,
  NF: Future<Output = ()> + Send + 'static,
{
  create(
    next,
    |e| async move { log::warn!("unhandled error reached a next-only observer: {e}") },
    || async {},
  )
}

// ============================================================================
// SynchronizedObserver
// ============================================================================

/// Serialises every call into `inner` through a gate, so producers on
/// different tasks may call it concurrently.
pub struct SynchronizedObserver<T> {
  gate: Arc<AsyncGate>,
  inner: DynObserver<T>,
}

impl<T: Send + 'static> SynchronizedObserver<T> {
  pub fn new(inner: DynObserver<T>) -> Self { Self::with_gate(inner, Arc::new(AsyncGate::default())) }

  /// Shares `gate` with other observers, serialising all of them together.
  pub fn with_gate(inner: DynObserver<T>, gate: Arc<AsyncGate>) -> Self {
    SynchronizedObserver { gate, inner }
  }
}

#[async_trait]
impl<T: Send + 'static> AsyncObserver<T> for SynchronizedObserver<T> {
  async fn on_next(&self, value: T) {
    let _ticket = self.gate.acquire().await;
    self.inner.on_next(value).await;
  }

  async fn on_error(&self, error: RxError) {
    let _ticket = self.gate.acquire().await;
    self.inner.on_error(error).await;
  }

  async fn on_completed(&self) {
    let _ticket = self.gate.acquire().await;
    self.inner.on_completed().await;
  }
}

// ============================================================================
// Subscriber - stops after terminal or dispose
// ============================================================================

/// Wraps a downstream observer and drops every call once a terminal
/// notification went through or the subscription was disposed.
///
/// Producers that do not own a gate of their own (closure-based creation
/// observables) hand this to user code, so neither a misbehaving closure nor
/// a late timer can reach the observer after teardown.
pub struct Subscriber<T> {
  stopped: AtomicBool,
  inner: DynObserver<T>,
}

impl<T: Send + 'static> Subscriber<T> {
  pub fn new(inner: DynObserver<T>) -> Arc<Self> {
    Arc::new(Subscriber { stopped: AtomicBool::new(false), inner })
  }

  #[inline]
  pub fn is_stopped(&self) -> bool { self.stopped.load(Ordering::Acquire) }
}

#[async_trait]
impl<T: Send + 'static> AsyncObserver<T> for Subscriber<T> {
  async fn on_next(&self, value: T) {
    if !self.is_stopped() {
      self.inner.on_next(value).await;
    }
  }

  async fn on_error(&self, error: RxError) {
    if !self.stopped.swap(true, Ordering::AcqRel) {
      self.inner.on_error(error).await;
    }
  }

  async fn on_completed(&self) {
    if !self.stopped.swap(true, Ordering::AcqRel) {
      self.inner.on_completed().await;
    }
  }
}

#[async_trait]
impl<T: Send + 'static> AsyncDisposable for Subscriber<T> {
  async fn dispose(&self) {
    if !self.stopped.swap(true, Ordering::AcqRel) {
      log::trace!("subscriber detached before its sequence terminated");
    }
  }

  fn is_disposed(&self) -> bool { self.is_stopped() }
}

#[cfg(test)]
mod test {
  use std::sync::atomic::AtomicUsize;

  use super::*;
  use crate::test_util::Recorder;

  #[tokio::test]
  async fn closure_observer_forwards_everything() {
    let sum = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));
    let (s, d) = (sum.clone(), done.clone());
    let observer = create(
      move |v: usize| {
        let s = s.clone();
        async move {
          s.fetch_add(v, Ordering::SeqCst);
        }
      },
      |_| async {},
      move || {
        let d = d.clone();
        async move {
          d.fetch_add(1, Ordering::SeqCst);
        }
      },
    );
    observer.on_next(10).await;
    observer.on_next(20).await;
    observer.on_completed().await;
    assert_eq!(sum.load(Ordering::SeqCst), 30);
    assert_eq!(done.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn notification_replays_on_observer() {
    let recorder = Recorder::new();
    let observer = recorder.observer();
    Notification::Next(1).accept(&*observer).await;
    Notification::Error(RxError::msg("bad")).accept(&*observer).await;
    assert_eq!(
      recorder.take(),
      vec![Notification::Next(1), Notification::Error(RxError::msg("bad"))]
    );
    assert!(Notification::<i32>::Completed.is_terminal());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn synchronized_observer_is_never_reentered() {
    struct OverlapTracker {
      inside: AtomicUsize,
      max: AtomicUsize,
    }

    #[async_trait]
    impl AsyncObserver<usize> for OverlapTracker {
      async fn on_next(&self, _: usize) {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.inside.fetch_sub(1, Ordering::SeqCst);
      }
      async fn on_error(&self, _: RxError) {}
      async fn on_completed(&self) {}
    }

    let tracker = Arc::new(OverlapTracker { inside: AtomicUsize::new(0), max: AtomicUsize::new(0) });
    let sync: DynObserver<usize> = Arc::new(SynchronizedObserver::<usize>::new(tracker.clone()));
    let tasks: Vec<_> = (0..8)
      .map(|i| {
        let sync = sync.clone();
        tokio::spawn(async move {
          for v in 0..20 {
            sync.on_next(i * 100 + v).await;
          }
        })
      })
      .collect();
    for t in tasks {
      t.await.unwrap();
    }
    assert_eq!(tracker.max.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn subscriber_drops_calls_after_terminal_or_dispose() {
    let recorder = Recorder::new();
    let subscriber = Subscriber::new(recorder.observer());
    subscriber.on_next(1).await;
    subscriber.on_completed().await;
    subscriber.on_next(2).await;
    subscriber.on_error(RxError::msg("late")).await;
    assert_eq!(recorder.take(), vec![Notification::Next(1), Notification::Completed]);

    let recorder = Recorder::new();
    let subscriber = Subscriber::new(recorder.observer());
    subscriber.dispose().await;
    subscriber.on_next(3).await;
    subscriber.on_completed().await;
    assert!(subscriber.is_disposed());
    assert!(recorder.take().is_empty());
  }
}
