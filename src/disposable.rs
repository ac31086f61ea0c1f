//! Releasable resources and cancellation handles.
//!
//! Every subscription, timer and inner subscription in the core is
//! represented by an [`AsyncDisposable`]. Disposal is asynchronous because
//! tearing down a subscription may itself need to talk to an upstream source,
//! and it is always idempotent: the first call does the work, every later call
//! is a no-op.
//!
//! The containers in the sub-modules compose teardown paths:
//!
//! | Type | Behaviour |
//! |------|-----------|
//! | [`SingleAssignmentDisposable`] | accepts exactly one inner resource |
//! | [`SerialDisposable`] | swaps its inner resource, disposing the old one |
//! | [`CompositeDisposable`] | owns a growable set of resources |
//! | [`StableCompositeDisposable`] | owns a fixed set of resources |
//! | [`RefCountDisposable`] | disposes once the owner and all dependents released |

use std::{
  future::Future,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use tokio_util::sync::CancellationToken;

use crate::rc::MutArc;

mod composite;
mod ref_count;
mod serial;
mod single_assignment;

pub use composite::{CompositeDisposable, StableCompositeDisposable};
pub use ref_count::RefCountDisposable;
pub use serial::SerialDisposable;
pub use single_assignment::SingleAssignmentDisposable;

/// A resource that can be released exactly once.
#[async_trait]
pub trait AsyncDisposable: Send + Sync {
  /// Releases the resource. Calling it again has no effect.
  async fn dispose(&self);

  fn is_disposed(&self) -> bool;
}

/// Shared handle to a type-erased disposable.
pub type DynDisposable = Arc<dyn AsyncDisposable>;

/// Converts a concrete disposable into a [`DynDisposable`].
pub trait IntoDynDisposable {
  fn into_dyn(self) -> DynDisposable;
}

impl<D: AsyncDisposable + 'static> IntoDynDisposable for D {
  #[inline]
  fn into_dyn(self) -> DynDisposable { Arc::new(self) }
}

// ==================== Empty ====================

struct EmptyDisposable;

#[async_trait]
impl AsyncDisposable for EmptyDisposable {
  async fn dispose(&self) {}

  fn is_disposed(&self) -> bool { true }
}

static EMPTY: Lazy<DynDisposable> = Lazy::new(|| Arc::new(EmptyDisposable));

/// A disposable that owns nothing.
pub fn empty() -> DynDisposable { EMPTY.clone() }

// ==================== Anonymous ====================

type DisposeAction = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Runs an async teardown closure the first time it is disposed.
pub struct AnonymousDisposable {
  action: MutArc<Option<DisposeAction>>,
}

impl AnonymousDisposable {
  pub fn new<F, Fut>(f: F) -> Self
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    AnonymousDisposable {
      action: MutArc::own(Some(Box::new(move || Box::pin(f()) as BoxFuture<'static, ()>))),
    }
  }
}

#[async_trait]
impl AsyncDisposable for AnonymousDisposable {
  async fn dispose(&self) {
    let action = self.action.rc_deref_mut().take();
    if let Some(action) = action {
      action().await;
    }
  }

  fn is_disposed(&self) -> bool { self.action.rc_deref_mut().is_none() }
}

/// Creates a [`DynDisposable`] that runs `f` once when disposed.
pub fn from_fn<F, Fut>(f: F) -> DynDisposable
where
  F: FnOnce() -> Fut + Send + 'static,
  Fut: Future<Output = ()> + Send + 'static,
{
  Arc::new(AnonymousDisposable::new(f))
}

// ==================== Boolean ====================

/// A flag-only disposable, useful for polling "has this been disposed?" from
/// a producer loop.
#[derive(Clone, Default)]
pub struct BooleanDisposable {
  disposed: Arc<AtomicBool>,
}

impl BooleanDisposable {
  pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl AsyncDisposable for BooleanDisposable {
  async fn dispose(&self) { self.disposed.store(true, Ordering::Release); }

  fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }
}

// ==================== Cancellation ====================

/// Cancels a [`CancellationToken`] when disposed.
#[derive(Clone, Default)]
pub struct CancellationDisposable {
  token: CancellationToken,
}

impl CancellationDisposable {
  pub fn new() -> Self { Self::default() }

  pub fn from_token(token: CancellationToken) -> Self { CancellationDisposable { token } }

  pub fn token(&self) -> CancellationToken { self.token.clone() }
}

#[async_trait]
impl AsyncDisposable for CancellationDisposable {
  async fn dispose(&self) { self.token.cancel(); }

  fn is_disposed(&self) -> bool { self.token.is_cancelled() }
}
