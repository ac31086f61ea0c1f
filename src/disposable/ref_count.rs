use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use async_trait::async_trait;

use super::{empty, AsyncDisposable, DynDisposable};
use crate::rc::MutArc;

struct RefCountState {
  underlying: Option<DynDisposable>,
  primary_disposed: bool,
  count: usize,
}

/// Shares one disposable between a primary owner and any number of
/// dependents.
///
/// The wrapped resource is disposed, exactly once, when the primary owner has
/// disposed this handle *and* every dependent obtained from
/// [`get_dependent_disposable`](Self::get_dependent_disposable) has been
/// disposed as well.
#[derive(Clone)]
pub struct RefCountDisposable {
  state: MutArc<RefCountState>,
}

impl RefCountDisposable {
  pub fn new(underlying: DynDisposable) -> Self {
    RefCountDisposable {
      state: MutArc::own(RefCountState {
        underlying: Some(underlying),
        primary_disposed: false,
        count: 0,
      }),
    }
  }

  /// Returns a dependent handle keeping the wrapped resource alive until it
  /// is disposed. Once the resource is gone this returns an empty disposable.
  pub fn get_dependent_disposable(&self) -> DynDisposable {
    let mut state = self.state.rc_deref_mut();
    if state.underlying.is_none() {
      return empty();
    }
    state.count += 1;
    Arc::new(Dependent { parent: self.clone(), released: AtomicBool::new(false) })
  }

  /// Outstanding dependents.
  pub fn dependents(&self) -> usize { self.state.rc_deref_mut().count }

  async fn release(&self) {
    let underlying = {
      let mut state = self.state.rc_deref_mut();
      state.count = state.count.saturating_sub(1);
      if state.primary_disposed && state.count == 0 {
        state.underlying.take()
      } else {
        None
      }
    };
    if let Some(underlying) = underlying {
      underlying.dispose().await;
    }
  }
}

#[async_trait]
impl AsyncDisposable for RefCountDisposable {
  async fn dispose(&self) {
    let underlying = {
      let mut state = self.state.rc_deref_mut();
      if state.primary_disposed {
        return;
      }
      state.primary_disposed = true;
      if state.count == 0 {
        state.underlying.take()
      } else {
        None
      }
    };
    if let Some(underlying) = underlying {
      underlying.dispose().await;
    }
  }

  fn is_disposed(&self) -> bool { self.state.rc_deref_mut().underlying.is_none() }
}

struct Dependent {
  parent: RefCountDisposable,
  released: AtomicBool,
}

#[async_trait]
impl AsyncDisposable for Dependent {
  async fn dispose(&self) {
    if !self.released.swap(true, Ordering::AcqRel) {
      self.parent.release().await;
    }
  }

  fn is_disposed(&self) -> bool { self.released.load(Ordering::Acquire) }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{disposable::IntoDynDisposable, test_util::CountingDisposable};

  #[tokio::test]
  async fn primary_alone_disposes_underlying() {
    let inner = CountingDisposable::new();
    let rc = RefCountDisposable::new(inner.clone().into_dyn());
    rc.dispose().await;
    rc.dispose().await;
    assert_eq!(inner.count(), 1);
    assert!(rc.is_disposed());
  }

  #[tokio::test]
  async fn waits_for_last_dependent() {
    let inner = CountingDisposable::new();
    let rc = RefCountDisposable::new(inner.clone().into_dyn());
    let d1 = rc.get_dependent_disposable();
    let d2 = rc.get_dependent_disposable();
    assert_eq!(rc.dependents(), 2);

    rc.dispose().await;
    assert_eq!(inner.count(), 0);
    d1.dispose().await;
    d1.dispose().await;
    assert_eq!(inner.count(), 0);
    assert_eq!(rc.dependents(), 1);
    d2.dispose().await;
    assert_eq!(inner.count(), 1);
  }

  #[tokio::test]
  async fn dependents_released_before_primary() {
    let inner = CountingDisposable::new();
    let rc = RefCountDisposable::new(inner.clone().into_dyn());
    let d = rc.get_dependent_disposable();
    d.dispose().await;
    assert_eq!(inner.count(), 0);
    rc.dispose().await;
    assert_eq!(inner.count(), 1);
  }

  #[tokio::test]
  async fn dependent_after_release_is_empty() {
    let inner = CountingDisposable::new();
    let rc = RefCountDisposable::new(inner.clone().into_dyn());
    rc.dispose().await;
    let late = rc.get_dependent_disposable();
    assert_eq!(rc.dependents(), 0);
    late.dispose().await;
    assert_eq!(inner.count(), 1);
  }
}
