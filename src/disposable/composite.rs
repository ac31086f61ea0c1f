use std::{
  fmt::{Debug, Formatter},
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use async_trait::async_trait;
use smallvec::SmallVec;

use super::{AsyncDisposable, DynDisposable};
use crate::rc::MutArc;

#[derive(Default)]
struct Inner {
  closed: bool,
  teardown: SmallVec<[DynDisposable; 2]>,
}

impl Debug for Inner {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Inner")
      .field("closed", &self.closed)
      .field("teardown_count", &self.teardown.len())
      .finish()
  }
}

/// A thread-safe, growable group of disposables released together.
///
/// Adding to a composite that is already disposed disposes the new member
/// immediately. Removing a member disposes it.
#[derive(Clone, Default)]
pub struct CompositeDisposable(MutArc<Inner>);

impl Debug for CompositeDisposable {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("CompositeDisposable").field(&*self.0.rc_deref_mut()).finish()
  }
}

impl CompositeDisposable {
  pub fn new() -> Self { Self::default() }

  pub async fn add(&self, disposable: DynDisposable) {
    let rejected = {
      let mut inner = self.0.rc_deref_mut();
      if inner.closed {
        Some(disposable)
      } else {
        inner.teardown.retain(|v| !v.is_disposed());
        inner.teardown.push(disposable);
        None
      }
    };
    if let Some(rejected) = rejected {
      rejected.dispose().await;
    }
  }

  /// Removes `disposable` and disposes it. Returns whether it was a member.
  pub async fn remove(&self, disposable: &DynDisposable) -> bool {
    let removed = {
      let mut inner = self.0.rc_deref_mut();
      inner
        .teardown
        .iter()
        .position(|v| Arc::ptr_eq(v, disposable))
        .map(|pos| inner.teardown.remove(pos))
    };
    match removed {
      Some(removed) => {
        removed.dispose().await;
        true
      }
      None => false,
    }
  }

  /// Number of live members.
  pub fn len(&self) -> usize { self.0.rc_deref_mut().teardown.len() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[async_trait]
impl AsyncDisposable for CompositeDisposable {
  async fn dispose(&self) {
    let teardown = {
      let mut inner = self.0.rc_deref_mut();
      if inner.closed {
        return;
      }
      inner.closed = true;
      std::mem::take(&mut inner.teardown)
    };
    for v in teardown {
      v.dispose().await;
    }
  }

  fn is_disposed(&self) -> bool { self.0.rc_deref_mut().closed }
}

/// A fixed group of disposables, released together exactly once.
pub struct StableCompositeDisposable {
  disposed: AtomicBool,
  members: MutArc<Vec<DynDisposable>>,
}

impl StableCompositeDisposable {
  pub fn new(members: impl IntoIterator<Item = DynDisposable>) -> Self {
    StableCompositeDisposable {
      disposed: AtomicBool::new(false),
      members: MutArc::own(members.into_iter().collect()),
    }
  }

  /// Shorthand for the common two-member case.
  pub fn pair(first: DynDisposable, second: DynDisposable) -> DynDisposable {
    Arc::new(Self::new([first, second]))
  }
}

#[async_trait]
impl AsyncDisposable for StableCompositeDisposable {
  async fn dispose(&self) {
    if self.disposed.swap(true, Ordering::AcqRel) {
      return;
    }
    let members = std::mem::take(&mut *self.members.rc_deref_mut());
    for member in members {
      member.dispose().await;
    }
  }

  fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{disposable::IntoDynDisposable, test_util::CountingDisposable};

  #[tokio::test]
  async fn dispose_releases_every_member_once() {
    let composite = CompositeDisposable::new();
    let members: Vec<_> = (0..3).map(|_| CountingDisposable::new()).collect();
    for m in &members {
      composite.add(m.clone().into_dyn()).await;
    }
    assert_eq!(composite.len(), 3);

    composite.dispose().await;
    composite.dispose().await;
    assert!(members.iter().all(|m| m.count() == 1));
    assert!(composite.is_empty());
  }

  #[tokio::test]
  async fn add_after_dispose_disposes_immediately() {
    let composite = CompositeDisposable::new();
    composite.dispose().await;
    let late = CountingDisposable::new();
    composite.add(late.clone().into_dyn()).await;
    assert_eq!(late.count(), 1);
    assert!(composite.is_empty());
  }

  #[tokio::test]
  async fn remove_disposes_member() {
    let composite = CompositeDisposable::new();
    let a = CountingDisposable::new();
    let a_dyn = a.clone().into_dyn();
    let b = CountingDisposable::new();
    composite.add(a_dyn.clone()).await;
    composite.add(b.clone().into_dyn()).await;

    assert!(composite.remove(&a_dyn).await);
    assert!(!composite.remove(&a_dyn).await);
    assert_eq!(a.count(), 1);
    assert_eq!(b.count(), 0);
    assert_eq!(composite.len(), 1);
  }

  #[tokio::test]
  async fn disposed_members_are_pruned_on_add() {
    let composite = CompositeDisposable::new();
    let a = CountingDisposable::new();
    composite.add(a.clone().into_dyn()).await;
    a.dispose().await;
    composite.add(CountingDisposable::new().into_dyn()).await;
    assert_eq!(composite.len(), 1);
  }

  #[tokio::test]
  async fn stable_composite_disposes_once() {
    let a = CountingDisposable::new();
    let b = CountingDisposable::new();
    let stable = StableCompositeDisposable::pair(a.clone().into_dyn(), b.clone().into_dyn());
    stable.dispose().await;
    stable.dispose().await;
    assert!(stable.is_disposed());
    assert_eq!((a.count(), b.count()), (1, 1));
  }
}
