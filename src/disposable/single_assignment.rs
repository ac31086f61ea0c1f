use std::sync::Arc;

use async_trait::async_trait;

use super::{AsyncDisposable, DynDisposable};
use crate::{error::DisposableError, rc::MutArc};

enum Slot {
  Unassigned,
  Assigned(DynDisposable),
  Disposed,
}

/// Holds at most one inner disposable for its whole life.
///
/// The first [`assign`](Self::assign) stores the inner resource. Assigning a
/// different resource afterwards is a programming error and returns
/// [`DisposableError::AlreadyAssigned`]. If the container was disposed before
/// any assignment, a later `assign` disposes its argument right away instead
/// of retaining it.
#[derive(Clone)]
pub struct SingleAssignmentDisposable {
  slot: MutArc<Slot>,
}

impl Default for SingleAssignmentDisposable {
  fn default() -> Self { SingleAssignmentDisposable { slot: MutArc::own(Slot::Unassigned) } }
}

impl SingleAssignmentDisposable {
  pub fn new() -> Self { Self::default() }

  pub async fn assign(&self, inner: DynDisposable) -> Result<(), DisposableError> {
    let dispose_now = {
      let mut slot = self.slot.rc_deref_mut();
      if let Slot::Assigned(current) = &*slot {
        return if Arc::ptr_eq(current, &inner) {
          Ok(())
        } else {
          Err(DisposableError::AlreadyAssigned)
        };
      }
      if matches!(&*slot, Slot::Unassigned) {
        *slot = Slot::Assigned(inner);
        return Ok(());
      }
      inner
    };
    dispose_now.dispose().await;
    Ok(())
  }

  /// `true` once an inner resource has been accepted, even if it has since
  /// been disposed.
  pub fn is_assigned(&self) -> bool { !matches!(&*self.slot.rc_deref_mut(), Slot::Unassigned) }
}

#[async_trait]
impl AsyncDisposable for SingleAssignmentDisposable {
  async fn dispose(&self) {
    let previous = std::mem::replace(&mut *self.slot.rc_deref_mut(), Slot::Disposed);
    if let Slot::Assigned(inner) = previous {
      inner.dispose().await;
    }
  }

  fn is_disposed(&self) -> bool { matches!(&*self.slot.rc_deref_mut(), Slot::Disposed) }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{disposable::IntoDynDisposable, test_util::CountingDisposable};

  #[tokio::test]
  async fn second_assignment_is_rejected() {
    let sad = SingleAssignmentDisposable::new();
    let first = CountingDisposable::new();
    let second = CountingDisposable::new();
    assert!(sad.assign(first.clone().into_dyn()).await.is_ok());
    assert_eq!(
      sad.assign(second.clone().into_dyn()).await,
      Err(DisposableError::AlreadyAssigned)
    );
    assert_eq!(second.count(), 0);
    assert_eq!(first.count(), 0);
  }

  #[tokio::test]
  async fn reassigning_the_same_inner_is_accepted() {
    let sad = SingleAssignmentDisposable::new();
    let inner = CountingDisposable::new().into_dyn();
    sad.assign(inner.clone()).await.unwrap();
    assert!(sad.assign(inner).await.is_ok());
  }

  #[tokio::test]
  async fn assign_then_dispose_disposes_inner_once() {
    let sad = SingleAssignmentDisposable::new();
    let inner = CountingDisposable::new();
    sad.assign(inner.clone().into_dyn()).await.unwrap();
    sad.dispose().await;
    sad.dispose().await;
    assert_eq!(inner.count(), 1);
    assert!(sad.is_disposed());
    assert!(sad.is_assigned());
  }

  #[tokio::test]
  async fn dispose_then_assign_disposes_argument() {
    let sad = SingleAssignmentDisposable::new();
    sad.dispose().await;
    let inner = CountingDisposable::new();
    assert!(sad.assign(inner.clone().into_dyn()).await.is_ok());
    assert_eq!(inner.count(), 1);
    sad.dispose().await;
    assert_eq!(inner.count(), 1);
  }
}
