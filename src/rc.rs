use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared, mutably-borrowable state for the synchronous parts of the core.
///
/// Critical sections guarded by `MutArc` never await. State that must stay
/// locked across an await point lives behind an [`AsyncGate`] instead.
///
/// [`AsyncGate`]: crate::gate::AsyncGate
#[derive(Default)]
pub struct MutArc<T>(Arc<Mutex<T>>);

impl<T> MutArc<T> {
  pub fn own(t: T) -> Self { Self(Arc::new(Mutex::new(t))) }

  /// Locks the state. A panic in another holder does not poison the value
  /// for everyone else; the guard is recovered.
  #[inline]
  pub fn rc_deref_mut(&self) -> MutexGuard<'_, T> {
    self.0.lock().unwrap_or_else(PoisonError::into_inner)
  }

  #[inline]
  pub fn ptr_eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}

impl<T> Clone for MutArc<T> {
  #[inline]
  fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> From<T> for MutArc<T> {
  fn from(t: T) -> Self { Self::own(t) }
}
