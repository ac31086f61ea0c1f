use async_trait::async_trait;

use super::{AsyncDisposable, DynDisposable};
use crate::rc::MutArc;

#[derive(Default)]
struct SerialState {
  current: Option<DynDisposable>,
  disposed: bool,
}

/// Holds one replaceable inner disposable.
///
/// Assigning swaps in the new resource and disposes the previous one once the
/// swap is done and no lock is held. After the serial disposable itself has
/// been disposed, every assignment disposes its argument immediately.
#[derive(Clone, Default)]
pub struct SerialDisposable {
  state: MutArc<SerialState>,
}

impl SerialDisposable {
  pub fn new() -> Self { Self::default() }

  pub async fn assign(&self, inner: DynDisposable) {
    let to_dispose = {
      let mut state = self.state.rc_deref_mut();
      if state.disposed {
        Some(inner)
      } else {
        state.current.replace(inner)
      }
    };
    if let Some(old) = to_dispose {
      old.dispose().await;
    }
  }

  pub fn current(&self) -> Option<DynDisposable> { self.state.rc_deref_mut().current.clone() }
}

#[async_trait]
impl AsyncDisposable for SerialDisposable {
  async fn dispose(&self) {
    let current = {
      let mut state = self.state.rc_deref_mut();
      if state.disposed {
        return;
      }
      state.disposed = true;
      state.current.take()
    };
    if let Some(current) = current {
      current.dispose().await;
    }
  }

  fn is_disposed(&self) -> bool { self.state.rc_deref_mut().disposed }
}
