//! Synchronize: serialise notifications from a source that may call its
//! observer from several tasks at once.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
  disposable::DynDisposable,
  error::RxError,
  gate::AsyncGate,
  observable::{AsyncObservable, DynObservable},
  observer::{DynObserver, SynchronizedObserver},
};

pub fn synchronize<T: Send + 'static>(source: DynObservable<T>) -> DynObservable<T> {
  Arc::new(SynchronizeObservable { source, gate: None })
}

/// Like [`synchronize`], but every subscription shares `gate`, so several
/// sequences synchronised on the same gate never overlap either.
pub fn synchronize_with<T: Send + 'static>(source: DynObservable<T>, gate: Arc<AsyncGate>) -> DynObservable<T> {
  Arc::new(SynchronizeObservable { source, gate: Some(gate) })
}

struct SynchronizeObservable<T> {
  source: DynObservable<T>,
  gate: Option<Arc<AsyncGate>>,
}

#[async_trait]
impl<T: Send + 'static> AsyncObservable<T> for SynchronizeObservable<T> {
  async fn subscribe(&self, observer: DynObserver<T>) -> Result<DynDisposable, RxError> {
    let observer: DynObserver<T> = match &self.gate {
      Some(gate) => Arc::new(SynchronizedObserver::with_gate(observer, gate.clone())),
      None => Arc::new(SynchronizedObserver::new(observer)),
    };
    self.source.subscribe(observer).await
  }
}
