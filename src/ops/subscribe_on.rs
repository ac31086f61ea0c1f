//! SubscribeOn: subscribe to and dispose of the source on a scheduler.

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use async_trait::async_trait;

use crate::{
  disposable::{AsyncDisposable, DynDisposable, IntoDynDisposable, SerialDisposable, SingleAssignmentDisposable},
  error::RxError,
  observable::{subscribe_safe, AsyncObservable, DynObservable},
  observer::DynObserver,
  scheduler::{action, SchedulerRef},
};

pub fn subscribe_on<T: Send + 'static>(source: DynObservable<T>, scheduler: SchedulerRef) -> DynObservable<T> {
  Arc::new(SubscribeOnObservable { source, scheduler })
}

struct SubscribeOnObservable<T> {
  source: DynObservable<T>,
  scheduler: SchedulerRef,
}

#[async_trait]
impl<T: Send + 'static> AsyncObservable<T> for SubscribeOnObservable<T> {
  async fn subscribe(&self, observer: DynObserver<T>) -> Result<DynDisposable, RxError> {
    let serial = SerialDisposable::new();
    let pending = SingleAssignmentDisposable::new();
    serial.assign(Arc::new(pending.clone())).await;

    let source = self.source.clone();
    let scheduler = self.scheduler.clone();
    let target = serial.clone();
    let work = self
      .scheduler
      .schedule(action(move |_| async move {
        log::trace!("subscribing on the target scheduler");
        let subscription = subscribe_safe(&source, observer).await;
        target.assign(ScheduledDisposable::new(scheduler, subscription)).await;
      }))
      .await;
    if pending.assign(work).await.is_err() {
      log::warn!("scheduled subscription was assigned twice");
    }
    Ok(serial.into_dyn())
  }
}

/// Disposes `inner` on `scheduler`.
struct ScheduledDisposable {
  scheduler: SchedulerRef,
  inner: DynDisposable,
  disposed: AtomicBool,
}

impl ScheduledDisposable {
  fn new(scheduler: SchedulerRef, inner: DynDisposable) -> DynDisposable {
    Arc::new(ScheduledDisposable { scheduler, inner, disposed: AtomicBool::new(false) })
  }
}

#[async_trait]
impl AsyncDisposable for ScheduledDisposable {
  async fn dispose(&self) {
    if self.disposed.swap(true, Ordering::AcqRel) {
      return;
    }
    let inner = self.inner.clone();
    // the returned handle only cancels the disposal itself
    let _ = self.scheduler.schedule(action(move |_| async move { inner.dispose().await })).await;
  }

  fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }
}
