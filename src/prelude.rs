//! Prelude module for convenient imports

// Modules holding the creation functions and schedulers
pub use crate::{observable, scheduler};
// Core traits
pub use crate::{
  disposable::{AsyncDisposable, IntoDynDisposable},
  observable::{AsyncObservable, FlattenExt, ObservableExt},
  observer::AsyncObserver,
  scheduler::AsyncScheduler,
};
// Type-erased handles
pub use crate::{
  disposable::DynDisposable,
  observable::DynObservable,
  observer::DynObserver,
  scheduler::SchedulerRef,
};
// Disposables
pub use crate::disposable::{
  BooleanDisposable, CancellationDisposable, CompositeDisposable, RefCountDisposable, SerialDisposable,
  SingleAssignmentDisposable, StableCompositeDisposable,
};
// Errors
pub use crate::error::{DisposableError, RxError, SchedulerError};
// Everything else
pub use crate::{
  gate::{AsyncGate, AsyncQueueLock},
  observer::{Notification, Subscriber, SynchronizedObserver},
  ops::group_by::GroupedObservable,
  scheduler::VirtualTimeScheduler,
  subject::SequentialSubject,
};
