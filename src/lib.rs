//! # rxrust-async: asynchronous Reactive Extensions
//!
//! Observers, observables, disposables and schedulers whose every
//! notification is an `async fn`. Operators never re-enter downstream: each
//! one serialises its own notifications through an [`AsyncGate`], and every
//! subscription hands back a [`DynDisposable`] that releases all it started.
//!
//! ## Quick Start
//!
//! ```rust
//! use rxrust_async::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let windows = observable::from_iter(1..=6, scheduler::immediate())
//!   .buffer_with_count(2, 2);
//! let subscription = windows
//!   .subscribe_with(|chunk| async move { println!("{chunk:?}") }, |_| async {}, || async {})
//!   .await;
//! subscription.dispose().await;
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`AsyncObserver`] | Consumes `on_next`, `on_error` and `on_completed` |
//! | [`AsyncObservable`] | Produces notifications for each subscriber |
//! | [`AsyncDisposable`] | Handle releasing a subscription's resources |
//! | [`AsyncScheduler`] | Runs work now, later or periodically |
//! | [`VirtualTimeScheduler`] | Manually advanced clock for tests |
//!
//! [`AsyncGate`]: gate::AsyncGate
//! [`DynDisposable`]: disposable::DynDisposable
//! [`AsyncObserver`]: observer::AsyncObserver
//! [`AsyncObservable`]: observable::AsyncObservable
//! [`AsyncDisposable`]: disposable::AsyncDisposable
//! [`AsyncScheduler`]: scheduler::AsyncScheduler
//! [`VirtualTimeScheduler`]: scheduler::VirtualTimeScheduler

pub mod disposable;
pub mod error;
pub mod gate;
pub mod observable;
pub mod observer;
pub mod ops;
pub mod prelude;
pub mod rc;
pub mod scheduler;
pub mod subject;

#[cfg(test)]
mod test_util;

pub use prelude::*;
