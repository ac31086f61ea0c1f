//! Error types flowing through the async reactive core.
//!
//! [`RxError`] is the value carried by `on_error`. It is cheap to clone so a
//! single upstream failure can fan out to every open window, group or subject
//! without re-allocating. Programming errors (misuse of a disposable or of the
//! virtual clock) have their own enums and are returned to the caller instead
//! of being turned into notifications.

use std::{error::Error as StdError, sync::Arc};

/// Error delivered to [`AsyncObserver::on_error`].
///
/// [`AsyncObserver::on_error`]: crate::observer::AsyncObserver::on_error
#[derive(Debug, Clone, thiserror::Error)]
pub enum RxError {
  /// The surrounding work was cancelled before it could finish.
  #[error("operation was cancelled")]
  Cancelled,
  /// An error raised by user code: a selector, projection or handler.
  #[error("{0}")]
  User(Arc<dyn StdError + Send + Sync>),
  /// A plain message error.
  #[error("{0}")]
  Message(Arc<str>),
  /// Establishing a subscription failed.
  #[error("subscription failed: {0}")]
  Subscribe(Arc<str>),
}

impl RxError {
  /// Creates a [`RxError::Message`] from anything displayable.
  pub fn msg(message: impl Into<String>) -> Self { RxError::Message(message.into().into()) }

  /// Wraps a foreign error raised by user code.
  pub fn user<E>(err: E) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    RxError::User(Arc::new(err))
  }

  #[inline]
  pub fn is_cancelled(&self) -> bool { matches!(self, RxError::Cancelled) }
}

impl From<std::io::Error> for RxError {
  fn from(err: std::io::Error) -> Self { RxError::user(err) }
}

/// Misuse of a disposable container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DisposableError {
  /// A single-assignment disposable was given a second inner resource.
  #[error("disposable has already been assigned")]
  AlreadyAssigned,
}

/// Misuse of the virtual clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
  /// `advance_to`/`advance_by` was called while the clock was already being
  /// advanced, typically from inside a scheduled action.
  #[error("virtual clock is already being advanced")]
  ReentrantAdvance,
  /// The requested time lies before the current virtual time.
  #[error("cannot move the virtual clock backward from {now:?} to {target:?}")]
  ClockBackwards {
    now: std::time::Duration,
    target: std::time::Duration,
  },
}
