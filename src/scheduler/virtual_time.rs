//! Deterministic virtual-time scheduler.
//!
//! Virtual time only moves when [`VirtualTimeScheduler::advance_to`] or
//! [`VirtualTimeScheduler::advance_by`] is awaited. Due work is executed in
//! order of due time, FIFO among items due at the same instant, and each
//! action is awaited to completion before the next one starts, so a test
//! driving operators through this scheduler observes one exact interleaving.
//!
//! ```rust
//! use std::time::Duration;
//! use rxrust_async::scheduler::{action, AsyncScheduler, VirtualTimeScheduler};
//!
//! # tokio_test_block_on(async {
//! let scheduler = VirtualTimeScheduler::new();
//! scheduler.schedule_after(Duration::from_millis(5), action(|_| async {})).await;
//! scheduler.advance_by(Duration::from_millis(5)).await.unwrap();
//! assert_eq!(scheduler.pending(), 0);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #   tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::{
  cmp::Ordering,
  collections::BinaryHeap,
  sync::{
    atomic::{AtomicBool, Ordering as AtomicOrdering},
    Arc,
  },
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{action, Action, AsyncScheduler, Duration, PeriodicAction};
use crate::{
  disposable::{CancellationDisposable, DynDisposable, IntoDynDisposable},
  error::{RxError, SchedulerError},
  rc::MutArc,
};

enum Job {
  Once(Action),
  Periodic { period: Duration, action: PeriodicAction },
}

struct ScheduledItem {
  due: Duration,
  seq: u64,
  token: CancellationToken,
  job: Job,
}

impl PartialEq for ScheduledItem {
  fn eq(&self, other: &Self) -> bool { self.due == other.due && self.seq == other.seq }
}

impl Eq for ScheduledItem {}

impl PartialOrd for ScheduledItem {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for ScheduledItem {
  fn cmp(&self, other: &Self) -> Ordering {
    // Min-heap: earlier times first, then FIFO by sequence number
    other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
  }
}

#[derive(Default)]
struct VirtualState {
  clock: Duration,
  queue: BinaryHeap<ScheduledItem>,
  next_seq: u64,
}

impl VirtualState {
  fn push(&mut self, due: Duration, token: CancellationToken, job: Job) {
    let seq = self.next_seq;
    self.next_seq += 1;
    self.queue.push(ScheduledItem { due, seq, token, job });
  }

  /// Pops the next live item due at or before `target`, dropping cancelled
  /// items on the way.
  fn pop_due(&mut self, target: Duration) -> Option<ScheduledItem> {
    while let Some(head) = self.queue.peek() {
      if head.due > target {
        return None;
      }
      let item = self.queue.pop()?;
      if !item.token.is_cancelled() {
        return Some(item);
      }
    }
    None
  }
}

/// A scheduler with an explicit, manually advanced clock.
#[derive(Clone, Default)]
pub struct VirtualTimeScheduler {
  state: MutArc<VirtualState>,
  advancing: Arc<AtomicBool>,
}

struct AdvanceGuard<'a>(&'a AtomicBool);

impl Drop for AdvanceGuard<'_> {
  fn drop(&mut self) { self.0.store(false, AtomicOrdering::Release); }
}

impl VirtualTimeScheduler {
  pub fn new() -> Self { Self::default() }

  /// Number of scheduled items not yet executed or discarded.
  pub fn pending(&self) -> usize {
    self.state.rc_deref_mut().queue.iter().filter(|i| !i.token.is_cancelled()).count()
  }

  /// Executes every item due at or before `target`, then sets the clock to
  /// `target`.
  ///
  /// Moving the clock backward, or calling this while another advance is in
  /// progress (for example from inside a scheduled action), is a usage error.
  pub async fn advance_to(&self, target: Duration) -> Result<(), SchedulerError> {
    if self.advancing.swap(true, AtomicOrdering::AcqRel) {
      return Err(SchedulerError::ReentrantAdvance);
    }
    let _guard = AdvanceGuard(&self.advancing);

    let now = self.now();
    if target < now {
      return Err(SchedulerError::ClockBackwards { now, target });
    }
    log::debug!("advancing virtual clock from {now:?} to {target:?}");

    loop {
      let item = {
        let mut state = self.state.rc_deref_mut();
        let item = state.pop_due(target);
        if let Some(item) = &item {
          state.clock = item.due;
        }
        item
      };
      let Some(ScheduledItem { due, token, job, .. }) = item else {
        break;
      };
      match job {
        Job::Once(action) => action(token).await,
        Job::Periodic { period, mut action } => {
          action(token.clone()).await;
          if !token.is_cancelled() {
            let next = due + period.max(Duration::from_nanos(1));
            self.state.rc_deref_mut().push(next, token, Job::Periodic { period, action });
          }
        }
      }
    }

    self.state.rc_deref_mut().clock = target;
    Ok(())
  }

  pub async fn advance_by(&self, duration: Duration) -> Result<(), SchedulerError> {
    let target = self.now() + duration;
    self.advance_to(target).await
  }

  fn enqueue(&self, due: Duration, job: Job) -> DynDisposable {
    let token = CancellationToken::new();
    let mut state = self.state.rc_deref_mut();
    let due = state.clock + due;
    state.push(due, token.clone(), job);
    CancellationDisposable::from_token(token).into_dyn()
  }
}

#[async_trait]
impl AsyncScheduler for VirtualTimeScheduler {
  fn now(&self) -> Duration { self.state.rc_deref_mut().clock }

  async fn schedule(&self, action: Action) -> DynDisposable { self.enqueue(Duration::ZERO, Job::Once(action)) }

  async fn schedule_after(&self, due: Duration, action: Action) -> DynDisposable {
    self.enqueue(due, Job::Once(action))
  }

  async fn schedule_periodic(&self, period: Duration, action: PeriodicAction) -> DynDisposable {
    self.enqueue(period, Job::Periodic { period, action })
  }

  /// Completes once another task advances the clock past `due`. Awaiting this
  /// from inside an action executed by `advance_to` never completes, because
  /// the advance waits for that action first.
  async fn delay(&self, due: Duration, token: CancellationToken) -> Result<(), RxError> {
    let (tx, rx) = futures::channel::oneshot::channel::<()>();
    let timer = self
      .schedule_after(
        due,
        action(move |_| async move {
          let _ = tx.send(());
        }),
      )
      .await;
    let res = tokio::select! {
      _ = token.cancelled() => Err(RxError::Cancelled),
      fired = rx => fired.map_err(|_| RxError::Cancelled),
    };
    timer.dispose().await;
    res
  }
}
