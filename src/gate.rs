//! Asynchronous serialization primitives.
//!
//! [`AsyncGate`] is the mutual-exclusion lock every operator uses to funnel
//! concurrent producer callbacks into a single, ordered chain of calls on its
//! downstream observer. The gate owns the per-subscription state it protects,
//! so that state can only be touched while holding the gate.
//!
//! [`AsyncQueueLock`] is the re-entrancy friendly sibling: work submitted while
//! another submission is draining is queued and executed by the drainer.

use std::{
  collections::VecDeque,
  ops::{Deref, DerefMut},
};

use futures::future::BoxFuture;
use tokio::sync::{Mutex, MutexGuard};

use crate::rc::MutArc;

/// FIFO, non-reentrant asynchronous lock.
///
/// `acquire` returns immediately when the gate is free and suspends
/// otherwise. Waiters are granted the gate strictly in arrival order, and
/// dropping a [`GateTicket`] hands the gate straight to the head of the queue.
/// Dropping an `acquire` future that is still waiting removes the waiter
/// without handing anything to it.
///
/// Acquiring the gate a second time from the flow that already holds it
/// deadlocks; operators never call back into their own gate while holding it.
#[derive(Debug, Default)]
pub struct AsyncGate<S = ()> {
  state: Mutex<S>,
}

/// Exclusive access to an [`AsyncGate`]; releases on drop.
#[must_use = "the gate is released as soon as the ticket is dropped"]
pub struct GateTicket<'a, S> {
  guard: MutexGuard<'a, S>,
}

impl<S> AsyncGate<S> {
  pub fn new(state: S) -> Self { AsyncGate { state: Mutex::new(state) } }

  /// Waits for exclusive ownership of the gate.
  pub async fn acquire(&self) -> GateTicket<'_, S> {
    GateTicket { guard: self.state.lock().await }
  }

  /// Takes the gate only if it is free right now.
  pub fn try_acquire(&self) -> Option<GateTicket<'_, S>> {
    self.state.try_lock().ok().map(|guard| GateTicket { guard })
  }

  pub fn into_inner(self) -> S { self.state.into_inner() }
}

impl<S> Deref for GateTicket<'_, S> {
  type Target = S;
  #[inline]
  fn deref(&self) -> &S { &self.guard }
}

impl<S> DerefMut for GateTicket<'_, S> {
  #[inline]
  fn deref_mut(&mut self) -> &mut S { &mut self.guard }
}

type Job = BoxFuture<'static, ()>;

#[derive(Default)]
struct QueueState {
  jobs: VecDeque<Job>,
  draining: bool,
}

/// Queued-continuation lock.
///
/// [`AsyncQueueLock::run`] enqueues a job. When nobody is draining the queue
/// the caller becomes the drainer and executes jobs one after another until
/// the queue is empty. A job submitted while a drain is in progress, including
/// one submitted from inside a running job, is only queued: the call returns
/// at once and the drainer picks it up. Jobs therefore never overlap and never
/// nest, no matter how they are submitted.
#[derive(Clone, Default)]
pub struct AsyncQueueLock {
  state: MutArc<QueueState>,
}

impl AsyncQueueLock {
  pub fn new() -> Self { Self::default() }

  pub async fn run(&self, job: impl std::future::Future<Output = ()> + Send + 'static) {
    {
      let mut state = self.state.rc_deref_mut();
      state.jobs.push_back(Box::pin(job));
      if state.draining {
        return;
      }
      state.draining = true;
    }
    self.drain().await
  }

  /// Runs queued jobs until the queue is empty. The caller must own the
  /// drain. If this future is dropped part-way, the drain is released and the
  /// jobs still queued move to a fresh tokio task.
  async fn drain(&self) {
    let mut guard = DrainGuard { lock: self, finished: false };
    loop {
      let next = {
        let mut state = self.state.rc_deref_mut();
        let next = state.jobs.pop_front();
        if next.is_none() {
          state.draining = false;
        }
        next
      };
      match next {
        Some(job) => job.await,
        None => break,
      }
    }
    guard.finished = true;
  }

  /// Number of jobs waiting for the drainer.
  pub fn pending(&self) -> usize { self.state.rc_deref_mut().jobs.len() }
}

struct DrainGuard<'a> {
  lock: &'a AsyncQueueLock,
  finished: bool,
}

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    if self.finished {
      return;
    }
    let mut state = self.lock.state.rc_deref_mut();
    if state.jobs.is_empty() {
      state.draining = false;
      return;
    }
    match tokio::runtime::Handle::try_current() {
      Ok(runtime) => {
        log::debug!("drainer cancelled, resuming {} queued job(s) on a new task", state.jobs.len());
        let lock = self.lock.clone();
        runtime.spawn(async move { lock.drain().await });
      }
      Err(_) => {
        log::warn!("drainer cancelled outside a runtime, next run resumes {} job(s)", state.jobs.len());
        state.draining = false;
      }
    }
  }
}

#[cfg(test)]
mod test {
  use std::{
    sync::{
      atomic::{AtomicUsize, Ordering},
      Arc,
    },
    time::Duration,
  };

  use super::*;

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn intervals_never_overlap() {
    let gate = Arc::new(AsyncGate::new(()));
    let clock = Arc::new(AtomicUsize::new(0));
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut handles = vec![];
    for id in 0..16usize {
      let gate = gate.clone();
      let clock = clock.clone();
      let log = log.clone();
      handles.push(tokio::spawn(async move {
        let _ticket = gate.acquire().await;
        let start = clock.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
        let end = clock.fetch_add(1, Ordering::SeqCst);
        log.lock().unwrap().push((id, start, end));
      }));
    }
    for h in handles {
      h.await.unwrap();
    }

    let mut intervals = log.lock().unwrap().clone();
    intervals.sort_by_key(|(_, start, _)| *start);
    for pair in intervals.windows(2) {
      assert_eq!(pair[0].2 + 1, pair[1].1, "intervals overlap: {pair:?}");
    }
  }

  #[tokio::test]
  async fn hands_off_in_arrival_order() {
    let gate = Arc::new(AsyncGate::new(Vec::new()));
    let ticket = gate.acquire().await;

    let mut handles = vec![];
    for id in 0..5 {
      let gate = gate.clone();
      handles.push(tokio::spawn(async move {
        gate.acquire().await.push(id);
      }));
      // let the waiter enqueue before the next one arrives
      tokio::task::yield_now().await;
      tokio::task::yield_now().await;
    }
    drop(ticket);
    for h in handles {
      h.await.unwrap();
    }
    assert_eq!(*gate.acquire().await, vec![0, 1, 2, 3, 4]);
  }

  #[tokio::test]
  async fn cancelled_waiter_is_skipped() {
    let gate = Arc::new(AsyncGate::new(0));
    let ticket = gate.acquire().await;

    let waiting = {
      let gate = gate.clone();
      tokio::spawn(async move {
        *gate.acquire().await += 100;
      })
    };
    tokio::task::yield_now().await;
    waiting.abort();
    let _ = waiting.await;

    drop(ticket);
    *gate.acquire().await += 1;
    assert_eq!(*gate.acquire().await, 1);
  }

  #[tokio::test]
  async fn try_acquire_reports_held_gate() {
    let gate = AsyncGate::new(());
    let ticket = gate.acquire().await;
    assert!(gate.try_acquire().is_none());
    drop(ticket);
    assert!(gate.try_acquire().is_some());
  }

  #[tokio::test]
  async fn queue_lock_runs_nested_jobs_after_current() {
    let lock = AsyncQueueLock::new();
    let order = MutArc::own(Vec::new());

    let inner_lock = lock.clone();
    let inner_order = order.clone();
    lock
      .run(async move {
        inner_order.rc_deref_mut().push("outer start");
        let nested_order = inner_order.clone();
        inner_lock
          .run(async move { nested_order.rc_deref_mut().push("nested") })
          .await;
        inner_order.rc_deref_mut().push("outer end");
      })
      .await;

    assert_eq!(*order.rc_deref_mut(), vec!["outer start", "outer end", "nested"]);
    assert_eq!(lock.pending(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn cancelled_drainer_leaves_the_lock_usable() {
    let lock = AsyncQueueLock::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let stuck = lock.run(tokio::time::sleep(Duration::from_secs(3600)));
    assert!(tokio::time::timeout(Duration::from_millis(20), stuck).await.is_err());

    let h = hits.clone();
    lock
      .run(async move {
        h.fetch_add(1, Ordering::SeqCst);
      })
      .await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(lock.pending(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn jobs_queued_behind_a_cancelled_drainer_still_run() {
    let lock = AsyncQueueLock::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let (queued_lock, h) = (lock.clone(), hits.clone());
    let stuck = lock.run(async move {
      let h = h.clone();
      queued_lock
        .run(async move {
          h.fetch_add(1, Ordering::SeqCst);
        })
        .await;
      tokio::time::sleep(Duration::from_secs(3600)).await;
    });
    assert!(tokio::time::timeout(Duration::from_millis(20), stuck).await.is_err());

    // the queued job moves to its own task
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(lock.pending(), 0);
  }
}
