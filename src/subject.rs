//! Subjects: values that are an observer and an observable at once.
//!
//! [`SequentialSubject`] is the relay the partitioning operators hand out as
//! windows and groups. Notifications fed into it are serialised through an
//! [`AsyncGate`], so it may be fed from several producer tasks at once, and
//! each one is delivered to the observers registered when delivery of that
//! notification starts. There is no replay of values; a late subscriber only
//! receives the terminal notification, if one already happened.

use std::sync::Arc;

use async_trait::async_trait;
use smallvec::SmallVec;

use crate::{
  disposable::{self, AsyncDisposable, DynDisposable},
  error::RxError,
  gate::AsyncGate,
  observable::{AsyncObservable, DynObservable},
  observer::{AsyncObserver, DynObserver, Notification, Subscriber},
  rc::MutArc,
};

/// Observers registered with a subject, keyed by registration id.
struct Subscribers<T> {
  next_id: usize,
  items: SmallVec<[(usize, Arc<Subscriber<T>>); 2]>,
}

impl<T> Default for Subscribers<T> {
  fn default() -> Self { Subscribers { next_id: 0, items: SmallVec::new() } }
}

impl<T> Subscribers<T> {
  fn add(&mut self, observer: Arc<Subscriber<T>>) -> usize {
    let id = self.next_id;
    self.next_id += 1;
    self.items.push((id, observer));
    id
  }

  fn remove(&mut self, id: usize) -> Option<Arc<Subscriber<T>>> {
    self
      .items
      .iter()
      .position(|(i, _)| *i == id)
      .map(|pos| self.items.remove(pos).1)
  }

  fn snapshot(&self) -> SmallVec<[Arc<Subscriber<T>>; 2]> {
    self.items.iter().map(|(_, o)| o.clone()).collect()
  }
}

struct SubjectState<T> {
  subscribers: Subscribers<T>,
  terminal: Option<Notification<T>>,
}

struct SubjectInner<T> {
  gate: AsyncGate,
  state: MutArc<SubjectState<T>>,
}

/// A multicast relay with serialised delivery.
pub struct SequentialSubject<T> {
  inner: Arc<SubjectInner<T>>,
}

impl<T> Clone for SequentialSubject<T> {
  fn clone(&self) -> Self { SequentialSubject { inner: self.inner.clone() } }
}

impl<T: Clone + Send + 'static> Default for SequentialSubject<T> {
  fn default() -> Self { Self::new() }
}

impl<T: Clone + Send + 'static> SequentialSubject<T> {
  pub fn new() -> Self {
    SequentialSubject {
      inner: Arc::new(SubjectInner {
        gate: AsyncGate::default(),
        state: MutArc::own(SubjectState { subscribers: Subscribers::default(), terminal: None }),
      }),
    }
  }

  /// This subject seen only as an observable.
  pub fn as_observable(&self) -> DynObservable<T> { Arc::new(self.clone()) }

  pub fn observer_count(&self) -> usize { self.inner.state.rc_deref_mut().subscribers.items.len() }

  pub fn is_terminated(&self) -> bool { self.inner.state.rc_deref_mut().terminal.is_some() }

  async fn terminate(&self, terminal: Notification<T>) {
    let _ticket = self.inner.gate.acquire().await;
    let observers = {
      let mut state = self.inner.state.rc_deref_mut();
      if state.terminal.is_some() {
        log::warn!("subject already terminated, dropping {}", describe(&terminal));
        return;
      }
      state.terminal = Some(terminal.clone());
      std::mem::take(&mut state.subscribers.items)
    };
    for (_, observer) in observers {
      terminal.clone().accept(&*observer).await;
    }
  }
}

fn describe<T>(n: &Notification<T>) -> &'static str {
  match n {
    Notification::Next(_) => "a value",
    Notification::Error(_) => "an error",
    Notification::Completed => "a completion",
  }
}

#[async_trait]
impl<T: Clone + Send + 'static> AsyncObserver<T> for SequentialSubject<T> {
  async fn on_next(&self, value: T) {
    let _ticket = self.inner.gate.acquire().await;
    let observers = {
      let state = self.inner.state.rc_deref_mut();
      if state.terminal.is_some() {
        log::warn!("subject already terminated, dropping a value");
        return;
      }
      state.subscribers.snapshot()
    };
    let mut iter = observers.into_iter().peekable();
    while let Some(observer) = iter.next() {
      if iter.peek().is_some() {
        observer.on_next(value.clone()).await;
      } else {
        observer.on_next(value).await;
        break;
      }
    }
  }

  async fn on_error(&self, error: RxError) { self.terminate(Notification::Error(error)).await }

  async fn on_completed(&self) { self.terminate(Notification::Completed).await }
}

struct SubjectSubscription<T> {
  state: MutArc<SubjectState<T>>,
  id: usize,
  subscriber: Arc<Subscriber<T>>,
}

#[async_trait]
impl<T: Send + 'static> AsyncDisposable for SubjectSubscription<T> {
  async fn dispose(&self) {
    let removed = self.state.rc_deref_mut().subscribers.remove(self.id);
    self.subscriber.dispose().await;
    if removed.is_some() {
      log::trace!("subject observer {} removed", self.id);
    }
  }

  fn is_disposed(&self) -> bool { self.subscriber.is_disposed() }
}

#[async_trait]
impl<T: Clone + Send + 'static> AsyncObservable<T> for SequentialSubject<T> {
  async fn subscribe(&self, observer: DynObserver<T>) -> Result<DynDisposable, RxError> {
    let subscriber = Subscriber::new(observer);
    let replay = {
      let mut state = self.inner.state.rc_deref_mut();
      match &state.terminal {
        Some(terminal) => Err(terminal.clone()),
        None => Ok(state.subscribers.add(subscriber.clone())),
      }
    };
    match replay {
      Ok(id) => Ok(Arc::new(SubjectSubscription { state: self.inner.state.clone(), id, subscriber })),
      Err(terminal) => {
        terminal.accept(&*subscriber).await;
        Ok(disposable::empty())
      }
    }
  }
}

#[cfg(test)]
mod test {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;
  use crate::test_util::Recorder;

  #[tokio::test]
  async fn multicasts_to_current_observers() {
    let subject = SequentialSubject::new();
    let a = Recorder::new();
    let b = Recorder::new();
    subject.on_next(0).await;
    subject.subscribe(a.observer()).await.unwrap();
    subject.on_next(1).await;
    let db = subject.subscribe(b.observer()).await.unwrap();
    subject.on_next(2).await;
    db.dispose().await;
    subject.on_next(3).await;
    subject.on_completed().await;
    assert_eq!(a.values(), vec![1, 2, 3]);
    assert_eq!(b.take(), vec![Notification::Next(2)]);
    assert!(a.is_terminated());
  }

  #[tokio::test]
  async fn late_subscriber_gets_terminal_only() {
    let subject = SequentialSubject::<i32>::new();
    subject.on_next(1).await;
    subject.on_error(RxError::msg("gone")).await;
    subject.on_completed().await;
    let late = Recorder::new();
    subject.subscribe(late.observer()).await.unwrap();
    assert_eq!(late.take(), vec![Notification::Error(RxError::msg("gone"))]);
    assert_eq!(subject.observer_count(), 0);
  }

  #[tokio::test]
  async fn subscribing_from_inside_delivery_does_not_deadlock() {
    struct Resubscriber {
      subject: SequentialSubject<i32>,
      late: Recorder<i32>,
      done: AtomicUsize,
    }

    #[async_trait]
    impl AsyncObserver<i32> for Resubscriber {
      async fn on_next(&self, _: i32) {
        if self.done.fetch_add(1, Ordering::SeqCst) == 0 {
          self.subject.subscribe(self.late.observer()).await.unwrap();
        }
      }
      async fn on_error(&self, _: RxError) {}
      async fn on_completed(&self) {}
    }

    let subject = SequentialSubject::new();
    let late = Recorder::new();
    let observer = Arc::new(Resubscriber {
      subject: subject.clone(),
      late: late.clone(),
      done: AtomicUsize::new(0),
    });
    subject.subscribe(observer).await.unwrap();
    subject.on_next(1).await;
    subject.on_next(2).await;
    assert_eq!(late.values(), vec![2]);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_feeders_are_serialised() {
    let subject = SequentialSubject::new();
    let recorder = Recorder::new();
    subject.subscribe(recorder.observer()).await.unwrap();
    let feeders: Vec<_> = (0..4)
      .map(|f| {
        let subject = subject.clone();
        tokio::spawn(async move {
          for v in 0..50 {
            subject.on_next(f * 1000 + v).await;
          }
        })
      })
      .collect();
    for f in feeders {
      f.await.unwrap();
    }
    let values = recorder.values();
    assert_eq!(values.len(), 200);
    for f in 0..4 {
      let mine: Vec<_> = values.iter().filter(|v| **v / 1000 == f).collect();
      assert!(mine.windows(2).all(|w| w[0] < w[1]));
    }
  }
}
