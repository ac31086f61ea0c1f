//! GroupByUntil: GroupBy where every group expires.
//!
//! When a group is created, `duration_selector` gives a sequence whose first
//! element or completion expires the group: the key is removed from the map
//! and the group completes. A later element with the same key starts a new
//! group, emitted downstream again.
//!
//! The key map lives outside the gate that orders downstream delivery, so
//! lookups and expiries for different keys never wait on each other. An
//! expiry racing with an element for the same key may therefore deliver the
//! element to a group that completed in the meantime; the subject drops it.

use std::{
  collections::HashMap,
  hash::Hash,
  marker::PhantomData,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use async_trait::async_trait;

use super::group_by::{ElementSelector, GroupedObservable, KeySelector};
use crate::{
  disposable::{
    AsyncDisposable, CompositeDisposable, DynDisposable, IntoDynDisposable, RefCountDisposable,
    SingleAssignmentDisposable, StableCompositeDisposable,
  },
  error::RxError,
  gate::AsyncGate,
  observable::{subscribe_safe, AsyncObservable, DynObservable},
  observer::{AsyncObserver, DynObserver, Subscriber},
  rc::MutArc,
  subject::SequentialSubject,
};

type DurationSelector<K, E, D> =
  Arc<dyn Fn(&GroupedObservable<K, E>) -> Result<DynObservable<D>, RxError> + Send + Sync>;

pub fn group_by_until<T, K, E, D, F, G, DF>(
  source: DynObservable<T>, key_selector: F, element_selector: G, duration_selector: DF,
) -> DynObservable<GroupedObservable<K, E>>
where
  T: Send + 'static,
  K: Hash + Eq + Clone + Send + Sync + 'static,
  E: Clone + Send + 'static,
  D: Send + 'static,
  F: Fn(&T) -> Result<K, RxError> + Send + Sync + 'static,
  G: Fn(T) -> Result<E, RxError> + Send + Sync + 'static,
  DF: Fn(&GroupedObservable<K, E>) -> Result<DynObservable<D>, RxError> + Send + Sync + 'static,
{
  Arc::new(GroupByUntilObservable {
    source,
    key_selector: Arc::new(key_selector),
    element_selector: Arc::new(element_selector),
    duration_selector: Arc::new(duration_selector),
  })
}

struct GroupByUntilObservable<T, K, E, D> {
  source: DynObservable<T>,
  key_selector: KeySelector<T, K>,
  element_selector: ElementSelector<T, E>,
  duration_selector: DurationSelector<K, E, D>,
}

struct GroupByUntilSink<T, K, E, D> {
  downstream: Arc<Subscriber<GroupedObservable<K, E>>>,
  lifetime: RefCountDisposable,
  resources: CompositeDisposable,
  key_selector: KeySelector<T, K>,
  element_selector: ElementSelector<T, E>,
  duration_selector: DurationSelector<K, E, D>,
  /// Open groups. Guarded by its own lock, not by `gate`.
  groups: MutArc<HashMap<K, SequentialSubject<E>>>,
  /// Orders every call into `downstream` and into the groups; holds `done`.
  gate: AsyncGate<bool>,
}

#[async_trait]
impl<T, K, E, D> AsyncObservable<GroupedObservable<K, E>> for GroupByUntilObservable<T, K, E, D>
where
  T: Send + 'static,
  K: Hash + Eq + Clone + Send + Sync + 'static,
  E: Clone + Send + 'static,
  D: Send + 'static,
{
  async fn subscribe(&self, observer: DynObserver<GroupedObservable<K, E>>) -> Result<DynDisposable, RxError> {
    let downstream = Subscriber::new(observer);
    let resources = CompositeDisposable::new();
    let lifetime = RefCountDisposable::new(resources.clone().into_dyn());
    let handle = StableCompositeDisposable::pair(downstream.clone(), lifetime.clone().into_dyn());
    let sink = Arc::new(GroupByUntilSink {
      downstream,
      lifetime,
      resources,
      key_selector: self.key_selector.clone(),
      element_selector: self.element_selector.clone(),
      duration_selector: self.duration_selector.clone(),
      groups: MutArc::own(HashMap::new()),
      gate: AsyncGate::new(false),
    });
    let observer: DynObserver<T> = Arc::new(SourceObserver(sink.clone()));
    let subscription = subscribe_safe(&self.source, observer).await;
    sink.resources.add(subscription).await;
    Ok(handle)
  }
}

impl<T, K, E, D> GroupByUntilSink<T, K, E, D>
where
  T: Send + 'static,
  K: Hash + Eq + Clone + Send + Sync + 'static,
  E: Clone + Send + 'static,
  D: Send + 'static,
{
  async fn terminate(&self, error: Option<RxError>) {
    let mut done = self.gate.acquire().await;
    if std::mem::replace(&mut *done, true) {
      return;
    }
    let groups: Vec<_> = self.groups.rc_deref_mut().drain().map(|(_, subject)| subject).collect();
    match error {
      Some(error) => {
        for group in groups {
          group.on_error(error.clone()).await;
        }
        self.downstream.on_error(error).await;
      }
      None => {
        for group in groups {
          group.on_completed().await;
        }
        self.downstream.on_completed().await;
      }
    }
    self.resources.dispose().await;
  }

  /// Watches the duration of a freshly created group.
  async fn watch(self: Arc<Self>, key: K, subject: SequentialSubject<E>, duration: DynObservable<D>) {
    let subscription = SingleAssignmentDisposable::new();
    let handle: DynDisposable = Arc::new(subscription.clone());
    self.resources.add(handle.clone()).await;
    let observer: DynObserver<D> = Arc::new(DurationObserver {
      sink: self.clone(),
      key,
      subject,
      handle,
      fired: AtomicBool::new(false),
      _duration: PhantomData,
    });
    let inner = subscribe_safe(&duration, observer).await;
    if subscription.assign(inner).await.is_err() {
      log::warn!("duration subscription was assigned twice");
    }
  }
}

struct SourceObserver<T, K, E, D>(Arc<GroupByUntilSink<T, K, E, D>>);

#[async_trait]
impl<T, K, E, D> AsyncObserver<T> for SourceObserver<T, K, E, D>
where
  T: Send + 'static,
  K: Hash + Eq + Clone + Send + Sync + 'static,
  E: Clone + Send + 'static,
  D: Send + 'static,
{
  async fn on_next(&self, value: T) {
    let sink = &self.0;
    let key = match (sink.key_selector)(&value) {
      Ok(key) => key,
      Err(error) => return sink.terminate(Some(error)).await,
    };

    let (subject, fresh) = {
      let mut groups = sink.groups.rc_deref_mut();
      match groups.get(&key) {
        Some(subject) => (subject.clone(), false),
        None => {
          let subject = SequentialSubject::new();
          groups.insert(key.clone(), subject.clone());
          (subject, true)
        }
      }
    };

    if fresh {
      let group = GroupedObservable::new(key.clone(), subject.clone(), sink.lifetime.clone());
      let duration = match (sink.duration_selector)(&group) {
        Ok(duration) => duration,
        Err(error) => return sink.terminate(Some(error)).await,
      };
      {
        let done = sink.gate.acquire().await;
        if *done {
          return;
        }
        log::debug!("group opened");
        sink.downstream.on_next(group).await;
      }
      sink.clone().watch(key, subject.clone(), duration).await;
    }

    let element = match (sink.element_selector)(value) {
      Ok(element) => element,
      Err(error) => return sink.terminate(Some(error)).await,
    };
    let done = sink.gate.acquire().await;
    if !*done {
      subject.on_next(element).await;
    }
  }

  async fn on_error(&self, error: RxError) { self.0.terminate(Some(error)).await }

  async fn on_completed(&self) { self.0.terminate(None).await }
}

/// Expires one group on the first notification of its duration sequence.
struct DurationObserver<T, K, E, D> {
  sink: Arc<GroupByUntilSink<T, K, E, D>>,
  key: K,
  subject: SequentialSubject<E>,
  handle: DynDisposable,
  fired: AtomicBool,
  _duration: PhantomData<fn(D)>,
}

impl<T, K, E, D> DurationObserver<T, K, E, D>
where
  T: Send + 'static,
  K: Hash + Eq + Clone + Send + Sync + 'static,
  E: Clone + Send + 'static,
  D: Send + 'static,
{
  async fn expire(&self) {
    if self.fired.swap(true, Ordering::AcqRel) {
      return;
    }
    let removed = self.sink.groups.rc_deref_mut().remove(&self.key).is_some();
    if removed {
      let done = self.sink.gate.acquire().await;
      if !*done {
        log::debug!("group expired");
        self.subject.on_completed().await;
      }
    }
    self.sink.resources.remove(&self.handle).await;
  }
}

#[async_trait]
impl<T, K, E, D> AsyncObserver<D> for DurationObserver<T, K, E, D>
where
  T: Send + 'static,
  K: Hash + Eq + Clone + Send + Sync + 'static,
  E: Clone + Send + 'static,
  D: Send + 'static,
{
  async fn on_next(&self, _: D) { self.expire().await }

  async fn on_error(&self, error: RxError) {
    if !self.fired.swap(true, Ordering::AcqRel) {
      self.sink.terminate(Some(error)).await;
    }
  }

  async fn on_completed(&self) { self.expire().await }
}
