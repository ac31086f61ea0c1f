//! GroupBy: route elements into one sub-sequence per key.
//!
//! The first element with a new key creates a [`GroupedObservable`] and
//! emits it downstream before the element itself is delivered to it, so an
//! observer that subscribes to the group while handling it sees every
//! element of the group.
//!
//! Keys are compared with `Eq`/`Hash`. To tell "no key" apart from any
//! present key, select an `Option<K>`: `None` then gets a group of its own.

use std::{collections::HashMap, hash::Hash, sync::Arc};

use async_trait::async_trait;

use crate::{
  disposable::{
    AsyncDisposable, CompositeDisposable, DynDisposable, IntoDynDisposable, RefCountDisposable,
    StableCompositeDisposable,
  },
  error::RxError,
  gate::AsyncGate,
  observable::{subscribe_safe, AsyncObservable, DynObservable},
  observer::{AsyncObserver, DynObserver, Subscriber},
  subject::SequentialSubject,
};

pub(crate) type KeySelector<T, K> = Arc<dyn Fn(&T) -> Result<K, RxError> + Send + Sync>;
pub(crate) type ElementSelector<T, E> = Arc<dyn Fn(T) -> Result<E, RxError> + Send + Sync>;

/// The sub-sequence of elements sharing one key.
///
/// Subscribing to a group keeps the source subscription alive even after the
/// outer subscription was disposed, until the group subscription is disposed
/// as well.
pub struct GroupedObservable<K, T> {
  key: K,
  subject: SequentialSubject<T>,
  lifetime: RefCountDisposable,
}

impl<K: Clone, T> Clone for GroupedObservable<K, T> {
  fn clone(&self) -> Self {
    GroupedObservable { key: self.key.clone(), subject: self.subject.clone(), lifetime: self.lifetime.clone() }
  }
}

impl<K, T> GroupedObservable<K, T> {
  pub(crate) fn new(key: K, subject: SequentialSubject<T>, lifetime: RefCountDisposable) -> Self {
    GroupedObservable { key, subject, lifetime }
  }

  #[inline]
  pub fn key(&self) -> &K { &self.key }
}

#[async_trait]
impl<K, T> AsyncObservable<T> for GroupedObservable<K, T>
where
  K: Send + Sync + 'static,
  T: Clone + Send + 'static,
{
  async fn subscribe(&self, observer: DynObserver<T>) -> Result<DynDisposable, RxError> {
    let keep_alive = self.lifetime.get_dependent_disposable();
    let subscription = self.subject.subscribe(observer).await?;
    Ok(StableCompositeDisposable::pair(keep_alive, subscription))
  }
}

/// Groups `source` by `key_selector`.
pub fn group_by<T, K, F>(source: DynObservable<T>, key_selector: F) -> DynObservable<GroupedObservable<K, T>>
where
  T: Clone + Send + 'static,
  K: Hash + Eq + Clone + Send + Sync + 'static,
  F: Fn(&T) -> Result<K, RxError> + Send + Sync + 'static,
{
  group_by_element(source, key_selector, Ok)
}

/// Groups `source` by `key_selector`, feeding each group the projection of
/// the element by `element_selector`.
pub fn group_by_element<T, K, E, F, G>(
  source: DynObservable<T>, key_selector: F, element_selector: G,
) -> DynObservable<GroupedObservable<K, E>>
where
  T: Send + 'static,
  K: Hash + Eq + Clone + Send + Sync + 'static,
  E: Clone + Send + 'static,
  F: Fn(&T) -> Result<K, RxError> + Send + Sync + 'static,
  G: Fn(T) -> Result<E, RxError> + Send + Sync + 'static,
{
  Arc::new(GroupByObservable {
    source,
    key_selector: Arc::new(key_selector),
    element_selector: Arc::new(element_selector),
  })
}

struct GroupByObservable<T, K, E> {
  source: DynObservable<T>,
  key_selector: KeySelector<T, K>,
  element_selector: ElementSelector<T, E>,
}

struct GroupState<K, E> {
  groups: HashMap<K, SequentialSubject<E>>,
  done: bool,
}

struct GroupBySink<T, K, E> {
  downstream: Arc<Subscriber<GroupedObservable<K, E>>>,
  lifetime: RefCountDisposable,
  resources: CompositeDisposable,
  key_selector: KeySelector<T, K>,
  element_selector: ElementSelector<T, E>,
  gate: AsyncGate<GroupState<K, E>>,
}

#[async_trait]
impl<T, K, E> AsyncObservable<GroupedObservable<K, E>> for GroupByObservable<T, K, E>
where
  T: Send + 'static,
  K: Hash + Eq + Clone + Send + Sync + 'static,
  E: Clone + Send + 'static,
{
  async fn subscribe(&self, observer: DynObserver<GroupedObservable<K, E>>) -> Result<DynDisposable, RxError> {
    let downstream = Subscriber::new(observer);
    let resources = CompositeDisposable::new();
    let lifetime = RefCountDisposable::new(resources.clone().into_dyn());
    let handle = StableCompositeDisposable::pair(downstream.clone(), lifetime.clone().into_dyn());
    let sink = Arc::new(GroupBySink {
      downstream,
      lifetime,
      resources,
      key_selector: self.key_selector.clone(),
      element_selector: self.element_selector.clone(),
      gate: AsyncGate::new(GroupState { groups: HashMap::new(), done: false }),
    });
    log::trace!("group_by subscribed");
    let observer: DynObserver<T> = sink.clone();
    let subscription = subscribe_safe(&self.source, observer).await;
    sink.resources.add(subscription).await;
    Ok(handle)
  }
}

impl<T, K, E> GroupBySink<T, K, E>
where
  T: Send + 'static,
  K: Hash + Eq + Clone + Send + Sync + 'static,
  E: Clone + Send + 'static,
{
  async fn terminate(&self, error: Option<RxError>) {
    let mut state = self.gate.acquire().await;
    if std::mem::replace(&mut state.done, true) {
      return;
    }
    let groups: Vec<_> = state.groups.drain().map(|(_, subject)| subject).collect();
    match error {
      Some(error) => {
        log::debug!("group_by failed with {} open group(s): {error}", groups.len());
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
}

#[async_trait]
impl<T, K, E> AsyncObserver<T> for GroupBySink<T, K, E>
where
  T: Send + 'static,
  K: Hash + Eq + Clone + Send + Sync + 'static,
  E: Clone + Send + 'static,
{
  async fn on_next(&self, value: T) {
    let key = match (self.key_selector)(&value) {
      Ok(key) => key,
      Err(error) => return self.terminate(Some(error)).await,
    };
    let element = match (self.element_selector)(value) {
      Ok(element) => element,
      Err(error) => return self.terminate(Some(error)).await,
    };

    let mut state = self.gate.acquire().await;
    if state.done {
      return;
    }
    let subject = match state.groups.get(&key) {
      Some(subject) => subject.clone(),
      None => {
        let subject = SequentialSubject::new();
        state.groups.insert(key.clone(), subject.clone());
        log::debug!("group opened ({} open)", state.groups.len());
        let group = GroupedObservable::new(key, subject.clone(), self.lifetime.clone());
        self.downstream.on_next(group).await;
        subject
      }
    };
    subject.on_next(element).await;
  }

  async fn on_error(&self, error: RxError) { self.terminate(Some(error)).await }

  async fn on_completed(&self) { self.terminate(None).await }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{
    observer::Notification::{self, *},
    test_util::{InnerCollector, Recorder},
  };

  type Groups<K, T> = InnerCollector<GroupedObservable<K, T>, T>;

  fn group<T: Clone>(values: &[T], completed: bool) -> Vec<Notification<T>> {
    let mut g: Vec<_> = values.iter().cloned().map(Next).collect();
    if completed {
      g.push(Completed);
    }
    g
  }

  #[tokio::test]
  async fn groups_by_key_in_first_seen_order() {
    let source = SequentialSubject::new();
    let groups = Groups::new();
    group_by(source.as_observable(), |v: &i32| Ok(v % 3))
      .subscribe(groups.observer())
      .await
      .unwrap();
    for v in [1, 2, 4, 3, 5, 7] {
      source.on_next(v).await;
    }
    source.on_completed().await;
    let keys: Vec<_> = groups.inners().iter().map(|g| *g.key()).collect();
    assert_eq!(keys, vec![1, 2, 0]);
    assert_eq!(
      groups.snapshot(),
      vec![group(&[1, 4, 7], true), group(&[2, 5], true), group(&[3], true)]
    );
    assert!(groups.outer_completed());
  }

  #[tokio::test]
  async fn absent_key_gets_its_own_group() {
    let source = SequentialSubject::new();
    let groups = Groups::new();
    group_by(source.as_observable(), |v: &i32| Ok((*v >= 0).then_some(v / 10)))
      .subscribe(groups.observer())
      .await
      .unwrap();
    for v in [-1, 0, -5, 12] {
      source.on_next(v).await;
    }
    let keys: Vec<_> = groups.inners().iter().map(|g| *g.key()).collect();
    assert_eq!(keys, vec![None, Some(0), Some(1)]);
    assert_eq!(groups.snapshot()[0], group(&[-1, -5], false));
  }

  #[tokio::test]
  async fn element_selector_projects_group_elements() {
    let source = SequentialSubject::new();
    let groups = InnerCollector::<GroupedObservable<bool, String>, String>::new();
    group_by_element(source.as_observable(), |v: &i32| Ok(v % 2 == 0), |v| Ok(format!("#{v}")))
      .subscribe(groups.observer())
      .await
      .unwrap();
    source.on_next(1).await;
    source.on_next(2).await;
    source.on_next(3).await;
    assert_eq!(
      groups.snapshot(),
      vec![group(&["#1".to_string(), "#3".to_string()], false), group(&["#2".to_string()], false)]
    );
  }

  #[tokio::test]
  async fn key_selector_error_fails_groups_and_outer() {
    let source = SequentialSubject::new();
    let groups = Groups::new();
    group_by(source.as_observable(), |v: &i32| {
      if *v < 0 {
        Err(RxError::msg("negative"))
      } else {
        Ok(*v)
      }
    })
    .subscribe(groups.observer())
    .await
    .unwrap();
    source.on_next(1).await;
    source.on_next(-1).await;
    source.on_next(2).await;
    assert_eq!(groups.snapshot(), vec![vec![Next(1), Error(RxError::msg("negative"))]]);
    assert_eq!(groups.outer(), vec![Error(RxError::msg("negative"))]);
    assert_eq!(source.observer_count(), 0);
  }

  #[tokio::test]
  async fn group_subscription_keeps_source_alive() {
    let source = SequentialSubject::new();
    let outer = Recorder::<GroupedObservable<i32, i32>>::new();
    let d = group_by(source.as_observable(), |v: &i32| Ok(*v))
      .subscribe(outer.observer())
      .await
      .unwrap();
    source.on_next(1).await;
    let first = match outer.take().pop() {
      Some(Next(g)) => g,
      _ => panic!("expected a group"),
    };
    let inner = Recorder::new();
    let inner_subscription = first.subscribe(inner.observer()).await.unwrap();

    d.dispose().await;
    source.on_next(1).await;
    source.on_next(2).await;
    assert_eq!(inner.values(), vec![1]);
    assert_eq!(outer.len(), 0);
    assert_eq!(source.observer_count(), 1);

    inner_subscription.dispose().await;
    assert_eq!(source.observer_count(), 0);
  }
}
