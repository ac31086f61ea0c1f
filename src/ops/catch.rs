//! Catch: continue with another sequence when the source fails.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
  disposable::{
    AsyncDisposable, DynDisposable, IntoDynDisposable, SerialDisposable, SingleAssignmentDisposable,
    StableCompositeDisposable,
  },
  error::RxError,
  gate::AsyncQueueLock,
  observable::{subscribe_safe, AsyncObservable, DynObservable},
  observer::{AsyncObserver, DynObserver, Subscriber},
  rc::MutArc,
};

type Handler<T> = Arc<dyn Fn(RxError) -> Result<DynObservable<T>, RxError> + Send + Sync>;

/// On a source error, mirrors the sequence `handler` returns for it. An
/// error from the handler itself is forwarded.
pub fn catch<T, F>(source: DynObservable<T>, handler: F) -> DynObservable<T>
where
  T: Send + 'static,
  F: Fn(RxError) -> Result<DynObservable<T>, RxError> + Send + Sync + 'static,
{
  Arc::new(CatchObservable { source, handler: Arc::new(handler) })
}

struct CatchObservable<T> {
  source: DynObservable<T>,
  handler: Handler<T>,
}

#[async_trait]
impl<T: Send + 'static> AsyncObservable<T> for CatchObservable<T> {
  async fn subscribe(&self, observer: DynObserver<T>) -> Result<DynDisposable, RxError> {
    let downstream = Subscriber::new(observer);
    let current = SerialDisposable::new();
    let first = SingleAssignmentDisposable::new();
    current.assign(Arc::new(first.clone())).await;
    let handle = StableCompositeDisposable::pair(downstream.clone(), current.clone().into_dyn());

    let observer: DynObserver<T> = Arc::new(CatchObserver {
      downstream,
      handler: self.handler.clone(),
      current,
    });
    let subscription = subscribe_safe(&self.source, observer).await;
    if first.assign(subscription).await.is_err() {
      log::warn!("source subscription was assigned twice");
    }
    Ok(handle)
  }
}

struct CatchObserver<T> {
  downstream: Arc<Subscriber<T>>,
  handler: Handler<T>,
  current: SerialDisposable,
}

#[async_trait]
impl<T: Send + 'static> AsyncObserver<T> for CatchObserver<T> {
  async fn on_next(&self, value: T) { self.downstream.on_next(value).await }

  async fn on_error(&self, error: RxError) {
    let fallback = match (self.handler)(error) {
      Ok(fallback) => fallback,
      Err(error) => return self.downstream.on_error(error).await,
    };
    log::debug!("source failed, switching to the fallback sequence");
    let subscription = SingleAssignmentDisposable::new();
    self.current.assign(Arc::new(subscription.clone())).await;
    let observer: DynObserver<T> = self.downstream.clone();
    let inner = subscribe_safe(&fallback, observer).await;
    if subscription.assign(inner).await.is_err() {
      log::warn!("fallback subscription was assigned twice");
    }
  }

  async fn on_completed(&self) { self.downstream.on_completed().await }
}

/// Mirrors the sources one after another, moving to the next one whenever the
/// current one fails. Completes with the first source that completes; fails
/// with the last error once every source failed. No sources means an empty
/// sequence.
pub fn catch_sequence<T, I>(sources: I) -> DynObservable<T>
where
  T: Send + 'static,
  I: IntoIterator<Item = DynObservable<T>> + Clone + Send + Sync + 'static,
  I::IntoIter: Send,
{
  Arc::new(CatchSequenceObservable { sources })
}

struct CatchSequenceObservable<I> {
  sources: I,
}

struct SequenceSink<T, It> {
  downstream: Arc<Subscriber<T>>,
  sources: MutArc<It>,
  last_error: MutArc<Option<RxError>>,
  current: SerialDisposable,
  steps: AsyncQueueLock,
}

#[async_trait]
impl<T, I> AsyncObservable<T> for CatchSequenceObservable<I>
where
  T: Send + 'static,
  I: IntoIterator<Item = DynObservable<T>> + Clone + Send + Sync + 'static,
  I::IntoIter: Send,
{
  async fn subscribe(&self, observer: DynObserver<T>) -> Result<DynDisposable, RxError> {
    let downstream = Subscriber::new(observer);
    let current = SerialDisposable::new();
    let handle = StableCompositeDisposable::pair(downstream.clone(), current.clone().into_dyn());
    let sink = Arc::new(SequenceSink {
      downstream,
      sources: MutArc::own(self.sources.clone().into_iter()),
      last_error: MutArc::own(None),
      current,
      steps: AsyncQueueLock::new(),
    });
    sink.move_next().await;
    Ok(handle)
  }
}

impl<T, It> SequenceSink<T, It>
where
  T: Send + 'static,
  It: Iterator<Item = DynObservable<T>> + Send + 'static,
{
  /// Queues the subscription to the next source. Queued steps run in a loop,
  /// one after another, however synchronously the sources fail.
  async fn move_next(self: Arc<Self>) {
    let sink = self.clone();
    self.steps.run(async move { sink.step().await }).await;
  }

  async fn step(self: Arc<Self>) {
    if self.downstream.is_stopped() {
      return;
    }
    let next = self.sources.rc_deref_mut().next();
    let Some(source) = next else {
      let last = self.last_error.rc_deref_mut().take();
      match last {
        Some(error) => self.downstream.on_error(error).await,
        None => self.downstream.on_completed().await,
      }
      return self.current.dispose().await;
    };
    let subscription = SingleAssignmentDisposable::new();
    self.current.assign(Arc::new(subscription.clone())).await;
    let observer: DynObserver<T> = Arc::new(SequenceObserver(self.clone()));
    let inner = subscribe_safe(&source, observer).await;
    if subscription.assign(inner).await.is_err() {
      log::warn!("source subscription was assigned twice");
    }
  }
}

struct SequenceObserver<T, It>(Arc<SequenceSink<T, It>>);

#[async_trait]
impl<T, It> AsyncObserver<T> for SequenceObserver<T, It>
where
  T: Send + 'static,
  It: Iterator<Item = DynObservable<T>> + Send + 'static,
{
  async fn on_next(&self, value: T) { self.0.downstream.on_next(value).await }

  async fn on_error(&self, error: RxError) {
    log::debug!("source failed, moving to the next one: {error}");
    *self.0.last_error.rc_deref_mut() = Some(error);
    self.0.clone().move_next().await;
  }

  async fn on_completed(&self) {
    self.0.downstream.on_completed().await;
    self.0.current.dispose().await;
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{
    observable::{self, ObservableExt},
    observer::Notification::*,
    scheduler,
    subject::SequentialSubject,
    test_util::Recorder,
  };

  #[tokio::test]
  async fn switches_to_fallback_on_error() {
    let source = SequentialSubject::new();
    let fallback = SequentialSubject::new();
    let handler_fallback = fallback.clone();
    let recorder = Recorder::new();
    source
      .clone()
      .catch(move |_| Ok(handler_fallback.as_observable()))
      .subscribe(recorder.observer())
      .await
      .unwrap();
    source.on_next(1).await;
    source.on_error(RxError::msg("first")).await;
    fallback.on_next(2).await;
    fallback.on_completed().await;
    assert_eq!(recorder.take(), vec![Next(1), Next(2), Completed]);
  }

  #[tokio::test]
  async fn handler_error_is_forwarded() {
    let recorder = Recorder::<i32>::new();
    catch(observable::throw(RxError::msg("first")), |e| Err(RxError::msg(format!("handled {e}"))))
      .subscribe(recorder.observer())
      .await
      .unwrap();
    assert_eq!(recorder.take(), vec![Error(RxError::msg("handled first"))]);
  }

  #[tokio::test]
  async fn dispose_reaches_the_fallback() {
    let fallback = SequentialSubject::<i32>::new();
    let handler_fallback = fallback.clone();
    let recorder = Recorder::new();
    let d = catch(observable::throw(RxError::msg("x")), move |_| Ok(handler_fallback.as_observable()))
      .subscribe(recorder.observer())
      .await
      .unwrap();
    assert_eq!(fallback.observer_count(), 1);
    d.dispose().await;
    assert_eq!(fallback.observer_count(), 0);
  }

  #[tokio::test]
  async fn sequence_moves_on_until_one_completes() {
    let recorder = Recorder::new();
    let sources: Vec<DynObservable<i32>> = vec![
      observable::throw(RxError::msg("a")),
      observable::throw(RxError::msg("b")),
      observable::from_iter(vec![1, 2], scheduler::immediate()),
      observable::throw(RxError::msg("never reached")),
    ];
    catch_sequence(sources).subscribe(recorder.observer()).await.unwrap();
    assert_eq!(recorder.take(), vec![Next(1), Next(2), Completed]);
  }

  #[tokio::test]
  async fn sequence_forwards_last_error_when_exhausted() {
    let recorder = Recorder::<i32>::new();
    let sources: Vec<DynObservable<i32>> =
      (0..1000).map(|i| observable::throw(RxError::msg(format!("#{i}")))).collect();
    catch_sequence(sources).subscribe(recorder.observer()).await.unwrap();
    assert_eq!(recorder.take(), vec![Error(RxError::msg("#999"))]);
  }

  #[tokio::test]
  async fn empty_sequence_completes() {
    let recorder = Recorder::<i32>::new();
    catch_sequence(Vec::<DynObservable<i32>>::new())
      .subscribe(recorder.observer())
      .await
      .unwrap();
    assert_eq!(recorder.take(), vec![Completed]);
  }
}
