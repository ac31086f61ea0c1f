//! DoWhile: repeat the source while a condition holds.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::{
  disposable::{
    AsyncDisposable, DynDisposable, IntoDynDisposable, SerialDisposable, SingleAssignmentDisposable,
    StableCompositeDisposable,
  },
  error::RxError,
  gate::AsyncQueueLock,
  observable::{subscribe_safe, AsyncObservable, DynObservable},
  observer::{AsyncObserver, DynObserver, Subscriber},
};

type Condition = Arc<dyn Fn() -> BoxFuture<'static, Result<bool, RxError>> + Send + Sync>;

/// Subscribes to `source`, and again after every completion for as long as
/// `condition` resolves to `true`. The condition is checked after each run,
/// so the source always runs at least once.
pub fn do_while<T, F, Fut>(source: DynObservable<T>, condition: F) -> DynObservable<T>
where
  T: Send + 'static,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<bool, RxError>> + Send + 'static,
{
  let condition: Condition = Arc::new(move || Box::pin(condition()) as BoxFuture<'static, _>);
  Arc::new(DoWhileObservable { source, condition })
}

struct DoWhileObservable<T> {
  source: DynObservable<T>,
  condition: Condition,
}

struct DoWhileSink<T> {
  downstream: Arc<Subscriber<T>>,
  source: DynObservable<T>,
  condition: Condition,
  current: SerialDisposable,
  runs: AsyncQueueLock,
}

#[async_trait]
impl<T: Send + 'static> AsyncObservable<T> for DoWhileObservable<T> {
  async fn subscribe(&self, observer: DynObserver<T>) -> Result<DynDisposable, RxError> {
    let downstream = Subscriber::new(observer);
    let current = SerialDisposable::new();
    let handle = StableCompositeDisposable::pair(downstream.clone(), current.clone().into_dyn());
    let sink = Arc::new(DoWhileSink {
      downstream,
      source: self.source.clone(),
      condition: self.condition.clone(),
      current,
      runs: AsyncQueueLock::new(),
    });
    sink.schedule_run().await;
    Ok(handle)
  }
}

impl<T: Send + 'static> DoWhileSink<T> {
  /// Queues one more run of the source. Runs follow each other in a loop even
  /// when the source completes during subscription.
  async fn schedule_run(self: Arc<Self>) {
    let sink = self.clone();
    self.runs.run(async move { sink.run().await }).await;
  }

  async fn run(self: Arc<Self>) {
    if self.downstream.is_stopped() {
      return;
    }
    let subscription = SingleAssignmentDisposable::new();
    self.current.assign(Arc::new(subscription.clone())).await;
    let observer: DynObserver<T> = Arc::new(RunObserver(self.clone()));
    let inner = subscribe_safe(&self.source, observer).await;
    if subscription.assign(inner).await.is_err() {
      log::warn!("source subscription was assigned twice");
    }
  }
}

struct RunObserver<T>(Arc<DoWhileSink<T>>);

#[async_trait]
impl<T: Send + 'static> AsyncObserver<T> for RunObserver<T> {
  async fn on_next(&self, value: T) { self.0.downstream.on_next(value).await }

  async fn on_error(&self, error: RxError) {
    self.0.downstream.on_error(error).await;
    self.0.current.dispose().await;
  }

  async fn on_completed(&self) {
    match (self.0.condition)().await {
      Ok(true) => {
        log::trace!("do_while repeating");
        self.0.clone().schedule_run().await;
      }
      Ok(false) => {
        self.0.downstream.on_completed().await;
        self.0.current.dispose().await;
      }
      Err(error) => {
        self.0.downstream.on_error(error).await;
        self.0.current.dispose().await;
      }
    }
  }
}
