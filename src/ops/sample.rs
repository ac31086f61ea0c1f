//! Sample: emit the latest source value whenever a sampler ticks.

use std::{marker::PhantomData, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
  disposable::{
    AsyncDisposable, CompositeDisposable, DynDisposable, IntoDynDisposable, SingleAssignmentDisposable,
    StableCompositeDisposable,
  },
  error::RxError,
  gate::AsyncGate,
  observable::{interval, subscribe_safe, AsyncObservable, DynObservable},
  observer::{AsyncObserver, DynObserver, Subscriber},
  scheduler::SchedulerRef,
};

/// Emits the most recent source value each time `sampler` produces an
/// element, provided a new value arrived since the previous sample.
///
/// After the source completes, the result completes on the next tick (or on
/// sampler completion), flushing a pending value first. A sampler that
/// completes while the source is still running just stops sampling.
pub fn sample<T, S>(source: DynObservable<T>, sampler: DynObservable<S>) -> DynObservable<T>
where
  T: Send + 'static,
  S: Send + 'static,
{
  Arc::new(SampleObservable { source, sampler })
}

/// [`sample`] driven by a periodic timer.
pub fn sample_interval<T: Send + 'static>(
  source: DynObservable<T>, period: Duration, scheduler: SchedulerRef,
) -> DynObservable<T> {
  sample(source, interval(period, scheduler))
}

struct SampleObservable<T, S> {
  source: DynObservable<T>,
  sampler: DynObservable<S>,
}

struct SampleState<T> {
  latest: Option<T>,
  source_done: bool,
  sampler_done: bool,
  done: bool,
}

struct SampleSink<T> {
  downstream: Arc<Subscriber<T>>,
  resources: CompositeDisposable,
  sampler_subscription: SingleAssignmentDisposable,
  gate: AsyncGate<SampleState<T>>,
}

#[async_trait]
impl<T: Send + 'static, S: Send + 'static> AsyncObservable<T> for SampleObservable<T, S> {
  async fn subscribe(&self, observer: DynObserver<T>) -> Result<DynDisposable, RxError> {
    let downstream = Subscriber::new(observer);
    let resources = CompositeDisposable::new();
    let handle = StableCompositeDisposable::pair(downstream.clone(), resources.clone().into_dyn());
    let sink = Arc::new(SampleSink {
      downstream,
      resources,
      sampler_subscription: SingleAssignmentDisposable::new(),
      gate: AsyncGate::new(SampleState { latest: None, source_done: false, sampler_done: false, done: false }),
    });
    sink.resources.add(Arc::new(sink.sampler_subscription.clone())).await;

    let source: DynObserver<T> = Arc::new(SourceObserver(sink.clone()));
    let subscription = subscribe_safe(&self.source, source).await;
    sink.resources.add(subscription).await;

    let sampler: DynObserver<S> = Arc::new(SamplerObserver { sink: sink.clone(), _tick: PhantomData });
    let subscription = subscribe_safe(&self.sampler, sampler).await;
    if sink.sampler_subscription.assign(subscription).await.is_err() {
      log::warn!("sampler subscription was assigned twice");
    }
    Ok(handle)
  }
}

impl<T: Send + 'static> SampleSink<T> {
  async fn fail(&self, error: RxError) {
    let mut state = self.gate.acquire().await;
    if std::mem::replace(&mut state.done, true) {
      return;
    }
    self.downstream.on_error(error).await;
    self.resources.dispose().await;
  }

  /// Emits the pending value, then completes if the source ended. Gate must
  /// be held.
  async fn tick(&self, state: &mut SampleState<T>) {
    if state.done {
      return;
    }
    if let Some(value) = state.latest.take() {
      self.downstream.on_next(value).await;
    }
    if state.source_done {
      state.done = true;
      self.downstream.on_completed().await;
      self.resources.dispose().await;
    }
  }
}

struct SourceObserver<T>(Arc<SampleSink<T>>);

#[async_trait]
impl<T: Send + 'static> AsyncObserver<T> for SourceObserver<T> {
  async fn on_next(&self, value: T) {
    let mut state = self.0.gate.acquire().await;
    if !state.done {
      state.latest = Some(value);
    }
  }

  async fn on_error(&self, error: RxError) { self.0.fail(error).await }

  async fn on_completed(&self) {
    let mut state = self.0.gate.acquire().await;
    state.source_done = true;
    if state.sampler_done && !std::mem::replace(&mut state.done, true) {
      // nothing will ever sample again
      self.0.downstream.on_completed().await;
      self.0.resources.dispose().await;
    }
  }
}

struct SamplerObserver<T, S> {
  sink: Arc<SampleSink<T>>,
  _tick: PhantomData<fn(S)>,
}

#[async_trait]
impl<T: Send + 'static, S: Send + 'static> AsyncObserver<S> for SamplerObserver<T, S> {
  async fn on_next(&self, _: S) {
    let mut state = self.sink.gate.acquire().await;
    self.sink.tick(&mut state).await;
  }

  async fn on_error(&self, error: RxError) { self.sink.fail(error).await }

  async fn on_completed(&self) {
    let mut state = self.sink.gate.acquire().await;
    state.sampler_done = true;
    if state.source_done {
      self.sink.tick(&mut state).await;
    } else {
      drop(state);
      self.sink.sampler_subscription.dispose().await;
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{
    observer::Notification::*,
    scheduler::VirtualTimeScheduler,
    subject::SequentialSubject,
    test_util::Recorder,
  };

  fn ms(v: u64) -> Duration { Duration::from_millis(v) }

  #[tokio::test]
  async fn emits_latest_value_per_tick() {
    let source = SequentialSubject::new();
    let sampler = SequentialSubject::new();
    let recorder = Recorder::new();
    sample(source.as_observable(), sampler.as_observable())
      .subscribe(recorder.observer())
      .await
      .unwrap();
    source.on_next(1).await;
    source.on_next(2).await;
    sampler.on_next(()).await;
    sampler.on_next(()).await;
    source.on_next(3).await;
    sampler.on_next(()).await;
    assert_eq!(recorder.take(), vec![Next(2), Next(3)]);
  }

  #[tokio::test]
  async fn source_completion_flushes_on_next_tick() {
    let source = SequentialSubject::new();
    let sampler = SequentialSubject::new();
    let recorder = Recorder::new();
    sample(source.as_observable(), sampler.as_observable())
      .subscribe(recorder.observer())
      .await
      .unwrap();
    source.on_next(1).await;
    source.on_completed().await;
    assert!(recorder.take().is_empty());
    sampler.on_next(0u8).await;
    assert_eq!(recorder.take(), vec![Next(1), Completed]);
    assert_eq!(sampler.observer_count(), 0);
  }

  #[tokio::test]
  async fn sampler_completion_stops_sampling() {
    let source = SequentialSubject::new();
    let sampler = SequentialSubject::<()>::new();
    let recorder = Recorder::new();
    sample(source.as_observable(), sampler.as_observable())
      .subscribe(recorder.observer())
      .await
      .unwrap();
    source.on_next(1).await;
    sampler.on_completed().await;
    source.on_next(2).await;
    assert!(recorder.take().is_empty());
    source.on_completed().await;
    assert_eq!(recorder.take(), vec![Completed]);
  }

  #[tokio::test]
  async fn sampler_error_terminates() {
    let source = SequentialSubject::<i32>::new();
    let sampler = SequentialSubject::<()>::new();
    let recorder = Recorder::new();
    sample(source.as_observable(), sampler.as_observable())
      .subscribe(recorder.observer())
      .await
      .unwrap();
    sampler.on_error(RxError::msg("sampler")).await;
    assert_eq!(recorder.take(), vec![Error(RxError::msg("sampler"))]);
    assert_eq!(source.observer_count(), 0);
  }

  #[tokio::test]
  async fn periodic_sampling() {
    let vt = VirtualTimeScheduler::new();
    let source = SequentialSubject::new();
    let recorder = Recorder::new();
    let d = sample_interval(source.as_observable(), ms(10), Arc::new(vt.clone()))
      .subscribe(recorder.observer())
      .await
      .unwrap();
    source.on_next('a').await;
    source.on_next('b').await;
    vt.advance_to(ms(10)).await.unwrap();
    vt.advance_to(ms(15)).await.unwrap();
    source.on_next('c').await;
    vt.advance_to(ms(30)).await.unwrap();
    assert_eq!(recorder.values(), vec!['b', 'c']);
    d.dispose().await;
    assert_eq!(vt.pending(), 0);
  }
}
