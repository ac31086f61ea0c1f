use std::sync::Arc;

use super::{create, DynObservable};
use crate::{
  error::RxError,
  scheduler::{action, SchedulerRef},
};

struct Steps<S, T> {
  condition: Box<dyn Fn(&S) -> Result<bool, RxError> + Send + Sync>,
  iterate: Box<dyn Fn(S) -> Result<S, RxError> + Send + Sync>,
  select: Box<dyn Fn(&S) -> Result<T, RxError> + Send + Sync>,
}

/// Unfolds a sequence from `initial` on `scheduler`.
///
/// Starting from `initial`, emits `select(state)` while `condition(state)`
/// holds, advancing with `iterate` between items, then completes. The first
/// error returned by any of the three functions terminates the sequence.
pub fn generate<S, T, C, I, R>(
  initial: S, condition: C, iterate: I, select: R, scheduler: SchedulerRef,
) -> DynObservable<T>
where
  S: Clone + Send + Sync + 'static,
  T: Send + 'static,
  C: Fn(&S) -> Result<bool, RxError> + Send + Sync + 'static,
  I: Fn(S) -> Result<S, RxError> + Send + Sync + 'static,
  R: Fn(&S) -> Result<T, RxError> + Send + Sync + 'static,
{
  let steps = Arc::new(Steps {
    condition: Box::new(condition),
    iterate: Box::new(iterate),
    select: Box::new(select),
  });
  create(move |observer| {
    let steps = steps.clone();
    let state = initial.clone();
    let scheduler = scheduler.clone();
    async move {
      Ok(
        scheduler
          .schedule(action(move |token| async move {
            let mut state = state;
            let mut first = true;
            loop {
              if token.is_cancelled() {
                return;
              }
              let step = (|| -> Result<Option<T>, RxError> {
                if !first {
                  state = (steps.iterate)(state.clone())?;
                }
                if !(steps.condition)(&state)? {
                  return Ok(None);
                }
                (steps.select)(&state).map(Some)
              })();
              first = false;
              match step {
                Ok(Some(value)) => observer.on_next(value).await,
                Ok(None) => {
                  observer.on_completed().await;
                  return;
                }
                Err(err) => {
                  observer.on_error(err).await;
                  return;
                }
              }
            }
          }))
          .await,
      )
    }
  })
}
