use std::{future::Future, sync::Arc};

use super::{create, DynObservable};
use crate::{
  error::RxError,
  scheduler::{action, SchedulerRef},
};

/// Runs the async function `f` on `scheduler` once per subscription and
/// emits its result, then completes. An `Err` result becomes `on_error`.
///
/// Disposing the subscription while `f` is still running drops its future;
/// nothing is emitted.
pub fn start_async<T, F, Fut>(f: F, scheduler: SchedulerRef) -> DynObservable<T>
where
  T: Send + 'static,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, RxError>> + Send + 'static,
{
  let f = Arc::new(f);
  create(move |observer| {
    let f = f.clone();
    let scheduler = scheduler.clone();
    async move {
      Ok(
        scheduler
          .schedule(action(move |token| async move {
            let outcome = tokio::select! {
              _ = token.cancelled() => return,
              outcome = (*f)() => outcome,
            };
            match outcome {
              Ok(value) => {
                observer.on_next(value).await;
                observer.on_completed().await;
              }
              Err(err) => observer.on_error(err).await,
            }
          }))
          .await,
      )
    }
  })
}
