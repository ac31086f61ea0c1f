use std::time::Duration;

use super::{create, DynObservable};
use crate::scheduler::{action, periodic, SchedulerRef};

/// Emits `0` once `due` has elapsed on `scheduler`, then completes.
pub fn timer(due: Duration, scheduler: SchedulerRef) -> DynObservable<u64> {
  create(move |observer| {
    let scheduler = scheduler.clone();
    async move {
      Ok(
        scheduler
          .schedule_after(
            due,
            action(move |token| async move {
              if !token.is_cancelled() {
                observer.on_next(0).await;
                observer.on_completed().await;
              }
            }),
          )
          .await,
      )
    }
  })
}

/// Emits `0, 1, 2, ...` every `period` on `scheduler`. Never completes.
pub fn interval(period: Duration, scheduler: SchedulerRef) -> DynObservable<u64> {
  create(move |observer| {
    let scheduler = scheduler.clone();
    async move {
      let mut tick = 0;
      Ok(
        scheduler
          .schedule_periodic(
            period,
            periodic(move |token| {
              let observer = observer.clone();
              let value = tick;
              tick += 1;
              async move {
                if !token.is_cancelled() {
                  observer.on_next(value).await;
                }
              }
            }),
          )
          .await,
      )
    }
  })
}
