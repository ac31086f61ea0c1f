use super::{create, DynObservable};
use crate::scheduler::{action, SchedulerRef};

/// Creates an observable that emits every item of `iter` on `scheduler`, then
/// completes.
///
/// Each subscription iterates its own clone of `iter`. Disposing the
/// subscription stops the iteration before the next item.
///
/// ```
/// # use rxrust_async::prelude::*;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let values = rxrust_async::rc::MutArc::own(vec![]);
/// let sink = values.clone();
/// observable::from_iter(0..3, scheduler::immediate())
///   .subscribe_with(
///     move |v| {
///       sink.rc_deref_mut().push(v);
///       async {}
///     },
///     |_| async {},
///     || async {},
///   )
///   .await;
/// assert_eq!(*values.rc_deref_mut(), vec![0, 1, 2]);
/// # }
/// ```
pub fn from_iter<I>(iter: I, scheduler: SchedulerRef) -> DynObservable<I::Item>
where
  I: IntoIterator + Clone + Send + Sync + 'static,
  I::IntoIter: Send,
  I::Item: Send + 'static,
{
  create(move |observer| {
    let iter = iter.clone();
    let scheduler = scheduler.clone();
    async move {
      Ok(
        scheduler
          .schedule(action(move |token| async move {
            for value in iter {
              if token.is_cancelled() {
                return;
              }
              observer.on_next(value).await;
            }
            if !token.is_cancelled() {
              observer.on_completed().await;
            }
          }))
          .await,
      )
    }
  })
}
