//! Operators over [`DynObservable`](crate::observable::DynObservable).
//!
//! Each module exposes free functions taking the source observable first; the
//! fluent forms live on [`ObservableExt`](crate::observable::ObservableExt)
//! and [`FlattenExt`](crate::observable::FlattenExt).

mod partition;

pub mod buffer;
pub mod catch;
pub mod do_while;
pub mod group_by;
pub mod group_by_until;
pub mod join;
pub mod sample;
pub mod select_many;
pub mod subscribe_on;
pub mod switch;
pub mod synchronize;
pub mod window;
pub mod with_latest_from;
