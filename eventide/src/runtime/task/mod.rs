//! Driving `std::future::Future`s on the event loop.
//!
//! A spawned future becomes a task whose polls are scheduled as
//! microtasks. Its waker re-queues the task when a promise it awaits
//! settles, when a timer fires, or when another thread wakes it.
//!
//! Most users will interact with this module through [`spawn`] and
//! [`Handle::spawn`](crate::Handle::spawn).

pub(crate) mod state;
pub(crate) mod waker;

pub mod core;

pub use self::core::{spawn, try_spawn};

/// Identifies a spawned task within its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TaskId(pub(crate) u64);
