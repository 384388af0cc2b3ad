/// Task is idle and not scheduled.
///
/// The task is waiting on some wakeup source.
pub(crate) const IDLE: usize = 0;

/// A poll of the task is queued as a microtask (or in the remote inbox).
pub(crate) const QUEUED: usize = 1;

/// Task is currently being polled.
pub(crate) const RUNNING: usize = 2;

/// Task has completed execution.
///
/// The future has returned `Poll::Ready` and will not be polled again.
pub(crate) const COMPLETED: usize = 3;

/// Task was woken while being polled.
///
/// It is queued again once the current poll returns `Poll::Pending`.
pub(crate) const NOTIFIED: usize = 4;
