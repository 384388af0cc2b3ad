use super::TaskId;
use super::state::{COMPLETED, IDLE, NOTIFIED, QUEUED, RUNNING};
use crate::runtime::context;
use crate::runtime::remote::RemoteQueue;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::Wake;

/// Waker shared by every poll of one spawned task.
///
/// Waking from the loop thread while the loop runs enqueues a poll
/// microtask directly. Waking from anywhere else goes through the remote
/// inbox, where the loop picks the task up as a macrotask.
pub(crate) struct TaskWaker {
    id: TaskId,

    /// Identity of the loop that owns the task.
    loop_id: u64,

    /// Lifecycle of the task, see [`super::state`].
    state: AtomicUsize,

    remote: Arc<RemoteQueue>,
}

impl TaskWaker {
    pub(crate) fn new(id: TaskId, loop_id: u64, remote: Arc<RemoteQueue>) -> Self {
        Self {
            id,
            loop_id,
            state: AtomicUsize::new(IDLE),
            remote,
        }
    }

    /// Moves an idle task to `QUEUED`. Returns `false` if a poll is
    /// already pending or the task is done.
    pub(crate) fn mark_queued(&self) -> bool {
        self.state
            .compare_exchange(IDLE, QUEUED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Transitions `QUEUED -> RUNNING` before a poll.
    pub(crate) fn begin_poll(&self) -> bool {
        self.state
            .compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Transitions out of `RUNNING` after a poll returned `Pending`.
    ///
    /// Returns `true` if the task was woken during the poll and must be
    /// polled again.
    pub(crate) fn end_poll(&self) -> bool {
        if self
            .state
            .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return false;
        }

        self.state.store(QUEUED, Ordering::Release);
        true
    }

    pub(crate) fn complete(&self) {
        self.state.store(COMPLETED, Ordering::Release);
    }

    fn schedule(&self) {
        match context::current_for(self.loop_id) {
            Some(handle) => handle.schedule_poll(self.id),
            None => self.remote.push_wake(self.id),
        }
    }
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    /// Signals the task to be polled again.
    ///
    /// If the task is `IDLE`, it moves to `QUEUED` and a poll is
    /// scheduled. If the task is `RUNNING`, it moves to `NOTIFIED` so the
    /// poll in progress re-queues it when it returns.
    fn wake_by_ref(self: &Arc<Self>) {
        loop {
            match self.state.load(Ordering::Acquire) {
                IDLE => {
                    if self.mark_queued() {
                        self.schedule();
                        return;
                    }
                }
                RUNNING => {
                    if self
                        .state
                        .compare_exchange(RUNNING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                // Already queued, already notified, or finished.
                _ => return,
            }
        }
    }
}
