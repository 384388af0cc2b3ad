use crate::error::Error;
use crate::runtime::context;
use crate::runtime::task::TaskId;

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A job posted from outside the loop thread.
pub(crate) type RemoteJob = Box<dyn FnOnce() + Send>;

/// Work handed to the loop by other threads.
#[derive(Default)]
pub(crate) struct Inbox {
    /// Completion callbacks posted through a [`Remote`].
    pub(crate) jobs: VecDeque<RemoteJob>,

    /// Tasks woken by wakers invoked off the loop thread.
    pub(crate) woken: Vec<TaskId>,
}

/// Thread-safe inbox of the event loop.
///
/// This is the only part of the loop state that other threads may touch.
/// The loop parks on the condition variable when it has nothing to run and
/// is waiting either for a timer deadline or for a remote post.
pub(crate) struct RemoteQueue {
    inbox: Mutex<Inbox>,

    /// Wakes the parked loop thread.
    condvar: Condvar,

    /// Number of live [`Remote`] handles.
    ///
    /// While at least one exists, an otherwise idle loop waits for posts
    /// instead of exiting.
    senders: AtomicUsize,
}

impl RemoteQueue {
    /// Creates an empty inbox with no registered senders.
    pub(crate) fn new() -> Self {
        Self {
            inbox: Mutex::new(Inbox::default()),
            condvar: Condvar::new(),
            senders: AtomicUsize::new(0),
        }
    }

    /// Pushes a job and wakes the loop if it is parked.
    pub(crate) fn push_job(&self, job: RemoteJob) {
        self.inbox.lock().jobs.push_back(job);
        self.condvar.notify_all();
    }

    /// Records a task wakeup coming from another thread.
    pub(crate) fn push_wake(&self, id: TaskId) {
        self.inbox.lock().woken.push(id);
        self.condvar.notify_all();
    }

    /// Takes everything currently in the inbox.
    pub(crate) fn take(&self) -> Inbox {
        std::mem::take(&mut *self.inbox.lock())
    }

    /// Returns `true` if some external source may still post work.
    pub(crate) fn has_senders(&self) -> bool {
        self.senders.load(Ordering::Acquire) > 0
    }

    /// Parks the loop thread until work is posted, the last sender goes
    /// away, or `timeout` elapses.
    ///
    /// Returns immediately if the inbox already holds work. Without a
    /// timeout and without live senders there is nothing to wait for, so
    /// this returns immediately as well.
    pub(crate) fn park(&self, timeout: Option<Duration>) {
        let mut inbox = self.inbox.lock();

        if !inbox.jobs.is_empty() || !inbox.woken.is_empty() {
            return;
        }

        match timeout {
            Some(timeout) => {
                let _ = self.condvar.wait_for(&mut inbox, timeout);
            }
            None => {
                if !self.has_senders() {
                    return;
                }
                self.condvar.wait(&mut inbox);
            }
        }
    }

    fn add_sender(&self) {
        self.senders.fetch_add(1, Ordering::AcqRel);
    }

    fn remove_sender(&self) {
        // Taking the lock orders the decrement against a concurrent `park`
        // check, so the notification cannot be lost.
        let _inbox = self.inbox.lock();
        self.senders.fetch_sub(1, Ordering::AcqRel);
        self.condvar.notify_all();
    }
}

/// A `Send + Sync` handle for delivering completion signals to the loop
/// from other threads.
///
/// Every posted closure runs on the loop thread as a macrotask. While any
/// `Remote` is alive, the loop treats it as a registered external work
/// source and parks instead of exiting when it runs out of work.
///
/// # Examples
///
/// ```rust,ignore
/// let remote = handle.remote();
///
/// std::thread::spawn(move || {
///     let value = expensive_io();
///     remote.post(move || println!("got {value}"));
/// });
/// ```
pub struct Remote {
    queue: Arc<RemoteQueue>,
}

impl Remote {
    pub(crate) fn new(queue: Arc<RemoteQueue>) -> Self {
        queue.add_sender();
        Self { queue }
    }

    /// Posts `job` to run on the loop thread as a macrotask.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push_job(Box::new(job));
    }
}

impl Clone for Remote {
    fn clone(&self) -> Self {
        Self::new(self.queue.clone())
    }
}

impl Drop for Remote {
    /// Unregisters this external work source and wakes the loop so it can
    /// re-evaluate whether it is idle.
    fn drop(&mut self) {
        self.queue.remove_sender();
    }
}

/// Outcome sent by a [`RemoteResolver`]; the error is built on the loop
/// thread because [`Error`] is not `Send`.
type RemoteOutcome<T> = std::result::Result<T, Box<dyn FnOnce() -> Error + Send>>;

/// The `Send` settling side of a promise created by
/// [`Handle::remote_promise`](crate::Handle::remote_promise).
///
/// Settling consumes the resolver. Dropping it without settling rejects
/// the promise with [`Error::Closed`].
pub struct RemoteResolver<T> {
    /// `None` once settled.
    remote: Option<Remote>,
    slot: u64,
    _marker: PhantomData<fn(T)>,
}

impl<T> RemoteResolver<T> {
    pub(crate) fn new(remote: Remote, slot: u64) -> Self {
        Self {
            remote: Some(remote),
            slot,
            _marker: PhantomData,
        }
    }
}

impl<T: Clone + Send + 'static> RemoteResolver<T> {
    /// Fulfills the promise with `value`.
    pub fn resolve(mut self, value: T) {
        self.send(Ok(value));
    }

    /// Rejects the promise with [`Error::User`] carrying `reason`.
    pub fn reject<V>(mut self, reason: V)
    where
        V: Any + fmt::Debug + Send,
    {
        self.send(Err(Box::new(move || Error::user(reason))));
    }

    fn send(&mut self, outcome: RemoteOutcome<T>) {
        let Some(remote) = self.remote.take() else {
            return;
        };

        let slot = self.slot;
        remote.post(move || {
            let Some(handle) = context::current() else {
                return;
            };

            if let Some(resolver) = handle.take_remote_resolver::<T>(slot) {
                match outcome {
                    Ok(value) => resolver.resolve(value),
                    Err(make_error) => resolver.reject(make_error()),
                }
            }
        });
    }
}

impl<T> Drop for RemoteResolver<T> {
    fn drop(&mut self) {
        if let Some(remote) = self.remote.take() {
            let slot = self.slot;
            remote.post(move || {
                if let Some(handle) = context::current() {
                    handle.abandon_remote_resolver(slot);
                }
            });
        }
    }
}
