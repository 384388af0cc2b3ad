use crate::error::Error;
use crate::promise::{Promise, Resolver, TrackedRejection};
use crate::runtime::context;
use crate::runtime::core::Stats;
use crate::runtime::queue::{Job, TaskQueues};
use crate::runtime::remote::{Remote, RemoteQueue, RemoteResolver};
use crate::runtime::task::TaskId;
use crate::runtime::task::core::TaskSlot;
use crate::time::clock::Clock;
use crate::time::registry::{TimerCallback, TimerId, TimerRegistry};

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Observer invoked with every rejection nobody handled.
pub(crate) type UnhandledHook = Rc<dyn Fn(&Error)>;

/// A resolver waiting for a [`RemoteResolver`] to settle it.
pub(crate) struct RemoteSlot {
    /// The `Resolver<T>`, type-erased.
    resolver: Box<dyn Any>,

    /// Rejects the promise when the remote side goes away unsettled.
    abandon: Box<dyn FnOnce()>,
}

/// State shared between an [`EventLoop`](crate::EventLoop) and all of its
/// handles.
pub(crate) struct Shared {
    /// Process-unique identity of the loop.
    pub(crate) id: u64,

    pub(crate) queues: RefCell<TaskQueues>,
    pub(crate) timers: RefCell<TimerRegistry>,
    pub(crate) clock: Clock,

    /// Inbox for other threads.
    pub(crate) remote: Arc<RemoteQueue>,

    /// Spawned futures, see [`crate::task`].
    pub(crate) tasks: RefCell<HashMap<TaskId, TaskSlot>>,

    /// Resolvers of promises settled from other threads, by slot.
    pub(crate) remote_slots: RefCell<HashMap<u64, RemoteSlot>>,

    /// Promises rejected since the last unhandled-rejection check.
    pub(crate) rejections: RefCell<Vec<Rc<dyn TrackedRejection>>>,

    pub(crate) on_unhandled: UnhandledHook,

    /// Bound on promise follow chains.
    pub(crate) max_flatten_depth: usize,

    /// Set while `start` or `block_on` is driving the loop.
    pub(crate) running: Cell<bool>,

    pub(crate) stop_requested: Cell<bool>,

    next_id: Cell<u64>,
    stats: Cell<Stats>,
}

impl Shared {
    pub(crate) fn new(
        id: u64,
        clock: Clock,
        on_unhandled: UnhandledHook,
        max_flatten_depth: usize,
    ) -> Self {
        Self {
            id,
            queues: RefCell::new(TaskQueues::new()),
            timers: RefCell::new(TimerRegistry::new()),
            clock,
            remote: Arc::new(RemoteQueue::new()),
            tasks: RefCell::new(HashMap::new()),
            remote_slots: RefCell::new(HashMap::new()),
            rejections: RefCell::new(Vec::new()),
            on_unhandled,
            max_flatten_depth,
            running: Cell::new(false),
            stop_requested: Cell::new(false),
            next_id: Cell::new(0),
            stats: Cell::new(Stats::default()),
        }
    }
}

/// A cloneable handle to an event loop.
///
/// Every component that needs to enqueue work (promises, timers, the
/// concurrency utilities) holds a `Handle`. Handles are cheap to clone and
/// are tied to the loop's thread: use [`Handle::remote`] to deliver work
/// from other threads.
#[derive(Clone)]
pub struct Handle {
    pub(crate) shared: Rc<Shared>,
}

impl Handle {
    /// Returns the handle of the event loop running on this thread.
    ///
    /// # Panics
    ///
    /// Panics if no event loop is running on this thread.
    pub fn current() -> Handle {
        context::current().expect("Handle::current called outside of an event loop")
    }

    /// Returns the handle of the event loop running on this thread, if
    /// any.
    pub fn try_current() -> Option<Handle> {
        context::current()
    }

    /// Returns the loop's notion of "now".
    pub fn now(&self) -> Instant {
        self.shared.clock.now()
    }

    /// Enqueues `job` on the microtask queue.
    pub fn queue_microtask<F>(&self, job: F)
    where
        F: FnOnce() + 'static,
    {
        self.shared.queues.borrow_mut().push_microtask(Box::new(job));
    }

    /// Enqueues `job` on the macrotask queue.
    pub fn queue_macrotask<F>(&self, job: F)
    where
        F: FnOnce() + 'static,
    {
        self.shared.queues.borrow_mut().push_macrotask(Box::new(job));
    }

    /// Runs `callback` once, as a macrotask, after `delay`.
    ///
    /// A zero delay is legal; the callback still runs only after the
    /// current job and all queued microtasks.
    pub fn set_timeout<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() + 'static,
    {
        let mut callback = Some(callback);
        self.schedule_timer(
            delay,
            None,
            Box::new(move || {
                if let Some(callback) = callback.take() {
                    callback();
                }
            }),
        )
    }

    /// Runs `callback` every `interval` until the timer is cleared.
    ///
    /// Each run is re-armed at the previous fire time plus `interval`,
    /// after the callback returned. Intervals below one millisecond are
    /// rounded up to one millisecond.
    pub fn set_interval<F>(&self, interval: Duration, callback: F) -> TimerId
    where
        F: FnMut() + 'static,
    {
        self.schedule_timer(interval, Some(interval), Box::new(callback))
    }

    /// Cancels a timer that has not fired yet.
    ///
    /// Cancelling an unknown, already fired, or already cancelled timer is
    /// a silent no-op; the return value tells whether anything was
    /// removed.
    pub fn clear_timer(&self, id: TimerId) -> bool {
        let removed = self.shared.timers.borrow_mut().cancel(id);
        if removed {
            debug!(timer = ?id, "timer cancelled");
        }
        removed
    }

    /// Asks the loop to return from [`EventLoop::start`] after the job
    /// currently executing.
    ///
    /// [`EventLoop::start`]: crate::EventLoop::start
    pub fn stop(&self) {
        self.shared.stop_requested.set(true);
    }

    /// Creates a [`Remote`] for delivering work from other threads.
    pub fn remote(&self) -> Remote {
        Remote::new(self.shared.remote.clone())
    }

    /// Creates a promise that another thread settles.
    ///
    /// The returned [`RemoteResolver`] is `Send`; settling through it posts
    /// a macrotask that settles the promise on the loop thread. Like a
    /// [`Remote`], it keeps the loop waiting until it is used or dropped.
    /// Dropping it unused rejects the promise with [`Error::Closed`].
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let (promise, resolver) = handle.remote_promise::<Vec<u8>>();
    ///
    /// std::thread::spawn(move || match std::fs::read(path) {
    ///     Ok(bytes) => resolver.resolve(bytes),
    ///     Err(err) => resolver.reject(err.to_string()),
    /// });
    /// ```
    pub fn remote_promise<T>(&self) -> (Promise<T>, RemoteResolver<T>)
    where
        T: Clone + Send + 'static,
    {
        let (promise, resolver) = Promise::pending(self);
        let slot = self.next_id();

        let abandoned = resolver.clone();
        self.shared.remote_slots.borrow_mut().insert(
            slot,
            RemoteSlot {
                resolver: Box::new(resolver),
                abandon: Box::new(move || abandoned.reject(Error::Closed)),
            },
        );

        (promise, RemoteResolver::new(self.remote(), slot))
    }

    /// Returns `true` if both handles refer to the same loop.
    pub fn ptr_eq(&self, other: &Handle) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn loop_id(&self) -> u64 {
        self.shared.id
    }

    pub(crate) fn max_flatten_depth(&self) -> usize {
        self.shared.max_flatten_depth
    }

    /// Returns an identifier unique within this loop.
    pub(crate) fn next_id(&self) -> u64 {
        let id = self.shared.next_id.get();
        self.shared.next_id.set(id + 1);
        id
    }

    pub(crate) fn stats(&self) -> Stats {
        self.shared.stats.get()
    }

    pub(crate) fn bump(&self, f: impl FnOnce(&mut Stats)) {
        let mut stats = self.shared.stats.get();
        f(&mut stats);
        self.shared.stats.set(stats);
    }

    /// Takes the resolver registered under `slot` by
    /// [`Handle::remote_promise`].
    pub(crate) fn take_remote_resolver<T: 'static>(&self, slot: u64) -> Option<Resolver<T>> {
        let entry = self.shared.remote_slots.borrow_mut().remove(&slot)?;
        entry.resolver.downcast::<Resolver<T>>().ok().map(|resolver| *resolver)
    }

    /// Rejects the promise registered under `slot`, if still waiting.
    pub(crate) fn abandon_remote_resolver(&self, slot: u64) {
        let entry = self.shared.remote_slots.borrow_mut().remove(&slot);
        if let Some(entry) = entry {
            (entry.abandon)();
        }
    }

    pub(crate) fn schedule_timer(
        &self,
        delay: Duration,
        interval: Option<Duration>,
        callback: TimerCallback,
    ) -> TimerId {
        let deadline = self.now() + delay;
        let id = self
            .shared
            .timers
            .borrow_mut()
            .schedule(deadline, interval, callback);

        debug!(timer = ?id, ?delay, recurring = interval.is_some(), "timer armed");
        id
    }

    /// Runs a queued timer. Called from the macrotask the timer was moved
    /// into.
    pub(crate) fn fire_timer(&self, id: TimerId) {
        let taken = self.shared.timers.borrow_mut().begin_fire(id);

        let Some((mut callback, recurring)) = taken else {
            return;
        };

        self.bump(|stats| stats.timers_fired += 1);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback()));

        if recurring {
            self.shared.timers.borrow_mut().rearm(id, callback);
        }

        if let Err(payload) = outcome {
            let err = Error::from_panic(payload);
            error!(timer = ?id, error = %err, "timer callback panicked");
            self.report_panic(&err);
        }
    }

    /// Remembers a rejected promise for the next unhandled-rejection check.
    pub(crate) fn track_rejection(&self, promise: Rc<dyn TrackedRejection>) {
        self.shared.rejections.borrow_mut().push(promise);
    }

    /// Reports every tracked rejection that is still unhandled.
    pub(crate) fn report_unhandled(&self) {
        let tracked = std::mem::take(&mut *self.shared.rejections.borrow_mut());

        for promise in tracked {
            if promise.is_handled() {
                continue;
            }

            if let Some(err) = promise.rejection() {
                self.bump(|stats| stats.unhandled_rejections += 1);
                (self.shared.on_unhandled)(&err);
            }
        }
    }

    /// Surfaces a panic from a callback that has no promise to reject.
    pub(crate) fn report_panic(&self, err: &Error) {
        self.bump(|stats| stats.panics += 1);
        (self.shared.on_unhandled)(err);
    }

    /// Runs one job, converting a panic into a report instead of
    /// unwinding through the loop.
    pub(crate) fn run_job(&self, job: Job) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            let err = Error::from_panic(payload);
            error!(error = %err, "scheduled callback panicked");
            self.report_panic(&err);
        }
    }
}
