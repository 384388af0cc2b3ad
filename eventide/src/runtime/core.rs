use crate::error::{Error, InternalError, Result};
use crate::runtime::builder::EventLoopBuilder;
use crate::runtime::context::enter_context;
use crate::runtime::handle::{Handle, Shared};
use crate::runtime::queue::TaskQueues;
use crate::time::clock::ClockMode;
use crate::time::registry::TimerRegistry;

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use tracing::{debug, trace};

/// Counters describing the work an event loop has performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Microtasks executed.
    pub microtasks: u64,

    /// Macrotasks executed, including fired timers.
    pub macrotasks: u64,

    /// Timer callbacks invoked.
    pub timers_fired: u64,

    /// Rejections reported to the unhandled-rejection hook.
    pub unhandled_rejections: u64,

    /// Callbacks that panicked.
    pub panics: u64,

    /// Futures spawned onto the loop.
    pub tasks_spawned: u64,
}

/// Why [`EventLoop::start`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Both queues, the timer registry, and the remote inbox are empty and
    /// no [`Remote`](crate::Remote) is alive.
    Idle,

    /// [`Handle::stop`] was called.
    Stopped,
}

/// Outcome of one loop iteration.
enum Turn {
    Progress,
    Idle,
    Stopped,
}

/// A single-threaded cooperative event loop.
///
/// `EventLoop` owns the microtask and macrotask queues and the timer
/// registry. Each iteration:
///
/// 1. drains the microtask queue to exhaustion, including microtasks
///    enqueued while draining,
/// 2. reports rejections left unhandled by that drain,
/// 3. moves expired timers and remote posts to the back of the macrotask
///    queue,
/// 4. runs exactly one macrotask.
///
/// When nothing is runnable it waits for the next timer deadline or for
/// a remote post, and exits once no work source remains.
///
/// Dropping the loop discards every job, timer, and task still queued.
pub struct EventLoop {
    handle: Handle,
}

impl EventLoop {
    /// Creates an event loop with the default configuration.
    pub fn new() -> Self {
        EventLoopBuilder::new().build()
    }

    /// Returns a builder for configuring the loop.
    pub fn builder() -> EventLoopBuilder {
        EventLoopBuilder::new()
    }

    pub(crate) fn from_shared(shared: Shared) -> Self {
        Self {
            handle: Handle {
                shared: Rc::new(shared),
            },
        }
    }

    /// Returns a handle for scheduling work on this loop.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Returns the counters accumulated so far.
    pub fn stats(&self) -> Stats {
        self.handle.stats()
    }

    pub fn clock_mode(&self) -> ClockMode {
        self.handle.shared.clock.mode()
    }

    /// Runs the loop until it is idle or [`Handle::stop`] is called.
    ///
    /// A stopped loop keeps its queued work and can be started again.
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::Reentrant`] if called from inside a
    /// callback of this same loop.
    pub fn start(&self) -> Result<Exit> {
        self.enter(|| {
            debug!(loop_id = self.handle.loop_id(), "event loop started");

            let exit = loop {
                match self.turn(true) {
                    Turn::Progress => continue,
                    Turn::Idle => break Exit::Idle,
                    Turn::Stopped => break Exit::Stopped,
                }
            };

            debug!(loop_id = self.handle.loop_id(), ?exit, "event loop exited");
            exit
        })
    }

    /// Performs one iteration without waiting: drains the microtask queue
    /// and runs at most one macrotask.
    ///
    /// Returns `true` if any job ran.
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::Reentrant`] if called from inside a
    /// callback of this same loop.
    pub fn tick(&self) -> Result<bool> {
        self.enter(|| matches!(self.turn(false), Turn::Progress))
    }

    /// Runs `future` to completion on this loop and returns its output.
    ///
    /// Other work queued on the loop runs alongside the future. The loop
    /// stops iterating as soon as the future completes.
    ///
    /// # Panics
    ///
    /// Panics if the loop runs out of work before the future completes,
    /// if [`Handle::stop`] is called first, or if called from inside a
    /// callback of this same loop.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let event_loop = EventLoop::new();
    /// let value = event_loop.block_on(async { 42 });
    /// assert_eq!(value, 42);
    /// ```
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + 'static,
    {
        let output = Rc::new(RefCell::new(None));

        let slot = output.clone();
        self.handle.spawn_detached(async move {
            let value = future.await;
            *slot.borrow_mut() = Some(value);
        });

        let finished = self
            .enter(|| {
                loop {
                    if output.borrow().is_some() {
                        return true;
                    }

                    match self.turn(true) {
                        Turn::Progress => continue,
                        Turn::Idle | Turn::Stopped => return output.borrow().is_some(),
                    }
                }
            })
            .expect("block_on called from inside the event loop");

        assert!(finished, "block_on: event loop ran out of work before the future completed");

        output
            .borrow_mut()
            .take()
            .expect("block_on: future output missing")
    }

    /// Installs the loop context and the re-entrancy guard around `f`.
    fn enter<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let shared = &self.handle.shared;

        if shared.running.replace(true) {
            return Err(Error::Internal(InternalError::Reentrant));
        }

        shared.stop_requested.set(false);

        struct Running<'a>(&'a Shared);

        impl Drop for Running<'_> {
            fn drop(&mut self) {
                self.0.running.set(false);
            }
        }

        let _running = Running(shared);

        Ok(enter_context(self.handle.clone(), f))
    }

    /// Runs one iteration of the loop.
    fn turn(&self, block: bool) -> Turn {
        let handle = &self.handle;
        let shared = &handle.shared;

        let drained = self.drain_microtasks();
        handle.report_unhandled();

        if shared.stop_requested.get() {
            return Turn::Stopped;
        }

        self.pull_remote();
        self.collect_timers();

        let job = shared.queues.borrow_mut().pop_macrotask();
        if let Some(job) = job {
            handle.bump(|stats| stats.macrotasks += 1);
            handle.run_job(job);
            return Turn::Progress;
        }

        if drained > 0 {
            return Turn::Progress;
        }

        if !block {
            return Turn::Idle;
        }

        let next_deadline = shared.timers.borrow_mut().next_deadline();

        match next_deadline {
            Some(deadline) => {
                match shared.clock.mode() {
                    ClockMode::Virtual => {
                        trace!("advancing virtual clock to next timer");
                        shared.clock.advance_to(deadline);
                    }
                    ClockMode::System => {
                        let timeout = deadline.saturating_duration_since(shared.clock.now());
                        shared.remote.park(Some(timeout));
                    }
                }
                Turn::Progress
            }
            None if shared.remote.has_senders() => {
                trace!("waiting for remote work");
                shared.remote.park(None);
                Turn::Progress
            }
            None => {
                // A remote that posted and dropped right away leaves work
                // behind without any sender.
                self.pull_remote();
                if shared.queues.borrow().has_macrotasks() {
                    Turn::Progress
                } else {
                    Turn::Idle
                }
            }
        }
    }

    /// Executes microtasks until the queue is empty.
    ///
    /// Microtasks enqueued by the ones running are executed in the same
    /// drain. Returns how many ran.
    fn drain_microtasks(&self) -> u64 {
        let handle = &self.handle;
        let mut ran = 0;

        loop {
            // The borrow must end before the job runs: jobs enqueue more
            // work.
            let job = handle.shared.queues.borrow_mut().pop_microtask();
            let Some(job) = job else {
                break;
            };

            handle.run_job(job);
            ran += 1;
        }

        if ran > 0 {
            handle.bump(|stats| stats.microtasks += ran);
            trace!(count = ran, "drained microtasks");
        }

        ran
    }

    /// Moves expired timers to the back of the macrotask queue.
    fn collect_timers(&self) {
        let shared = &self.handle.shared;
        let now = shared.clock.now();
        let expired = shared.timers.borrow_mut().expired(now);

        for id in expired {
            let handle = self.handle.clone();
            shared
                .queues
                .borrow_mut()
                .push_macrotask(Box::new(move || handle.fire_timer(id)));
        }
    }

    /// Moves remote posts and remote wakeups to the back of the macrotask
    /// queue.
    fn pull_remote(&self) {
        let shared = &self.handle.shared;
        let inbox = shared.remote.take();
        let mut queues = shared.queues.borrow_mut();

        for job in inbox.jobs {
            queues.push_macrotask(job);
        }

        for id in inbox.woken {
            let handle = self.handle.clone();
            queues.push_macrotask(Box::new(move || handle.poll_task(id)));
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventLoop {
    /// Discards all pending work.
    ///
    /// Queued jobs, timers, and tasks hold handles to the loop; clearing
    /// them breaks those reference cycles.
    fn drop(&mut self) {
        let shared = &self.handle.shared;

        // Everything is moved out first so that destructors running below
        // may still use the loop state.
        let queues = std::mem::replace(&mut *shared.queues.borrow_mut(), TaskQueues::new());
        let timers = std::mem::replace(&mut *shared.timers.borrow_mut(), TimerRegistry::new());
        let tasks = std::mem::take(&mut *shared.tasks.borrow_mut());
        let remote_slots = std::mem::take(&mut *shared.remote_slots.borrow_mut());
        let rejections = std::mem::take(&mut *shared.rejections.borrow_mut());

        drop(queues);
        drop(timers);
        drop(tasks);
        drop(remote_slots);
        drop(rejections);
    }
}
