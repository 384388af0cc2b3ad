use std::collections::VecDeque;

/// A zero-argument callback scheduled on one of the task queues.
pub(crate) type Job = Box<dyn FnOnce()>;

/// The two tiers of ready-to-run work.
///
/// `microtasks` always drain to exhaustion before a single entry of
/// `macrotasks` is taken. Within a tier, jobs run in strict insertion
/// order.
pub(crate) struct TaskQueues {
    /// High-priority jobs: promise reactions, task polls, `queue_microtask`.
    microtasks: VecDeque<Job>,

    /// Low-priority jobs: fired timers, remote posts, `queue_macrotask`.
    macrotasks: VecDeque<Job>,
}

impl TaskQueues {
    /// Creates an empty queue pair.
    pub(crate) fn new() -> Self {
        Self {
            microtasks: VecDeque::new(),
            macrotasks: VecDeque::new(),
        }
    }

    pub(crate) fn push_microtask(&mut self, job: Job) {
        self.microtasks.push_back(job);
    }

    pub(crate) fn push_macrotask(&mut self, job: Job) {
        self.macrotasks.push_back(job);
    }

    pub(crate) fn pop_microtask(&mut self) -> Option<Job> {
        self.microtasks.pop_front()
    }

    pub(crate) fn pop_macrotask(&mut self) -> Option<Job> {
        self.macrotasks.pop_front()
    }

    pub(crate) fn has_macrotasks(&self) -> bool {
        !self.macrotasks.is_empty()
    }
}
