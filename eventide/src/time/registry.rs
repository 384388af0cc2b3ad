use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

/// Smallest interval a recurring timer may use.
pub(crate) const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Identifies a timer scheduled on an event loop.
///
/// Returned by [`Handle::set_timeout`](crate::Handle::set_timeout) and
/// [`Handle::set_interval`](crate::Handle::set_interval); pass it to
/// [`Handle::clear_timer`](crate::Handle::clear_timer) to cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Callback of a timer. One-shot timers wrap their `FnOnce` in an `Option`.
pub(crate) type TimerCallback = Box<dyn FnMut()>;

/// A heap entry pointing at a timer slot.
///
/// Entries are ordered by `(deadline, seq)`, so ties fire in insertion
/// order.
struct TimerEntry {
    deadline: Instant,
    seq: u64,
    id: TimerId,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Ord for TimerEntry {
    /// Reversed so that `BinaryHeap<TimerEntry>` pops the earliest
    /// deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// State of a live timer.
struct TimerSlot {
    deadline: Instant,

    /// Sequence number of the heap entry that currently represents this
    /// slot. Heap entries with any other sequence number are stale.
    seq: u64,

    /// `Some` for recurring timers.
    interval: Option<Duration>,

    /// `None` while the callback is executing.
    callback: Option<TimerCallback>,

    /// Set once the timer has been moved to the macrotask queue.
    queued: bool,
}

/// Timers keyed by fire time.
///
/// Cancelled timers leave stale entries behind in the heap. Those are
/// skipped when they reach the top, and the heap is rebuilt once they make
/// up more than half of it.
pub(crate) struct TimerRegistry {
    heap: BinaryHeap<TimerEntry>,
    slots: HashMap<TimerId, TimerSlot>,

    /// Heap entries whose timer was cancelled.
    stale: usize,

    next_id: u64,
    next_seq: u64,
}

impl TimerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            slots: HashMap::new(),
            stale: 0,
            next_id: 0,
            next_seq: 0,
        }
    }

    /// Registers a timer firing at `deadline`.
    pub(crate) fn schedule(
        &mut self,
        deadline: Instant,
        interval: Option<Duration>,
        callback: TimerCallback,
    ) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let seq = self.push_entry(deadline, id);
        self.slots.insert(
            id,
            TimerSlot {
                deadline,
                seq,
                interval: interval.map(|i| i.max(MIN_INTERVAL)),
                callback: Some(callback),
                queued: false,
            },
        );

        id
    }

    /// Removes a timer. Returns `false` if it already fired or was
    /// already cancelled.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        let Some(slot) = self.slots.remove(&id) else {
            return false;
        };

        // A queued timer already left the heap.
        if !slot.queued {
            self.stale += 1;
            if self.stale > self.heap.len() / 2 {
                self.compact();
            }
        }

        true
    }

    /// Returns the earliest live deadline, discarding stale heap entries.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(entry) = self.heap.peek() {
            if is_live(&self.slots, entry) {
                return Some(entry.deadline);
            }
            self.heap.pop();
            self.stale = self.stale.saturating_sub(1);
        }

        None
    }

    /// Pops every timer with `deadline <= now`, in ascending
    /// `(deadline, insertion)` order, and marks them queued.
    pub(crate) fn expired(&mut self, now: Instant) -> Vec<TimerId> {
        let mut ready = Vec::new();

        while let Some(deadline) = self.next_deadline() {
            if deadline > now {
                break;
            }

            if let Some(entry) = self.heap.pop() {
                if let Some(slot) = self.slots.get_mut(&entry.id) {
                    slot.queued = true;
                }
                ready.push(entry.id);
            }
        }

        ready
    }

    /// Takes the callback of a queued timer so it can run outside of any
    /// borrow of the registry.
    ///
    /// One-shot timers are removed; recurring ones keep their slot until
    /// [`rearm`](Self::rearm). Returns `None` if the timer was cancelled
    /// after being queued.
    pub(crate) fn begin_fire(&mut self, id: TimerId) -> Option<(TimerCallback, bool)> {
        let recurring = self.slots.get(&id)?.interval.is_some();

        if recurring {
            let slot = self.slots.get_mut(&id)?;
            slot.callback.take().map(|cb| (cb, true))
        } else {
            self.slots.remove(&id)?.callback.map(|cb| (cb, false))
        }
    }

    /// Puts a recurring timer back in the heap at
    /// `previous deadline + interval`.
    ///
    /// Does nothing if the timer was cancelled while its callback ran.
    pub(crate) fn rearm(&mut self, id: TimerId, callback: TimerCallback) {
        let Some(slot) = self.slots.get(&id) else {
            return;
        };
        let Some(interval) = slot.interval else {
            return;
        };

        let deadline = slot.deadline + interval;
        let seq = self.push_entry(deadline, id);

        if let Some(slot) = self.slots.get_mut(&id) {
            slot.deadline = deadline;
            slot.seq = seq;
            slot.callback = Some(callback);
            slot.queued = false;
        }
    }

    /// Number of live timers, including ones already queued to fire.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    fn push_entry(&mut self, deadline: Instant, id: TimerId) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry { deadline, seq, id });
        seq
    }

    /// Drops every stale entry from the heap.
    fn compact(&mut self) {
        let slots = &self.slots;
        self.heap.retain(|entry| is_live(slots, entry));
        self.stale = 0;
    }
}

fn is_live(slots: &HashMap<TimerId, TimerSlot>, entry: &TimerEntry) -> bool {
    slots
        .get(&entry.id)
        .is_some_and(|slot| slot.seq == entry.seq && !slot.queued)
}
