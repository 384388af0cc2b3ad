use std::cell::Cell;
use std::time::{Duration, Instant};

/// Source of time used by an event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockMode {
    /// Wall-clock monotonic time. Waiting for a timer parks the thread.
    #[default]
    System,

    /// Virtual time that only moves when the loop has nothing to run but
    /// timers. The loop then jumps straight to the next deadline instead
    /// of sleeping, which makes timer-driven code deterministic.
    Virtual,
}

/// Monotonic clock owned by an event loop.
pub(crate) struct Clock {
    mode: ClockMode,

    /// Reference point for virtual time.
    origin: Instant,

    /// Virtual time elapsed since `origin`.
    offset: Cell<Duration>,
}

impl Clock {
    pub(crate) fn new(mode: ClockMode) -> Self {
        Self {
            mode,
            origin: Instant::now(),
            offset: Cell::new(Duration::ZERO),
        }
    }

    pub(crate) fn mode(&self) -> ClockMode {
        self.mode
    }

    /// Returns the current instant according to this clock.
    pub(crate) fn now(&self) -> Instant {
        match self.mode {
            ClockMode::System => Instant::now(),
            ClockMode::Virtual => self.origin + self.offset.get(),
        }
    }

    /// Moves virtual time forward to `deadline`.
    ///
    /// Virtual time never goes backwards; on a system clock this is a
    /// no-op.
    pub(crate) fn advance_to(&self, deadline: Instant) {
        if self.mode == ClockMode::Virtual {
            let target = deadline.saturating_duration_since(self.origin);
            if target > self.offset.get() {
                self.offset.set(target);
            }
        }
    }
}
