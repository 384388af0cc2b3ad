use super::EventLoop;
use crate::error::Error;
use crate::runtime::handle::{Shared, UnhandledHook};
use crate::time::clock::{Clock, ClockMode};

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Default bound on promise follow chains.
pub const DEFAULT_MAX_FLATTEN_DEPTH: usize = 1024;

/// Source of process-unique loop identities.
static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(0);

/// Builder for configuring and creating an event loop.
///
/// # Examples
///
/// ```rust,ignore
/// let event_loop = EventLoopBuilder::new()
///     .virtual_clock()
///     .on_unhandled_rejection(|err| eprintln!("unhandled: {err}"))
///     .build();
/// ```
pub struct EventLoopBuilder {
    /// Time source of the loop.
    clock: ClockMode,

    /// Bound on promise follow chains.
    max_flatten_depth: usize,

    /// Observer for rejections nobody handled.
    on_unhandled: Option<UnhandledHook>,
}

impl EventLoopBuilder {
    /// Creates a builder with the default configuration: system clock,
    /// [`DEFAULT_MAX_FLATTEN_DEPTH`], and a hook that logs unhandled
    /// rejections at `warn` level.
    pub fn new() -> Self {
        Self {
            clock: ClockMode::System,
            max_flatten_depth: DEFAULT_MAX_FLATTEN_DEPTH,
            on_unhandled: None,
        }
    }

    /// Selects the time source.
    pub fn clock(mut self, mode: ClockMode) -> Self {
        self.clock = mode;
        self
    }

    /// Shorthand for `clock(ClockMode::Virtual)`.
    pub fn virtual_clock(self) -> Self {
        self.clock(ClockMode::Virtual)
    }

    /// Sets how many promises a follow chain may link before resolution
    /// fails with [`InternalError::FlattenDepth`].
    ///
    /// # Panics
    ///
    /// Panics if `depth == 0`.
    ///
    /// [`InternalError::FlattenDepth`]: crate::InternalError::FlattenDepth
    pub fn max_flatten_depth(mut self, depth: usize) -> Self {
        assert!(depth > 0, "max_flatten_depth must be > 0");

        self.max_flatten_depth = depth;
        self
    }

    /// Installs the observer invoked for every rejection still unhandled at
    /// the end of a microtask drain, and for every panic in a callback
    /// that has no promise to reject.
    pub fn on_unhandled_rejection<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Error) + 'static,
    {
        self.on_unhandled = Some(Rc::new(hook));
        self
    }

    /// Builds the event loop with the configured options.
    pub fn build(self) -> EventLoop {
        let on_unhandled: UnhandledHook = match self.on_unhandled {
            Some(hook) => hook,
            None => Rc::new(|err: &Error| warn!(error = %err, "unhandled promise rejection")),
        };

        let id = NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed);

        EventLoop::from_shared(Shared::new(
            id,
            Clock::new(self.clock),
            on_unhandled,
            self.max_flatten_depth,
        ))
    }
}

impl Default for EventLoopBuilder {
    /// Creates a default `EventLoopBuilder`.
    fn default() -> Self {
        Self::new()
    }
}
