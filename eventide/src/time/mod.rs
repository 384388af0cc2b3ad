//! Timers and time-based utilities.
//!
//! Timers are tracked by the event loop's timer registry and fire as
//! macrotasks. The loop reads time from its [`ClockMode`]: the system
//! monotonic clock, or a virtual clock that jumps straight to the next
//! deadline whenever the loop would otherwise wait.
//!
//! This module provides:
//! - [`sleep`] and [`timeout`] for use inside spawned futures,
//! - [`delay`] and [`delay_with`] for promise-based code.

pub(crate) mod clock;
pub(crate) mod registry;

mod delay;
mod sleep;
mod timeout;

pub use clock::ClockMode;
pub use registry::TimerId;

#[doc(inline)]
pub use delay::{delay, delay_with};

#[doc(inline)]
pub use sleep::{Sleep, sleep};

#[doc(inline)]
pub use timeout::{Timeout, timeout};
