//! Concurrency control built on promises.
//!
//! None of these primitives block the thread. Waiting is always expressed
//! as a promise that the event loop settles later:
//! - [`ConcurrencyQueue`] runs at most N work items at a time, in FIFO
//!   order,
//! - [`RateLimiter`] admits at most N operations per sliding window,
//! - [`CancellationToken`] carries a cooperative cancellation signal to
//!   any of the above.
//!
//! All of them are single-threaded and cheap to clone; clones share state.

mod cancel;
mod queue;
mod rate_limit;

pub use cancel::{CancelRegistration, CancellationToken};
pub use queue::ConcurrencyQueue;
pub use rate_limit::RateLimiter;
