//! # Eventide
//!
//! **Eventide** is a single-threaded cooperative event loop for Rust, built
//! around a promise type and two priority tiers of pending work.
//!
//! Work is queued either as a *microtask* (high priority, drained to
//! exhaustion after every job) or as a *macrotask* (one per loop
//! iteration). Promises schedule their continuations as microtasks, timers
//! fire as macrotasks, and nothing ever blocks the thread: waiting is
//! always a continuation registered for later.
//!
//! On top of that core Eventide offers:
//!
//! - **Promises** with `then`/`catch_error`/`finally` chaining, automatic
//!   flattening with cycle detection, and the `all`, `all_settled`, `race`
//!   and `any` combinators
//! - **Timers**: one-shot and recurring, on the system clock or on a
//!   virtual clock for deterministic tests
//! - **Concurrency control**: a bounded FIFO work queue, a sliding-window
//!   rate limiter, cooperative cancellation tokens, and retry with backoff
//! - **`std::future` interop**: promises can be awaited, futures can be
//!   spawned onto the loop, and `#[eventide::main]` / `#[eventide::test]`
//!   run an `async fn` to completion
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use eventide::{EventLoop, Promise};
//!
//! fn main() -> eventide::Result<()> {
//!     let event_loop = EventLoop::new();
//!     let handle = event_loop.handle();
//!
//!     Promise::new(&handle, |resolver| {
//!         resolver.resolve(42);
//!         Ok(())
//!     })
//!     .then(|v| Ok(v + 1))
//!     .then(|v| {
//!         println!("{v}");
//!         Ok(())
//!     });
//!
//!     event_loop.start()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`promise`]: promises, resolvers and combinators
//! - [`time`]: sleep, timeout and promise-based delays
//! - [`sync`]: concurrency queue, rate limiter, cancellation tokens
//! - [`tools`]: retry with backoff
//! - [`task`]: spawning futures onto the loop

mod error;
mod runtime;

pub mod promise;
pub mod sync;
pub mod time;
pub mod tools;

pub use error::{Error, InternalError, Reason, Result};
pub use promise::{Promise, PromiseState, Resolution, Resolver, Settlement, Thenable};
pub use runtime::task;
pub use runtime::yield_now::yield_now;
pub use runtime::{
    DEFAULT_MAX_FLATTEN_DEPTH, EventLoop, EventLoopBuilder, Exit, Handle, Remote, RemoteResolver,
    Stats,
};
pub use time::{ClockMode, TimerId};

pub use eventide_macros::{main, test};
