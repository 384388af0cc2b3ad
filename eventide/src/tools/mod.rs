//! Retry utilities for promise-producing operations.
//!
//! The main entry point is [`retry`], which invokes a factory closure
//! until the promise it produces fulfills or the retry limit is reached,
//! waiting between attempts as described by a [`RetryPolicy`].

mod retry;

#[doc(inline)]
pub use retry::{Backoff, RetryPolicy, retry};
