//! Promises: single-assignment placeholders settled through the event
//! loop's microtask queue.
//!
//! A [`Promise`] is settled through its [`Resolver`]. Continuations are
//! attached with [`Promise::then`], [`Promise::catch_error`],
//! [`Promise::finally`] and related methods, and always run as
//! microtasks. The combinators [`all`], [`all_settled`], [`race`] and
//! [`any`] aggregate several promises into one.

mod combinators;
mod core;
mod future;
mod reaction;
mod state;

pub use self::combinators::{Settlement, all, all_settled, any, race};
pub use self::core::{Promise, Resolver};
pub use self::future::PromiseFuture;
pub use self::reaction::{Resolution, Thenable};
pub use self::state::{PromiseId, PromiseState};

pub(crate) use self::state::TrackedRejection;
