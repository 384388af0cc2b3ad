use super::Promise;
use crate::error::{Error, Result};

/// Capability of anything that eventually produces a `T` or an [`Error`].
///
/// Resolving a promise with a `Thenable` makes the promise adopt the
/// thenable's outcome. [`Promise`] implements it; external completion
/// sources can implement it to plug into promise chains.
pub trait Thenable<T> {
    /// Registers `on_settle`, to be called exactly once with the outcome.
    fn subscribe(self: Box<Self>, on_settle: Box<dyn FnOnce(Result<T>)>);

    /// Returns the promise behind this thenable, if it is one.
    ///
    /// Resolution links such thenables like promises, so a cycle through
    /// them is detected instead of leaving every link pending.
    fn as_promise(&self) -> Option<Promise<T>> {
        None
    }
}

/// What a handler hands back to settle a derived promise.
pub enum Resolution<T> {
    /// Fulfill with a plain value.
    Value(T),

    /// Adopt the outcome of another promise once it settles.
    Promise(Promise<T>),

    /// Adopt the outcome of a foreign thenable once it settles.
    Thenable(Box<dyn Thenable<T>>),

    /// Reject with an error.
    Reject(Error),
}

impl<T> From<Result<T>> for Resolution<T> {
    fn from(outcome: Result<T>) -> Self {
        match outcome {
            Ok(value) => Resolution::Value(value),
            Err(err) => Resolution::Reject(err),
        }
    }
}

impl<T> From<Promise<T>> for Resolution<T> {
    fn from(promise: Promise<T>) -> Self {
        Resolution::Promise(promise)
    }
}

/// Handler for the fulfilled branch of a reaction.
pub(crate) type OnFulfilled<T, U> = Box<dyn FnOnce(T) -> Resolution<U>>;

/// Handler for the rejected branch of a reaction.
pub(crate) type OnRejected<U> = Box<dyn FnOnce(Error) -> Resolution<U>>;

/// One continuation attached by a `then`-style method.
///
/// The variant records which handlers are present; a missing branch
/// passes the outcome through to the derived promise unchanged.
pub(crate) enum Reaction<T, U> {
    /// Only the fulfilled branch; rejections pass through.
    Fulfilled(OnFulfilled<T, U>),

    /// Only the rejected branch; values pass through via the conversion.
    Rejected(OnRejected<U>, fn(T) -> U),

    /// Both branches.
    Both(OnFulfilled<T, U>, OnRejected<U>),
}

impl<T, U> Reaction<T, U> {
    /// Runs the branch matching `outcome`.
    pub(crate) fn react(self, outcome: Result<T>) -> Resolution<U> {
        match (self, outcome) {
            (Reaction::Fulfilled(on_fulfilled), Ok(value))
            | (Reaction::Both(on_fulfilled, _), Ok(value)) => on_fulfilled(value),

            (Reaction::Rejected(_, pass), Ok(value)) => Resolution::Value(pass(value)),

            (Reaction::Fulfilled(_), Err(err)) => Resolution::Reject(err),

            (Reaction::Rejected(on_rejected, _), Err(err))
            | (Reaction::Both(_, on_rejected), Err(err)) => on_rejected(err),
        }
    }
}
