use crate::error::{Error, Result};

/// Observable state of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// Identifies a promise within its event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromiseId(pub(crate) u64);

/// Continuation invoked once with the outcome of a promise.
pub(crate) type Listener<T> = Box<dyn FnOnce(Result<T>)>;

/// Storage of a promise.
///
/// The transition is one-way: `Pending` becomes `Fulfilled` or
/// `Rejected` once and never changes again.
pub(crate) enum Slot<T> {
    /// Listeners registered while pending, in registration order.
    Pending(Vec<Listener<T>>),
    Fulfilled(T),
    Rejected(Error),
}

impl<T: Clone> Slot<T> {
    pub(crate) fn state(&self) -> PromiseState {
        match self {
            Slot::Pending(_) => PromiseState::Pending,
            Slot::Fulfilled(_) => PromiseState::Fulfilled,
            Slot::Rejected(_) => PromiseState::Rejected,
        }
    }

    /// Clones the settled outcome, if any.
    pub(crate) fn outcome(&self) -> Option<Result<T>> {
        match self {
            Slot::Pending(_) => None,
            Slot::Fulfilled(value) => Some(Ok(value.clone())),
            Slot::Rejected(err) => Some(Err(err.clone())),
        }
    }
}

/// Type-erased view of a rejected promise, checked at the end of each
/// microtask drain for unhandled rejections.
pub(crate) trait TrackedRejection {
    /// Whether any consumer has attached to the promise.
    fn is_handled(&self) -> bool;

    /// The rejection error, if the promise is rejected.
    fn rejection(&self) -> Option<Error>;
}
