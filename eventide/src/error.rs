//! Error types shared by every component of the event loop.
//!
//! A single [`Error`] travels through promise chains, combinators and the
//! concurrency utilities. It is `Clone` because a settled rejection is
//! delivered to every reaction registered on the promise.

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Object-safe view over an arbitrary application value.
trait UserValue: Any + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<V: Any + fmt::Debug> UserValue for V {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An application-supplied rejection value, carried verbatim.
///
/// Any `'static + Debug` value can be used as a rejection reason. The value
/// is never converted; [`Reason::downcast_ref`] recovers it with its
/// original type.
#[derive(Clone)]
pub struct Reason(Rc<dyn UserValue>);

impl Reason {
    /// Wraps `value` as a rejection reason.
    pub fn new<V: Any + fmt::Debug>(value: V) -> Self {
        Self(Rc::new(value))
    }

    /// Returns the wrapped value if it is of type `V`.
    pub fn downcast_ref<V: Any>(&self) -> Option<&V> {
        let value: &dyn UserValue = &*self.0;
        value.as_any().downcast_ref::<V>()
    }

    /// Returns `true` if the wrapped value is of type `V`.
    pub fn is<V: Any>(&self) -> bool {
        self.downcast_ref::<V>().is_some()
    }
}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value: &dyn UserValue = &*self.0;
        fmt::Debug::fmt(value, f)
    }
}

impl fmt::Display for Reason {
    /// Strings are shown as-is, everything else through `Debug`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.downcast_ref::<&'static str>() {
            return f.write_str(s);
        }

        if let Some(s) = self.downcast_ref::<String>() {
            return f.write_str(s);
        }

        fmt::Debug::fmt(self, f)
    }
}

/// Invariant violations detected by the scheduler itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InternalError {
    /// A promise was resolved with itself, or with a chain of promises
    /// that leads back to it.
    #[error("promise resolved with itself or with a chain leading back to it")]
    Cycle,

    /// A promise follow chain grew past the configured limit.
    #[error("promise follow chain exceeded {0} links")]
    FlattenDepth(usize),

    /// The event loop was started from inside one of its own callbacks.
    #[error("event loop started from inside one of its own callbacks")]
    Reentrant,
}

/// The error type carried by rejected promises.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A value supplied by application code.
    #[error("{0}")]
    User(Reason),

    /// A cancellation checkpoint or token-aware wait observed a
    /// cancelled token.
    #[error("operation was cancelled")]
    Cancelled,

    /// A timeout race elapsed before the operation settled.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Every input of an `any` combinator rejected, in input order.
    #[error("all {} promises were rejected", .0.len())]
    Aggregate(Vec<Error>),

    /// A scheduler invariant was violated.
    #[error("internal error: {0}")]
    Internal(#[from] InternalError),

    /// A scheduled callback panicked.
    #[error("callback panicked: {0}")]
    Panicked(String),

    /// Work was submitted to a closed queue.
    #[error("queue is closed")]
    Closed,
}

impl Error {
    /// Builds a [`Error::User`] rejection from any value.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let err = Error::user(404u16);
    /// assert_eq!(err.downcast_ref::<u16>(), Some(&404));
    /// ```
    pub fn user<V: Any + fmt::Debug>(value: V) -> Self {
        Error::User(Reason::new(value))
    }

    /// Returns the application value of a [`Error::User`] rejection if it
    /// has type `V`.
    pub fn downcast_ref<V: Any>(&self) -> Option<&V> {
        match self {
            Error::User(reason) => reason.downcast_ref::<V>(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal(_))
    }

    /// Turns a panic payload into a [`Error::Panicked`].
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };

        Error::Panicked(message)
    }
}

impl From<&'static str> for Error {
    fn from(value: &'static str) -> Self {
        Error::user(value)
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::user(value)
    }
}
