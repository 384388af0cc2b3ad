use crate::error::{Error, Result};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tracing::{debug, error};

type Listener = Box<dyn FnOnce()>;

struct State {
    cancelled: Cell<bool>,
    next_id: Cell<u64>,

    /// Listeners in registration order.
    listeners: RefCell<Vec<(u64, Listener)>>,
}

/// Identifies a listener registered with [`CancellationToken::on_cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CancelRegistration(u64);

/// A cooperative cancellation signal.
///
/// The token goes from "not cancelled" to "cancelled" at most once.
/// Listeners run synchronously inside the first [`cancel`] call, in
/// registration order. Clones share the same signal.
///
/// Cancellation never interrupts anything by itself: components that
/// accept a token reject their pending waits with [`Error::Cancelled`],
/// and long-running work is expected to poll
/// [`throw_if_cancelled`](CancellationToken::throw_if_cancelled).
///
/// [`cancel`]: CancellationToken::cancel
#[derive(Clone)]
pub struct CancellationToken {
    state: Rc<State>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            state: Rc::new(State {
                cancelled: Cell::new(false),
                next_id: Cell::new(0),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Cancels the token.
    ///
    /// Only the first call has an effect: it runs every registered
    /// listener once, in registration order, and forgets them. A panicking
    /// listener is logged and does not prevent the others from running.
    pub fn cancel(&self) {
        if self.state.cancelled.replace(true) {
            return;
        }

        let listeners = std::mem::take(&mut *self.state.listeners.borrow_mut());
        debug!(listeners = listeners.len(), "cancellation token cancelled");

        for (_, listener) in listeners {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(listener)) {
                let err = Error::from_panic(payload);
                error!(error = %err, "cancellation listener panicked");
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.get()
    }

    /// Registers `listener` to run when the token is cancelled.
    ///
    /// If the token is already cancelled, `listener` runs synchronously
    /// before this returns.
    pub fn on_cancel<F>(&self, listener: F) -> CancelRegistration
    where
        F: FnOnce() + 'static,
    {
        let id = self.state.next_id.get();
        self.state.next_id.set(id + 1);

        if self.is_cancelled() {
            listener();
        } else {
            self.state
                .listeners
                .borrow_mut()
                .push((id, Box::new(listener)));
        }

        CancelRegistration(id)
    }

    /// Removes a listener that has not run yet.
    ///
    /// Returns `false` if the listener already ran or was removed.
    pub fn unregister(&self, registration: CancelRegistration) -> bool {
        let mut listeners = self.state.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != registration.0);
        listeners.len() != before
    }

    /// Returns `Err(Error::Cancelled)` if the token is cancelled.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// for chunk in chunks {
    ///     token.throw_if_cancelled()?;
    ///     process(chunk);
    /// }
    /// ```
    pub fn throw_if_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Creates a token that is cancelled whenever this one is.
    ///
    /// Cancelling the child does not affect the parent, but removes the
    /// child's listener from it. The two tokens only hold weak references
    /// to each other.
    pub fn child_token(&self) -> CancellationToken {
        let child = CancellationToken::new();

        let linked = Rc::downgrade(&child.state);
        let registration = self.on_cancel(move || {
            if let Some(state) = linked.upgrade() {
                CancellationToken { state }.cancel();
            }
        });

        let parent = Rc::downgrade(&self.state);
        child.on_cancel(move || {
            if let Some(state) = parent.upgrade() {
                CancellationToken { state }.unregister(registration);
            }
        });

        child
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
