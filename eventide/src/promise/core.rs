use super::reaction::{Reaction, Resolution, Thenable};
use super::state::{Listener, PromiseId, PromiseState, Slot, TrackedRejection};
use crate::error::{Error, InternalError, Result};
use crate::runtime::handle::Handle;
use crate::sync::CancellationToken;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::trace;

/// Shared state behind a [`Promise`] and its [`Resolver`].
pub(crate) struct Inner<T> {
    id: PromiseId,
    handle: Handle,
    slot: RefCell<Slot<T>>,

    /// Set by the first resolve or reject call; later calls are ignored.
    locked: Cell<bool>,

    /// Set once any consumer attaches.
    handled: Cell<bool>,

    /// The promise this one is currently following, if any.
    follows: RefCell<Option<Weak<Inner<T>>>>,
}

impl<T: Clone + 'static> Inner<T> {
    /// Moves the slot out of `Pending` and schedules every listener.
    fn settle(self: &Rc<Self>, outcome: Result<T>) {
        let listeners = {
            let mut slot = self.slot.borrow_mut();
            if !matches!(&*slot, Slot::Pending(_)) {
                return;
            }

            let settled = match &outcome {
                Ok(value) => Slot::Fulfilled(value.clone()),
                Err(err) => Slot::Rejected(err.clone()),
            };

            match std::mem::replace(&mut *slot, settled) {
                Slot::Pending(listeners) => listeners,
                _ => Vec::new(),
            }
        };

        self.follows.replace(None);

        trace!(
            promise = self.id.0,
            fulfilled = outcome.is_ok(),
            listeners = listeners.len(),
            "promise settled"
        );

        if outcome.is_err() && !self.handled.get() {
            self.handle.track_rejection(self.clone());
        }

        for listener in listeners {
            let outcome = outcome.clone();
            self.handle.queue_microtask(move || listener(outcome));
        }
    }

    /// Registers `listener`; it always runs from a microtask, even if the
    /// promise is already settled.
    fn subscribe(&self, listener: Listener<T>) {
        self.handled.set(true);

        let outcome = {
            let mut slot = self.slot.borrow_mut();
            match &mut *slot {
                Slot::Pending(listeners) => {
                    listeners.push(listener);
                    return;
                }
                Slot::Fulfilled(value) => Ok(value.clone()),
                Slot::Rejected(err) => Err(err.clone()),
            }
        };

        self.handle.queue_microtask(move || listener(outcome));
    }
}

impl<T: Clone + 'static> TrackedRejection for Inner<T> {
    fn is_handled(&self) -> bool {
        self.handled.get()
    }

    fn rejection(&self) -> Option<Error> {
        match &*self.slot.borrow() {
            Slot::Rejected(err) => Some(err.clone()),
            _ => None,
        }
    }
}

/// A placeholder for a value that becomes available later.
///
/// A promise starts pending and settles exactly once, either fulfilled
/// with a `T` or rejected with an [`Error`]. Continuations attached with
/// [`then`](Promise::then) and friends never run synchronously: they are
/// queued as microtasks on the promise's event loop, in registration
/// order.
///
/// Cloning a `Promise` yields another reference to the same promise.
/// Promises can be awaited from tasks spawned on the same loop.
///
/// # Examples
///
/// ```rust,ignore
/// let event_loop = EventLoop::new();
/// let handle = event_loop.handle();
///
/// Promise::resolved(&handle, 42)
///     .then(|v| Ok(v + 1))
///     .then(|v| {
///         println!("{v}");
///         Ok(())
///     });
///
/// event_loop.start()?;
/// ```
pub struct Promise<T> {
    pub(crate) inner: Rc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.slot.borrow() {
            Slot::Pending(_) => PromiseState::Pending,
            Slot::Fulfilled(_) => PromiseState::Fulfilled,
            Slot::Rejected(_) => PromiseState::Rejected,
        };

        f.debug_struct("Promise")
            .field("id", &self.inner.id)
            .field("state", &state)
            .finish()
    }
}

impl<T: Clone + 'static> Promise<T> {
    /// Creates a promise and runs `bootstrap` synchronously with its
    /// resolver.
    ///
    /// An `Err` returned by `bootstrap`, or a panic inside it, rejects the
    /// promise unless the resolver was already used.
    pub fn new<F>(handle: &Handle, bootstrap: F) -> Self
    where
        F: FnOnce(Resolver<T>) -> Result<()>,
    {
        let (promise, resolver) = Self::pending(handle);
        let fallback = resolver.clone();

        match panic::catch_unwind(AssertUnwindSafe(move || bootstrap(resolver))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => fallback.reject(err),
            Err(payload) => fallback.reject(Error::from_panic(payload)),
        }

        promise
    }

    /// Creates a pending promise together with the resolver that settles
    /// it.
    pub fn pending(handle: &Handle) -> (Self, Resolver<T>) {
        let promise = Self {
            inner: Rc::new(Inner {
                id: PromiseId(handle.next_id()),
                handle: handle.clone(),
                slot: RefCell::new(Slot::Pending(Vec::new())),
                locked: Cell::new(false),
                handled: Cell::new(false),
                follows: RefCell::new(None),
            }),
        };

        let resolver = Resolver {
            promise: promise.clone(),
        };

        (promise, resolver)
    }

    /// Creates a promise already fulfilled with `value`.
    pub fn resolved(handle: &Handle, value: T) -> Self {
        let (promise, resolver) = Self::pending(handle);
        resolver.resolve(value);
        promise
    }

    /// Creates a promise already rejected with `err`.
    pub fn rejected(handle: &Handle, err: impl Into<Error>) -> Self {
        let (promise, resolver) = Self::pending(handle);
        resolver.reject(err);
        promise
    }

    pub fn id(&self) -> PromiseId {
        self.inner.id
    }

    pub fn state(&self) -> PromiseState {
        self.inner.slot.borrow().state()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }

    /// Returns a clone of the outcome if the promise is settled.
    ///
    /// Peeking does not count as handling a rejection.
    pub fn peek(&self) -> Option<Result<T>> {
        self.inner.slot.borrow().outcome()
    }

    /// Returns the handle of the loop this promise belongs to.
    pub fn handle(&self) -> Handle {
        self.inner.handle.clone()
    }

    /// Attaches a fulfillment handler.
    ///
    /// The derived promise settles with the handler's result. A rejection
    /// of `self` skips the handler and rejects the derived promise with
    /// the same error.
    pub fn then<U, F>(&self, on_fulfilled: F) -> Promise<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<U> + 'static,
    {
        self.react(Reaction::Fulfilled(Box::new(move |value| {
            on_fulfilled(value).into()
        })))
    }

    /// Attaches a fulfillment handler that continues with another promise.
    ///
    /// The derived promise follows the returned promise.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Promise<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Promise<U> + 'static,
    {
        self.react(Reaction::Fulfilled(Box::new(move |value| {
            Resolution::Promise(on_fulfilled(value))
        })))
    }

    /// Attaches a fulfillment handler returning any [`Resolution`].
    pub fn then_resolve<U, F>(&self, on_fulfilled: F) -> Promise<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Resolution<U> + 'static,
    {
        self.react(Reaction::Fulfilled(Box::new(on_fulfilled)))
    }

    /// Attaches both a fulfillment and a rejection handler.
    pub fn then_or_else<U, F, G>(&self, on_fulfilled: F, on_rejected: G) -> Promise<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<U> + 'static,
        G: FnOnce(Error) -> Result<U> + 'static,
    {
        self.react(Reaction::Both(
            Box::new(move |value| on_fulfilled(value).into()),
            Box::new(move |err| on_rejected(err).into()),
        ))
    }

    /// Attaches a rejection handler.
    ///
    /// A fulfilled value passes through to the derived promise unchanged;
    /// the handler can recover with `Ok` or re-reject with `Err`.
    pub fn catch_error<G>(&self, on_rejected: G) -> Promise<T>
    where
        G: FnOnce(Error) -> Result<T> + 'static,
    {
        self.react(Reaction::Rejected(
            Box::new(move |err| on_rejected(err).into()),
            std::convert::identity,
        ))
    }

    /// Runs `on_settled` whatever the outcome, then passes the outcome
    /// through.
    ///
    /// A panic in `on_settled` rejects the derived promise instead.
    pub fn finally<F>(&self, on_settled: F) -> Promise<T>
    where
        F: FnOnce() + 'static,
    {
        let (derived, resolver) = Promise::pending(&self.inner.handle);

        self.listen(move |outcome| {
            match panic::catch_unwind(AssertUnwindSafe(on_settled)) {
                Ok(()) => resolver.settle(outcome),
                Err(payload) => resolver.reject(Error::from_panic(payload)),
            }
        });

        derived
    }

    /// Races this promise against a timer.
    ///
    /// The derived promise rejects with [`Error::Timeout`] if `duration`
    /// elapses first. The timer is cleared as soon as `self` settles.
    pub fn with_timeout(&self, duration: Duration) -> Promise<T> {
        let handle = self.handle();
        let (derived, resolver) = Promise::pending(&handle);

        let on_elapsed = resolver.clone();
        let timer = handle.set_timeout(duration, move || {
            on_elapsed.reject(Error::Timeout(duration));
        });

        self.listen(move |outcome| {
            handle.clear_timer(timer);
            resolver.settle(outcome);
        });

        derived
    }

    /// Ties this promise to `token`.
    ///
    /// The derived promise rejects with [`Error::Cancelled`] as soon as
    /// the token is cancelled, synchronously if it already is. The
    /// underlying work is not interrupted.
    pub fn cancellable(&self, token: &CancellationToken) -> Promise<T> {
        let (derived, resolver) = Promise::pending(&self.inner.handle);

        let on_cancel = resolver.clone();
        let registration = token.on_cancel(move || on_cancel.reject(Error::Cancelled));

        let token = token.clone();
        self.listen(move |outcome| {
            token.unregister(registration);
            resolver.settle(outcome);
        });

        derived
    }

    /// Registers a raw listener, marking the promise as handled.
    pub(crate) fn listen<F>(&self, listener: F)
    where
        F: FnOnce(Result<T>) + 'static,
    {
        self.inner.subscribe(Box::new(listener));
    }

    pub(crate) fn mark_handled(&self) {
        self.inner.handled.set(true);
    }

    fn react<U>(&self, reaction: Reaction<T, U>) -> Promise<U>
    where
        U: Clone + 'static,
    {
        let (derived, resolver) = Promise::pending(&self.inner.handle);

        self.listen(move |outcome| {
            let resolution = panic::catch_unwind(AssertUnwindSafe(|| reaction.react(outcome)))
                .unwrap_or_else(|payload| Resolution::Reject(Error::from_panic(payload)));

            resolver.resolve_with(resolution);
        });

        derived
    }
}

impl<T: Clone + 'static> Thenable<T> for Promise<T> {
    fn subscribe(self: Box<Self>, on_settle: Box<dyn FnOnce(Result<T>)>) {
        self.inner.subscribe(on_settle);
    }

    fn as_promise(&self) -> Option<Promise<T>> {
        Some(self.clone())
    }
}

/// The settling side of a [`Promise`].
///
/// Only the first call to any settling method has an effect; later calls
/// are ignored, including calls made through clones of the resolver.
pub struct Resolver<T> {
    promise: Promise<T>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T: Clone + 'static> Resolver<T> {
    /// Fulfills the promise with `value`.
    pub fn resolve(&self, value: T) {
        self.resolve_with(Resolution::Value(value));
    }

    /// Rejects the promise with `err`.
    pub fn reject(&self, err: impl Into<Error>) {
        self.resolve_with(Resolution::Reject(err.into()));
    }

    /// Settles the promise with an already computed outcome.
    pub fn settle(&self, outcome: Result<T>) {
        self.resolve_with(outcome.into());
    }

    /// Resolves the promise with any [`Resolution`].
    ///
    /// Resolving with a promise or a thenable makes this promise adopt
    /// its eventual outcome. Following a chain that leads back to this
    /// promise rejects it with [`InternalError::Cycle`]; a chain longer
    /// than the configured limit rejects it with
    /// [`InternalError::FlattenDepth`].
    pub fn resolve_with(&self, resolution: Resolution<T>) {
        let inner = &self.promise.inner;

        if inner.locked.replace(true) {
            return;
        }

        match resolution {
            Resolution::Value(value) => inner.settle(Ok(value)),
            Resolution::Reject(err) => inner.settle(Err(err)),
            Resolution::Promise(source) => self.follow(source),
            Resolution::Thenable(thenable) => match thenable.as_promise() {
                Some(source) => self.follow(source),
                None => self.adopt(thenable),
            },
        }
    }

    /// Returns `true` once a settling method has been called.
    pub fn is_resolved(&self) -> bool {
        self.promise.inner.locked.get()
    }

    /// Returns the promise this resolver settles.
    pub fn promise(&self) -> Promise<T> {
        self.promise.clone()
    }

    fn follow(&self, source: Promise<T>) {
        let target = self.promise.inner.clone();
        let limit = target.handle.max_flatten_depth();

        if let Err(err) = check_chain(&target, &source.inner, limit) {
            target.settle(Err(err.into()));
            return;
        }

        source.mark_handled();
        *target.follows.borrow_mut() = Some(Rc::downgrade(&source.inner));

        let handle = target.handle.clone();
        handle.queue_microtask(move || {
            source
                .inner
                .subscribe(Box::new(move |outcome| target.settle(outcome)));
        });
    }

    fn adopt(&self, thenable: Box<dyn Thenable<T>>) {
        let target = self.promise.inner.clone();
        let handle = target.handle.clone();

        handle.queue_microtask(move || {
            let on_settle = target.clone();
            let subscribed = panic::catch_unwind(AssertUnwindSafe(move || {
                thenable.subscribe(Box::new(move |outcome| on_settle.settle(outcome)));
            }));

            if let Err(payload) = subscribed {
                target.settle(Err(Error::from_panic(payload)));
            }
        });
    }
}

/// Walks the follow chain starting at `source`, refusing to link
/// `target` into a cycle or past `limit` links.
fn check_chain<T>(
    target: &Rc<Inner<T>>,
    source: &Rc<Inner<T>>,
    limit: usize,
) -> std::result::Result<(), InternalError> {
    let mut current = Some(source.clone());
    let mut depth = 0;

    while let Some(node) = current {
        if Rc::ptr_eq(&node, target) {
            return Err(InternalError::Cycle);
        }

        depth += 1;
        if depth > limit {
            return Err(InternalError::FlattenDepth(limit));
        }

        current = node.follows.borrow().as_ref().and_then(Weak::upgrade);
    }

    Ok(())
}
