use crate::error::{Error, Result};
use crate::promise::{Promise, Resolver};
use crate::runtime::handle::Handle;
use crate::sync::cancel::{CancelRegistration, CancellationToken};

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tracing::debug;

/// A queued work item: starting it invokes the factory.
struct PendingItem {
    id: u64,
    start: Box<dyn FnOnce()>,
}

struct Inner {
    handle: Handle,
    capacity: usize,
    active: Cell<usize>,
    pending: RefCell<VecDeque<PendingItem>>,
    closed: Cell<bool>,
    next_id: Cell<u64>,

    /// Resolvers of `drain` promises, settled once the queue is empty.
    drained: RefCell<Vec<Resolver<()>>>,
}

impl Inner {
    /// Admits pending items while a slot is free.
    fn pump(&self) {
        while self.active.get() < self.capacity {
            let item = self.pending.borrow_mut().pop_front();
            let Some(item) = item else {
                break;
            };

            self.active.set(self.active.get() + 1);
            debug!(
                item = item.id,
                active = self.active.get(),
                pending = self.pending.borrow().len(),
                "queue item admitted"
            );

            (item.start)();
        }

        self.notify_drained();
    }

    /// Releases the slot of a finished item and admits the next one.
    fn finish(&self) {
        self.active.set(self.active.get().saturating_sub(1));
        self.pump();
    }

    /// Removes a not yet admitted item; returns whether it was found.
    fn remove_pending(&self, id: u64) -> bool {
        let mut pending = self.pending.borrow_mut();

        match pending.iter().position(|item| item.id == id) {
            Some(index) => {
                pending.remove(index);
                true
            }
            None => false,
        }
    }

    fn is_idle(&self) -> bool {
        self.active.get() == 0 && self.pending.borrow().is_empty()
    }

    fn notify_drained(&self) {
        if !self.is_idle() {
            return;
        }

        let waiters = std::mem::take(&mut *self.drained.borrow_mut());
        for resolver in waiters {
            resolver.resolve(());
        }
    }
}

/// A FIFO work queue running at most `capacity` items at a time.
///
/// Work is given as a factory producing a [`Promise`]; the factory is only
/// invoked once the item is admitted. When an active item settles, the
/// next pending item is admitted right away, from the same microtask. One
/// item failing never affects its siblings.
///
/// # Examples
///
/// ```rust,ignore
/// let queue = ConcurrencyQueue::new(&handle, 2);
///
/// for url in urls {
///     let handle = handle.clone();
///     queue.add(move || fetch(&handle, url));
/// }
///
/// queue.drain().then(|()| {
///     println!("all done");
///     Ok(())
/// });
/// ```
#[derive(Clone)]
pub struct ConcurrencyQueue {
    inner: Rc<Inner>,
}

impl ConcurrencyQueue {
    /// Creates a queue running at most `capacity` items concurrently.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(handle: &Handle, capacity: usize) -> Self {
        assert!(capacity > 0, "ConcurrencyQueue capacity must be greater than zero");

        Self {
            inner: Rc::new(Inner {
                handle: handle.clone(),
                capacity,
                active: Cell::new(0),
                pending: RefCell::new(VecDeque::new()),
                closed: Cell::new(false),
                next_id: Cell::new(0),
                drained: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Adds a work item.
    ///
    /// The returned promise settles with the outcome of the promise
    /// produced by `factory`. It rejects with [`Error::Closed`] if the
    /// queue is closed, and with [`Error::Panicked`] if `factory` panics.
    pub fn add<T, F>(&self, factory: F) -> Promise<T>
    where
        T: Clone + 'static,
        F: FnOnce() -> Promise<T> + 'static,
    {
        self.enqueue(factory, None)
    }

    /// Adds a work item tied to `token`.
    ///
    /// If the token cancels while the item is pending, the item is removed
    /// and its factory never runs. If it cancels while the item is active,
    /// the returned promise rejects with [`Error::Cancelled`] at once but
    /// the slot stays taken until the work itself settles.
    pub fn add_with<T, F>(&self, factory: F, token: &CancellationToken) -> Promise<T>
    where
        T: Clone + 'static,
        F: FnOnce() -> Promise<T> + 'static,
    {
        self.enqueue(factory, Some(token))
    }

    /// Returns a promise that fulfills once no item is active or pending.
    ///
    /// Items added after this call are waited for as well.
    pub fn drain(&self) -> Promise<()> {
        let (promise, resolver) = Promise::pending(&self.inner.handle);
        self.inner.drained.borrow_mut().push(resolver);
        self.inner.notify_drained();
        promise
    }

    /// Stops accepting new items. Items already added still run.
    pub fn close(&self) {
        if !self.inner.closed.replace(true) {
            debug!("queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Number of items currently running.
    pub fn active(&self) -> usize {
        self.inner.active.get()
    }

    /// Number of items waiting for a slot.
    pub fn pending(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    fn enqueue<T, F>(&self, factory: F, token: Option<&CancellationToken>) -> Promise<T>
    where
        T: Clone + 'static,
        F: FnOnce() -> Promise<T> + 'static,
    {
        let handle = &self.inner.handle;

        if self.is_closed() {
            return Promise::rejected(handle, Error::Closed);
        }

        if token.is_some_and(CancellationToken::is_cancelled) {
            return Promise::rejected(handle, Error::Cancelled);
        }

        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);

        let (promise, resolver) = Promise::pending(handle);
        let registration: Rc<Cell<Option<CancelRegistration>>> = Rc::new(Cell::new(None));

        let queue = self.inner.clone();
        let on_settle = resolver.clone();
        let settle_token = token.cloned();
        let settle_registration = registration.clone();

        let start = Box::new(move || {
            let done = move |outcome: Result<T>| {
                if let (Some(token), Some(id)) = (&settle_token, settle_registration.take()) {
                    token.unregister(id);
                }
                on_settle.settle(outcome);
                queue.finish();
            };

            match panic::catch_unwind(AssertUnwindSafe(factory)) {
                Ok(work) => work.listen(done),
                Err(payload) => done(Err(Error::from_panic(payload))),
            }
        });

        self.inner.pending.borrow_mut().push_back(PendingItem { id, start });
        debug!(item = id, pending = self.pending(), "queue item added");

        if let Some(token) = token {
            let queue = Rc::downgrade(&self.inner);
            registration.set(Some(token.on_cancel(move || {
                if let Some(queue) = queue.upgrade() {
                    if queue.remove_pending(id) {
                        debug!(item = id, "pending queue item cancelled");
                        queue.notify_drained();
                    }
                }
                resolver.reject(Error::Cancelled);
            })));
        }

        self.inner.pump();
        promise
    }
}

impl fmt::Debug for ConcurrencyQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyQueue")
            .field("capacity", &self.capacity())
            .field("active", &self.active())
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}
