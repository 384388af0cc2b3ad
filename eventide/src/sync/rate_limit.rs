use crate::error::Error;
use crate::promise::{Promise, Resolver};
use crate::runtime::handle::Handle;
use crate::sync::cancel::{CancelRegistration, CancellationToken};
use crate::time::TimerId;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::debug;

struct Inner {
    handle: Handle,
    limit: usize,
    window: Duration,

    /// Admission timestamps, oldest first.
    log: RefCell<VecDeque<Instant>>,
}

/// One caller blocked in `acquire`.
struct Waiter {
    resolver: Resolver<()>,
    timer: Cell<Option<TimerId>>,
    token: Option<CancellationToken>,
    registration: Cell<Option<CancelRegistration>>,
}

impl Inner {
    /// Drops timestamps that left the window.
    fn prune(&self, now: Instant) {
        let mut log = self.log.borrow_mut();

        while let Some(&oldest) = log.front() {
            if now.duration_since(oldest) < self.window {
                break;
            }
            log.pop_front();
        }
    }

    /// Records an admission if the window has room, otherwise returns how
    /// long until the oldest admission expires.
    fn try_admit(&self) -> Result<(), Duration> {
        let now = self.handle.now();
        self.prune(now);

        let mut log = self.log.borrow_mut();
        if log.len() < self.limit {
            log.push_back(now);
            return Ok(());
        }

        let oldest = log.front().copied().unwrap_or(now);
        Err(self.window.saturating_sub(now.duration_since(oldest)))
    }

    /// Admits `waiter` or arms a timer to check again.
    fn attempt(self: &Rc<Self>, waiter: Rc<Waiter>) {
        if waiter.resolver.is_resolved() {
            return;
        }

        match self.try_admit() {
            Ok(()) => {
                if let (Some(token), Some(id)) = (&waiter.token, waiter.registration.take()) {
                    token.unregister(id);
                }
                waiter.resolver.resolve(());
            }
            Err(wait) => {
                debug!(?wait, limit = self.limit, "rate limit reached, waiting");

                let limiter = self.clone();
                let retry = waiter.clone();
                let timer = self
                    .handle
                    .set_timeout(wait, move || limiter.attempt(retry));

                waiter.timer.set(Some(timer));
            }
        }
    }
}

/// Sliding-window admission control: at most `limit` admissions within
/// any trailing `window`.
///
/// Waiting callers re-check when the oldest admission leaves the window.
/// Several callers may wake at the same instant; those that still find
/// the window full wait again.
///
/// # Examples
///
/// ```rust,ignore
/// let limiter = RateLimiter::new(&handle, 2, Duration::from_secs(1));
///
/// for request in requests {
///     let handle = handle.clone();
///     limiter.acquire().and_then(move |()| send(&handle, request));
/// }
/// ```
#[derive(Clone)]
pub struct RateLimiter {
    inner: Rc<Inner>,
}

impl RateLimiter {
    /// Creates a limiter admitting `limit` operations per `window`.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is zero.
    pub fn new(handle: &Handle, limit: usize, window: Duration) -> Self {
        assert!(limit > 0, "RateLimiter limit must be greater than zero");

        Self {
            inner: Rc::new(Inner {
                handle: handle.clone(),
                limit,
                window,
                log: RefCell::new(VecDeque::with_capacity(limit)),
            }),
        }
    }

    /// Returns a promise that fulfills once the caller may proceed.
    ///
    /// Under the limit the promise is fulfilled right away, so its
    /// reactions run at the next microtask drain.
    pub fn acquire(&self) -> Promise<()> {
        let (promise, resolver) = Promise::pending(&self.inner.handle);

        self.inner.attempt(Rc::new(Waiter {
            resolver,
            timer: Cell::new(None),
            token: None,
            registration: Cell::new(None),
        }));

        promise
    }

    /// Like [`acquire`](RateLimiter::acquire), but rejects with
    /// [`Error::Cancelled`] and clears the pending timer if `token` is
    /// cancelled while waiting.
    pub fn acquire_with(&self, token: &CancellationToken) -> Promise<()> {
        let handle = &self.inner.handle;

        if token.is_cancelled() {
            return Promise::rejected(handle, Error::Cancelled);
        }

        let (promise, resolver) = Promise::pending(handle);
        let waiter = Rc::new(Waiter {
            resolver,
            timer: Cell::new(None),
            token: Some(token.clone()),
            registration: Cell::new(None),
        });

        let cancelled = waiter.clone();
        let timers = handle.clone();
        waiter.registration.set(Some(token.on_cancel(move || {
            if let Some(timer) = cancelled.timer.take() {
                timers.clear_timer(timer);
            }
            debug!("rate limiter wait cancelled");
            cancelled.resolver.reject(Error::Cancelled);
        })));

        self.inner.attempt(waiter);
        promise
    }

    /// Records an admission if the window has room right now.
    pub fn try_acquire(&self) -> bool {
        self.inner.try_admit().is_ok()
    }

    /// Number of admissions the current window still has room for.
    pub fn available(&self) -> usize {
        self.inner.prune(self.inner.handle.now());
        self.inner.limit - self.inner.log.borrow().len()
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit", &self.inner.limit)
            .field("window", &self.inner.window)
            .field("admitted", &self.inner.log.borrow().len())
            .finish()
    }
}
