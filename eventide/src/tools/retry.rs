use crate::error::{Error, Result};
use crate::promise::{Promise, Resolver};
use crate::runtime::handle::Handle;
use crate::sync::CancellationToken;
use crate::time::{delay, delay_with};

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;
use tracing::debug;

/// Wait inserted between two attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Retry as soon as the failure is observed, after pending macrotasks.
    None,

    /// Wait the same duration before every retry.
    Fixed(Duration),

    /// Wait `base * factor^n` before retry `n` (counting from zero),
    /// capped at `max`.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
    },
}

impl Backoff {
    /// Delay before retry number `retry`, counting from zero.
    pub fn delay(&self, retry: usize) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, factor, max } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let secs = base.as_secs_f64() * factor.powi(exponent);

                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    max
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
        }
    }
}

/// How many times to retry, how long to wait in between, and when to
/// give up early.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    backoff: Backoff,
    token: Option<CancellationToken>,
}

impl RetryPolicy {
    /// Allows `max_retries` retries after the first attempt, without
    /// waiting in between.
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            backoff: Backoff::None,
            token: None,
        }
    }

    pub fn fixed(mut self, delay: Duration) -> Self {
        self.backoff = Backoff::Fixed(delay);
        self
    }

    pub fn exponential(mut self, base: Duration, factor: f64, max: Duration) -> Self {
        self.backoff = Backoff::Exponential { base, factor, max };
        self
    }

    /// Stops retrying once `token` is cancelled; a wait in progress
    /// rejects with [`Error::Cancelled`].
    pub fn with_token(mut self, token: &CancellationToken) -> Self {
        self.token = Some(token.clone());
        self
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }
}

struct Retry<T, F> {
    handle: Handle,
    policy: RetryPolicy,
    factory: RefCell<F>,
    resolver: Resolver<T>,
}

impl<T, F> Retry<T, F>
where
    T: Clone + 'static,
    F: FnMut(usize) -> Promise<T> + 'static,
{
    /// Runs attempt number `attempt`, counting from zero.
    fn attempt(self: Rc<Self>, attempt: usize) {
        if let Some(token) = &self.policy.token {
            if let Err(err) = token.throw_if_cancelled() {
                self.resolver.reject(err);
                return;
            }
        }

        let produced = {
            let mut factory = self.factory.borrow_mut();
            panic::catch_unwind(AssertUnwindSafe(|| (*factory)(attempt)))
        };

        match produced {
            Ok(work) => work.listen(move |outcome| self.observe(attempt, outcome)),
            Err(payload) => self.observe(attempt, Err(Error::from_panic(payload))),
        }
    }

    fn observe(self: Rc<Self>, attempt: usize, outcome: Result<T>) {
        let err = match outcome {
            Ok(value) => return self.resolver.resolve(value),
            Err(err) => err,
        };

        if err.is_cancelled() || attempt >= self.policy.max_retries {
            debug!(attempt, error = %err, "retry giving up");
            return self.resolver.reject(err);
        }

        let wait = self.policy.backoff.delay(attempt);
        debug!(attempt, ?wait, error = %err, "attempt failed, retrying");

        let pause = match &self.policy.token {
            Some(token) => delay_with(&self.handle, wait, token),
            None => delay(&self.handle, wait),
        };

        pause.listen(move |waited| match waited {
            Ok(()) => self.attempt(attempt + 1),
            Err(err) => self.resolver.reject(err),
        });
    }
}

/// Retries a promise-producing operation.
///
/// `factory` receives the attempt number, starting at zero, and is
/// called at most `1 + policy.max_retries()` times. The returned promise
/// fulfills with the first value produced, or rejects with the last
/// error. A [`Error::Cancelled`] rejection is never retried.
///
/// # Examples
///
/// ```rust,ignore
/// let policy = RetryPolicy::new(3).exponential(
///     Duration::from_millis(100),
///     2.0,
///     Duration::from_secs(2),
/// );
///
/// retry(&handle, policy, move |_| connect(&handle, addr));
/// ```
pub fn retry<T, F>(handle: &Handle, policy: RetryPolicy, factory: F) -> Promise<T>
where
    T: Clone + 'static,
    F: FnMut(usize) -> Promise<T> + 'static,
{
    let (promise, resolver) = Promise::pending(handle);

    Rc::new(Retry {
        handle: handle.clone(),
        policy,
        factory: RefCell::new(factory),
        resolver,
    })
    .attempt(0);

    promise
}
