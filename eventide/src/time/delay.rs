use crate::error::Error;
use crate::promise::Promise;
use crate::runtime::handle::Handle;
use crate::sync::CancellationToken;

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

/// Returns a promise that fulfills after `duration`.
///
/// A zero duration still fulfills asynchronously, after the current job
/// and all queued microtasks.
pub fn delay(handle: &Handle, duration: Duration) -> Promise<()> {
    let (promise, resolver) = Promise::pending(handle);
    handle.set_timeout(duration, move || resolver.resolve(()));
    promise
}

/// Like [`delay`], but rejects with [`Error::Cancelled`] as soon as
/// `token` is cancelled, clearing the timer.
///
/// An already cancelled token yields an already rejected promise and no
/// timer is armed.
pub fn delay_with(handle: &Handle, duration: Duration, token: &CancellationToken) -> Promise<()> {
    if token.is_cancelled() {
        return Promise::rejected(handle, Error::Cancelled);
    }

    let (promise, resolver) = Promise::pending(handle);

    let on_elapsed = resolver.clone();
    let elapsed_token = token.clone();
    let registration = Rc::new(Cell::new(None));
    let elapsed_registration = registration.clone();

    let timer = handle.set_timeout(duration, move || {
        if let Some(id) = elapsed_registration.take() {
            elapsed_token.unregister(id);
        }
        on_elapsed.resolve(());
    });

    let timers = handle.clone();
    registration.set(Some(token.on_cancel(move || {
        timers.clear_timer(timer);
        resolver.reject(Error::Cancelled);
    })));

    promise
}
