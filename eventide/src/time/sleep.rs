use crate::runtime::handle::Handle;
use crate::time::registry::TimerId;

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

/// Creates a future that completes after the given duration.
///
/// The timer is registered with the event loop running on the current
/// thread when the future is first polled, so the duration is measured
/// from that poll.
///
/// # Panics
///
/// Panics if polled outside of a running event loop.
///
/// # Examples
///
/// ```rust,ignore
/// use std::time::Duration;
///
/// sleep(Duration::from_millis(10)).await;
/// ```
pub fn sleep(duration: Duration) -> Sleep {
    Sleep::new(duration)
}

/// State shared between a [`Sleep`] and its timer callback.
#[derive(Default)]
struct Wakeup {
    fired: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

/// A future that completes once its timer fires.
///
/// This future is cancel-safe: dropping it clears the timer, so an
/// abandoned sleep leaves nothing behind in the registry.
pub struct Sleep {
    duration: Duration,

    /// Set on first poll.
    timer: Option<(Handle, TimerId)>,

    wakeup: Rc<Wakeup>,
}

impl Sleep {
    pub(crate) fn new(duration: Duration) -> Self {
        Self {
            duration,
            timer: None,
            wakeup: Rc::new(Wakeup::default()),
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.wakeup.fired.get() {
            return Poll::Ready(());
        }

        *this.wakeup.waker.borrow_mut() = Some(cx.waker().clone());

        if this.timer.is_none() {
            let handle = Handle::try_current().expect("Sleep polled outside of an event loop");

            let wakeup = this.wakeup.clone();
            let id = handle.set_timeout(this.duration, move || {
                wakeup.fired.set(true);

                let waker = wakeup.waker.borrow_mut().take();
                if let Some(waker) = waker {
                    waker.wake();
                }
            });

            this.timer = Some((handle, id));
        }

        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some((handle, id)) = self.timer.take() {
            if !self.wakeup.fired.get() {
                handle.clear_timer(id);
            }
        }
    }
}
