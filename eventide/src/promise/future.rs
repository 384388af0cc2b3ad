use super::Promise;
use crate::error::Result;

use std::cell::RefCell;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// Future returned by awaiting a [`Promise`].
///
/// Resolves to the promise's outcome. Awaiting counts as handling a
/// rejection.
pub struct PromiseFuture<T> {
    promise: Promise<T>,

    /// Waker slot shared with the listener registered on first poll.
    waker: Option<Rc<RefCell<Option<Waker>>>>,
}

impl<T: Clone + 'static> Future for PromiseFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(outcome) = this.promise.peek() {
            this.promise.mark_handled();
            return Poll::Ready(outcome);
        }

        match &this.waker {
            Some(slot) => {
                *slot.borrow_mut() = Some(cx.waker().clone());
            }
            None => {
                let slot = Rc::new(RefCell::new(Some(cx.waker().clone())));
                let listener_slot = slot.clone();

                this.promise.listen(move |_| {
                    let waker = listener_slot.borrow_mut().take();
                    if let Some(waker) = waker {
                        waker.wake();
                    }
                });

                this.waker = Some(slot);
            }
        }

        Poll::Pending
    }
}

impl<T: Clone + 'static> IntoFuture for Promise<T> {
    type Output = Result<T>;
    type IntoFuture = PromiseFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        PromiseFuture {
            promise: self,
            waker: None,
        }
    }
}
