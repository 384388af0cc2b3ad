use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A future that yields back to the event loop exactly once.
struct YieldOnce(bool);

impl Future for YieldOnce {
    type Output = ();

    /// On the first poll, the task wakes itself and returns
    /// `Poll::Pending`, which queues its next poll behind every microtask
    /// already queued. On the second poll, the future completes.
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.0 {
            self.0 = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }

        Poll::Ready(())
    }
}

/// Yields execution back to the event loop.
///
/// Microtasks queued before the call run before the task resumes; no
/// macrotask runs in between.
///
/// # Examples
///
/// ```rust,ignore
/// async fn task() {
///     // Let already-queued reactions run first.
///     yield_now().await;
/// }
/// ```
pub async fn yield_now() {
    YieldOnce(false).await
}
