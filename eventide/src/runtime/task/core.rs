use super::TaskId;
use super::waker::TaskWaker;
use crate::error::{Error, Result};
use crate::promise::Promise;
use crate::runtime::context;
use crate::runtime::handle::Handle;

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tracing::{error, trace};

/// A type-erased spawned future.
pub(crate) type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

/// Storage for one spawned task.
pub(crate) struct TaskSlot {
    /// `None` while the future is being polled.
    future: Option<LocalFuture>,

    waker: Arc<TaskWaker>,
}

/// Wraps a future so that a panic while polling becomes an
/// [`Error::Panicked`] output instead of unwinding through the loop.
struct CatchPanic<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> Future for CatchPanic<F> {
    type Output = Result<F::Output>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.inner.as_mut();

        match panic::catch_unwind(AssertUnwindSafe(|| inner.poll(cx))) {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Err(payload) => Poll::Ready(Err(Error::from_panic(payload))),
        }
    }
}

impl Handle {
    /// Spawns a future onto this event loop.
    ///
    /// The future is polled from microtasks, so it starts running at the
    /// next microtask drain, never synchronously inside this call. The
    /// returned promise fulfills with the future's output, or rejects with
    /// [`Error::Panicked`] if polling it panics.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let doubled = handle.spawn(async move {
    ///     let value = fetch.await?;
    ///     Ok::<_, Error>(value * 2)
    /// });
    /// ```
    pub fn spawn<F>(&self, future: F) -> Promise<F::Output>
    where
        F: Future + 'static,
        F::Output: Clone + 'static,
    {
        let (promise, resolver) = Promise::pending(self);

        self.spawn_detached(async move {
            match (CatchPanic { inner: Box::pin(future) }).await {
                Ok(value) => resolver.resolve(value),
                Err(err) => resolver.reject(err),
            }
        });

        promise
    }

    /// Spawns a fallible future; an `Err` output rejects the returned
    /// promise.
    pub fn try_spawn<F, T>(&self, future: F) -> Promise<T>
    where
        F: Future<Output = Result<T>> + 'static,
        T: Clone + 'static,
    {
        let (promise, resolver) = Promise::pending(self);

        self.spawn_detached(async move {
            match (CatchPanic { inner: Box::pin(future) }).await {
                Ok(Ok(value)) => resolver.resolve(value),
                Ok(Err(err)) | Err(err) => resolver.reject(err),
            }
        });

        promise
    }

    /// Registers a task and queues its first poll.
    pub(crate) fn spawn_detached<F>(&self, future: F) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        let id = TaskId(self.next_id());
        let waker = Arc::new(TaskWaker::new(id, self.loop_id(), self.shared.remote.clone()));

        self.shared.tasks.borrow_mut().insert(
            id,
            TaskSlot {
                future: Some(Box::pin(future)),
                waker: waker.clone(),
            },
        );
        self.bump(|stats| stats.tasks_spawned += 1);

        if waker.mark_queued() {
            self.schedule_poll(id);
        }

        id
    }

    /// Queues a poll of task `id` as a microtask.
    pub(crate) fn schedule_poll(&self, id: TaskId) {
        let handle = self.clone();
        self.queue_microtask(move || handle.poll_task(id));
    }

    /// Polls task `id` once.
    ///
    /// The future is taken out of the task table for the duration of the
    /// poll, so the future may freely spawn or wake other tasks.
    pub(crate) fn poll_task(&self, id: TaskId) {
        let taken = {
            let mut tasks = self.shared.tasks.borrow_mut();
            tasks
                .get_mut(&id)
                .and_then(|slot| slot.future.take().map(|f| (f, slot.waker.clone())))
        };

        let Some((mut future, task_waker)) = taken else {
            return;
        };

        if !task_waker.begin_poll() {
            self.restore_task(id, future);
            return;
        }

        trace!(task = id.0, "polling task");

        let waker = Waker::from(task_waker.clone());
        let mut cx = Context::from_waker(&waker);

        match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => {
                self.restore_task(id, future);

                if task_waker.end_poll() {
                    self.schedule_poll(id);
                }
            }
            Ok(Poll::Ready(())) => {
                task_waker.complete();
                self.shared.tasks.borrow_mut().remove(&id);
            }
            Err(payload) => {
                task_waker.complete();
                self.shared.tasks.borrow_mut().remove(&id);

                let err = Error::from_panic(payload);
                error!(task = id.0, error = %err, "spawned task panicked");
                self.report_panic(&err);
            }
        }
    }

    fn restore_task(&self, id: TaskId, future: LocalFuture) {
        if let Some(slot) = self.shared.tasks.borrow_mut().get_mut(&id) {
            slot.future = Some(future);
        }
    }
}

/// Spawns a future onto the event loop running on this thread.
///
/// See [`Handle::spawn`].
///
/// # Panics
///
/// Panics if called outside the context of a running event loop.
pub fn spawn<F>(future: F) -> Promise<F::Output>
where
    F: Future + 'static,
    F::Output: Clone + 'static,
{
    context::current()
        .expect("spawn must be called within the context of an event loop")
        .spawn(future)
}

/// Spawns a fallible future onto the event loop running on this thread.
///
/// See [`Handle::try_spawn`].
///
/// # Panics
///
/// Panics if called outside the context of a running event loop.
pub fn try_spawn<F, T>(future: F) -> Promise<T>
where
    F: Future<Output = Result<T>> + 'static,
    T: Clone + 'static,
{
    context::current()
        .expect("try_spawn must be called within the context of an event loop")
        .try_spawn(future)
}
