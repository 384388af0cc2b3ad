use crate::runtime::handle::Handle;

use std::cell::RefCell;

thread_local! {
    /// Handle of the event loop currently running on this thread.
    ///
    /// It is installed for the duration of [`EventLoop::start`] and
    /// [`EventLoop::block_on`], which lets wakers, `sleep` and the free
    /// `spawn` function reach the loop without explicit parameter
    /// passing.
    ///
    /// [`EventLoop::start`]: crate::EventLoop::start
    /// [`EventLoop::block_on`]: crate::EventLoop::block_on
    static CURRENT: RefCell<Option<Handle>> = const { RefCell::new(None) };
}

/// Restores the previously installed handle, also on unwind.
struct ContextGuard {
    previous: Option<Handle>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = CURRENT.try_with(|cell| cell.replace(previous));
    }
}

/// Runs `f` with `handle` installed as the current event loop of this
/// thread, then restores whatever was installed before.
pub(crate) fn enter_context<R>(handle: Handle, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT.with(|cell| cell.replace(Some(handle)));
    let _guard = ContextGuard { previous };

    f()
}

/// Returns the handle of the loop running on this thread, if any.
pub(crate) fn current() -> Option<Handle> {
    CURRENT.try_with(|cell| cell.borrow().clone()).ok().flatten()
}

/// Returns the current handle only if it belongs to the loop `loop_id`.
pub(crate) fn current_for(loop_id: u64) -> Option<Handle> {
    current().filter(|handle| handle.loop_id() == loop_id)
}
