//! Core runtime components.
//!
//! This module contains the event loop and everything it owns:
//! - the microtask/macrotask queue pair,
//! - the handle used to inject work and timers,
//! - the remote inbox for completion signals from other threads,
//! - spawned `std::future::Future` tasks and cooperative yielding.
//!
//! Most users will interact with [`EventLoop`] and [`Handle`] rather than
//! with the submodules directly.

pub(crate) mod core;
pub(crate) mod handle;
pub(crate) mod queue;

pub(crate) mod builder;
pub(crate) mod context;
pub(crate) mod remote;
pub(crate) mod yield_now;

pub mod task;

pub use self::builder::{DEFAULT_MAX_FLATTEN_DEPTH, EventLoopBuilder};
pub use self::core::{EventLoop, Exit, Stats};
pub use self::handle::Handle;
pub use self::remote::{Remote, RemoteResolver};
