use eventide::time::delay;
use eventide::{Error, EventLoop, Handle, Promise, task, yield_now};

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn test_block_on_returns_output() {
    let event_loop = EventLoop::new();
    assert_eq!(event_loop.block_on(async { 42 }), 42);
}

#[test]
fn test_spawned_future_is_awaited() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();

    let value = event_loop.block_on(async move {
        let doubled = handle.spawn(async { 21 * 2 });
        doubled.await
    });

    assert_eq!(value.unwrap(), 42);
}

#[test]
fn test_spawn_does_not_poll_synchronously() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let polled = Rc::new(RefCell::new(false));

    let flag = polled.clone();
    let done = handle.spawn(async move {
        *flag.borrow_mut() = true;
    });

    assert!(!*polled.borrow());
    event_loop.start().unwrap();

    assert!(*polled.borrow());
    assert!(matches!(done.peek(), Some(Ok(()))));
}

#[test]
fn test_try_spawn_rejects_on_err() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();

    let failed = handle.try_spawn(async { Err::<u8, _>(Error::user("refused")) });
    failed.catch_error(|_| Ok(0));

    event_loop.start().unwrap();
    assert_eq!(failed.peek().unwrap().unwrap_err().to_string(), "refused");
}

#[test]
fn test_panicking_task_rejects_its_promise() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();

    let crashed: Promise<()> = handle.spawn(async { panic!("task blew up") });
    crashed.catch_error(|_| Ok(()));

    event_loop.start().unwrap();
    assert!(matches!(
        crashed.peek(),
        Some(Err(Error::Panicked(ref msg))) if msg == "task blew up"
    ));
}

#[eventide::test(virtual_time)]
async fn test_awaiting_a_delay() {
    let handle = Handle::current();
    let start = handle.now();

    delay(&handle, Duration::from_millis(75)).await.unwrap();

    assert_eq!(handle.now() - start, Duration::from_millis(75));
}

#[eventide::test]
async fn test_awaiting_a_rejection() {
    let handle = Handle::current();
    let rejected = Promise::<i32>::rejected(&handle, Error::user(500u16));

    let err = rejected.await.unwrap_err();
    assert_eq!(err.downcast_ref::<u16>(), Some(&500));
}

#[eventide::test]
async fn test_yield_lets_queued_microtasks_run() {
    let handle = Handle::current();
    let log = Rc::new(RefCell::new(Vec::new()));

    let micro = log.clone();
    handle.queue_microtask(move || micro.borrow_mut().push("micro"));

    yield_now().await;
    log.borrow_mut().push("task");

    assert_eq!(*log.borrow(), vec!["micro", "task"]);
}

#[eventide::test]
async fn test_free_spawn_uses_current_loop() {
    let value = task::spawn(async { "spawned" }).await.unwrap();
    assert_eq!(value, "spawned");
}

#[test]
fn test_remote_posts_run_on_loop() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let counter = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..3)
        .map(|_| {
            let remote = handle.remote();
            let counter = counter.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                remote.post(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            })
        })
        .collect();

    assert_eq!(event_loop.start().unwrap(), eventide::Exit::Idle);

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[test]
fn test_remote_promise_resolved_from_thread() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let (promise, resolver) = handle.remote_promise::<u32>();

    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(5));
        resolver.resolve(7);
    });

    let value = event_loop.block_on(async move { promise.await });
    worker.join().unwrap();

    assert_eq!(value.unwrap(), 7);
}

#[test]
fn test_remote_promise_rejected_from_thread() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let (promise, resolver) = handle.remote_promise::<u32>();

    let worker = thread::spawn(move || resolver.reject("disk full"));

    let err = event_loop.block_on(async move { promise.await }).unwrap_err();
    worker.join().unwrap();

    assert_eq!(err.downcast_ref::<&str>(), Some(&"disk full"));
}

#[test]
fn test_dropped_remote_resolver_closes_promise() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let (promise, resolver) = handle.remote_promise::<u32>();

    thread::spawn(move || drop(resolver)).join().unwrap();

    let outcome = event_loop.block_on(async move { promise.await });
    assert!(matches!(outcome, Err(Error::Closed)));
}
