use eventide::sync::{CancellationToken, RateLimiter};
use eventide::{EventLoop, Handle};

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

#[test]
fn test_admissions_follow_sliding_window() {
    let event_loop = EventLoop::builder().virtual_clock().build();
    let handle = event_loop.handle();
    let start = handle.now();
    let limiter = RateLimiter::new(&handle, 2, Duration::from_millis(1000));
    let admitted = Rc::new(RefCell::new(Vec::new()));

    for _ in 0..5 {
        let admitted = admitted.clone();
        let clock = handle.clone();
        limiter.acquire().then(move |()| {
            admitted.borrow_mut().push((clock.now() - start).as_millis());
            Ok(())
        });
    }

    event_loop.start().unwrap();

    let admitted = admitted.borrow();
    assert_eq!(*admitted, vec![0, 0, 1000, 1000, 2000]);

    for pair in admitted.windows(3) {
        assert!(pair[2] - pair[0] >= 1000);
    }
}

#[test]
fn test_cancelled_wait_clears_its_timer() {
    let event_loop = EventLoop::builder().virtual_clock().build();
    let handle = event_loop.handle();
    let start = handle.now();
    let limiter = RateLimiter::new(&handle, 1, Duration::from_secs(10));
    let token = CancellationToken::new();

    limiter.acquire();
    let waiting = limiter.acquire_with(&token);

    let cancel = token.clone();
    handle.set_timeout(Duration::from_millis(100), move || cancel.cancel());

    let outcome = Rc::new(RefCell::new(None));
    let slot = outcome.clone();
    waiting.catch_error(move |err| {
        *slot.borrow_mut() = Some(err);
        Ok(())
    });

    event_loop.start().unwrap();

    assert!(outcome.borrow().as_ref().unwrap().is_cancelled());
    assert_eq!(handle.now() - start, Duration::from_millis(100));
}

#[test]
fn test_acquire_with_cancelled_token() {
    let event_loop = EventLoop::new();
    let limiter = RateLimiter::new(&event_loop.handle(), 1, Duration::from_secs(1));
    let token = CancellationToken::new();
    token.cancel();

    let rejected = limiter.acquire_with(&token);
    assert!(rejected.peek().unwrap().unwrap_err().is_cancelled());
    assert_eq!(limiter.available(), 1);

    rejected.catch_error(|_| Ok(()));
    event_loop.start().unwrap();
}

#[test]
fn test_try_acquire_and_available() {
    let event_loop = EventLoop::builder().virtual_clock().build();
    let handle = event_loop.handle();
    let limiter = RateLimiter::new(&handle, 3, Duration::from_millis(500));

    assert_eq!(limiter.available(), 3);
    assert!(limiter.try_acquire());
    assert!(limiter.try_acquire());
    assert!(limiter.try_acquire());
    assert!(!limiter.try_acquire());
    assert_eq!(limiter.available(), 0);

    let refilled = Rc::new(Cell::new(None));
    let slot = refilled.clone();
    let observed = limiter.clone();
    handle.set_timeout(Duration::from_millis(500), move || {
        slot.set(Some(observed.available()));
    });

    event_loop.start().unwrap();
    assert_eq!(refilled.get(), Some(3));
}

#[eventide::test(virtual_time)]
async fn test_acquire_can_be_awaited() {
    let handle = Handle::current();
    let start = handle.now();
    let limiter = RateLimiter::new(&handle, 1, Duration::from_millis(200));

    limiter.acquire().await.unwrap();
    limiter.acquire().await.unwrap();

    assert_eq!(handle.now() - start, Duration::from_millis(200));
}
