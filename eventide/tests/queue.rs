use eventide::sync::{CancellationToken, ConcurrencyQueue};
use eventide::time::delay;
use eventide::{Error, EventLoop, Promise};

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

#[test]
fn test_capacity_is_never_exceeded() {
    let event_loop = EventLoop::builder().virtual_clock().build();
    let handle = event_loop.handle();
    let start = handle.now();
    let queue = ConcurrencyQueue::new(&handle, 2);

    let running = Rc::new(Cell::new(0));
    let peak = Rc::new(Cell::new(0));
    let admitted = Rc::new(RefCell::new(Vec::new()));

    let results: Vec<_> = (0..5usize)
        .map(|i| {
            let handle = handle.clone();
            let running = running.clone();
            let peak = peak.clone();
            let admitted = admitted.clone();
            let observed = queue.clone();

            queue.add(move || {
                assert!(observed.active() <= observed.capacity());

                running.set(running.get() + 1);
                peak.set(peak.get().max(running.get()));
                admitted
                    .borrow_mut()
                    .push((i, (handle.now() - start).as_millis()));

                delay(&handle, Duration::from_millis(10)).then(move |()| {
                    running.set(running.get() - 1);
                    Ok(i)
                })
            })
        })
        .collect();

    assert_eq!(queue.active(), 2);
    assert_eq!(queue.pending(), 3);

    event_loop.start().unwrap();

    assert_eq!(peak.get(), 2);
    assert_eq!(
        *admitted.borrow(),
        vec![(0, 0), (1, 0), (2, 10), (3, 10), (4, 20)]
    );

    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.peek().unwrap().unwrap(), i);
    }

    assert_eq!(queue.active(), 0);
    assert_eq!(queue.pending(), 0);
}

#[test]
fn test_factory_is_lazy() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let queue = ConcurrencyQueue::new(&handle, 1);
    let invoked = Rc::new(Cell::new(false));

    let (blocker, unblock) = Promise::<()>::pending(&handle);
    queue.add(move || blocker);

    let flag = invoked.clone();
    let inner = handle.clone();
    queue.add(move || {
        flag.set(true);
        Promise::resolved(&inner, ())
    });

    assert!(!invoked.get());

    unblock.resolve(());
    event_loop.start().unwrap();

    assert!(invoked.get());
}

#[test]
fn test_failures_are_isolated() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let queue = ConcurrencyQueue::new(&handle, 1);

    let h = handle.clone();
    let first = queue.add(move || Promise::resolved(&h, "one"));
    let h = handle.clone();
    let second = queue.add(move || Promise::<&str>::rejected(&h, "two failed"));
    let third = queue.add(|| -> Promise<&'static str> { panic!("factory exploded") });
    let h = handle.clone();
    let fourth = queue.add(move || Promise::resolved(&h, "four"));

    second.catch_error(|_| Ok(""));
    third.catch_error(|_| Ok(""));

    event_loop.start().unwrap();

    assert_eq!(first.peek().unwrap().unwrap(), "one");
    assert_eq!(second.peek().unwrap().unwrap_err().to_string(), "two failed");
    assert!(matches!(
        third.peek(),
        Some(Err(Error::Panicked(ref msg))) if msg == "factory exploded"
    ));
    assert_eq!(fourth.peek().unwrap().unwrap(), "four");
}

#[test]
fn test_drain_waits_for_items_added_later() {
    let event_loop = EventLoop::builder().virtual_clock().build();
    let handle = event_loop.handle();
    let start = handle.now();
    let queue = ConcurrencyQueue::new(&handle, 2);
    let drained_at = Rc::new(Cell::new(None));

    let h = handle.clone();
    queue.add(move || delay(&h, Duration::from_millis(10)));

    let at = drained_at.clone();
    let clock = handle.clone();
    queue.drain().then(move |()| {
        at.set(Some(clock.now() - start));
        Ok(())
    });

    let h = handle.clone();
    queue.add(move || delay(&h, Duration::from_millis(40)));

    event_loop.start().unwrap();
    assert_eq!(drained_at.get(), Some(Duration::from_millis(40)));
}

#[test]
fn test_drain_on_idle_queue() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let queue = ConcurrencyQueue::new(&handle, 3);

    let drained = queue.drain();
    event_loop.start().unwrap();

    assert!(matches!(drained.peek(), Some(Ok(()))));
}

#[test]
fn test_closed_queue_rejects_new_items() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let queue = ConcurrencyQueue::new(&handle, 1);
    let invoked = Rc::new(Cell::new(false));

    queue.close();
    assert!(queue.is_closed());

    let flag = invoked.clone();
    let h = handle.clone();
    let rejected = queue.add(move || {
        flag.set(true);
        Promise::resolved(&h, ())
    });

    assert!(matches!(rejected.peek(), Some(Err(Error::Closed))));
    rejected.catch_error(|_| Ok(()));

    event_loop.start().unwrap();
    assert!(!invoked.get());
}

#[test]
fn test_cancelling_pending_item_removes_it() {
    let event_loop = EventLoop::builder().virtual_clock().build();
    let handle = event_loop.handle();
    let queue = ConcurrencyQueue::new(&handle, 1);
    let token = CancellationToken::new();
    let invoked = Rc::new(Cell::new(false));

    let h = handle.clone();
    queue.add(move || delay(&h, Duration::from_millis(10)));

    let flag = invoked.clone();
    let h = handle.clone();
    let cancelled = queue.add_with(
        move || {
            flag.set(true);
            Promise::resolved(&h, ())
        },
        &token,
    );

    assert_eq!(queue.pending(), 1);
    token.cancel();
    assert_eq!(queue.pending(), 0);

    assert!(cancelled.peek().unwrap().unwrap_err().is_cancelled());
    cancelled.catch_error(|_| Ok(()));

    event_loop.start().unwrap();
    assert!(!invoked.get());
}

#[test]
fn test_cancelling_active_item_keeps_its_slot() {
    let event_loop = EventLoop::builder().virtual_clock().build();
    let handle = event_loop.handle();
    let start = handle.now();
    let queue = ConcurrencyQueue::new(&handle, 1);
    let token = CancellationToken::new();

    let h = handle.clone();
    let active = queue.add_with(move || delay(&h, Duration::from_millis(30)), &token);

    let admitted_at = Rc::new(Cell::new(None));
    let at = admitted_at.clone();
    let h = handle.clone();
    queue.add(move || {
        at.set(Some(h.now() - start));
        Promise::resolved(&h, ())
    });

    token.cancel();

    assert!(active.peek().unwrap().unwrap_err().is_cancelled());
    assert_eq!(queue.active(), 1);
    active.catch_error(|_| Ok(()));

    event_loop.start().unwrap();
    assert_eq!(admitted_at.get(), Some(Duration::from_millis(30)));
}

#[test]
#[should_panic(expected = "capacity must be greater than zero")]
fn test_zero_capacity_panics() {
    let event_loop = EventLoop::new();
    ConcurrencyQueue::new(&event_loop.handle(), 0);
}
