use eventide::promise::PromiseState;
use eventide::sync::CancellationToken;
use eventide::time::delay;
use eventide::{Error, EventLoop, InternalError, Promise, Resolution, Result, Thenable};

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

#[test]
fn test_then_is_never_synchronous() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();

    let promise = Promise::new(&handle, |resolver| {
        resolver.resolve(42);
        Ok(())
    })
    .then(|x| Ok(x + 1));

    assert!(promise.is_pending());

    assert!(event_loop.tick().unwrap());
    assert!(matches!(promise.peek(), Some(Ok(43))));
}

#[test]
fn test_first_settlement_wins() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();

    let promise = Promise::new(&handle, |resolver| {
        resolver.resolve(1);
        resolver.reject("late");
        resolver.resolve(2);
        Err(Error::from("ignored"))
    });

    assert_eq!(promise.state(), PromiseState::Fulfilled);
    event_loop.start().unwrap();
    assert!(matches!(promise.peek(), Some(Ok(1))));

    let (rejected, resolver) = Promise::<i32>::pending(&handle);
    resolver.reject("first");
    resolver.resolve(3);
    assert!(resolver.is_resolved());

    let err = rejected.peek().unwrap().unwrap_err();
    assert_eq!(err.downcast_ref::<&str>(), Some(&"first"));
}

#[test]
fn test_bootstrap_error_and_panic_reject() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();

    let failed = Promise::<i32>::new(&handle, |_| Err("bad".into()));
    let panicked = Promise::<i32>::new(&handle, |_| panic!("bootstrap exploded"));

    failed.catch_error(|_| Ok(0));
    panicked.catch_error(|_| Ok(0));

    let err = failed.peek().unwrap().unwrap_err();
    assert_eq!(err.downcast_ref::<&str>(), Some(&"bad"));

    let err = panicked.peek().unwrap().unwrap_err();
    assert!(matches!(err, Error::Panicked(ref msg) if msg == "bootstrap exploded"));

    event_loop.start().unwrap();
}

#[test]
fn test_catch_receives_error_from_then() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let caught = Rc::new(RefCell::new(None));

    let sink = caught.clone();
    Promise::resolved(&handle, 1)
        .then(|_| -> Result<i32> { Err(Error::user(404u16)) })
        .catch_error(move |err| {
            *sink.borrow_mut() = err.downcast_ref::<u16>().copied();
            Ok(0)
        });

    event_loop.start().unwrap();
    assert_eq!(*caught.borrow(), Some(404));
}

#[test]
fn test_catch_not_invoked_on_success() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let invoked = Rc::new(Cell::new(false));

    let flag = invoked.clone();
    let result = Promise::resolved(&handle, 1)
        .then(|x| Ok(x * 10))
        .catch_error(move |_| {
            flag.set(true);
            Ok(-1)
        });

    event_loop.start().unwrap();

    assert!(!invoked.get());
    assert!(matches!(result.peek(), Some(Ok(10))));
}

#[test]
fn test_rejection_skips_fulfillment_handlers() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let calls = Rc::new(Cell::new(0));

    let counter = calls.clone();
    let result = Promise::<i32>::rejected(&handle, "nope")
        .then(move |x| {
            counter.set(counter.get() + 1);
            Ok(x)
        })
        .then_or_else(|x| Ok(x.to_string()), |err| Ok(format!("recovered: {err}")));

    event_loop.start().unwrap();

    assert_eq!(calls.get(), 0);
    assert_eq!(result.peek().unwrap().unwrap(), "recovered: nope");
}

#[test]
fn test_handler_panic_rejects_derived() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();

    let result = Promise::resolved(&handle, 1)
        .then(|_| -> Result<i32> { panic!("handler exploded") })
        .catch_error(|err| match err {
            Error::Panicked(msg) if msg == "handler exploded" => Ok(7),
            other => Err(other),
        });

    event_loop.start().unwrap();
    assert!(matches!(result.peek(), Some(Ok(7))));
}

#[test]
fn test_reactions_run_in_registration_order() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let order = Rc::new(RefCell::new(Vec::new()));

    let (promise, resolver) = Promise::pending(&handle);

    for i in 0..3 {
        let order = order.clone();
        promise.then(move |()| {
            order.borrow_mut().push(i);
            Ok(())
        });
    }

    resolver.resolve(());
    event_loop.start().unwrap();

    assert_eq!(*order.borrow(), vec![0, 1, 2]);
}

#[test]
fn test_finally_passes_outcome_through() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let runs = Rc::new(Cell::new(0));

    let counter = runs.clone();
    let fulfilled = Promise::resolved(&handle, 5).finally(move || counter.set(counter.get() + 1));

    let counter = runs.clone();
    let rejected = Promise::<i32>::rejected(&handle, "kept")
        .finally(move || counter.set(counter.get() + 1))
        .catch_error(|err| {
            assert_eq!(err.to_string(), "kept");
            Ok(-1)
        });

    event_loop.start().unwrap();

    assert_eq!(runs.get(), 2);
    assert!(matches!(fulfilled.peek(), Some(Ok(5))));
    assert!(matches!(rejected.peek(), Some(Ok(-1))));
}

#[test]
fn test_resolving_with_promise_flattens() {
    let event_loop = EventLoop::builder().virtual_clock().build();
    let handle = event_loop.handle();

    let inner = handle.clone();
    let result = Promise::resolved(&handle, 4).and_then(move |v| {
        delay(&inner, Duration::from_millis(10)).then(move |()| Ok(v * 10))
    });

    let (outer, resolver) = Promise::<i32>::pending(&handle);
    resolver.resolve_with(result.clone().into());

    event_loop.start().unwrap();

    assert!(matches!(result.peek(), Some(Ok(40))));
    assert!(matches!(outer.peek(), Some(Ok(40))));
}

#[test]
fn test_inner_rejection_propagates_through_flattening() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();

    let inner = handle.clone();
    let result = Promise::resolved(&handle, ())
        .and_then(move |()| Promise::<i32>::rejected(&inner, "inner failed"))
        .catch_error(|err| {
            assert_eq!(err.to_string(), "inner failed");
            Ok(0)
        });

    event_loop.start().unwrap();
    assert!(matches!(result.peek(), Some(Ok(0))));
}

struct Immediate(i32);

impl Thenable<i32> for Immediate {
    fn subscribe(self: Box<Self>, on_settle: Box<dyn FnOnce(Result<i32>)>) {
        on_settle(Ok(self.0));
    }
}

#[test]
fn test_resolving_with_thenable_adopts_it() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();

    let (promise, resolver) = Promise::<i32>::pending(&handle);
    resolver.resolve_with(Resolution::Thenable(Box::new(Immediate(7))));

    assert!(promise.is_pending());

    let doubled =
        promise.then_resolve::<i32, _>(|v| Resolution::Thenable(Box::new(Immediate(v * 2))));

    event_loop.start().unwrap();
    assert!(matches!(promise.peek(), Some(Ok(7))));
    assert!(matches!(doubled.peek(), Some(Ok(14))));
}

#[test]
fn test_self_resolution_is_a_cycle() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();

    let (promise, resolver) = Promise::<i32>::pending(&handle);
    resolver.resolve_with(promise.clone().into());

    assert!(matches!(
        promise.peek(),
        Some(Err(Error::Internal(InternalError::Cycle)))
    ));

    promise.catch_error(|_| Ok(0));
    event_loop.start().unwrap();
}

#[test]
fn test_indirect_cycle_is_detected() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();

    let (a, resolve_a) = Promise::<i32>::pending(&handle);
    let (b, resolve_b) = Promise::<i32>::pending(&handle);

    resolve_a.resolve_with(b.clone().into());
    resolve_b.resolve_with(a.clone().into());

    event_loop.start().unwrap();

    for promise in [a, b] {
        assert!(matches!(
            promise.peek(),
            Some(Err(Error::Internal(InternalError::Cycle)))
        ));
    }
}

#[test]
fn test_self_resolution_through_thenable_is_a_cycle() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();

    let (promise, resolver) = Promise::<i32>::pending(&handle);
    resolver.resolve_with(Resolution::Thenable(Box::new(promise.clone())));

    promise.catch_error(|_| Ok(0));
    event_loop.start().unwrap();

    assert!(matches!(
        promise.peek(),
        Some(Err(Error::Internal(InternalError::Cycle)))
    ));
}

#[test]
fn test_mixed_thenable_and_promise_cycle_is_detected() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();

    let (a, resolve_a) = Promise::<i32>::pending(&handle);
    let (b, resolve_b) = Promise::<i32>::pending(&handle);

    resolve_a.resolve_with(Resolution::Thenable(Box::new(b.clone())));
    resolve_b.resolve_with(a.clone().into());

    event_loop.start().unwrap();

    for promise in [a, b] {
        assert!(matches!(
            promise.peek(),
            Some(Err(Error::Internal(InternalError::Cycle)))
        ));
    }
}

#[test]
fn test_follow_chain_depth_is_bounded() {
    let event_loop = EventLoop::builder().max_flatten_depth(2).build();
    let handle = event_loop.handle();

    let (root, root_resolver) = Promise::<i32>::pending(&handle);
    let mut chain = vec![root];

    for _ in 0..3 {
        let (next, resolver) = Promise::<i32>::pending(&handle);
        let previous = chain.last().cloned().unwrap();
        resolver.resolve_with(previous.into());
        chain.push(next);
    }

    assert!(chain[2].is_pending());
    assert!(matches!(
        chain[3].peek(),
        Some(Err(Error::Internal(InternalError::FlattenDepth(2))))
    ));

    root_resolver.resolve(1);
    chain[3].catch_error(|_| Ok(0));
    event_loop.start().unwrap();

    assert!(matches!(chain[2].peek(), Some(Ok(1))));
}

#[test]
fn test_with_timeout() {
    let event_loop = EventLoop::builder().virtual_clock().build();
    let handle = event_loop.handle();
    let start = handle.now();

    let slow = delay(&handle, Duration::from_millis(50))
        .with_timeout(Duration::from_millis(10))
        .catch_error(|err| {
            assert!(err.is_timeout());
            Ok(())
        });

    event_loop.start().unwrap();
    assert!(matches!(slow.peek(), Some(Ok(()))));
    assert_eq!(handle.now() - start, Duration::from_millis(50));

    let start = handle.now();
    let fast = delay(&handle, Duration::from_millis(10)).with_timeout(Duration::from_millis(50));

    event_loop.start().unwrap();
    assert!(matches!(fast.peek(), Some(Ok(()))));
    assert_eq!(handle.now() - start, Duration::from_millis(10));
}

#[test]
fn test_cancellable_rejects_on_cancel() {
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();
    let token = CancellationToken::new();

    let (work, _resolver) = Promise::<i32>::pending(&handle);
    let guarded = work.cancellable(&token);

    assert!(guarded.is_pending());
    token.cancel();

    let err = guarded.peek().unwrap().unwrap_err();
    assert!(err.is_cancelled());

    let settled = Promise::resolved(&handle, 3).cancellable(&CancellationToken::new());
    event_loop.start().unwrap();
    assert!(matches!(settled.peek(), Some(Ok(3))));
}

#[test]
fn test_unhandled_rejection_reported_once() {
    let reported = Rc::new(RefCell::new(Vec::new()));
    let sink = reported.clone();

    let event_loop = EventLoop::builder()
        .on_unhandled_rejection(move |err| sink.borrow_mut().push(err.to_string()))
        .build();
    let handle = event_loop.handle();

    Promise::<i32>::rejected(&handle, "nobody listens");
    Promise::<i32>::rejected(&handle, "handled").catch_error(|_| Ok(0));
    Promise::<i32>::rejected(&handle, "chained").then(|v| Ok(v + 1));

    event_loop.start().unwrap();

    assert_eq!(
        *reported.borrow(),
        vec!["nobody listens".to_string(), "chained".to_string()]
    );
    assert_eq!(event_loop.stats().unhandled_rejections, 2);
}
