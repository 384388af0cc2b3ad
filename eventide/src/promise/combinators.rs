//! Aggregation of several promises into one.
//!
//! Every combinator subscribes to each input in input order. Inputs that
//! are already settled are still observed through microtasks, so the
//! combined promise never settles synchronously.

use super::Promise;
use crate::error::{Error, Result};
use crate::runtime::handle::Handle;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Outcome of one input of [`all_settled`].
#[derive(Debug, Clone)]
pub enum Settlement<T> {
    Fulfilled(T),
    Rejected(Error),
}

impl<T> Settlement<T> {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Settlement::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Settlement::Rejected(_))
    }

    /// Converts back into a `Result`.
    pub fn into_result(self) -> Result<T> {
        match self {
            Settlement::Fulfilled(value) => Ok(value),
            Settlement::Rejected(err) => Err(err),
        }
    }
}

impl<T> From<Result<T>> for Settlement<T> {
    fn from(outcome: Result<T>) -> Self {
        match outcome {
            Ok(value) => Settlement::Fulfilled(value),
            Err(err) => Settlement::Rejected(err),
        }
    }
}

/// Results collected by index, plus a countdown of inputs still pending.
struct Collector<V> {
    slots: RefCell<Vec<Option<V>>>,
    remaining: Cell<usize>,
}

impl<V> Collector<V> {
    fn new(len: usize) -> Rc<Self> {
        Rc::new(Self {
            slots: RefCell::new((0..len).map(|_| None).collect()),
            remaining: Cell::new(len),
        })
    }

    /// Stores `value` at `index`; returns every value once the last slot
    /// is filled.
    fn fill(&self, index: usize, value: V) -> Option<Vec<V>> {
        self.slots.borrow_mut()[index] = Some(value);

        let remaining = self.remaining.get() - 1;
        self.remaining.set(remaining);

        if remaining > 0 {
            return None;
        }

        let slots = std::mem::take(&mut *self.slots.borrow_mut());
        Some(slots.into_iter().flatten().collect())
    }
}

/// Fulfills with every value in input order once all inputs fulfill.
///
/// Rejects with the first rejection observed; later outcomes are ignored.
/// An empty input fulfills with an empty vector.
pub fn all<T, I>(handle: &Handle, promises: I) -> Promise<Vec<T>>
where
    T: Clone + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    let (combined, resolver) = Promise::pending(handle);

    if promises.is_empty() {
        resolver.resolve(Vec::new());
        return combined;
    }

    let collector = Collector::new(promises.len());

    for (index, promise) in promises.into_iter().enumerate() {
        let collector = collector.clone();
        let resolver = resolver.clone();

        promise.listen(move |outcome| match outcome {
            Ok(value) => {
                if let Some(values) = collector.fill(index, value) {
                    resolver.resolve(values);
                }
            }
            Err(err) => resolver.reject(err),
        });
    }

    combined
}

/// Fulfills with the settlement of every input, in input order, once all
/// of them settled. Never rejects.
pub fn all_settled<T, I>(handle: &Handle, promises: I) -> Promise<Vec<Settlement<T>>>
where
    T: Clone + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    let (combined, resolver) = Promise::pending(handle);

    if promises.is_empty() {
        resolver.resolve(Vec::new());
        return combined;
    }

    let collector = Collector::new(promises.len());

    for (index, promise) in promises.into_iter().enumerate() {
        let collector = collector.clone();
        let resolver = resolver.clone();

        promise.listen(move |outcome| {
            if let Some(settlements) = collector.fill(index, Settlement::from(outcome)) {
                resolver.resolve(settlements);
            }
        });
    }

    combined
}

/// Settles like the first input to settle.
///
/// An empty input never settles.
pub fn race<T, I>(handle: &Handle, promises: I) -> Promise<T>
where
    T: Clone + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let (combined, resolver) = Promise::pending(handle);

    for promise in promises {
        let resolver = resolver.clone();
        promise.listen(move |outcome| resolver.settle(outcome));
    }

    combined
}

/// Fulfills with the first value among the inputs.
///
/// If every input rejects, rejects with [`Error::Aggregate`] holding the
/// errors in input order. An empty input rejects immediately with an
/// empty aggregate.
pub fn any<T, I>(handle: &Handle, promises: I) -> Promise<T>
where
    T: Clone + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    let (combined, resolver) = Promise::pending(handle);

    if promises.is_empty() {
        resolver.reject(Error::Aggregate(Vec::new()));
        return combined;
    }

    let collector = Collector::new(promises.len());

    for (index, promise) in promises.into_iter().enumerate() {
        let collector = collector.clone();
        let resolver = resolver.clone();

        promise.listen(move |outcome| match outcome {
            Ok(value) => resolver.resolve(value),
            Err(err) => {
                if let Some(errors) = collector.fill(index, err) {
                    resolver.reject(Error::Aggregate(errors));
                }
            }
        });
    }

    combined
}

#[cfg(test)]
mod tests {
    use super::Collector;

    #[test]
    fn collector_returns_values_in_index_order() {
        let collector = Collector::new(3);

        assert!(collector.fill(2, "c").is_none());
        assert!(collector.fill(0, "a").is_none());
        assert_eq!(collector.fill(1, "b"), Some(vec!["a", "b", "c"]));
    }
}
