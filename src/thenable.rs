//! Foreign thenables: values that can settle a future through callbacks but
//! are not [`Future`](crate::Future)s themselves.
use crate::{Rejecter, Resolver};

/// Something exposing a `then` capability.
///
/// Implementations are untrusted. They may call either callback any number
/// of times, call both, or fail after calling one; only the first call of
/// either callback takes effect. Returning `Err` rejects the future when
/// neither callback has been called yet.
pub trait Thenable<T, E> {
    fn then(self: Box<Self>, resolve: Resolver<T, E>, reject: Rejecter<T, E>) -> Result<(), E>;
}

/// A [`Thenable`] built from a closure.
///
/// # Examples
///
/// ```
/// use promise_aplus::{scheduler, FnThenable, Future, Rejecter, Resolution, Resolver, State};
/// let thenable = FnThenable::new(|resolve: Resolver<i32, String>, _: Rejecter<i32, String>| {
///     resolve.fulfill(1);
///     resolve.fulfill(2);
///     Ok(())
/// });
/// let future = Future::<i32, String>::resolved(Resolution::thenable(thenable));
/// scheduler::run_until_stalled();
/// assert_eq!(future.state(), State::Fulfilled(1));
/// ```
pub struct FnThenable<F> {
    then: F,
}

impl<F> FnThenable<F> {
    pub fn new(then: F) -> Self {
        Self { then }
    }
}

impl<T, E, F> Thenable<T, E> for FnThenable<F>
where
    F: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>,
{
    fn then(self: Box<Self>, resolve: Resolver<T, E>, reject: Rejecter<T, E>) -> Result<(), E> {
        (self.then)(resolve, reject)
    }
}
