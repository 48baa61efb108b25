use crate::{Error, Future, Rejecter, Resolver};

/// A future together with the capabilities that settle it, for callers that
/// want to settle it from outside an executor.
///
/// # Examples
///
/// ```
/// use promise_aplus::{deferred, scheduler, State};
/// let d = deferred::<i32, String>();
/// d.reject.reject("x".into());
/// d.resolve.fulfill(10);
/// scheduler::run_until_stalled();
/// assert_eq!(d.future.state(), State::Rejected("x".to_string()));
/// ```
#[derive(Debug)]
pub struct Deferred<T, E> {
    pub future: Future<T, E>,
    pub resolve: Resolver<T, E>,
    pub reject: Rejecter<T, E>,
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    pub fn new() -> Self {
        let future = Future::pending();
        Self {
            resolve: future.resolver(),
            reject: future.rejecter(),
            future,
        }
    }
}

impl<T, E> Default for Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Create a pending future and hand out its capabilities.
pub fn deferred<T, E>() -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    Deferred::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scheduler, State};

    #[test]
    fn stays_pending_until_settled_from_outside() {
        let d = deferred::<&'static str, String>();
        scheduler::run_until_stalled();
        assert!(d.future.is_pending());
        d.resolve.fulfill("🍓");
        assert_eq!(d.future.state(), State::Fulfilled("🍓"));
    }

    #[test]
    fn capabilities_are_cloneable() {
        let d = Deferred::<i32, String>::default();
        let reject = d.reject.clone();
        reject.reject("from a clone".into());
        d.resolve.fulfill(1);
        assert_eq!(d.future.state(), State::Rejected("from a clone".to_string()));
    }
}
