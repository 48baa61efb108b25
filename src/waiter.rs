//! Awaiting a [`Future`] from Rust `async` code.
use crate::{scheduler, Error, Future, State};
use std::{
    future::IntoFuture,
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
    task::{Context, Poll},
};

static NEXT_WAITER: AtomicU64 = AtomicU64::new(0);

/// Resolves to `Ok(value)` or `Err(reason)` once the future settles.
///
/// Every poll first runs the scheduler, so chains built on this thread make
/// progress while being awaited. A settlement, or any new work reaching the
/// scheduler, wakes the awaiting task.
///
/// # Examples
///
/// ```
/// use promise_aplus::{Future, Resolution};
/// use futures::executor::block_on;
/// use std::future::IntoFuture;
/// let future = Future::<i32, String>::fulfilled(5).and_then(|v| Ok(Resolution::Value(v + 1)));
/// assert_eq!(block_on(future.into_future()), Ok(6));
/// ```
#[derive(Debug)]
pub struct Waiter<T, E> {
    id: u64,
    future: Future<T, E>,
}

impl<T, E> std::future::Future for Waiter<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        scheduler::run_until_stalled();
        match self.future.poll_state(self.id, cx.waker()) {
            State::Fulfilled(value) => {
                scheduler::unpark(self.id);
                Poll::Ready(Ok(value))
            }
            State::Rejected(reason) => {
                scheduler::unpark(self.id);
                Poll::Ready(Err(reason))
            }
            State::Pending => {
                scheduler::park(self.id, cx.waker());
                Poll::Pending
            }
        }
    }
}

impl<T, E> Drop for Waiter<T, E> {
    fn drop(&mut self) {
        scheduler::unpark(self.id);
        self.future.forget_waker(self.id);
    }
}

impl<T, E> IntoFuture for Future<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = Waiter<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        Waiter {
            id: NEXT_WAITER.fetch_add(1, Ordering::Relaxed),
            future: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{deferred, Future, Resolution};
    use futures::{
        executor::{block_on, LocalPool},
        task::LocalSpawnExt,
    };
    use std::{cell::RefCell, rc::Rc};

    #[test]
    fn awaits_a_chain() {
        let chain = Future::<i32, String>::fulfilled(1)
            .and_then(|v| Ok(Resolution::Value(v + 1)))
            .and_then(|v| -> Result<Resolution<i32, String>, String> { Err(format!("stopped at {}", v)) });
        assert_eq!(block_on(async { chain.await }), Err("stopped at 2".to_string()));
    }

    #[test]
    fn wakes_when_settled_by_another_task() {
        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        let d = deferred::<String, String>();
        let received = Rc::new(RefCell::new(None));

        let future = d.future.clone();
        let slot = received.clone();
        spawner
            .spawn_local(async move {
                *slot.borrow_mut() = Some(future.await);
            })
            .unwrap();
        pool.run_until_stalled();
        assert!(received.borrow().is_none());

        let resolve = d.resolve.clone();
        spawner
            .spawn_local(async move { resolve.fulfill("🍓".into()) })
            .unwrap();
        pool.run();
        assert_eq!(*received.borrow(), Some(Ok("🍓".to_string())));
    }

    #[test]
    fn awaits_a_derived_future_settled_by_another_task() {
        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        let d = deferred::<i32, String>();
        let received = Rc::new(RefCell::new(None));

        let derived = d.future.and_then(|v| Ok(Resolution::Value(v + 1)));
        let slot = received.clone();
        spawner
            .spawn_local(async move {
                *slot.borrow_mut() = Some(derived.await);
            })
            .unwrap();
        pool.run_until_stalled();
        assert!(received.borrow().is_none());

        let resolve = d.resolve.clone();
        spawner
            .spawn_local(async move { resolve.fulfill(1) })
            .unwrap();
        pool.run_until_stalled();
        assert_eq!(*received.borrow(), Some(Ok(2)));
    }

    #[test]
    fn awaits_a_future_adopting_a_pending_one() {
        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        let d = deferred::<i32, String>();
        let received = Rc::new(RefCell::new(None));

        let adopting = Future::<i32, String>::resolved(d.future.clone());
        let slot = received.clone();
        spawner
            .spawn_local(async move {
                *slot.borrow_mut() = Some(adopting.await);
            })
            .unwrap();
        pool.run_until_stalled();
        assert!(received.borrow().is_none());

        let reject = d.reject.clone();
        spawner
            .spawn_local(async move { reject.reject("late".into()) })
            .unwrap();
        pool.run_until_stalled();
        assert_eq!(*received.borrow(), Some(Err("late".to_string())));
    }
}
