//! A thread-local, first-in first-out run queue.
//!
//! Continuations are never invoked inline. They are pushed here and run
//! later, when the owner of the thread calls [`run_until_stalled`] (awaiting a
//! [`Waiter`](crate::Waiter) does this on every poll). Waiters parked on this
//! thread are woken whenever new work is scheduled, so an awaited chain keeps
//! moving even when nobody else runs the queue.
use std::{cell::RefCell, collections::VecDeque, task::Waker};

type Task = Box<dyn FnOnce()>;

thread_local! {
    static QUEUE: RefCell<VecDeque<Task>> = RefCell::new(VecDeque::new());
    static PARKED: RefCell<Vec<(u64, Waker)>> = RefCell::new(vec![]);
}

/// Queue `task` behind everything already scheduled on this thread.
pub(crate) fn schedule<F>(task: F)
where
    F: FnOnce() + 'static,
{
    QUEUE.with(|queue| queue.borrow_mut().push_back(Box::new(task)));
    let parked = PARKED.with(|parked| std::mem::take(&mut *parked.borrow_mut()));
    for (_, waker) in parked {
        waker.wake();
    }
}

/// Wake `waker` the next time a task is scheduled. Replaces the waker
/// `waiter` parked before.
pub(crate) fn park(waiter: u64, waker: &Waker) {
    PARKED.with(|parked| {
        let mut parked = parked.borrow_mut();
        match parked.iter_mut().find(|(id, _)| *id == waiter) {
            Some((_, stored)) => *stored = waker.clone(),
            None => parked.push((waiter, waker.clone())),
        }
    });
}

pub(crate) fn unpark(waiter: u64) {
    PARKED.with(|parked| parked.borrow_mut().retain(|(id, _)| *id != waiter));
}

/// Run scheduled tasks, oldest first, until the queue is empty.
///
/// Tasks scheduled while running are run by the same call. Returns how many
/// tasks were run.
///
/// # Examples
///
/// ```
/// use promise_aplus::{scheduler, Future, Resolution};
/// let doubled = Future::<i32, String>::fulfilled(21)
///     .and_then(|v| Ok(Resolution::Value(v * 2)));
/// assert!(doubled.is_pending());
/// scheduler::run_until_stalled();
/// assert!(doubled.is_fulfilled());
/// ```
pub fn run_until_stalled() -> usize {
    let mut ran = 0;
    // The borrow must end before the task runs: tasks schedule more tasks.
    while let Some(task) = QUEUE.with(|queue| queue.borrow_mut().pop_front()) {
        task();
        ran += 1;
    }
    if ran > 0 {
        log::trace!("scheduler ran {} task(s)", ran);
    }
    ran
}

/// Number of tasks waiting to run on this thread.
pub fn pending_tasks() -> usize {
    QUEUE.with(|queue| queue.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn runs_in_fifo_order() {
        let seen = Rc::new(RefCell::new(vec![]));
        for i in 0..3 {
            let seen = seen.clone();
            schedule(move || seen.borrow_mut().push(i));
        }
        assert_eq!(pending_tasks(), 3);
        assert!(seen.borrow().is_empty());
        assert_eq!(run_until_stalled(), 3);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
        assert_eq!(pending_tasks(), 0);
    }

    #[test]
    fn nested_tasks_run_after_queued_ones() {
        let seen = Rc::new(RefCell::new(vec![]));
        let outer = seen.clone();
        schedule(move || {
            outer.borrow_mut().push("outer");
            let inner = outer.clone();
            schedule(move || inner.borrow_mut().push("nested"));
        });
        let sibling = seen.clone();
        schedule(move || sibling.borrow_mut().push("sibling"));

        assert_eq!(run_until_stalled(), 3);
        assert_eq!(*seen.borrow(), vec!["outer", "sibling", "nested"]);
    }

    #[test]
    fn scheduling_wakes_parked_waiters_once() {
        use futures::task::ArcWake;
        use std::sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        };

        struct Counter(AtomicUsize);
        impl ArcWake for Counter {
            fn wake_by_ref(arc_self: &Arc<Self>) {
                arc_self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let waker = futures::task::waker(counter.clone());
        park(7, &waker);
        park(7, &waker);
        schedule(|| {});
        schedule(|| {});
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        park(8, &waker);
        unpark(8);
        schedule(|| {});
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        run_until_stalled();
    }

    #[test]
    fn empty_queue_runs_nothing() {
        assert_eq!(run_until_stalled(), 0);
    }
}
