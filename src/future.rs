//! The future state machine and the resolution procedure.
//!
//! A [`Future`] is a handle to a shared cell. Every handle, [`Resolver`] and
//! [`Rejecter`] of the same future points at the same cell, and the only path
//! that ever writes its state is `settle`.
use crate::{scheduler, Error, Thenable};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
    task::Waker,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Where a future is in its lifecycle. The payload lives in the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> State<T, E> {
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl<T, E> fmt::Display for State<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Fulfilled(_) => f.write_str("fulfilled"),
            Self::Rejected(_) => f.write_str("rejected"),
        }
    }
}

/// A candidate value handed to the resolution procedure.
///
/// Plain values fulfill directly, futures are adopted, and thenables are
/// asked to settle the future through a guarded resolver/rejecter pair.
pub enum Resolution<T, E> {
    Value(T),
    Future(Future<T, E>),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn thenable<Th>(thenable: Th) -> Self
    where
        Th: Thenable<T, E> + 'static,
    {
        Self::Thenable(Box::new(thenable))
    }
}

impl<T, E> From<Future<T, E>> for Resolution<T, E> {
    fn from(future: Future<T, E>) -> Self {
        Self::Future(future)
    }
}

impl<T, E> fmt::Debug for Resolution<T, E>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Future(future) => f.debug_tuple("Future").field(future).finish(),
            Self::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// The resolve capability of a future.
///
/// Handed to executors and thenables. Calls after the future has settled are
/// ignored.
pub struct Resolver<T, E> {
    resolve: Rc<dyn Fn(Resolution<T, E>)>,
}

impl<T, E> Resolver<T, E> {
    /// Run the resolution procedure with `value`.
    pub fn resolve(&self, value: impl Into<Resolution<T, E>>) {
        (self.resolve)(value.into())
    }

    /// Shorthand for `resolve(Resolution::Value(value))`.
    pub fn fulfill(&self, value: T) {
        self.resolve(Resolution::Value(value))
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            resolve: self.resolve.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

/// The reject capability of a future. Reasons are never unwrapped.
pub struct Rejecter<T, E> {
    reject: Rc<dyn Fn(E)>,
    _value: std::marker::PhantomData<fn(T)>,
}

impl<T, E> Rejecter<T, E> {
    pub fn reject(&self, reason: E) {
        (self.reject)(reason)
    }
}

impl<T, E> Clone for Rejecter<T, E> {
    fn clone(&self) -> Self {
        Self {
            reject: self.reject.clone(),
            _value: std::marker::PhantomData,
        }
    }
}

impl<T, E> fmt::Debug for Rejecter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejecter").finish_non_exhaustive()
    }
}

type Continuation<T, E> = (Box<dyn FnOnce(T)>, Box<dyn FnOnce(E)>);

struct Inner<T, E> {
    id: u64,
    state: State<T, E>,
    continuations: VecDeque<Continuation<T, E>>,
    wakers: Vec<(u64, Waker)>,
}

/// A single-threaded Promise/A+ future.
///
/// Cloning gives another handle to the same future.
///
/// # Examples
///
/// ```
/// use promise_aplus::{scheduler, Future, Resolution, State};
/// let recovered = Future::<String, String>::rejected("err".into())
///     .catch(|reason| Ok(Resolution::Value(format!("recovered:{}", reason))));
/// scheduler::run_until_stalled();
/// assert_eq!(recovered.state(), State::Fulfilled("recovered:err".to_string()));
/// ```
pub struct Future<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Future<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Future<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Future")
            .field("id", &inner.id)
            .field("state", &format_args!("{}", inner.state))
            .field("continuations", &inner.continuations.len())
            .finish()
    }
}

impl<T, E> Future<T, E> {
    pub fn is_pending(&self) -> bool {
        !self.inner.borrow().state.is_settled()
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.inner.borrow().state, State::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.inner.borrow().state, State::Rejected(_))
    }

    fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    /// Drop the waker stored for `waiter`, if any.
    pub(crate) fn forget_waker(&self, waiter: u64) {
        self.inner.borrow_mut().wakers.retain(|(id, _)| *id != waiter);
    }
}

impl<T, E> Future<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Create a future and run `executor` with its capabilities.
    ///
    /// An `Err` returned by the executor (or a panic inside it) rejects the
    /// future, unless it has already settled.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>,
    {
        let future = Self::pending();
        let (resolve, reject) = (future.resolver(), future.rejecter());
        if let Err(reason) = catch(|| executor(resolve, reject)) {
            log::debug!("executor of future #{} failed", future.id());
            future.reject(reason);
        }
        future
    }

    /// An already fulfilled future.
    pub fn fulfilled(value: T) -> Self {
        Self::new(|resolve, _| {
            resolve.fulfill(value);
            Ok(())
        })
    }

    /// An already rejected future.
    pub fn rejected(reason: E) -> Self {
        Self::new(|_, reject| {
            reject.reject(reason);
            Ok(())
        })
    }

    /// A future resolved with `value`, flattening nested futures and
    /// thenables.
    pub fn resolved(value: impl Into<Resolution<T, E>>) -> Self {
        Self::new(|resolve, _| {
            resolve.resolve(value);
            Ok(())
        })
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> State<T, E> {
        self.inner.borrow().state.clone()
    }

    /// Derive a future settled by `on_fulfilled` or `on_rejected`.
    ///
    /// `Ok` from either handler resolves the derived future (a rejection
    /// handler that returns `Ok` recovers). `Err` or a panic rejects it.
    /// Handlers always run from the scheduler, never inside this call.
    pub fn then<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Future<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
        R: FnOnce(E) -> Result<Resolution<U, E>, E> + 'static,
    {
        self.derive(
            move |value, resolve, reject| run_handler(on_fulfilled, value, &resolve, &reject),
            move |reason, resolve, reject| run_handler(on_rejected, reason, &resolve, &reject),
        )
    }

    /// [`then`](Self::then) without a rejection handler: reasons propagate
    /// to the derived future unchanged.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Future<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
    {
        self.derive(
            move |value, resolve, reject| run_handler(on_fulfilled, value, &resolve, &reject),
            |reason, _, reject| reject.reject(reason),
        )
    }

    /// [`then`](Self::then) without a success handler: values pass through
    /// to the derived future unchanged.
    pub fn catch<R>(&self, on_rejected: R) -> Future<T, E>
    where
        R: FnOnce(E) -> Result<Resolution<T, E>, E> + 'static,
    {
        self.derive(
            |value, resolve, _| resolve.fulfill(value),
            move |reason, resolve, reject| run_handler(on_rejected, reason, &resolve, &reject),
        )
    }

    pub(crate) fn pending() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                state: State::Pending,
                continuations: VecDeque::new(),
                wakers: vec![],
            })),
        }
    }

    pub(crate) fn resolver(&self) -> Resolver<T, E> {
        let this = self.clone();
        Resolver {
            resolve: Rc::new(move |value| this.resolve(value)),
        }
    }

    pub(crate) fn rejecter(&self) -> Rejecter<T, E> {
        let this = self.clone();
        Rejecter {
            reject: Rc::new(move |reason| this.reject(reason)),
            _value: std::marker::PhantomData,
        }
    }

    /// The current state. While pending, `waker` replaces whatever `waiter`
    /// stored before and is woken on settlement.
    pub(crate) fn poll_state(&self, waiter: u64, waker: &Waker) -> State<T, E> {
        let mut inner = self.inner.borrow_mut();
        if !inner.state.is_settled() {
            match inner.wakers.iter_mut().find(|(id, _)| *id == waiter) {
                Some((_, stored)) => stored.clone_from(waker),
                None => inner.wakers.push((waiter, waker.clone())),
            }
        }
        inner.state.clone()
    }

    fn resolve(&self, value: Resolution<T, E>) {
        match value {
            Resolution::Future(other) if Rc::ptr_eq(&self.inner, &other.inner) => {
                log::debug!("future #{} resolved with itself", self.id());
                self.reject(E::from(Error::SelfResolution));
            }
            Resolution::Future(other) => match other.state() {
                State::Pending => {
                    let (on_value, on_reason) = (self.clone(), self.clone());
                    other.push(
                        Box::new(move |value| on_value.resolve(Resolution::Value(value))),
                        Box::new(move |reason| on_reason.reject(reason)),
                    );
                }
                adopted => self.settle(adopted),
            },
            Resolution::Thenable(thenable) => self.resolve_thenable(thenable),
            Resolution::Value(value) => self.settle(State::Fulfilled(value)),
        }
    }

    fn resolve_thenable(&self, thenable: Box<dyn Thenable<T, E>>) {
        // Shared by both callbacks and the error path: first caller wins.
        let called = Rc::new(Cell::new(false));
        let resolve = {
            let (this, called) = (self.clone(), called.clone());
            Resolver {
                resolve: Rc::new(move |value| {
                    if !called.replace(true) {
                        this.resolve(value);
                    }
                }),
            }
        };
        let reject = {
            let (this, called) = (self.clone(), called.clone());
            Rejecter {
                reject: Rc::new(move |reason| {
                    if !called.replace(true) {
                        this.reject(reason);
                    }
                }),
                _value: std::marker::PhantomData,
            }
        };
        if let Err(reason) = catch(move || thenable.then(resolve, reject)) {
            if called.replace(true) {
                log::trace!("future #{} ignored a late thenable error", self.id());
            } else {
                self.reject(reason);
            }
        }
    }

    fn reject(&self, reason: E) {
        self.settle(State::Rejected(reason));
    }

    fn settle(&self, state: State<T, E>) {
        let wakers = {
            let mut inner = self.inner.borrow_mut();
            if inner.state.is_settled() {
                log::trace!("future #{} is already {}, ignoring {}", inner.id, inner.state, state);
                return;
            }
            if !state.is_settled() {
                return;
            }
            log::trace!("future #{} {}", inner.id, state);
            inner.state = state;
            std::mem::take(&mut inner.wakers)
        };
        for (_, waker) in wakers {
            waker.wake();
        }
        self.process();
    }

    fn push(&self, on_success: Box<dyn FnOnce(T)>, on_failure: Box<dyn FnOnce(E)>) {
        self.inner
            .borrow_mut()
            .continuations
            .push_back((on_success, on_failure));
        self.process();
    }

    /// Schedule a drain if settled.
    fn process(&self) {
        if self.is_pending() {
            return;
        }
        let this = self.clone();
        scheduler::schedule(move || this.drain());
    }

    fn drain(&self) {
        let mut ran = 0;
        loop {
            // Released before the callback runs: it may call `then` on us.
            let (continuation, state) = {
                let mut inner = self.inner.borrow_mut();
                match inner.continuations.pop_front() {
                    Some(continuation) => (continuation, inner.state.clone()),
                    None => break,
                }
            };
            let (on_success, on_failure) = continuation;
            match state {
                State::Fulfilled(value) => on_success(value),
                State::Rejected(reason) => on_failure(reason),
                State::Pending => unreachable!("drained a pending future"),
            }
            ran += 1;
        }
        if ran > 0 {
            log::trace!("future #{} ran {} continuation(s)", self.id(), ran);
        }
    }

    fn derive<U, S, J>(&self, on_success: S, on_failure: J) -> Future<U, E>
    where
        U: Clone + 'static,
        S: FnOnce(T, Resolver<U, E>, Rejecter<U, E>) + 'static,
        J: FnOnce(E, Resolver<U, E>, Rejecter<U, E>) + 'static,
    {
        let derived = Future::<U, E>::pending();
        let (resolve, reject) = (derived.resolver(), derived.rejecter());
        let (resolve_failure, reject_failure) = (resolve.clone(), reject.clone());
        self.push(
            Box::new(move |value| on_success(value, resolve, reject)),
            Box::new(move |reason| on_failure(reason, resolve_failure, reject_failure)),
        );
        derived
    }
}

fn run_handler<A, U, E, H>(handler: H, arg: A, resolve: &Resolver<U, E>, reject: &Rejecter<U, E>)
where
    H: FnOnce(A) -> Result<Resolution<U, E>, E>,
    E: From<Error>,
{
    match catch(move || handler(arg)) {
        Ok(value) => resolve.resolve(value),
        Err(reason) => reject.reject(reason),
    }
}

/// Run `f`, turning a panic into an [`Error::Panicked`] reason.
fn catch<R, E, F>(f: F) -> Result<R, E>
where
    F: FnOnce() -> Result<R, E>,
    E: From<Error>,
{
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        log::debug!("caught panic: {}", message);
        Err(E::from(Error::Panicked(message)))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
