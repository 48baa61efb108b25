//! A single-threaded future following Promise/A+ resolution semantics.
//!
//! A [`Future`] starts pending and settles once, fulfilled with a value or
//! rejected with a reason. Handlers attached with [`Future::then`] run later,
//! in registration order, when the thread's [`scheduler`] is run. Resolving
//! with another future or a [`Thenable`] adopts its outcome.
//!
//! # Examples
//!
//! ```
//! use promise_aplus::{deferred, scheduler, Future, Resolution, State};
//! let d = deferred::<i32, String>();
//! let doubled = d.future.and_then(|v| Ok(Resolution::Value(v * 2)));
//! d.resolve.resolve(Future::<i32, String>::fulfilled(21));
//! scheduler::run_until_stalled();
//! assert_eq!(doubled.state(), State::Fulfilled(42));
//! ```
mod deferred;
mod future;
pub mod scheduler;
mod thenable;
mod waiter;

pub use deferred::{deferred, Deferred};
pub use future::{Future, Rejecter, Resolution, Resolver, State};
pub use thenable::{FnThenable, Thenable};
pub use waiter::Waiter;

/// Reasons produced by the futures themselves. Reason types opt in through
/// `From<Error>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("a future cannot resolve with itself")]
    SelfResolution,
    #[error("panicked: {0}")]
    Panicked(String),
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}
