//! Waiting on long-running engine operations.
//!
//! A generic [`Poller`] drives every wait: it emits a throttled progress
//! message, sleeps through an injected [`Sleeper`] and re-probes until the
//! probe is ready or the attempt ceiling is reached. [`StackWaiter`] builds
//! the stack lifecycle waits on top of it.

mod message;
mod poller;
pub(crate) mod sleeper;
mod stack;

pub use message::{WaitMessage, format_elapsed};
pub use poller::{Poll, Poller};
pub use sleeper::{Sleeper, TokioSleeper};
pub use stack::{StackWaiter, WaitOutcome};
