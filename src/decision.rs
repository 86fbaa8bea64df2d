//! Decision protocol: after every attempt the caller's decision function looks at the outcome and
//! the unit of work that produced it, then says whether to retry or abort.
//!
//! Semantics:
//! - The executor calls [`Decide::decide`] exactly once per completed attempt and trusts the
//!   answer; decisions are not re-validated.
//! - `Retry` carries a delay (zero re-dispatches immediately) and optionally a replacement unit of
//!   work, e.g. to follow a redirect.
//! - `Abort` carries an [`Override`]: keep the actual outcome, or substitute a value or an error.
//! - Returning `Err` from `decide` aborts the chain with [`CallError::Decision`](crate::CallError).
//!
//! Decision functions are `FnMut`/`&mut self`: they may keep counters. Each logical call (and each
//! hedge member) owns its own instance, so no synchronization is needed inside them.
//!
//! Example
//! ```rust
//! use hedgerow::{Decision, DecisionError, Work};
//! use std::time::Duration;
//!
//! let mut retries = 0;
//! let mut decide = move |outcome: &Result<u32, std::io::Error>, _work: &Work<u32, std::io::Error>|
//!     -> Result<Decision<u32, std::io::Error>, DecisionError> {
//!     match outcome {
//!         Err(_) if retries < 3 => {
//!             retries += 1;
//!             Ok(Decision::retry(Duration::from_millis(10)))
//!         }
//!         _ => Ok(Decision::abort()),
//!     }
//! };
//! # let work = Work::new(|| Ok::<u32, std::io::Error>(1));
//! # let _ = hedgerow::Decide::decide(&mut decide, &Ok(1), &work);
//! ```

use crate::error::DecisionError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A re-runnable unit of work.
///
/// Cheap to clone; every attempt of a chain (and every hedge member) calls the same closure unless
/// a decision replaces it.
pub struct Work<T, E> {
    run: Arc<dyn Fn() -> Result<T, E> + Send + Sync>,
    name: Option<Arc<str>>,
}

impl<T, E> Work<T, E> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self { run: Arc::new(f), name: None }
    }

    /// Work with a label, shown in logs and available to decision functions.
    pub fn named<F>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self { run: Arc::new(f), name: Some(name.into()) }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Run the work on the current thread.
    pub fn call(&self) -> Result<T, E> {
        (self.run)()
    }
}

impl<T, E> Clone for Work<T, E> {
    fn clone(&self) -> Self {
        Self { run: Arc::clone(&self.run), name: self.name.clone() }
    }
}

impl<T, E> fmt::Debug for Work<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work").field("name", &self.name).field("run", &"<fn>").finish()
    }
}

/// What an abort surfaces to the caller.
#[derive(Debug)]
pub enum Override<T, E> {
    /// Surface the attempt's own result or error.
    UseActual,
    /// Surface this value instead.
    Value(T),
    /// Surface this error instead.
    Error(E),
}

/// Verdict for one completed attempt.
#[derive(Debug)]
pub enum Decision<T, E> {
    Retry { delay: Duration, next: Option<Work<T, E>> },
    Abort(Override<T, E>),
}

impl<T, E> Decision<T, E> {
    /// Retry the same work after `delay`.
    pub fn retry(delay: Duration) -> Self {
        Decision::Retry { delay, next: None }
    }

    /// Retry with replacement work after `delay`.
    pub fn retry_with(delay: Duration, next: Work<T, E>) -> Self {
        Decision::Retry { delay, next: Some(next) }
    }

    /// Stop and surface the actual outcome.
    pub fn abort() -> Self {
        Decision::Abort(Override::UseActual)
    }

    pub fn abort_with_value(value: T) -> Self {
        Decision::Abort(Override::Value(value))
    }

    pub fn abort_with_error(error: E) -> Self {
        Decision::Abort(Override::Error(error))
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Decision::Retry { .. })
    }
}

/// Caller-supplied decision function.
pub trait Decide<T, E>: Send + 'static {
    fn decide(
        &mut self,
        outcome: &Result<T, E>,
        work: &Work<T, E>,
    ) -> Result<Decision<T, E>, DecisionError>;
}

impl<T, E, F> Decide<T, E> for F
where
    F: FnMut(&Result<T, E>, &Work<T, E>) -> Result<Decision<T, E>, DecisionError> + Send + 'static,
{
    fn decide(
        &mut self,
        outcome: &Result<T, E>,
        work: &Work<T, E>,
    ) -> Result<Decision<T, E>, DecisionError> {
        self(outcome, work)
    }
}

/// Decision function that aborts on the first outcome, whatever it is.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverRetry;

impl<T, E> Decide<T, E> for NeverRetry {
    fn decide(&mut self, _: &Result<T, E>, _: &Work<T, E>) -> Result<Decision<T, E>, DecisionError> {
        Ok(Decision::abort())
    }
}
