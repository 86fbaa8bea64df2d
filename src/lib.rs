#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # hedgerow
//!
//! Retry and hedging executor for blocking units of work.
//!
//! Each call wraps a re-runnable [`Work`] and a caller-supplied decision function. After every
//! run the decision function says whether to stop (with the actual outcome or an override) or to
//! retry after a delay, optionally with replacement work. Delayed retries wait in a
//! deadline-ordered queue drained by a single background thread per executor; the work itself
//! always runs on a pluggable [`WorkSubmitter`].
//!
//! ## Features
//!
//! - **Decision protocol**: stateful `FnMut` closures or [`RetryPolicy`] with backoff and jitter
//! - **Suppressed history**: every retried failure rides along on the final [`CallError`]
//! - **Deadlines** checked before each retry
//! - **Cancellation** that pulls a pending retry out of the queue before it fires
//! - **Hedging**: N extra attempts, first outcome wins, losers are cancelled
//! - **Blocking, async and fire-and-forget** surfaces
//!
//! ## Quick Start
//!
//! ```rust
//! use hedgerow::{Backoff, Jitter, RetryExecutor, RetryPolicy, ThreadPerJob, Work};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let executor = RetryExecutor::new(ThreadPerJob::default());
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .backoff(Backoff::constant(Duration::from_millis(5)))
//!     .with_jitter(Jitter::None)
//!     .build()
//!     .unwrap();
//!
//! let calls = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&calls);
//! let work = Work::new(move || {
//!     if counter.fetch_add(1, Ordering::SeqCst) < 2 {
//!         Err("flaky")
//!     } else {
//!         Ok("ok")
//!     }
//! });
//!
//! assert_eq!(executor.call(work, policy).unwrap(), "ok");
//! assert_eq!(calls.load(Ordering::SeqCst), 3);
//! executor.close().unwrap();
//! ```

mod attempt;
pub mod backoff;
pub mod clock;
mod completion;
pub mod decision;
pub mod delay_queue;
pub mod error;
pub mod executor;
mod hedge;
mod manager;
pub mod policy;
pub mod prelude;
pub mod submit;
pub mod telemetry;

pub use attempt::AttemptPhase;
pub use backoff::{Backoff, BackoffError, Jitter};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use completion::{AsyncCallHandle, CallHandle};
pub use decision::{Decide, Decision, NeverRetry, Override, Work};
pub use error::{BuildError, CallError, CloseError, DecisionError, SubmitError};
pub use executor::{CallOptions, ExecutorBuilder, ExecutorConfig, RetryExecutor};
pub use policy::{PolicyError, RetryPolicy, RetryPolicyBuilder};
pub use submit::{Bounded, Job, ThreadPerJob, TokioBlocking, WorkSubmitter};
pub use telemetry::{EventSink, ExecutorEvent, LogSink, MemorySink, NullSink};
