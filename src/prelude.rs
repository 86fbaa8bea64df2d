//! Convenient re-exports for common hedgerow types.
pub use crate::{
    backoff::{Backoff, Jitter, MAX_BACKOFF},
    decision::{Decide, Decision, NeverRetry, Override, Work},
    error::{CallError, DecisionError},
    executor::{CallOptions, ExecutorBuilder, RetryExecutor},
    policy::{RetryPolicy, RetryPolicyBuilder},
    submit::{Bounded, ThreadPerJob, TokioBlocking, WorkSubmitter},
    AsyncCallHandle, AttemptPhase, CallHandle,
};
