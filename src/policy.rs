//! Stock decision function: bounded retries with backoff.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries).
//! - Successful outcomes always abort with the actual value.
//! - A failure is retried while attempts remain and `should_retry` accepts it; the delay for
//!   retry `n` is `backoff.delay(n)` with jitter applied.
//! - Otherwise the chain aborts with the actual error, and every earlier failure rides along as
//!   a suppressed cause.
//!
//! The policy counts its own attempts, so each logical call needs its own instance. Cloning an
//! unused policy is the intended way to hand one to every hedge member.
//!
//! ```rust
//! use hedgerow::{Backoff, Jitter, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::<std::io::Error>::builder()
//!     .max_attempts(4)
//!     .backoff(Backoff::exponential(Duration::from_millis(50)))
//!     .with_jitter(Jitter::Equal)
//!     .should_retry(|e| e.kind() != std::io::ErrorKind::PermissionDenied)
//!     .build()
//!     .unwrap();
//! assert_eq!(policy.max_attempts(), 4);
//! ```

use crate::backoff::{Backoff, Jitter};
use crate::decision::{Decide, Decision, Work};
use crate::error::DecisionError;
use std::sync::Arc;
use std::time::Duration;

/// Retry-with-backoff decision function.
pub struct RetryPolicy<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    attempts: usize,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
            jitter: self.jitter,
            should_retry: Arc::clone(&self.should_retry),
            attempts: self.attempts,
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("attempts", &self.attempts)
            .field("should_retry", &"<predicate>")
            .finish()
    }
}

impl<E> RetryPolicy<E> {
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Attempts observed so far by this instance.
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

impl<T, E> Decide<T, E> for RetryPolicy<E>
where
    E: Send + 'static,
{
    fn decide(
        &mut self,
        outcome: &Result<T, E>,
        _work: &Work<T, E>,
    ) -> Result<Decision<T, E>, DecisionError> {
        self.attempts += 1;
        match outcome {
            Ok(_) => Ok(Decision::abort()),
            Err(e) if self.attempts < self.max_attempts && (self.should_retry)(e) => {
                let delay = self.jitter.apply(self.backoff.delay(self.attempts));
                tracing::debug!(attempt = self.attempts, ?delay, "retry policy requests retry");
                Ok(Decision::retry(delay))
            }
            Err(_) => Ok(Decision::abort()),
        }
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
}

impl<E> RetryPolicyBuilder<E> {
    /// Defaults: 3 attempts, 100ms exponential backoff, full jitter, retry every error.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(Duration::from_millis(100)),
            jitter: Jitter::Full,
            should_retry: Arc::new(|_| true),
        }
    }

    /// Total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Predicate deciding whether an error is retryable.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn build(self) -> Result<RetryPolicy<E>, PolicyError> {
        if self.max_attempts == 0 {
            return Err(PolicyError::InvalidMaxAttempts(0));
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            attempts: 0,
        })
    }
}

impl<E> Default for RetryPolicyBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Override;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    fn policy(max: usize) -> RetryPolicy<TestError> {
        RetryPolicy::builder()
            .max_attempts(max)
            .backoff(Backoff::linear(Duration::from_millis(10)))
            .with_jitter(Jitter::None)
            .build()
            .expect("builder")
    }

    fn work() -> Work<u32, TestError> {
        Work::new(|| Err(TestError("x")))
    }

    #[test]
    fn success_aborts_with_actual() {
        let mut p = policy(3);
        let d = p.decide(&Ok(1), &work()).unwrap();
        assert!(matches!(d, Decision::Abort(Override::UseActual)));
    }

    #[test]
    fn failures_retry_until_budget_spent() {
        let mut p = policy(3);
        let fail: Result<u32, _> = Err(TestError("x"));
        match p.decide(&fail, &work()).unwrap() {
            Decision::Retry { delay, next: None } => assert_eq!(delay, Duration::from_millis(10)),
            other => panic!("unexpected {:?}", other),
        }
        match p.decide(&fail, &work()).unwrap() {
            Decision::Retry { delay, .. } => assert_eq!(delay, Duration::from_millis(20)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!p.decide(&fail, &work()).unwrap().is_retry());
        assert_eq!(p.attempts(), 3);
    }

    #[test]
    fn predicate_short_circuits() {
        let mut p = RetryPolicy::<TestError>::builder()
            .max_attempts(5)
            .should_retry(|e| e.0 == "transient")
            .build()
            .unwrap();
        assert!(!p.decide(&Err::<u32, _>(TestError("fatal")), &work()).unwrap().is_retry());
    }

    #[test]
    fn clones_count_independently() {
        let original = policy(2);
        let mut a = original.clone();
        let mut b = original.clone();
        let fail: Result<u32, _> = Err(TestError("x"));
        assert!(a.decide(&fail, &work()).unwrap().is_retry());
        assert!(b.decide(&fail, &work()).unwrap().is_retry());
        assert_eq!(original.attempts(), 0);
    }

    #[test]
    fn builder_rejects_zero_attempts() {
        let err = RetryPolicy::<TestError>::builder().max_attempts(0).build();
        assert!(matches!(err, Err(PolicyError::InvalidMaxAttempts(0))));
    }
}
