//! Error types for retry chains, work submission, and executor lifecycle.
use std::fmt;
use std::time::Duration;

/// Error raised by a decision function; it supersedes the attempt's own outcome.
pub type DecisionError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Terminal error of one logical call.
///
/// Every failure that was retried along the way is kept, in attempt order, as a
/// suppressed cause on whichever error finally surfaces.
#[derive(Debug)]
pub enum CallError<E> {
    /// The decision function aborted on a work failure (or substituted its own error).
    Failed { error: E, suppressed: Vec<E> },
    /// The decision function itself failed or panicked.
    Decision { source: DecisionError, suppressed: Vec<E> },
    /// The call was cancelled before it reached a terminal outcome.
    Cancelled { suppressed: Vec<E> },
    /// A retry was requested at or after the call's deadline.
    DeadlineExceeded { overdue: Duration, suppressed: Vec<E> },
    /// The unit of work panicked.
    Panicked { message: String, suppressed: Vec<E> },
    /// The work-submission surface refused the job.
    Rejected { source: SubmitError, suppressed: Vec<E> },
    /// A retry was requested after the executor started closing.
    Shutdown { suppressed: Vec<E> },
    /// A bounded wait on a handle gave up; the call itself keeps running.
    TimedOut { waited: Duration },
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { error, suppressed } => {
                write!(f, "{}", error)?;
                write_suppressed(f, suppressed)
            }
            Self::Decision { source, suppressed } => {
                write!(f, "decision function failed: {}", source)?;
                write_suppressed(f, suppressed)
            }
            Self::Cancelled { suppressed } => {
                write!(f, "call cancelled")?;
                write_suppressed(f, suppressed)
            }
            Self::DeadlineExceeded { overdue, suppressed } => {
                write!(f, "deadline exceeded by {:?} before retry", overdue)?;
                write_suppressed(f, suppressed)
            }
            Self::Panicked { message, suppressed } => {
                write!(f, "work panicked: {}", message)?;
                write_suppressed(f, suppressed)
            }
            Self::Rejected { source, suppressed } => {
                write!(f, "{}", source)?;
                write_suppressed(f, suppressed)
            }
            Self::Shutdown { suppressed } => {
                write!(f, "executor is shutting down; retry not scheduled")?;
                write_suppressed(f, suppressed)
            }
            Self::TimedOut { waited } => write!(f, "no result after waiting {:?}", waited),
        }
    }
}

fn write_suppressed<E: fmt::Display>(f: &mut fmt::Formatter<'_>, suppressed: &[E]) -> fmt::Result {
    match suppressed.last() {
        Some(last) => write!(f, " ({} earlier failures; last: {})", suppressed.len(), last),
        None => Ok(()),
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CallError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Failed { error, .. } => Some(error),
            Self::Decision { source, .. } => Some(source.as_ref()),
            Self::Rejected { source, .. } => Some(source),
            Self::TimedOut { .. } => None,
            _ => self.suppressed().last().map(|e| e as &dyn std::error::Error),
        }
    }
}

impl<E> CallError<E> {
    /// Failures recorded by earlier attempts, oldest first.
    pub fn suppressed(&self) -> &[E] {
        match self {
            Self::Failed { suppressed, .. }
            | Self::Decision { suppressed, .. }
            | Self::Cancelled { suppressed }
            | Self::DeadlineExceeded { suppressed, .. }
            | Self::Panicked { suppressed, .. }
            | Self::Rejected { suppressed, .. }
            | Self::Shutdown { suppressed } => suppressed,
            Self::TimedOut { .. } => &[],
        }
    }

    /// Consume the error, returning the recorded failures.
    pub fn into_suppressed(self) -> Vec<E> {
        match self {
            Self::Failed { suppressed, .. }
            | Self::Decision { suppressed, .. }
            | Self::Cancelled { suppressed }
            | Self::DeadlineExceeded { suppressed, .. }
            | Self::Panicked { suppressed, .. }
            | Self::Rejected { suppressed, .. }
            | Self::Shutdown { suppressed } => suppressed,
            Self::TimedOut { .. } => Vec::new(),
        }
    }

    /// Borrow the surfaced work failure, if the chain ended in one.
    pub fn failure(&self) -> Option<&E> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Extract the surfaced work failure, if the chain ended in one.
    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    pub fn is_decision_failure(&self) -> bool {
        matches!(self, Self::Decision { .. })
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown { .. })
    }

    /// True for the handle-level wait timeout, not the call deadline.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Errors returned by a work-submission surface.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// No tokio runtime was available to capture.
    #[error("no tokio runtime is available for work submission")]
    NoRuntime,
    /// The bounded surface has no free slot.
    #[error("work submission saturated ({in_flight} in-flight, max {max})")]
    Saturated { in_flight: usize, max: usize },
    /// An OS thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),
    /// Custom surfaces can refuse work for their own reasons.
    #[error("work submission rejected: {0}")]
    Rejected(String),
}

/// Errors produced while building an executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("a work submitter is required")]
    MissingSubmitter,
    #[error("idle_wait must be > 0 and <= {max:?} (got {got:?})")]
    InvalidIdleWait { got: Duration, max: Duration },
    #[error("thread_name must not be empty")]
    EmptyThreadName,
}

/// Errors surfaced by [`RetryExecutor::close`](crate::RetryExecutor::close).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloseError {
    #[error("retry manager thread panicked: {0}")]
    ManagerPanicked(String),
}

/// Render a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct DummyError(&'static str);

    impl fmt::Display for DummyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for DummyError {}

    #[test]
    fn failed_display_mentions_history() {
        let err = CallError::Failed {
            error: DummyError("final"),
            suppressed: vec![DummyError("first"), DummyError("second")],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("final"));
        assert!(msg.contains("2 earlier failures"));
        assert!(msg.contains("second"));
    }

    #[test]
    fn display_without_history_has_no_suffix() {
        let err: CallError<DummyError> = CallError::Cancelled { suppressed: vec![] };
        assert_eq!(err.to_string(), "call cancelled");
    }

    #[test]
    fn source_prefers_surfaced_error() {
        let err = CallError::Failed { error: DummyError("boom"), suppressed: vec![DummyError("x")] };
        assert_eq!(err.source().unwrap().to_string(), "boom");
    }

    #[test]
    fn source_falls_back_to_last_suppressed() {
        let err = CallError::DeadlineExceeded {
            overdue: Duration::from_millis(3),
            suppressed: vec![DummyError("a"), DummyError("b")],
        };
        assert_eq!(err.source().unwrap().to_string(), "b");

        let timed_out: CallError<DummyError> = CallError::TimedOut { waited: Duration::ZERO };
        assert!(timed_out.source().is_none());
    }

    #[test]
    fn decision_source_is_exposed() {
        let err: CallError<DummyError> =
            CallError::Decision { source: "predicate blew up".into(), suppressed: vec![] };
        assert!(err.is_decision_failure());
        assert_eq!(err.source().unwrap().to_string(), "predicate blew up");
    }

    #[test]
    fn accessors_cover_variants() {
        let failed = CallError::Failed { error: DummyError("x"), suppressed: vec![DummyError("y")] };
        assert!(failed.is_failed());
        assert_eq!(failed.failure(), Some(&DummyError("x")));
        assert_eq!(failed.suppressed(), &[DummyError("y")]);
        assert_eq!(failed.into_failure(), Some(DummyError("x")));

        let cancelled: CallError<DummyError> =
            CallError::Cancelled { suppressed: vec![DummyError("z")] };
        assert!(cancelled.is_cancelled());
        assert!(cancelled.failure().is_none());
        assert_eq!(cancelled.into_suppressed(), vec![DummyError("z")]);

        let shutdown: CallError<DummyError> = CallError::Shutdown { suppressed: vec![] };
        assert!(shutdown.is_shutdown());
        let rejected: CallError<DummyError> =
            CallError::Rejected { source: SubmitError::NoRuntime, suppressed: vec![] };
        assert!(rejected.is_rejected());
        let panicked: CallError<DummyError> =
            CallError::Panicked { message: "p".into(), suppressed: vec![] };
        assert!(panicked.is_panic());
        let timed_out: CallError<DummyError> = CallError::TimedOut { waited: Duration::ZERO };
        assert!(timed_out.is_timed_out());
        assert!(timed_out.suppressed().is_empty());
    }

    #[test]
    fn submit_error_messages() {
        let err = SubmitError::Saturated { in_flight: 4, max: 4 };
        assert!(err.to_string().contains("4 in-flight"));
        let err = BuildError::InvalidIdleWait { got: Duration::ZERO, max: Duration::from_secs(1) };
        assert!(err.to_string().contains("idle_wait"));
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
