//! Per-call attempt state machine.
//!
//! One [`Attempt`] drives one logical call chain: dispatch the current work, consult the decision
//! function on its outcome, then either finish or schedule the next run. Every failure that leads
//! to a retry is kept and surfaces as the terminal error's suppressed history.
//!
//! Phases:
//!
//! ```text
//! Idle -> Running -> Deciding -> Terminal
//!            ^           |
//!            |           v
//!            +---- RetryScheduled
//!
//! any non-final phase -> Cancelled
//! ```
//!
//! Invariants:
//! - Runs of one chain are strictly sequential: run k+1 is dispatched only after the decision on
//!   run k returned.
//! - At most one queued retry exists per attempt, and cancellation removes it before it can fire.
//! - The outcome is delivered exactly once, never while the chain lock is held.
//! - The deadline is only checked when a retry is about to be scheduled; a running attempt is
//!   never interrupted.

use crate::completion::Finish;
use crate::decision::{Decide, Decision, Override, Work};
use crate::delay_queue::EntryKey;
use crate::error::{panic_message, CallError, DecisionError};
use crate::executor::Core;
use crate::manager::Redispatch;
use crate::telemetry::ExecutorEvent;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where an attempt currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptPhase {
    /// Created, first run not yet dispatched.
    Idle,
    /// Work is executing on a worker.
    Running,
    /// Work returned; the decision function is being consulted.
    Deciding,
    /// A retry is queued or being resubmitted.
    RetryScheduled,
    /// The chain produced its outcome.
    Terminal,
    /// The chain was cancelled before reaching an outcome.
    Cancelled,
}

impl AttemptPhase {
    /// True for `Terminal` and `Cancelled`; no further transition is possible.
    pub fn is_final(self) -> bool {
        matches!(self, AttemptPhase::Terminal | AttemptPhase::Cancelled)
    }
}

/// Cancellation and introspection shared by single attempts and hedge groups.
pub(crate) trait Cancel: Send + Sync {
    /// Cancel unless already final; true if this call performed the transition.
    fn cancel(&self) -> bool;
    fn is_cancelled(&self) -> bool;
    fn phases(&self) -> Vec<AttemptPhase>;
}

struct Chain<T, E> {
    work: Work<T, E>,
    suppressed: Vec<E>,
    pending: Option<EntryKey>,
    phase: AttemptPhase,
    runs: usize,
    // Taken on the final transition so a finished attempt no longer references its receiver.
    sink: Option<Arc<dyn Finish<T, E>>>,
}

pub(crate) struct Attempt<T, E, D> {
    id: u64,
    core: Arc<Core>,
    chain: Mutex<Chain<T, E>>,
    decide: Mutex<D>,
    deadline: Option<Instant>,
    cancelled: AtomicBool,
}

impl<T, E, D> Attempt<T, E, D>
where
    T: Send + 'static,
    E: Send + 'static,
    D: Decide<T, E>,
{
    pub(crate) fn new(
        core: Arc<Core>,
        work: Work<T, E>,
        decide: D,
        deadline: Option<Instant>,
        sink: Arc<dyn Finish<T, E>>,
    ) -> Arc<Self> {
        let id = core.next_attempt_id();
        Arc::new(Self {
            id,
            core,
            chain: Mutex::new(Chain {
                work,
                suppressed: Vec::new(),
                pending: None,
                phase: AttemptPhase::Idle,
                runs: 0,
                sink: Some(sink),
            }),
            decide: Mutex::new(decide),
            deadline,
            cancelled: AtomicBool::new(false),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn phase(&self) -> AttemptPhase {
        self.chain.lock().phase
    }

    /// Dispatch the first run now.
    pub(crate) fn start(self: &Arc<Self>) {
        if self.chain.lock().phase.is_final() {
            return;
        }
        self.dispatch();
    }

    /// Dispatch the first run through the delay queue after `delay`.
    pub(crate) fn start_after(self: &Arc<Self>, delay: Duration) {
        if delay.is_zero() {
            return self.start();
        }
        let mut chain = self.chain.lock();
        if chain.phase.is_final() {
            return;
        }
        if let Err(source) = self.core.manager.ensure_started() {
            drop(chain);
            self.conclude(|suppressed| Err(CallError::Rejected { source, suppressed }));
            return;
        }
        let task: Arc<dyn Redispatch> = Arc::clone(self) as Arc<dyn Redispatch>;
        match self.core.queue.push_after(delay, task) {
            Ok(key) => chain.pending = Some(key),
            Err(_) => {
                drop(chain);
                self.conclude(|suppressed| Err(CallError::Shutdown { suppressed }));
            }
        }
    }

    fn dispatch(self: &Arc<Self>) {
        let this = Arc::clone(self);
        if let Err(source) = self.core.submitter.submit(Box::new(move || this.run())) {
            tracing::warn!(attempt = self.id, error = %source, "work submission rejected");
            self.conclude(|suppressed| Err(CallError::Rejected { source, suppressed }));
        }
    }

    fn run(self: Arc<Self>) {
        let work = {
            let mut chain = self.chain.lock();
            if chain.phase.is_final() {
                return;
            }
            chain.pending = None;
            chain.phase = AttemptPhase::Running;
            chain.runs += 1;
            chain.work.clone()
        };
        match panic::catch_unwind(AssertUnwindSafe(|| work.call())) {
            Ok(outcome) => self.complete(outcome, &work),
            Err(payload) => {
                let message = panic_message(&*payload);
                tracing::warn!(attempt = self.id, panic = %message, "work panicked");
                self.conclude(|suppressed| Err(CallError::Panicked { message, suppressed }));
            }
        }
    }

    fn complete(self: &Arc<Self>, outcome: Result<T, E>, work: &Work<T, E>) {
        {
            let mut chain = self.chain.lock();
            if chain.phase.is_final() {
                return;
            }
            chain.phase = AttemptPhase::Deciding;
        }
        let verdict = {
            let mut decide = self.decide.lock();
            panic::catch_unwind(AssertUnwindSafe(|| decide.decide(&outcome, work)))
        };
        let decision = match verdict {
            Ok(Ok(decision)) => decision,
            Ok(Err(source)) => {
                tracing::debug!(attempt = self.id, error = %source, "decision function failed");
                self.conclude(|suppressed| Err(CallError::Decision { source, suppressed }));
                return;
            }
            Err(payload) => {
                let source: DecisionError =
                    format!("decision function panicked: {}", panic_message(&*payload)).into();
                self.conclude(|suppressed| Err(CallError::Decision { source, suppressed }));
                return;
            }
        };
        match decision {
            Decision::Abort(choice) => {
                self.conclude(move |suppressed| match (choice, outcome) {
                    (Override::UseActual, Ok(value)) | (Override::Value(value), _) => Ok(value),
                    (Override::UseActual, Err(error)) | (Override::Error(error), _) => {
                        Err(CallError::Failed { error, suppressed })
                    }
                });
            }
            Decision::Retry { delay, next } => self.schedule_retry(outcome, delay, next),
        }
    }

    fn schedule_retry(
        self: &Arc<Self>,
        outcome: Result<T, E>,
        delay: Duration,
        next: Option<Work<T, E>>,
    ) {
        let mut chain = self.chain.lock();
        if chain.phase.is_final() {
            return;
        }
        if let Err(error) = outcome {
            chain.suppressed.push(error);
        }
        if let Some(next) = next {
            chain.work = next;
        }
        let run = chain.runs;

        if let Some(deadline) = self.deadline {
            let now = self.core.clock.now();
            if now >= deadline {
                drop(chain);
                let overdue = now.duration_since(deadline);
                tracing::debug!(attempt = self.id, ?overdue, "deadline passed, not retrying");
                self.core.events.emit(&ExecutorEvent::DeadlineExceeded { attempt: self.id, overdue });
                self.conclude(|suppressed| Err(CallError::DeadlineExceeded { overdue, suppressed }));
                return;
            }
        }
        if self.core.is_closing() {
            drop(chain);
            self.conclude(|suppressed| Err(CallError::Shutdown { suppressed }));
            return;
        }

        tracing::debug!(attempt = self.id, run, ?delay, "retry scheduled");
        self.core.events.emit(&ExecutorEvent::RetryScheduled { attempt: self.id, run, delay });
        chain.phase = AttemptPhase::RetryScheduled;
        if delay.is_zero() {
            drop(chain);
            self.dispatch();
            return;
        }
        if let Err(source) = self.core.manager.ensure_started() {
            drop(chain);
            self.conclude(|suppressed| Err(CallError::Rejected { source, suppressed }));
            return;
        }
        let task: Arc<dyn Redispatch> = Arc::clone(self) as Arc<dyn Redispatch>;
        match self.core.queue.push_after(delay, task) {
            Ok(key) => chain.pending = Some(key),
            Err(_) => {
                drop(chain);
                self.conclude(|suppressed| Err(CallError::Shutdown { suppressed }));
            }
        }
    }

    /// Move to `Terminal` and deliver the outcome built from the suppressed history.
    ///
    /// No-op if the chain already reached a final phase.
    fn conclude(&self, build: impl FnOnce(Vec<E>) -> Result<T, CallError<E>>) {
        let (suppressed, runs, sink) = {
            let mut chain = self.chain.lock();
            if chain.phase.is_final() {
                return;
            }
            chain.phase = AttemptPhase::Terminal;
            chain.pending = None;
            (std::mem::take(&mut chain.suppressed), chain.runs, chain.sink.take())
        };
        let outcome = build(suppressed);
        self.core.events.emit(&ExecutorEvent::Completed {
            attempt: self.id,
            runs,
            success: outcome.is_ok(),
        });
        if let Some(sink) = sink {
            sink.finish(outcome);
        }
    }
}

impl<T, E, D> Cancel for Attempt<T, E, D>
where
    T: Send + 'static,
    E: Send + 'static,
    D: Decide<T, E>,
{
    fn cancel(&self) -> bool {
        let (removed_pending, suppressed, sink) = {
            let mut chain = self.chain.lock();
            if chain.phase.is_final() {
                return false;
            }
            chain.phase = AttemptPhase::Cancelled;
            self.cancelled.store(true, Ordering::Release);
            let removed = chain
                .pending
                .take()
                .map_or(false, |key| self.core.queue.remove(&key).is_some());
            (removed, std::mem::take(&mut chain.suppressed), chain.sink.take())
        };
        tracing::debug!(attempt = self.id, removed_pending, "attempt cancelled");
        self.core.events.emit(&ExecutorEvent::Cancelled { attempt: self.id, removed_pending });
        if let Some(sink) = sink {
            sink.finish(Err(CallError::Cancelled { suppressed }));
        }
        true
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn phases(&self) -> Vec<AttemptPhase> {
        vec![self.phase()]
    }
}

impl<T, E, D> Redispatch for Attempt<T, E, D>
where
    T: Send + 'static,
    E: Send + 'static,
    D: Decide<T, E>,
{
    fn attempt_id(&self) -> u64 {
        self.id
    }

    fn redispatch(self: Arc<Self>) {
        self.dispatch();
    }
}

impl<T, E, D> std::fmt::Debug for Attempt<T, E, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let chain = self.chain.lock();
        f.debug_struct("Attempt")
            .field("id", &self.id)
            .field("phase", &chain.phase)
            .field("runs", &chain.runs)
            .field("suppressed", &chain.suppressed.len())
            .field("deadline", &self.deadline)
            .finish()
    }
}
