//! Executor façade: the public entry point for calls.
//!
//! A [`RetryExecutor`] owns a work-submission surface, a delay queue, and a lazily started retry
//! manager thread. Every call becomes one attempt (or, when hedged, a group of attempts) whose
//! outcome is read through a handle, awaited, or dropped (fire-and-forget).
//!
//! Invariants:
//! - At most one retry manager thread per executor, started on the first delayed retry.
//! - After [`initiate_close`](RetryExecutor::initiate_close), no new retry is scheduled; chains
//!   that ask for one finish with [`CallError::Shutdown`]. Retries already queued are abandoned.
//! - Dropping the last executor clone initiates close; it never joins the manager thread.
//!
//! # Example
//!
//! ```rust,no_run
//! use hedgerow::{RetryExecutor, RetryPolicy, ThreadPerJob, Work};
//!
//! let executor = RetryExecutor::new(ThreadPerJob::default());
//! let policy = RetryPolicy::<std::io::Error>::builder().max_attempts(3).build().unwrap();
//! let value = executor.call(Work::new(|| Ok::<_, std::io::Error>(42)), policy).unwrap();
//! assert_eq!(value, 42);
//! executor.close().unwrap();
//! ```

use crate::attempt::{Attempt, Cancel};
use crate::clock::{Clock, MonotonicClock};
use crate::completion::{AsyncCallHandle, CallHandle, Completion, Finish};
use crate::decision::{Decide, Work};
use crate::delay_queue::DelayQueue;
use crate::error::{BuildError, CallError, CloseError};
use crate::hedge::HedgeGroup;
use crate::manager::{RetryManager, RetryQueue};
use crate::submit::WorkSubmitter;
use crate::telemetry::{EventSink, ExecutorEvent, NullSink};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

/// Default bound on one manager wait; keeps shutdown responsive.
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_secs(60);
/// Largest accepted manager wait.
pub const MAX_IDLE_WAIT: Duration = Duration::from_secs(60 * 60);
/// Default name of the retry manager thread.
pub const DEFAULT_THREAD_NAME: &str = "hedgerow-retry";

/// Shared state behind every executor clone and every attempt.
pub(crate) struct Core {
    pub(crate) submitter: Arc<dyn WorkSubmitter>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) queue: Arc<RetryQueue>,
    pub(crate) manager: RetryManager,
    pub(crate) events: Arc<dyn EventSink>,
    closing: AtomicBool,
    next_attempt: AtomicU64,
}

impl Core {
    pub(crate) fn next_attempt_id(&self) -> u64 {
        self.next_attempt.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn initiate_close(&self) -> usize {
        if !self.closing.swap(true, Ordering::AcqRel) {
            tracing::debug!("executor closing");
        }
        self.manager.stop()
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("submitter", &self.submitter)
            .field("manager", &self.manager)
            .field("closing", &self.is_closing())
            .finish()
    }
}

/// Initiates close when the last executor clone goes away. Attempts hold `Core`, not this.
#[derive(Debug)]
struct Owner {
    core: Arc<Core>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        self.core.initiate_close();
    }
}

/// Plain executor settings, loadable from configuration when the `serde` feature is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ExecutorConfig {
    /// Longest single wait of the retry manager on an empty or not-yet-due queue.
    pub idle_wait: Duration,
    /// Name given to the retry manager thread.
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { idle_wait: DEFAULT_IDLE_WAIT, thread_name: DEFAULT_THREAD_NAME.to_string() }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.idle_wait.is_zero() || self.idle_wait > MAX_IDLE_WAIT {
            return Err(BuildError::InvalidIdleWait { got: self.idle_wait, max: MAX_IDLE_WAIT });
        }
        if self.thread_name.trim().is_empty() {
            return Err(BuildError::EmptyThreadName);
        }
        Ok(())
    }
}

/// Builder for [`RetryExecutor`].
#[derive(Debug)]
pub struct ExecutorBuilder {
    submitter: Option<Arc<dyn WorkSubmitter>>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    config: ExecutorConfig,
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self {
            submitter: None,
            clock: Arc::new(MonotonicClock),
            events: Arc::new(NullSink),
            config: ExecutorConfig::default(),
        }
    }
}

impl ExecutorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Where attempts run. Required.
    pub fn submitter<S: WorkSubmitter + 'static>(mut self, submitter: S) -> Self {
        self.submitter = Some(Arc::new(submitter));
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn event_sink<S: EventSink + 'static>(mut self, sink: S) -> Self {
        self.events = Arc::new(sink);
        self
    }

    pub fn idle_wait(mut self, idle_wait: Duration) -> Self {
        self.config.idle_wait = idle_wait;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Replace every plain setting with `config`.
    pub fn from_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<RetryExecutor, BuildError> {
        let submitter = self.submitter.ok_or(BuildError::MissingSubmitter)?;
        self.config.validate()?;
        Ok(RetryExecutor::assemble(submitter, self.clock, self.events, self.config))
    }
}

/// Per-call options: deadline and hedging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    deadline: Option<Deadline>,
    hedges: usize,
    hedge_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deadline {
    At(Instant),
    After(Duration),
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// No retry is scheduled once `deadline` has passed.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(Deadline::At(deadline));
        self
    }

    /// Deadline relative to submission, measured with the executor's clock.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Deadline::After(timeout));
        self
    }

    /// Run `hedges` extra attempts, each started `delay` after submission.
    pub fn with_hedges(mut self, hedges: usize, delay: Duration) -> Self {
        self.hedges = hedges;
        self.hedge_delay = delay;
        self
    }

    pub fn hedges(&self) -> usize {
        self.hedges
    }

    pub fn hedge_delay(&self) -> Duration {
        self.hedge_delay
    }

    fn resolve_deadline(&self, clock: &dyn Clock) -> Option<Instant> {
        self.deadline.map(|deadline| match deadline {
            Deadline::At(at) => at,
            Deadline::After(timeout) => clock.deadline_after(timeout),
        })
    }
}

/// Retry and hedging executor. Cheap to clone; clones share one manager thread.
#[derive(Clone, Debug)]
pub struct RetryExecutor {
    owner: Arc<Owner>,
}

impl RetryExecutor {
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    /// Executor with default settings on `submitter`.
    pub fn new<S: WorkSubmitter + 'static>(submitter: S) -> Self {
        Self::assemble(
            Arc::new(submitter),
            Arc::new(MonotonicClock),
            Arc::new(NullSink),
            ExecutorConfig::default(),
        )
    }

    fn assemble(
        submitter: Arc<dyn WorkSubmitter>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        config: ExecutorConfig,
    ) -> Self {
        let queue = Arc::new(DelayQueue::new(Arc::clone(&clock)));
        let manager = RetryManager::new(
            Arc::clone(&queue),
            config.idle_wait,
            config.thread_name,
            Arc::clone(&events),
        );
        let core = Arc::new(Core {
            submitter,
            clock,
            queue,
            manager,
            events,
            closing: AtomicBool::new(false),
            next_attempt: AtomicU64::new(0),
        });
        Self { owner: Arc::new(Owner { core }) }
    }

    pub(crate) fn core(&self) -> Arc<Core> {
        Arc::clone(&self.owner.core)
    }

    /// Submit `work`; the returned handle blocks on the outcome.
    pub fn submit<T, E, D>(&self, work: Work<T, E>, decide: D) -> CallHandle<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        D: Decide<T, E>,
    {
        let (completion, control) = self.launch(work, decide, None);
        CallHandle::new(completion, control)
    }

    /// Like [`submit`](Self::submit), returning an awaitable handle.
    pub fn submit_async<T, E, D>(&self, work: Work<T, E>, decide: D) -> AsyncCallHandle<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        D: Decide<T, E>,
    {
        let (completion, control) = self.launch(work, decide, None);
        AsyncCallHandle::new(completion, control)
    }

    /// Submit with a deadline and/or hedges. Each hedge member gets its own clone of `decide`.
    pub fn submit_with<T, E, D>(
        &self,
        work: Work<T, E>,
        decide: D,
        options: CallOptions,
    ) -> CallHandle<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        D: Decide<T, E> + Clone,
    {
        let (completion, control) = self.launch_with(work, decide, options);
        CallHandle::new(completion, control)
    }

    pub fn submit_with_async<T, E, D>(
        &self,
        work: Work<T, E>,
        decide: D,
        options: CallOptions,
    ) -> AsyncCallHandle<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        D: Decide<T, E> + Clone,
    {
        let (completion, control) = self.launch_with(work, decide, options);
        AsyncCallHandle::new(completion, control)
    }

    /// Run `work` to its outcome, blocking the calling thread.
    pub fn call<T, E, D>(&self, work: Work<T, E>, decide: D) -> Result<T, CallError<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
        D: Decide<T, E>,
    {
        self.submit(work, decide).get()
    }

    pub fn call_with<T, E, D>(
        &self,
        work: Work<T, E>,
        decide: D,
        options: CallOptions,
    ) -> Result<T, CallError<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
        D: Decide<T, E> + Clone,
    {
        self.submit_with(work, decide, options).get()
    }

    /// Fire-and-forget. A failed outcome is logged at WARN.
    pub fn execute<T, E, D>(&self, work: Work<T, E>, decide: D)
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        D: Decide<T, E>,
    {
        self.detach(work, decide, None);
    }

    /// Fire-and-forget, also sending the outcome to `completions`.
    pub fn execute_into<T, E, D>(
        &self,
        work: Work<T, E>,
        decide: D,
        completions: UnboundedSender<Result<T, CallError<E>>>,
    ) where
        T: Send + 'static,
        E: Display + Send + 'static,
        D: Decide<T, E>,
    {
        self.detach(work, decide, Some(completions));
    }

    /// Retries currently waiting in the delay queue.
    pub fn pending_retries(&self) -> usize {
        self.owner.core.queue.len()
    }

    pub fn is_closing(&self) -> bool {
        self.owner.core.is_closing()
    }

    /// Stop accepting retries and signal the manager thread without waiting for it.
    ///
    /// Returns the number of queued retries that were abandoned.
    pub fn initiate_close(&self) -> usize {
        self.owner.core.initiate_close()
    }

    /// [`initiate_close`](Self::initiate_close), then wait for the manager thread to exit.
    pub fn close(&self) -> Result<(), CloseError> {
        self.owner.core.initiate_close();
        self.owner.core.manager.join()
    }

    fn launch<T, E, D>(
        &self,
        work: Work<T, E>,
        decide: D,
        deadline: Option<Instant>,
    ) -> (Arc<Completion<T, E>>, Arc<dyn Cancel>)
    where
        T: Send + 'static,
        E: Send + 'static,
        D: Decide<T, E>,
    {
        let completion = Completion::new();
        let sink: Arc<dyn Finish<T, E>> = completion.clone();
        let attempt = Attempt::new(self.core(), work, decide, deadline, sink);
        attempt.start();
        let control: Arc<dyn Cancel> = attempt;
        (completion, control)
    }

    fn launch_with<T, E, D>(
        &self,
        work: Work<T, E>,
        decide: D,
        options: CallOptions,
    ) -> (Arc<Completion<T, E>>, Arc<dyn Cancel>)
    where
        T: Send + 'static,
        E: Send + 'static,
        D: Decide<T, E> + Clone,
    {
        let core = self.core();
        let deadline = options.resolve_deadline(core.clock.as_ref());
        if options.hedges == 0 {
            return self.launch(work, decide, deadline);
        }

        let completion = Completion::new();
        let group = HedgeGroup::new(Arc::clone(&completion), Arc::clone(&core.events));
        let members: Vec<_> = (0..=options.hedges)
            .map(|index| {
                let sink = group.slot(index);
                Attempt::new(Arc::clone(&core), work.clone(), decide.clone(), deadline, sink)
            })
            .collect();
        group.bind(members.iter().map(|m| Arc::clone(m) as Arc<dyn Cancel>).collect());

        for (index, member) in members.iter().enumerate() {
            let delay = if index == 0 { Duration::ZERO } else { options.hedge_delay };
            tracing::debug!(attempt = member.id(), index, ?delay, "hedge launched");
            core.events.emit(&ExecutorEvent::HedgeLaunched { index, delay });
            member.start_after(delay);
        }
        let control: Arc<dyn Cancel> = group;
        (completion, control)
    }

    fn detach<T, E, D>(
        &self,
        work: Work<T, E>,
        decide: D,
        completions: Option<UnboundedSender<Result<T, CallError<E>>>>,
    ) where
        T: Send + 'static,
        E: Display + Send + 'static,
        D: Decide<T, E>,
    {
        let sink: Arc<dyn Finish<T, E>> = Arc::new(Detached { completions });
        Attempt::new(self.core(), work, decide, None, sink).start();
    }
}

/// Outcome receiver for fire-and-forget calls.
struct Detached<T, E> {
    completions: Option<UnboundedSender<Result<T, CallError<E>>>>,
}

impl<T: Send, E: Display + Send> Finish<T, E> for Detached<T, E> {
    fn finish(&self, outcome: Result<T, CallError<E>>) -> bool {
        if let Err(error) = &outcome {
            tracing::warn!(error = %error, "detached call failed");
        }
        if let Some(completions) = &self.completions {
            if completions.send(outcome).is_err() {
                tracing::debug!("completion queue closed; outcome dropped");
            }
        }
        true
    }
}
