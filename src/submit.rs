//! Work-submission surfaces: where attempts actually run.
//!
//! The executor never runs work itself. Every first dispatch and every retry is handed to a
//! [`WorkSubmitter`] as a boxed job. Implementations must be thread-safe; jobs may be submitted
//! from caller threads, worker threads, and the retry manager thread concurrently.

use crate::error::SubmitError;
use std::cell::RefCell;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A unit of execution handed to a submitter.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// "Run this now" on some worker.
pub trait WorkSubmitter: Send + Sync + std::fmt::Debug {
    fn submit(&self, job: Job) -> Result<(), SubmitError>;
}

impl<S: WorkSubmitter + ?Sized> WorkSubmitter for Arc<S> {
    fn submit(&self, job: Job) -> Result<(), SubmitError> {
        (**self).submit(job)
    }
}

/// Runs jobs on a tokio runtime's blocking thread pool.
#[derive(Debug, Clone)]
pub struct TokioBlocking {
    handle: tokio::runtime::Handle,
}

impl TokioBlocking {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Capture the runtime the caller is running inside.
    pub fn current() -> Result<Self, SubmitError> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|_| SubmitError::NoRuntime)
    }
}

impl WorkSubmitter for TokioBlocking {
    fn submit(&self, job: Job) -> Result<(), SubmitError> {
        // Detached: completion is reported through the attempt, not the JoinHandle.
        drop(self.handle.spawn_blocking(job));
        Ok(())
    }
}

/// Spawns one named OS thread per job. For callers without a runtime.
#[derive(Debug, Clone)]
pub struct ThreadPerJob {
    name: String,
}

impl ThreadPerJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for ThreadPerJob {
    fn default() -> Self {
        Self::new("hedgerow-worker")
    }
}

impl WorkSubmitter for ThreadPerJob {
    fn submit(&self, job: Job) -> Result<(), SubmitError> {
        std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(job)
            .map(drop)
            .map_err(SubmitError::Spawn)
    }
}

/// Caps in-flight jobs of an inner submitter; rejects instead of queueing when full.
///
/// A job that submits through the same `Bounded` while it runs hands its slot over to the job it
/// submits, so a job finishing with an immediate follow-up never competes with itself. The first
/// such submission takes the slot; any further one from the same job needs a free slot.
#[derive(Debug, Clone)]
pub struct Bounded<S> {
    inner: S,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl<S: WorkSubmitter> Bounded<S> {
    pub fn new(inner: S, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.clamp(1, Semaphore::MAX_PERMITS);
        Self { inner, permits: Arc::new(Semaphore::new(max_in_flight)), max_in_flight }
    }

    pub fn in_flight(&self) -> usize {
        self.max_in_flight.saturating_sub(self.permits.available_permits())
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}

impl<S: WorkSubmitter> WorkSubmitter for Bounded<S> {
    fn submit(&self, job: Job) -> Result<(), SubmitError> {
        let permit = match take_held(&self.permits) {
            Some(permit) => permit,
            None => {
                let in_flight = self.in_flight();
                Arc::clone(&self.permits)
                    .try_acquire_owned()
                    .map_err(|_| SubmitError::Saturated { in_flight, max: self.max_in_flight })?
            }
        };
        let permits = Arc::clone(&self.permits);
        self.inner.submit(Box::new(move || {
            let previous = HELD.with(|held| held.replace(Some(Held { permits, permit })));
            let _restore = Restore { previous };
            job();
        }))
    }
}

/// The slot owned by the job running on this thread.
struct Held {
    permits: Arc<Semaphore>,
    permit: OwnedSemaphorePermit,
}

thread_local! {
    static HELD: RefCell<Option<Held>> = const { RefCell::new(None) };
}

/// Take the current job's slot if it belongs to `permits`.
fn take_held(permits: &Arc<Semaphore>) -> Option<OwnedSemaphorePermit> {
    HELD.try_with(|held| {
        let mut held = held.borrow_mut();
        let ours = matches!(held.as_ref(), Some(current) if Arc::ptr_eq(&current.permits, permits));
        if ours {
            held.take().map(|h| h.permit)
        } else {
            None
        }
    })
    .ok()
    .flatten()
}

/// Releases a slot the job did not hand over and reinstates the enclosing one, also on unwind.
struct Restore {
    previous: Option<Held>,
}

impl Drop for Restore {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = HELD.try_with(move |held| drop(held.replace(previous)));
    }
}
