//! Structured events emitted by the executor.
//!
//! Events are produced on worker threads and on the retry manager thread, so sinks are plain
//! synchronous callbacks. Delivery is best-effort: a sink cannot fail a call.
//!
//! # Event Types
//!
//! - **Manager**: `ManagerStarted`, `ManagerStopped`
//! - **Attempts**: `RetryScheduled`, `Redispatched`, `DeadlineExceeded`, `Cancelled`, `Completed`
//! - **Hedging**: `HedgeLaunched`, `HedgeWon`
//!
//! ```rust
//! use hedgerow::telemetry::{EventSink, ExecutorEvent, MemorySink};
//! use std::time::Duration;
//!
//! let sink = MemorySink::new();
//! sink.emit(&ExecutorEvent::RetryScheduled { attempt: 1, run: 1, delay: Duration::from_millis(5) });
//! assert_eq!(sink.len(), 1);
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Something that happened inside the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorEvent {
    /// The retry manager thread was spawned.
    ManagerStarted,
    /// The retry manager exited; `abandoned` retries were still queued.
    ManagerStopped { abandoned: usize },
    /// An attempt asked for a retry and it was queued (or dispatched, for zero delay).
    RetryScheduled { attempt: u64, run: usize, delay: Duration },
    /// A queued entry came due and was handed back to the work-submission surface.
    Redispatched { attempt: u64 },
    /// A retry was refused because the call's deadline had passed.
    DeadlineExceeded { attempt: u64, overdue: Duration },
    /// An attempt was cancelled; `removed_pending` is true if a queued retry was pulled.
    Cancelled { attempt: u64, removed_pending: bool },
    /// An attempt reached a terminal outcome after `runs` executions.
    Completed { attempt: u64, runs: usize, success: bool },
    /// A hedge member was launched, immediately or after `delay`.
    HedgeLaunched { index: usize, delay: Duration },
    /// A hedge member committed the group's result.
    HedgeWon { index: usize, members: usize },
}

impl fmt::Display for ExecutorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorEvent::ManagerStarted => write!(f, "Manager::Started"),
            ExecutorEvent::ManagerStopped { abandoned } => {
                write!(f, "Manager::Stopped(abandoned={})", abandoned)
            }
            ExecutorEvent::RetryScheduled { attempt, run, delay } => {
                write!(f, "Attempt#{}::RetryScheduled(run={}, delay={:?})", attempt, run, delay)
            }
            ExecutorEvent::Redispatched { attempt } => write!(f, "Attempt#{}::Redispatched", attempt),
            ExecutorEvent::DeadlineExceeded { attempt, overdue } => {
                write!(f, "Attempt#{}::DeadlineExceeded(overdue={:?})", attempt, overdue)
            }
            ExecutorEvent::Cancelled { attempt, removed_pending } => {
                write!(f, "Attempt#{}::Cancelled(removed_pending={})", attempt, removed_pending)
            }
            ExecutorEvent::Completed { attempt, runs, success } => {
                write!(f, "Attempt#{}::Completed(runs={}, success={})", attempt, runs, success)
            }
            ExecutorEvent::HedgeLaunched { index, delay } => {
                write!(f, "Hedge::Launched(#{}, delay={:?})", index, delay)
            }
            ExecutorEvent::HedgeWon { index, members } => {
                write!(f, "Hedge::Won(#{} of {})", index, members)
            }
        }
    }
}

/// Consumer of executor events.
pub trait EventSink: Send + Sync + fmt::Debug {
    fn emit(&self, event: &ExecutorEvent);
}

/// Discards every event.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &ExecutorEvent) {}
}

/// Logs events through `tracing` at INFO level.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &ExecutorEvent) {
        tracing::info!(event = %event, "executor_event");
    }
}

/// Keeps events in memory, evicting the oldest beyond its capacity.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<ExecutorEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Bounded sink (default cap: 10,000).
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot of the stored events.
    pub fn events(&self) -> Vec<ExecutorEvent> {
        self.events.lock().clone()
    }

    /// Count events matching `pred`.
    pub fn count(&self, pred: impl Fn(&ExecutorEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(*e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events dropped to honor the capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &ExecutorEvent) {
        let mut guard = self.events.lock();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_compact() {
        let e = ExecutorEvent::RetryScheduled { attempt: 3, run: 2, delay: Duration::from_millis(5) };
        assert_eq!(e.to_string(), "Attempt#3::RetryScheduled(run=2, delay=5ms)");
        assert_eq!(ExecutorEvent::HedgeWon { index: 1, members: 3 }.to_string(), "Hedge::Won(#1 of 3)");
        assert_eq!(ExecutorEvent::ManagerStarted.to_string(), "Manager::Started");
    }

    #[test]
    fn memory_sink_evicts_oldest() {
        let sink = MemorySink::with_capacity(2);
        for attempt in 0..3 {
            sink.emit(&ExecutorEvent::Redispatched { attempt });
        }
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.evicted(), 1);
        assert_eq!(sink.events()[0], ExecutorEvent::Redispatched { attempt: 1 });
    }

    #[test]
    fn memory_sink_counts_and_clears() {
        let sink = MemorySink::new();
        sink.emit(&ExecutorEvent::ManagerStarted);
        sink.emit(&ExecutorEvent::Redispatched { attempt: 7 });
        assert_eq!(sink.count(|e| matches!(e, ExecutorEvent::Redispatched { .. })), 1);
        sink.clear();
        assert!(sink.is_empty());
        assert_eq!(sink.capacity(), 10_000);
    }

    #[test]
    fn log_and_null_sinks_accept_events() {
        LogSink.emit(&ExecutorEvent::ManagerStopped { abandoned: 0 });
        NullSink.emit(&ExecutorEvent::ManagerStarted);
    }
}
