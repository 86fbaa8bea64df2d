//! Background retry manager: one thread per executor that drains the delay queue.
//!
//! The thread is spawned lazily by the first retry that needs a non-zero delay. It blocks in
//! [`DelayQueue::pop_due`] for at most `idle_wait` at a time and hands every due entry back to its
//! attempt, which resubmits the work. The manager never runs work itself.
//!
//! Stopping closes the queue. Entries still queued at that point are abandoned: their handles stay
//! pending.

use crate::delay_queue::{DelayQueue, Popped};
use crate::error::{panic_message, CloseError, SubmitError};
use crate::telemetry::{EventSink, ExecutorEvent};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A queued retry, handed back to its attempt when due.
pub(crate) trait Redispatch: Send + Sync {
    fn attempt_id(&self) -> u64;

    /// Resubmit the attempt's current work.
    fn redispatch(self: Arc<Self>);
}

pub(crate) type RetryQueue = DelayQueue<Arc<dyn Redispatch>>;

enum Worker {
    Idle,
    Running(JoinHandle<()>),
    Stopped,
}

pub(crate) struct RetryManager {
    queue: Arc<RetryQueue>,
    worker: Mutex<Worker>,
    idle_wait: Duration,
    thread_name: String,
    events: Arc<dyn EventSink>,
}

impl RetryManager {
    pub(crate) fn new(
        queue: Arc<RetryQueue>,
        idle_wait: Duration,
        thread_name: String,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self { queue, worker: Mutex::new(Worker::Idle), idle_wait, thread_name, events }
    }

    /// Spawn the manager thread unless it already runs or was stopped.
    ///
    /// After a stop this is a no-op; the closed queue refuses the push that follows.
    pub(crate) fn ensure_started(&self) -> Result<(), SubmitError> {
        let mut worker = self.worker.lock();
        if !matches!(*worker, Worker::Idle) {
            return Ok(());
        }
        let queue = Arc::clone(&self.queue);
        let events = Arc::clone(&self.events);
        let idle_wait = self.idle_wait;
        let handle = std::thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || drain(&queue, idle_wait, events.as_ref()))
            .map_err(SubmitError::Spawn)?;
        *worker = Worker::Running(handle);
        drop(worker);
        tracing::debug!(thread = %self.thread_name, "retry manager started");
        self.events.emit(&ExecutorEvent::ManagerStarted);
        Ok(())
    }

    pub(crate) fn is_running(&self) -> bool {
        matches!(*self.worker.lock(), Worker::Running(_))
    }

    /// Close the queue and wake the thread. Returns the number of abandoned retries.
    pub(crate) fn stop(&self) -> usize {
        let first_stop = {
            let mut worker = self.worker.lock();
            match *worker {
                Worker::Idle => {
                    *worker = Worker::Stopped;
                    true
                }
                Worker::Running(_) => !self.queue.is_closed(),
                Worker::Stopped => false,
            }
        };
        // Dropped outside every lock: abandoned attempts may hold the last executor reference.
        let abandoned = self.queue.close();
        let count = abandoned.len();
        drop(abandoned);
        if first_stop {
            if count > 0 {
                tracing::warn!(abandoned = count, "retry manager stopped with pending retries");
            }
            self.events.emit(&ExecutorEvent::ManagerStopped { abandoned: count });
        }
        count
    }

    /// Wait for the manager thread to exit. Call after [`stop`](Self::stop).
    pub(crate) fn join(&self) -> Result<(), CloseError> {
        let handle = match std::mem::replace(&mut *self.worker.lock(), Worker::Stopped) {
            Worker::Running(handle) => handle,
            Worker::Idle | Worker::Stopped => return Ok(()),
        };
        if handle.thread().id() == std::thread::current().id() {
            return Ok(());
        }
        handle.join().map_err(|payload| CloseError::ManagerPanicked(panic_message(&*payload)))
    }
}

impl std::fmt::Debug for RetryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryManager")
            .field("running", &self.is_running())
            .field("pending", &self.queue.len())
            .field("idle_wait", &self.idle_wait)
            .field("thread_name", &self.thread_name)
            .finish()
    }
}

fn drain(queue: &RetryQueue, idle_wait: Duration, events: &dyn EventSink) {
    loop {
        match queue.pop_due(idle_wait) {
            Popped::Due(task) => {
                let attempt = task.attempt_id();
                events.emit(&ExecutorEvent::Redispatched { attempt });
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.redispatch())) {
                    tracing::error!(
                        attempt,
                        panic = %panic_message(&*payload),
                        "retry redispatch panicked"
                    );
                }
            }
            Popped::Idle => continue,
            Popped::Closed => break,
        }
    }
    tracing::debug!("retry manager exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MonotonicClock};
    use crate::telemetry::MemorySink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    struct Probe {
        id: u64,
        fired: mpsc::Sender<u64>,
    }

    impl Redispatch for Probe {
        fn attempt_id(&self) -> u64 {
            self.id
        }

        fn redispatch(self: Arc<Self>) {
            let _ = self.fired.send(self.id);
        }
    }

    struct Exploding(AtomicUsize);

    impl Redispatch for Exploding {
        fn attempt_id(&self) -> u64 {
            99
        }

        fn redispatch(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
            panic!("boom");
        }
    }

    fn manager(sink: &MemorySink) -> (Arc<RetryQueue>, RetryManager) {
        let queue = Arc::new(RetryQueue::new(Arc::new(MonotonicClock) as Arc<dyn Clock>));
        let manager = RetryManager::new(
            Arc::clone(&queue),
            Duration::from_millis(20),
            "unit-retry".into(),
            Arc::new(sink.clone()),
        );
        (queue, manager)
    }

    #[test]
    fn redispatches_due_entries_in_deadline_order() {
        let sink = MemorySink::new();
        let (queue, manager) = manager(&sink);
        let (tx, rx) = mpsc::channel();
        manager.ensure_started().unwrap();
        manager.ensure_started().unwrap();
        queue.push_after(Duration::from_millis(30), Arc::new(Probe { id: 2, fired: tx.clone() })).unwrap();
        queue.push_after(Duration::from_millis(10), Arc::new(Probe { id: 1, fired: tx })).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        assert_eq!(manager.stop(), 0);
        manager.join().unwrap();
        assert_eq!(sink.count(|e| matches!(e, ExecutorEvent::ManagerStarted)), 1);
        assert_eq!(sink.count(|e| matches!(e, ExecutorEvent::Redispatched { .. })), 2);
    }

    #[test]
    fn stop_abandons_pending_entries_once() {
        let sink = MemorySink::new();
        let (queue, manager) = manager(&sink);
        let (tx, rx) = mpsc::channel();
        manager.ensure_started().unwrap();
        queue.push_after(Duration::from_secs(60), Arc::new(Probe { id: 1, fired: tx })).unwrap();

        assert_eq!(manager.stop(), 1);
        assert_eq!(manager.stop(), 0);
        manager.join().unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
        assert_eq!(sink.events().last(), Some(&ExecutorEvent::ManagerStopped { abandoned: 1 }));
        assert!(!manager.is_running());
    }

    #[test]
    fn never_starts_after_stop() {
        let sink = MemorySink::new();
        let (_queue, manager) = manager(&sink);
        manager.stop();
        manager.ensure_started().unwrap();
        assert!(!manager.is_running());
        assert_eq!(sink.count(|e| matches!(e, ExecutorEvent::ManagerStarted)), 0);
    }

    #[test]
    fn survives_a_panicking_redispatch() {
        let sink = MemorySink::new();
        let (queue, manager) = manager(&sink);
        let (tx, rx) = mpsc::channel();
        let exploding = Arc::new(Exploding(AtomicUsize::new(0)));
        manager.ensure_started().unwrap();
        queue.push_after(Duration::ZERO, exploding.clone()).unwrap();
        queue.push_after(Duration::from_millis(5), Arc::new(Probe { id: 7, fired: tx })).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        assert_eq!(exploding.0.load(Ordering::SeqCst), 1);
        manager.stop();
        manager.join().unwrap();
    }
}
