//! Deadline-ordered queue of pending retries.
//!
//! Entries are ordered by absolute deadline, ties broken by a monotonically increasing sequence
//! number so equal deadlines fire in submission order. Any entry can be removed by its
//! [`EntryKey`], not just the head, which is how cancellation pulls a pending retry before it
//! fires.
//!
//! Invariants:
//! - `pop_due` never returns an entry before its deadline (per the queue's clock).
//! - A removed entry is never returned by `pop_due`.
//! - No lock is held while the caller acts on a popped payload.

use crate::clock::Clock;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identity of one queued entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryKey {
    deadline: Instant,
    seq: u64,
}

impl EntryKey {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Ord for EntryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline.cmp(&other.deadline).then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for EntryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Entry<P> {
    key: EntryKey,
    payload: P,
}

impl<P> PartialEq for Entry<P> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<P> Eq for Entry<P> {}

impl<P> Ord for Entry<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, the earliest key must sit on top.
        other.key.cmp(&self.key)
    }
}

impl<P> PartialOrd for Entry<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct State<P> {
    heap: BinaryHeap<Entry<P>>,
    next_seq: u64,
    closed: bool,
}

/// Result of a bounded wait on the queue.
#[derive(Debug)]
pub enum Popped<P> {
    /// An entry reached its deadline.
    Due(P),
    /// The wait bound elapsed with nothing due.
    Idle,
    /// The queue was closed.
    Closed,
}

/// The queue refused a push because it was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("delay queue is closed")]
pub struct QueueClosed;

/// Thread-safe deadline-ordered queue.
pub struct DelayQueue<P> {
    state: Mutex<State<P>>,
    ready: Condvar,
    clock: Arc<dyn Clock>,
}

impl<P> std::fmt::Debug for DelayQueue<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DelayQueue")
            .field("len", &state.heap.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<P> DelayQueue<P> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State { heap: BinaryHeap::new(), next_seq: 0, closed: false }),
            ready: Condvar::new(),
            clock,
        }
    }

    /// Queue `payload` to become due at `deadline`. O(log n).
    pub fn push(&self, deadline: Instant, payload: P) -> Result<EntryKey, QueueClosed> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(QueueClosed);
        }
        let key = EntryKey { deadline, seq: state.next_seq };
        state.next_seq += 1;
        let becomes_head = state.heap.peek().map_or(true, |head| key < head.key);
        state.heap.push(Entry { key, payload });
        drop(state);
        if becomes_head {
            self.ready.notify_one();
        }
        Ok(key)
    }

    /// Queue `payload` to become due `delay` from now.
    pub fn push_after(&self, delay: Duration, payload: P) -> Result<EntryKey, QueueClosed> {
        self.push(self.clock.deadline_after(delay), payload)
    }

    /// Remove the entry identified by `key`, wherever it sits. O(n).
    pub fn remove(&self, key: &EntryKey) -> Option<P> {
        let mut state = self.state.lock();
        let mut entries = std::mem::take(&mut state.heap).into_vec();
        let position = entries.iter().position(|e| e.key == *key);
        let removed = position.map(|i| entries.swap_remove(i));
        state.heap = BinaryHeap::from(entries);
        removed.map(|e| e.payload)
    }

    /// Block until the earliest entry is due, `max_wait` elapses, or the queue closes.
    pub fn pop_due(&self, max_wait: Duration) -> Popped<P> {
        let give_up = Instant::now().checked_add(max_wait);
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Popped::Closed;
            }
            let now = Instant::now();
            if give_up.map_or(false, |limit| now >= limit) {
                return Popped::Idle;
            }
            let until_give_up = give_up.map_or(max_wait, |limit| limit - now);
            let wait = match state.heap.peek() {
                Some(head) => {
                    let remaining = self.clock.time_until(head.key.deadline);
                    if remaining.is_zero() {
                        if let Some(entry) = state.heap.pop() {
                            return Popped::Due(entry.payload);
                        }
                        continue;
                    }
                    remaining.min(until_give_up)
                }
                None => until_give_up,
            };
            let _ = self.ready.wait_for(&mut state, wait);
        }
    }

    /// Close the queue: wake every waiter and refuse further pushes.
    ///
    /// Entries still queued are drained and handed back, earliest first; they never fire.
    pub fn close(&self) -> Vec<P> {
        let mut state = self.state.lock();
        state.closed = true;
        let abandoned = std::mem::take(&mut state.heap).into_sorted_vec();
        drop(state);
        self.ready.notify_all();
        // into_sorted_vec is ascending by Ord, which is reversed for the heap.
        abandoned.into_iter().rev().map(|e| e.payload).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }

    /// Earliest queued deadline, if any.
    pub fn peek_deadline(&self) -> Option<Instant> {
        self.state.lock().heap.peek().map(|e| e.key.deadline)
    }
}
