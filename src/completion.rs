//! Completion slot and the caller-facing handles.
//!
//! A [`Completion`] owns the single result of a logical call. Whoever finishes first (the attempt
//! reaching a terminal decision, a cancellation, a hedge winner) fills it; every later finish is
//! refused. Blocked threads are woken through a condition variable and async tasks through their
//! registered wakers.

use crate::attempt::{AttemptPhase, Cancel};
use crate::error::CallError;
use futures::future::FusedFuture;
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Receiver of a call's terminal outcome.
pub(crate) trait Finish<T, E>: Send + Sync {
    /// Deliver the outcome; false if an outcome was already delivered.
    fn finish(&self, outcome: Result<T, CallError<E>>) -> bool;
}

enum Slot<T, E> {
    Pending(Vec<Waker>),
    Ready(Result<T, CallError<E>>),
    Taken,
}

/// Single-assignment result slot.
pub(crate) struct Completion<T, E> {
    slot: Mutex<Slot<T, E>>,
    done: Condvar,
}

impl<T, E> Completion<T, E> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self { slot: Mutex::new(Slot::Pending(Vec::new())), done: Condvar::new() })
    }

    pub(crate) fn is_done(&self) -> bool {
        !matches!(*self.slot.lock(), Slot::Pending(_))
    }

    /// Block until an outcome is available and take it.
    pub(crate) fn wait(&self) -> Result<T, CallError<E>> {
        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Pending(_)) {
            self.done.wait(&mut slot);
        }
        take(&mut slot)
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, CallError<E>>> {
        let mut slot = self.slot.lock();
        let limit = Instant::now().checked_add(timeout);
        while matches!(*slot, Slot::Pending(_)) {
            match limit {
                Some(limit) => {
                    if self.done.wait_until(&mut slot, limit).timed_out()
                        && matches!(*slot, Slot::Pending(_))
                    {
                        return None;
                    }
                }
                None => self.done.wait(&mut slot),
            }
        }
        Some(take(&mut slot))
    }

    /// Block up to `timeout` for completion without taking the outcome.
    pub(crate) fn wait_for(&self, timeout: Duration) -> bool {
        let mut slot = self.slot.lock();
        let limit = match Instant::now().checked_add(timeout) {
            Some(limit) => limit,
            None => {
                while matches!(*slot, Slot::Pending(_)) {
                    self.done.wait(&mut slot);
                }
                return true;
            }
        };
        while matches!(*slot, Slot::Pending(_)) {
            if self.done.wait_until(&mut slot, limit).timed_out() {
                break;
            }
        }
        !matches!(*slot, Slot::Pending(_))
    }

    /// True once the outcome has been handed out.
    pub(crate) fn is_taken(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Taken)
    }

    pub(crate) fn poll_take(&self, cx: &mut Context<'_>) -> Poll<Result<T, CallError<E>>> {
        let mut slot = self.slot.lock();
        match &mut *slot {
            Slot::Pending(wakers) => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
            _ => Poll::Ready(take(&mut slot)),
        }
    }
}

fn take<T, E>(slot: &mut Slot<T, E>) -> Result<T, CallError<E>> {
    match std::mem::replace(slot, Slot::Taken) {
        Slot::Ready(outcome) => outcome,
        Slot::Taken => panic!("call outcome was already taken"),
        Slot::Pending(_) => panic!("call outcome taken before completion"),
    }
}

impl<T: Send, E: Send> Finish<T, E> for Completion<T, E> {
    fn finish(&self, outcome: Result<T, CallError<E>>) -> bool {
        let mut slot = self.slot.lock();
        let wakers = match &mut *slot {
            Slot::Pending(wakers) => std::mem::take(wakers),
            _ => return false,
        };
        *slot = Slot::Ready(outcome);
        drop(slot);
        self.done.notify_all();
        for waker in wakers {
            waker.wake();
        }
        true
    }
}

/// Blocking handle to a submitted call.
///
/// Dropping the handle does not cancel the call.
pub struct CallHandle<T, E> {
    completion: Arc<Completion<T, E>>,
    control: Arc<dyn Cancel>,
}

impl<T, E> CallHandle<T, E> {
    pub(crate) fn new(completion: Arc<Completion<T, E>>, control: Arc<dyn Cancel>) -> Self {
        Self { completion, control }
    }

    /// Block until the call reaches a terminal state.
    pub fn get(self) -> Result<T, CallError<E>> {
        self.completion.wait()
    }

    /// Block at most `timeout`; [`CallError::TimedOut`] if nothing completed.
    ///
    /// The call keeps running after a timed-out wait.
    pub fn get_timeout(self, timeout: Duration) -> Result<T, CallError<E>> {
        self.completion
            .wait_timeout(timeout)
            .unwrap_or(Err(CallError::TimedOut { waited: timeout }))
    }

    /// Wait up to `timeout` for completion, keeping the handle.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.completion.wait_for(timeout)
    }

    /// Request cancellation; false if the call had already finished.
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Phase of every underlying attempt (one entry unless hedged).
    pub fn phases(&self) -> Vec<AttemptPhase> {
        self.control.phases()
    }

    pub fn into_async(self) -> AsyncCallHandle<T, E> {
        AsyncCallHandle { completion: self.completion, control: self.control }
    }
}

impl<T, E> std::fmt::Debug for CallHandle<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("done", &self.is_done())
            .field("phases", &self.phases())
            .finish()
    }
}

/// Awaitable handle to a submitted call.
///
/// Resolves once; polling again after it returned `Ready` panics. Dropping the handle does not
/// cancel the call.
pub struct AsyncCallHandle<T, E> {
    completion: Arc<Completion<T, E>>,
    control: Arc<dyn Cancel>,
}

impl<T, E> AsyncCallHandle<T, E> {
    pub(crate) fn new(completion: Arc<Completion<T, E>>, control: Arc<dyn Cancel>) -> Self {
        Self { completion, control }
    }

    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    pub fn phases(&self) -> Vec<AttemptPhase> {
        self.control.phases()
    }

    pub fn into_blocking(self) -> CallHandle<T, E> {
        CallHandle { completion: self.completion, control: self.control }
    }
}

impl<T, E> Future for AsyncCallHandle<T, E> {
    type Output = Result<T, CallError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.completion.poll_take(cx)
    }
}

impl<T, E> FusedFuture for AsyncCallHandle<T, E> {
    fn is_terminated(&self) -> bool {
        self.completion.is_taken()
    }
}

impl<T, E> std::fmt::Debug for AsyncCallHandle<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncCallHandle")
            .field("done", &self.is_done())
            .field("phases", &self.phases())
            .finish()
    }
}
