//! First-commit-wins coordination of hedged attempts.
//!
//! A hedged call runs `hedges + 1` independent attempts of the same work, each with its own copy
//! of the decision function. Member 0 starts immediately; the others start after the hedge delay
//! (a fixed delay per member, not escalating). The first member to reach a final outcome claims
//! the group with a compare-and-set, cancels every other member, then publishes its outcome.
//! Outcomes of later members are dropped.
//!
//! A member that ends as `Rejected` or `Shutdown` never got an answer from its work, so it
//! withdraws instead of claiming the group. Only when every member withdrew does the last one
//! publish its error.
//!
//! Invariants:
//! - At most one member ever wins; the winner slot is assigned by CAS.
//! - The group's completion is filled only by the winner.
//! - A withdrawn member wins only if no member is left that could still produce an outcome.
//! - Cancelling the group cancels every member.

use crate::attempt::{AttemptPhase, Cancel};
use crate::completion::{Completion, Finish};
use crate::error::CallError;
use crate::telemetry::{EventSink, ExecutorEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

const NO_WINNER: usize = usize::MAX;

pub(crate) struct HedgeGroup<T, E> {
    completion: Arc<Completion<T, E>>,
    winner: AtomicUsize,
    withdrawn: AtomicUsize,
    members: OnceLock<Vec<Arc<dyn Cancel>>>,
    events: Arc<dyn EventSink>,
}

impl<T: Send + 'static, E: Send + 'static> HedgeGroup<T, E> {
    pub(crate) fn new(completion: Arc<Completion<T, E>>, events: Arc<dyn EventSink>) -> Arc<Self> {
        Arc::new(Self {
            completion,
            winner: AtomicUsize::new(NO_WINNER),
            withdrawn: AtomicUsize::new(0),
            members: OnceLock::new(),
            events,
        })
    }

    /// Receiver for member `index`'s outcome.
    pub(crate) fn slot(self: &Arc<Self>, index: usize) -> Arc<dyn Finish<T, E>> {
        Arc::new(HedgeSlot { group: Arc::clone(self), index })
    }

    /// Attach the members. Must happen before any member starts; later calls are ignored.
    pub(crate) fn bind(&self, members: Vec<Arc<dyn Cancel>>) {
        if self.members.set(members).is_err() {
            tracing::warn!("hedge group members bound twice");
        }
    }

    pub(crate) fn winner(&self) -> Option<usize> {
        match self.winner.load(Ordering::Acquire) {
            NO_WINNER => None,
            index => Some(index),
        }
    }

    fn members(&self) -> &[Arc<dyn Cancel>] {
        self.members.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Route member `index`'s outcome: withdraw it, commit it, or drop it behind the winner.
    fn settle(&self, index: usize, outcome: Result<T, CallError<E>>) -> bool {
        let withdrawing = matches!(outcome, Err(CallError::Rejected { .. } | CallError::Shutdown { .. }));
        if withdrawing {
            let withdrawn = self.withdrawn.fetch_add(1, Ordering::AcqRel) + 1;
            if withdrawn < self.members().len() {
                tracing::debug!(index, withdrawn, "hedge member withdrew");
                return false;
            }
        }
        let committed = self.commit(index, outcome);
        if !committed {
            tracing::trace!(index, winner = ?self.winner(), "hedge outcome dropped");
        }
        committed
    }

    fn commit(&self, index: usize, outcome: Result<T, CallError<E>>) -> bool {
        if self
            .winner
            .compare_exchange(NO_WINNER, index, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let members = self.members();
        tracing::debug!(
            winner = index,
            members = members.len(),
            success = outcome.is_ok(),
            "hedge committed"
        );
        self.events.emit(&ExecutorEvent::HedgeWon { index, members: members.len() });
        for (i, member) in members.iter().enumerate() {
            if i != index {
                member.cancel();
            }
        }
        // Published after the losers are cancelled, so a woken caller sees settled phases.
        self.completion.finish(outcome);
        true
    }
}

impl<T: Send + 'static, E: Send + 'static> Cancel for HedgeGroup<T, E> {
    fn cancel(&self) -> bool {
        // Every member must be visited, so no short-circuit.
        self.members().iter().fold(false, |any, member| member.cancel() | any)
    }

    fn is_cancelled(&self) -> bool {
        let members = self.members();
        !members.is_empty() && members.iter().all(|m| m.is_cancelled())
    }

    fn phases(&self) -> Vec<AttemptPhase> {
        self.members().iter().flat_map(|m| m.phases()).collect()
    }
}

struct HedgeSlot<T, E> {
    group: Arc<HedgeGroup<T, E>>,
    index: usize,
}

impl<T: Send + 'static, E: Send + 'static> Finish<T, E> for HedgeSlot<T, E> {
    fn finish(&self, outcome: Result<T, CallError<E>>) -> bool {
        self.group.settle(self.index, outcome)
    }
}
