//! Optimistic replication: an authoritative value plus a queue of local
//! messages the authority has not confirmed yet.
//!
//! Consumers only ever read the *projection*: the authoritative value with
//! every pending message replayed on top, in send order. Local messages take
//! effect on the projection immediately. Server batches are folded into the
//! authoritative value one message at a time; a message that acknowledges
//! the head of the pending queue pops it.
//!
//! Matching only ever looks at the queue head. That relies on the server
//! echoing one client's own messages back to it in submission order. A
//! message that fails to match is treated as foreign and the queue is left
//! alone, so a genuine client/server disagreement about message identity is
//! not detected here: the stale head simply stays pending (and eventually
//! trips the offline signal).

use core_events::{NonEmpty, Timestamp};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, trace};

/// A value that can be replicated through a [`LocalModel`].
///
/// `apply` must be deterministic: the same message applied to equal values
/// yields equal values, with no hidden inputs.
pub trait Replica: Clone {
    type Msg: Clone + fmt::Debug;

    fn apply(&mut self, time: Timestamp, msg: &Self::Msg);

    /// Whether `incoming` from the authority confirms the queued `pending`.
    fn acknowledges(pending: &Self::Msg, incoming: &Self::Msg) -> bool;
}

/// Outcome of folding one server batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciled {
    /// Messages that popped the pending head.
    pub acknowledged: usize,
    /// Batch positions of messages applied as foreign.
    pub foreign: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct LocalModel<S: Replica> {
    authoritative: S,
    pending: VecDeque<(Timestamp, S::Msg)>,
    projection: S,
}

impl<S: Replica> LocalModel<S> {
    pub fn new(state: S) -> Self {
        Self {
            projection: state.clone(),
            authoritative: state,
            pending: VecDeque::new(),
        }
    }

    /// Queue `msg` and apply it to the projection right away.
    pub fn apply_local(&mut self, time: Timestamp, msg: S::Msg) {
        self.projection.apply(time, &msg);
        self.pending.push_back((time, msg));
        trace!(target: "model.local", pending = self.pending.len(), "apply_local");
    }

    /// Fold a server batch into the authoritative value, then rebuild the
    /// projection from it and whatever is still pending.
    pub fn apply_from_server(&mut self, time: Timestamp, msgs: NonEmpty<S::Msg>) -> Reconciled {
        let mut report = Reconciled::default();
        for (i, msg) in msgs.into_iter().enumerate() {
            let is_ack = self
                .pending
                .front()
                .is_some_and(|(_, head)| S::acknowledges(head, &msg));
            if is_ack {
                self.pending.pop_front();
                report.acknowledged += 1;
            } else {
                report.foreign.push(i);
            }
            self.authoritative.apply(time, &msg);
        }
        self.projection = self.replay();
        debug!(
            target: "model.local",
            acknowledged = report.acknowledged,
            foreign = report.foreign.len(),
            pending = self.pending.len(),
            "apply_from_server"
        );
        report
    }

    /// Authoritative value with every pending message applied in FIFO order.
    pub fn replay(&self) -> S {
        let mut state = self.authoritative.clone();
        for (time, msg) in &self.pending {
            state.apply(*time, msg);
        }
        state
    }

    /// Replace the authoritative value wholesale (reconnect) and drop every
    /// pending message.
    pub fn reset(&mut self, state: S) {
        let dropped = self.pending.len();
        self.pending.clear();
        self.projection = state.clone();
        self.authoritative = state;
        debug!(target: "model.local", dropped, "reset");
    }

    pub fn projection(&self) -> &S {
        &self.projection
    }

    pub fn authoritative(&self) -> &S {
        &self.authoritative
    }

    pub fn pending(&self) -> impl Iterator<Item = &(Timestamp, S::Msg)> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Send time of the oldest unacknowledged message.
    pub fn oldest_pending(&self) -> Option<Timestamp> {
        self.pending.front().map(|(time, _)| *time)
    }
}
