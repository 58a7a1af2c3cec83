//! Runtime mutations as a deterministic action queue.
//!
//! Anything that changes the simulation's topology or discontinuously
//! changes state (attach, detach, re-initialization, integrator switches,
//! loop transfers, time-rate changes) is queued with a driver time and
//! applied only at safe points (loop boundaries). Actions due at the same
//! instant apply in insertion order, so replays are reproducible.

use serde::{Deserialize, Serialize};

use crate::config::InitialStateConfig;
use crate::integ::IntegratorMethod;

/// A queued runtime mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SimAction {
    /// Attach `subject` to `parent` at their current states.
    Attach {
        /// The body being attached.
        subject: String,
        /// The body it joins.
        parent: String,
    },
    /// Detach `subject` from whatever it is attached to.
    Detach {
        /// The body being detached.
        subject: String,
    },
    /// Re-initialize a body's state.
    StateInit {
        /// The body to re-initialize.
        subject: String,
        /// The new state.
        state: InitialStateConfig,
    },
    /// Swap a loop's integration method (re-enters bootstrap).
    SwitchIntegrator {
        /// The loop to retarget.
        integ_loop: String,
        /// The replacement method.
        method: IntegratorMethod,
    },
    /// Move a body to a different integration loop.
    LoopTransfer {
        /// The body to move.
        subject: String,
        /// Destination loop.
        to_loop: String,
    },
    /// Change the root clock's rate (sign flips reverse time).
    SetScaleFactor {
        /// The new factor.
        factor: f64,
    },
}

/// An action with its due time and tie-break sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAction {
    /// Driver time the action becomes due.
    pub time: f64,
    /// Insertion sequence; orders simultaneous actions.
    pub seq: u64,
    /// The mutation itself.
    pub action: SimAction,
}

/// Pending actions ordered by `(time, seq)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionQueue {
    pending: Vec<QueuedAction>,
    next_seq: u64,
}

impl ActionQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an action at a driver time. Returns its sequence number.
    pub fn schedule(&mut self, time: f64, action: SimAction) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        log::debug!("scheduled action #{seq} at t = {time}: {action:?}");
        self.pending.push(QueuedAction { time, seq, action });
        seq
    }

    /// Earliest pending due time.
    pub fn next_time(&self) -> Option<f64> {
        self.pending
            .iter()
            .map(|a| a.time)
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Remove and return everything due at or before `now`, ordered by
    /// `(time, seq)`.
    pub fn drain_due(&mut self, now: f64) -> Vec<QueuedAction> {
        let mut due: Vec<QueuedAction> = Vec::new();
        let mut keep = Vec::with_capacity(self.pending.len());
        for action in self.pending.drain(..) {
            if action.time <= now {
                due.push(action);
            } else {
                keep.push(action);
            }
        }
        self.pending = keep;
        due.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.seq.cmp(&b.seq)));
        due
    }

    /// Number of pending actions.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending actions (checkpoint capture).
    pub fn pending(&self) -> &[QueuedAction] {
        &self.pending
    }

    pub(crate) fn restore(pending: Vec<QueuedAction>, next_seq: u64) -> Self {
        Self { pending, next_seq }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.next_seq
    }
}
