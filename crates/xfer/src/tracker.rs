//! Per-epoch bookkeeping for state transfers.
//!
//! These trackers hold the requester side (transfers we issued) and the
//! provider side (requests we were asked to answer) for a single epoch.
//! Both are discarded wholesale when the epoch ends.

use std::collections::{BTreeMap, BTreeSet};
use vsync_types::{EndpointId, TransferId, XferMode};

/// Where an issued transfer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Waiting for the first provider reply.
    Awaiting,
    /// Asynchronous state delivered, waiting for `xfer_done`.
    Delivered,
    /// Finished: resolved, acknowledged, canceled or force-completed.
    Done,
}

/// A transfer this member issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutgoingTransfer {
    /// How the requester waits.
    pub mode: XferMode,
    /// Current phase.
    pub phase: TransferPhase,
}

/// Tracks transfers issued by this member.
#[derive(Debug, Default)]
pub struct RequestTracker {
    transfers: BTreeMap<TransferId, OutgoingTransfer>,
}

impl RequestTracker {
    /// Create a new empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a transfer in the `Awaiting` phase.
    pub fn insert(&mut self, id: TransferId, mode: XferMode) {
        self.transfers.insert(
            id,
            OutgoingTransfer {
                mode,
                phase: TransferPhase::Awaiting,
            },
        );
    }

    /// Look up a transfer.
    pub fn get(&self, id: &TransferId) -> Option<&OutgoingTransfer> {
        self.transfers.get(id)
    }

    /// Move a transfer to a new phase. Returns the previous phase.
    pub fn advance(&mut self, id: &TransferId, phase: TransferPhase) -> Option<TransferPhase> {
        let transfer = self.transfers.get_mut(id)?;
        Some(std::mem::replace(&mut transfer.phase, phase))
    }

    /// Transfers not yet done, in issue order.
    pub fn unfinished(&self) -> Vec<(TransferId, OutgoingTransfer)> {
        self.transfers
            .iter()
            .filter(|(_, t)| t.phase != TransferPhase::Done)
            .map(|(id, t)| (*id, *t))
            .collect()
    }

    /// Forget every transfer.
    pub fn clear(&mut self) {
        self.transfers.clear();
    }

    /// Number of transfers not yet done.
    pub fn pending(&self) -> usize {
        self.transfers
            .values()
            .filter(|t| t.phase != TransferPhase::Done)
            .count()
    }
}

/// Tracks state requests other members sent us.
///
/// Only the first request per (origin, transfer) pair is recorded; repeats
/// are dropped so the application is asked once.
#[derive(Debug, Default)]
pub struct ServeTracker {
    asked: BTreeSet<(EndpointId, TransferId)>,
    answered: BTreeSet<(EndpointId, TransferId)>,
}

impl ServeTracker {
    /// Create a new empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request. Returns true if this is the first time we see it.
    pub fn ask(&mut self, origin: EndpointId, id: TransferId) -> bool {
        let key = (origin, id);
        if self.answered.contains(&key) {
            return false;
        }
        self.asked.insert(key)
    }

    /// Record an answer. Returns false if the request is unknown.
    ///
    /// Answering twice is accepted: the second answer is a duplicate the
    /// requester discards anyway.
    pub fn answer(&mut self, origin: &EndpointId, id: TransferId) -> bool {
        let key = (origin.clone(), id);
        if self.asked.remove(&key) {
            self.answered.insert(key);
            true
        } else {
            self.answered.contains(&key)
        }
    }

    /// Number of requests waiting for an answer.
    pub fn outstanding(&self) -> usize {
        self.asked.len()
    }

    /// Forget every request.
    pub fn clear(&mut self) {
        self.asked.clear();
        self.answered.clear();
    }
}
