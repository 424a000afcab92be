//! State transfer engine.

use crate::tracker::{RequestTracker, ServeTracker, TransferPhase};
use tracing::{debug, info, warn};
use vsync_core::{Action, GroupControl, MembershipError, Notification, OutboundMessage};
use vsync_types::{EndpointId, LogicalTime, TransferId, ViewState, XferMode, XferStatus};

/// Drives state hand-off between members during a view-change epoch.
///
/// An epoch is the lifetime of one installed view. Every transfer issued in
/// an epoch is resolved, canceled or force-completed by the time the next
/// view installs, so no transfer can hold up the following epoch.
pub struct StateTransferEngine {
    /// Local endpoint, to ignore our own multicast requests.
    local: EndpointId,

    /// Logical time of the current view.
    epoch: LogicalTime,

    /// Number of other members that could provide state.
    providers: usize,

    /// Next sequence number for transfer ids in this epoch.
    next_seq: u64,

    /// Transfers we issued.
    requests: RequestTracker,

    /// Requests we were asked to answer.
    serving: ServeTracker,
}

impl StateTransferEngine {
    /// Create an engine with no installed view.
    pub fn new(local: EndpointId) -> Self {
        Self {
            local,
            epoch: LogicalTime::ZERO,
            providers: 0,
            next_seq: 0,
            requests: RequestTracker::new(),
            serving: ServeTracker::new(),
        }
    }

    /// Current epoch.
    pub fn epoch(&self) -> LogicalTime {
        self.epoch
    }

    /// Number of issued transfers that are not done.
    pub fn pending(&self) -> usize {
        self.requests.pending()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Epoch boundaries
    // ═══════════════════════════════════════════════════════════════════════════

    /// End the current epoch and start the one of `view`.
    ///
    /// Unresolved synchronous transfers resolve to `Terminated`, unresolved
    /// asynchronous ones are canceled, and delivered-but-unacknowledged ones
    /// are force-completed.
    pub fn begin_epoch(&mut self, view: &ViewState) -> Vec<Action> {
        let mut actions = vec![];

        for (id, transfer) in self.requests.unfinished() {
            match (transfer.phase, transfer.mode) {
                (TransferPhase::Awaiting, XferMode::Sync) => {
                    debug!(%id, "Epoch ended before any provider answered");
                    actions.push(Action::Notify(Notification::StateTransfer {
                        id,
                        status: XferStatus::Terminated,
                    }));
                }
                (TransferPhase::Awaiting, XferMode::Async) => {
                    debug!(%id, "Epoch ended, canceling transfer");
                    actions.push(Action::Notify(Notification::XferCanceled { id }));
                }
                (TransferPhase::Delivered, _) => {
                    warn!(
                        %id,
                        "State delivered but xfer_done never called; force-completing"
                    );
                    actions.push(Action::Control(GroupControl::XferDone));
                }
                (TransferPhase::Done, _) => {}
            }
        }

        if self.serving.outstanding() > 0 {
            debug!(
                outstanding = self.serving.outstanding(),
                "Dropping unanswered state requests from previous epoch"
            );
        }

        self.requests.clear();
        self.serving.clear();
        self.epoch = view.ltime;
        self.providers = view.len().saturating_sub(1);
        self.next_seq = 0;

        actions
    }

    /// Cancel everything this member is waiting on (the member is leaving).
    ///
    /// No partial state is applied: waiting synchronous requesters get
    /// `Terminated`, asynchronous ones `XferCanceled`.
    pub fn cancel_all(&mut self) -> Vec<Action> {
        let mut actions = vec![];
        for (id, transfer) in self.requests.unfinished() {
            if transfer.phase != TransferPhase::Awaiting {
                continue;
            }
            self.requests.advance(&id, TransferPhase::Done);
            let notification = match transfer.mode {
                XferMode::Sync => Notification::StateTransfer {
                    id,
                    status: XferStatus::Terminated,
                },
                XferMode::Async => Notification::XferCanceled { id },
            };
            actions.push(Action::Notify(notification));
        }
        if !actions.is_empty() {
            info!(canceled = actions.len(), "Canceled pending state transfers");
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Requester side
    // ═══════════════════════════════════════════════════════════════════════════

    /// Issue a state request to the other members of the view.
    ///
    /// With no other member to ask, the transfer resolves immediately:
    /// synchronous requests to `Terminated`, asynchronous ones are canceled.
    pub fn request(&mut self, mode: XferMode, payload: Vec<u8>) -> (TransferId, Vec<Action>) {
        let id = TransferId::new(self.epoch, self.next_seq);
        self.next_seq += 1;
        self.requests.insert(id, mode);

        if self.providers == 0 {
            debug!(%id, ?mode, "No state provider in view");
            self.requests.advance(&id, TransferPhase::Done);
            let actions = match mode {
                XferMode::Sync => vec![
                    Action::Notify(Notification::StateTransfer {
                        id,
                        status: XferStatus::Terminated,
                    }),
                    Action::Control(GroupControl::XferDone),
                ],
                XferMode::Async => vec![Action::Notify(Notification::XferCanceled { id })],
            };
            return (id, actions);
        }

        debug!(%id, ?mode, providers = self.providers, "Requesting state");
        (
            id,
            vec![Action::Transmit(OutboundMessage::StateRequest { id, payload })],
        )
    }

    /// Handle a provider's reply. The first reply wins; later ones are
    /// discarded silently.
    pub fn on_state_reply(
        &mut self,
        from: EndpointId,
        id: TransferId,
        payload: Vec<u8>,
    ) -> Vec<Action> {
        if id.epoch != self.epoch {
            debug!(%id, epoch = self.epoch.0, "Discarding reply from another epoch");
            return vec![];
        }

        let Some(transfer) = self.requests.get(&id).copied() else {
            debug!(%id, %from, "Discarding reply to unknown transfer");
            return vec![];
        };

        if transfer.phase != TransferPhase::Awaiting {
            debug!(%id, %from, "Discarding late reply");
            return vec![];
        }

        debug!(%id, %from, bytes = payload.len(), "State received");
        match transfer.mode {
            XferMode::Sync => {
                self.requests.advance(&id, TransferPhase::Done);
                vec![
                    Action::Notify(Notification::StateTransfer {
                        id,
                        status: XferStatus::Success(payload),
                    }),
                    Action::Control(GroupControl::XferDone),
                ]
            }
            XferMode::Async => {
                self.requests.advance(&id, TransferPhase::Delivered);
                vec![Action::Notify(Notification::GotState { id, payload })]
            }
        }
    }

    /// Acknowledge completion of a transfer. Idempotent within the epoch.
    pub fn xfer_done(&mut self, id: TransferId) -> Result<Vec<Action>, MembershipError> {
        self.check_epoch(id)?;

        match self.requests.advance(&id, TransferPhase::Done) {
            Some(TransferPhase::Done) => Ok(vec![]),
            Some(_) => {
                debug!(%id, "Transfer acknowledged");
                Ok(vec![Action::Control(GroupControl::XferDone)])
            }
            None => Err(MembershipError::UnknownTransfer(id)),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Provider side
    // ═══════════════════════════════════════════════════════════════════════════

    /// Handle a state request from another member.
    pub fn on_state_request(
        &mut self,
        origin: EndpointId,
        id: TransferId,
        payload: Vec<u8>,
    ) -> Vec<Action> {
        if origin == self.local {
            return vec![];
        }
        if id.epoch != self.epoch {
            debug!(%id, %origin, "Ignoring state request from another epoch");
            return vec![];
        }
        if !self.serving.ask(origin.clone(), id) {
            debug!(%id, %origin, "Ignoring duplicate state request");
            return vec![];
        }

        vec![Action::Notify(Notification::AskState {
            origin,
            id,
            payload,
        })]
    }

    /// Answer a state request.
    pub fn send_state(
        &mut self,
        origin: EndpointId,
        id: TransferId,
        payload: Vec<u8>,
    ) -> Result<Vec<Action>, MembershipError> {
        self.check_epoch(id)?;

        if !self.serving.answer(&origin, id) {
            return Err(MembershipError::UnknownTransfer(id));
        }

        Ok(vec![Action::Transmit(OutboundMessage::StateReply {
            to: origin,
            id,
            payload,
        })])
    }

    /// Reject ids from other epochs.
    fn check_epoch(&self, id: TransferId) -> Result<(), MembershipError> {
        if id.epoch < self.epoch {
            return Err(MembershipError::StaleTransfer {
                id,
                current: self.epoch,
            });
        }
        if id.epoch > self.epoch {
            return Err(MembershipError::UnknownTransfer(id));
        }
        Ok(())
    }
}
