//! Member lifecycle state machine.

use crate::{DeliveryGate, MemberConfig, MemberTable};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use vsync_coordinator::ViewChangeCoordinator;
use vsync_core::{
    Action, Event, GroupControl, MemberStatus, MembershipError, Notification, OutboundMessage,
    StateMachine, ViewChangeRequest,
};
use vsync_types::{
    DelayedMessage, EndpointId, JoinOptions, LocalState, LogicalTime, Rank, SendKind, TransferId,
    ViewState, XferMode,
};
use vsync_xfer::StateTransferEngine;

/// Lifecycle state of one group member.
///
/// Application downcalls are methods returning `Result`; transport upcalls
/// arrive through [`StateMachine::handle`]. Both return the actions the
/// runner must perform.
pub struct MemberStateMachine {
    /// Local endpoint.
    local: EndpointId,

    /// Member policy.
    config: MemberConfig,

    /// Lifecycle status.
    status: MemberStatus,

    /// Options of the most recent join.
    options: Option<JoinOptions>,

    /// Currently installed view.
    view: Option<ViewState>,

    /// Local projection of the installed view.
    local_state: Option<LocalState>,

    /// View computed locally from the last proposal, compared against the
    /// view the transport delivers.
    candidate: Option<ViewState>,

    /// Next-view computation.
    coordinator: ViewChangeCoordinator,

    /// State transfer bookkeeping.
    xfer: StateTransferEngine,

    /// Sends deferred while blocked.
    gate: DeliveryGate,

    /// Records of the current members.
    members: MemberTable,

    /// The application asked to leave. Sticky across installations.
    leave_intent: bool,

    /// The leave downcall was issued to the transport.
    leave_sent: bool,

    /// Set when the member failed on quorum loss.
    failure: Option<MembershipError>,

    /// Current time.
    now: Duration,
}

impl MemberStateMachine {
    /// Create a member that has not joined any group yet.
    pub fn new(local: EndpointId, config: MemberConfig) -> Self {
        let coordinator = ViewChangeCoordinator::new(config.coordinator_config());
        Self {
            xfer: StateTransferEngine::new(local.clone()),
            local,
            config,
            status: MemberStatus::Bogus,
            options: None,
            view: None,
            local_state: None,
            candidate: None,
            coordinator,
            gate: DeliveryGate::new(),
            members: MemberTable::new(),
            leave_intent: false,
            leave_sent: false,
            failure: None,
            now: Duration::ZERO,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════════

    /// Local endpoint.
    pub fn local(&self) -> &EndpointId {
        &self.local
    }

    /// Member policy.
    pub fn config(&self) -> &MemberConfig {
        &self.config
    }

    /// Lifecycle status.
    pub fn status(&self) -> MemberStatus {
        self.status
    }

    /// Currently installed view.
    pub fn view(&self) -> Option<&ViewState> {
        self.view.as_ref()
    }

    /// Local projection of the installed view.
    pub fn local_state(&self) -> Option<&LocalState> {
        self.local_state.as_ref()
    }

    /// Logical time of the installed view, zero before the first one.
    pub fn ltime(&self) -> LogicalTime {
        self.view
            .as_ref()
            .map(|v| v.ltime)
            .unwrap_or(LogicalTime::ZERO)
    }

    /// Options of the most recent join.
    pub fn join_options(&self) -> Option<&JoinOptions> {
        self.options.as_ref()
    }

    /// Records of the current members.
    pub fn members(&self) -> &MemberTable {
        &self.members
    }

    /// Number of sends waiting for the next view.
    pub fn delayed_sends(&self) -> usize {
        self.gate.len()
    }

    /// Number of issued state transfers not yet done.
    pub fn pending_transfers(&self) -> usize {
        self.xfer.pending()
    }

    /// Whether the application asked to leave.
    pub fn leave_pending(&self) -> bool {
        self.leave_intent
    }

    /// The quorum failure, if the member failed.
    pub fn failure(&self) -> Option<&MembershipError> {
        self.failure.as_ref()
    }

    fn invalid(&self, op: &'static str) -> MembershipError {
        MembershipError::InvalidState {
            op,
            status: self.status,
        }
    }

    fn require_normal(&self, op: &'static str) -> Result<(), MembershipError> {
        match self.status {
            MemberStatus::Normal => Ok(()),
            MemberStatus::Failed => Err(self.quorum_error()),
            _ => Err(self.invalid(op)),
        }
    }

    fn quorum_error(&self) -> MembershipError {
        self.failure.clone().unwrap_or(MembershipError::QuorumLost {
            members: self.view.as_ref().map(|v| v.len()).unwrap_or(0),
            quorum: self.config.quorum_size.unwrap_or(0),
        })
    }

    /// Endpoint holding `rank` in the current view.
    fn member_at(&self, rank: Rank) -> Result<EndpointId, MembershipError> {
        self.view
            .as_ref()
            .and_then(|v| v.member_at(rank))
            .cloned()
            .ok_or(MembershipError::RankOutOfBounds {
                rank,
                members: self.view.as_ref().map(|v| v.len()).unwrap_or(0),
            })
    }

    fn check_rank(&self, rank: Rank) -> Result<(), MembershipError> {
        let members = self.view.as_ref().map(|v| v.len()).unwrap_or(0);
        if rank.index() >= members {
            return Err(MembershipError::RankOutOfBounds { rank, members });
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Lifecycle Downcalls
    // ═══════════════════════════════════════════════════════════════════════════

    /// Ask to join a group.
    ///
    /// Legal before the first join, after leaving, and while a leave is in
    /// progress (which cancels the leave intent). The member identity is
    /// fixed at construction and overrides any endpoint in `options`.
    pub fn join(&mut self, options: JoinOptions) -> Result<Vec<Action>, MembershipError> {
        if !self.status.can_join() {
            return Err(self.invalid("join"));
        }

        if let Some(requested) = options.endpoint.as_ref().filter(|e| **e != self.local) {
            warn!(
                requested = %requested,
                local = %self.local,
                "Join options name another endpoint; using the local one"
            );
        }
        let options = options.with_endpoint(self.local.clone());

        if self.status == MemberStatus::Left {
            self.reset_membership();
        }

        info!(
            endpoint = %self.local,
            group = %options.group_name,
            from = %self.status,
            "Joining group"
        );

        self.status = MemberStatus::Joining;
        self.leave_intent = false;
        self.leave_sent = false;
        self.options = Some(options.clone());

        Ok(vec![Action::RequestJoin(options)])
    }

    /// Ask to leave the group.
    ///
    /// While joining, the request is recorded and carried out once the first
    /// view installs. While leaving, the leave downcall is reissued.
    pub fn leave(&mut self) -> Result<Vec<Action>, MembershipError> {
        match self.status {
            MemberStatus::Normal | MemberStatus::Blocked => {
                info!(endpoint = %self.local, ltime = self.ltime().0, "Leaving group");
                self.leave_intent = true;
                self.status = MemberStatus::Leaving;
                Ok(self.issue_leave())
            }
            MemberStatus::Joining => {
                debug!(endpoint = %self.local, "Leave requested while joining; deferred");
                self.leave_intent = true;
                Ok(vec![])
            }
            MemberStatus::Leaving => {
                debug!(endpoint = %self.local, "Reissuing leave");
                Ok(vec![Action::RequestLeave])
            }
            MemberStatus::Failed => Err(self.quorum_error()),
            MemberStatus::Bogus | MemberStatus::Left => Err(self.invalid("leave")),
        }
    }

    fn issue_leave(&mut self) -> Vec<Action> {
        let mut actions = self.xfer.cancel_all();
        let discarded = self.gate.clear();
        if discarded > 0 {
            debug!(discarded, "Discarding delayed sends on leave");
        }
        self.members.set_status(&self.local, MemberStatus::Leaving);
        self.leave_sent = true;
        actions.push(Action::RequestLeave);
        actions
    }

    fn reset_membership(&mut self) {
        self.view = None;
        self.local_state = None;
        self.candidate = None;
        self.members.clear();
        self.gate.clear();
        self.xfer = StateTransferEngine::new(self.local.clone());
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Data Downcalls
    // ═══════════════════════════════════════════════════════════════════════════

    /// Send a point-to-point message to the member at `destination`.
    ///
    /// A deferred send stays addressed to that member: it is re-ranked in
    /// the next view, or dropped if the member is gone. Before the first
    /// view no rank exists, so the send fails with `RankOutOfBounds`.
    pub fn send(
        &mut self,
        destination: Rank,
        payload: Vec<u8>,
    ) -> Result<Vec<Action>, MembershipError> {
        self.submit(SendKind::Send, Some(destination), payload)
    }

    /// Multicast a message to the group.
    pub fn cast(&mut self, payload: Vec<u8>) -> Result<Vec<Action>, MembershipError> {
        self.submit(SendKind::Cast, None, payload)
    }

    /// State-aware multicast.
    pub fn scast(&mut self, payload: Vec<u8>) -> Result<Vec<Action>, MembershipError> {
        self.submit(SendKind::SCast, None, payload)
    }

    /// Local send, looped back to this member.
    pub fn lsend(&mut self, payload: Vec<u8>) -> Result<Vec<Action>, MembershipError> {
        self.submit(SendKind::LSend, None, payload)
    }

    fn submit(
        &mut self,
        kind: SendKind,
        destination: Option<Rank>,
        payload: Vec<u8>,
    ) -> Result<Vec<Action>, MembershipError> {
        let op = match kind {
            SendKind::Send => "send",
            SendKind::Cast => "cast",
            SendKind::SCast => "scast",
            SendKind::LSend => "lsend",
        };

        match self.status {
            MemberStatus::Normal => {
                if let Some(rank) = destination {
                    self.check_rank(rank)?;
                }
                let message = OutboundMessage::application(kind, destination, payload)
                    .ok_or_else(|| self.invalid(op))?;
                Ok(vec![Action::Transmit(message)])
            }
            status if status.defers_sends() => {
                // Ranks are reassigned by the next view; keep the endpoint.
                let endpoint = destination.map(|rank| self.member_at(rank)).transpose()?;
                debug!(%kind, %status, "Deferring send until next view");
                self.gate
                    .enqueue(DelayedMessage::new(kind, endpoint, payload, self.ltime()));
                Ok(vec![])
            }
            MemberStatus::Failed => Err(self.quorum_error()),
            _ => Err(self.invalid(op)),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Group Control Downcalls
    // ═══════════════════════════════════════════════════════════════════════════

    /// Report members as failure-suspected.
    pub fn suspect(&mut self, ranks: &[Rank]) -> Result<Vec<Action>, MembershipError> {
        self.require_normal("suspect")?;
        for rank in ranks {
            self.check_rank(*rank)?;
        }
        info!(suspects = ?ranks, "Suspecting members");
        Ok(vec![Action::Control(GroupControl::Suspect(ranks.to_vec()))])
    }

    /// Ask for a new view with the same members.
    pub fn prompt(&mut self) -> Result<Vec<Action>, MembershipError> {
        self.require_normal("prompt")?;
        Ok(vec![Action::Control(GroupControl::Prompt)])
    }

    /// Ask for the group key to be refreshed.
    pub fn rekey(&mut self) -> Result<Vec<Action>, MembershipError> {
        self.require_normal("rekey")?;
        Ok(vec![Action::Control(GroupControl::Rekey)])
    }

    /// Switch to another protocol stack.
    pub fn change_protocol(
        &mut self,
        protocol: impl Into<String>,
    ) -> Result<Vec<Action>, MembershipError> {
        self.require_normal("change_protocol")?;
        Ok(vec![Action::Control(GroupControl::ChangeProtocol(
            protocol.into(),
        ))])
    }

    /// Switch to another property list.
    pub fn change_properties(
        &mut self,
        properties: impl Into<String>,
    ) -> Result<Vec<Action>, MembershipError> {
        self.require_normal("change_properties")?;
        Ok(vec![Action::Control(GroupControl::ChangeProperties(
            properties.into(),
        ))])
    }

    /// Attach a message to the next view. Coordinator only.
    pub fn attach_view_message(
        &mut self,
        payload: Vec<u8>,
    ) -> Result<Vec<Action>, MembershipError> {
        if !self.status.has_view() {
            return Err(self.invalid("view_message"));
        }
        let am_coordinator = self
            .local_state
            .as_ref()
            .map(|l| l.am_coordinator)
            .unwrap_or(false);
        if !am_coordinator {
            return Err(MembershipError::NotCoordinator);
        }
        Ok(vec![Action::Control(GroupControl::ViewMessage(payload))])
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // State Transfer Downcalls
    // ═══════════════════════════════════════════════════════════════════════════

    /// Ask the other members for state.
    pub fn request_state(
        &mut self,
        mode: XferMode,
        payload: Vec<u8>,
    ) -> Result<(TransferId, Vec<Action>), MembershipError> {
        self.require_normal("request_state")?;
        let (id, actions) = self.xfer.request(mode, payload);
        self.note_transfer_resolution(&actions);
        Ok((id, actions))
    }

    /// Answer a state request.
    pub fn send_state(
        &mut self,
        origin: EndpointId,
        id: TransferId,
        payload: Vec<u8>,
    ) -> Result<Vec<Action>, MembershipError> {
        self.require_normal("send_state")?;
        self.xfer.send_state(origin, id, payload)
    }

    /// Acknowledge an asynchronous transfer.
    pub fn xfer_done(&mut self, id: TransferId) -> Result<Vec<Action>, MembershipError> {
        if !self.status.has_view() && self.status != MemberStatus::Leaving {
            return Err(self.invalid("xfer_done"));
        }
        let actions = self.xfer.xfer_done(id)?;
        self.note_transfer_resolution(&actions);
        Ok(actions)
    }

    fn note_transfer_resolution(&mut self, actions: &[Action]) {
        if actions
            .iter()
            .any(|a| matches!(a, Action::Control(GroupControl::XferDone)))
        {
            self.members.fulfil_transfer(&self.local);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // View Change
    // ═══════════════════════════════════════════════════════════════════════════

    /// A view change is starting.
    fn on_block(&mut self, request: Option<ViewChangeRequest>) -> Vec<Action> {
        match self.status {
            MemberStatus::Normal | MemberStatus::Blocked => {}
            MemberStatus::Leaving => {
                debug!(endpoint = %self.local, "Acknowledging block while leaving");
                return vec![Action::BlockOk];
            }
            status => {
                debug!(%status, "Ignoring block request");
                return vec![];
            }
        }

        if let (Some(request), Some(view)) = (request, self.view.as_ref()) {
            self.members
                .mark_leaving(request.leaves.iter().chain(request.suspects.iter()));
            self.candidate = self.coordinator.next_view(view, &request);
            if let Some(candidate) = &self.candidate {
                debug!(
                    ltime = candidate.ltime.0,
                    members = candidate.len(),
                    "Computed candidate view"
                );
            }
        }

        if self.status == MemberStatus::Blocked {
            debug!(endpoint = %self.local, "Already blocked, re-acknowledging");
            return vec![Action::BlockOk];
        }

        debug!(endpoint = %self.local, ltime = self.ltime().0, "Blocking for view change");
        self.status = MemberStatus::Blocked;
        self.members.set_status(&self.local, MemberStatus::Blocked);
        vec![Action::Notify(Notification::Block), Action::BlockOk]
    }

    /// A new view was delivered.
    fn on_view(&mut self, view: ViewState, view_message: Option<Vec<u8>>) -> Vec<Action> {
        if !matches!(
            self.status,
            MemberStatus::Joining
                | MemberStatus::Normal
                | MemberStatus::Blocked
                | MemberStatus::Leaving
        ) {
            debug!(status = %self.status, ltime = view.ltime.0, "Ignoring view delivery");
            return vec![];
        }

        if let Err(e) = view.validate() {
            warn!(error = %e, ltime = view.ltime.0, "Rejecting invalid view");
            return vec![];
        }

        let local = match LocalState::from_view(&view, &self.local) {
            Ok(local) => local,
            Err(_) => {
                debug!(
                    endpoint = %self.local,
                    ltime = view.ltime.0,
                    "Not a member of the delivered view"
                );
                return vec![];
            }
        };

        if view.ltime <= self.ltime() {
            warn!(
                ltime = view.ltime.0,
                current = self.ltime().0,
                "Ignoring view that does not advance logical time"
            );
            return vec![];
        }

        if let Some(candidate) = self.candidate.take() {
            if candidate.members != view.members || candidate.ltime != view.ltime {
                warn!(
                    candidate_ltime = candidate.ltime.0,
                    candidate_members = candidate.len(),
                    ltime = view.ltime.0,
                    members = view.len(),
                    "Delivered view differs from candidate; adopting delivered view"
                );
            }
        }

        let primary = view.is_primary && self.coordinator.config().is_primary(view.len());
        if self.config.primary_only && !primary {
            return self.fail_on_quorum_loss(&view);
        }

        // Resolve the previous epoch before the new one starts.
        let mut actions = self.xfer.begin_epoch(&view);
        let delta = self.members.install(&view, &self.local);

        let was = self.status;
        self.status = if self.leave_intent {
            MemberStatus::Leaving
        } else {
            MemberStatus::Normal
        };
        self.members.set_status(&self.local, self.status);

        info!(
            endpoint = %self.local,
            ltime = view.ltime.0,
            members = view.len(),
            rank = local.rank.0,
            is_primary = view.is_primary,
            is_transfer_view = view.is_transfer_view,
            joined = delta.joined.len(),
            departed = delta.departed.len(),
            from = %was,
            "Installed view"
        );

        let coordinator = view.coordinator().clone();
        self.local_state = Some(local.clone());
        self.view = Some(view.clone());

        actions.push(Action::Notify(Notification::AcceptedView {
            view: Box::new(view.clone()),
            local,
        }));
        if let Some(payload) = view_message {
            actions.push(Action::Notify(Notification::ViewMessage {
                origin: coordinator,
                payload,
            }));
        }

        // Deferred sends go out in the new view, before any pending leave.
        actions.extend(self.gate.drain(&view).into_iter().map(Action::Transmit));

        if self.leave_intent && !self.leave_sent {
            info!(endpoint = %self.local, "Carrying out deferred leave");
            actions.extend(self.issue_leave());
        }

        actions
    }

    fn fail_on_quorum_loss(&mut self, view: &ViewState) -> Vec<Action> {
        let err = MembershipError::QuorumLost {
            members: view.len(),
            quorum: self.config.quorum_size.unwrap_or(0),
        };
        error!(
            endpoint = %self.local,
            ltime = view.ltime.0,
            members = view.len(),
            quorum = ?self.config.quorum_size,
            "Quorum lost, member failed"
        );

        let mut actions = self.xfer.cancel_all();
        let discarded = self.gate.clear();
        if discarded > 0 {
            debug!(discarded, "Discarding delayed sends on quorum loss");
        }

        self.status = MemberStatus::Failed;
        self.failure = Some(err.clone());
        actions.push(Action::Notify(Notification::QuorumLost(err)));
        actions
    }

    /// The transport confirmed our departure.
    fn on_exit(&mut self) -> Vec<Action> {
        match self.status {
            MemberStatus::Leaving => {
                info!(endpoint = %self.local, ltime = self.ltime().0, "Left group");
                self.status = MemberStatus::Left;
                self.leave_intent = false;
                self.leave_sent = false;
                self.reset_membership();
                vec![Action::Notify(Notification::Exit)]
            }
            MemberStatus::Left => {
                debug!(endpoint = %self.local, "Ignoring duplicate exit");
                vec![]
            }
            status => {
                warn!(%status, endpoint = %self.local, "Exit confirmed while not leaving; ignored");
                vec![]
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Data Upcalls
    // ═══════════════════════════════════════════════════════════════════════════

    /// Whether upcalls other than view changes are delivered.
    fn receiving(&self) -> bool {
        self.status.has_view() || self.status == MemberStatus::Leaving
    }

    fn on_message(&mut self, origin: Rank, kind: SendKind, payload: Vec<u8>) -> Vec<Action> {
        if !self.receiving() {
            debug!(status = %self.status, %origin, %kind, "Dropping message");
            return vec![];
        }
        let notification = match kind {
            SendKind::Cast | SendKind::SCast => Notification::ReceiveCast { origin, payload },
            SendKind::Send | SendKind::LSend => Notification::ReceiveSend { origin, payload },
        };
        vec![Action::Notify(notification)]
    }
}

impl StateMachine for MemberStateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::ViewChangeProposed(request) => self.on_block(Some(request)),
            Event::BlockRequested => self.on_block(None),
            Event::ViewDelivered { view, view_message } => self.on_view(*view, view_message),
            Event::ExitConfirmed => self.on_exit(),
            Event::MessageReceived {
                origin,
                kind,
                payload,
            } => self.on_message(origin, kind, payload),
            Event::Heartbeat { now } => {
                if !self.receiving() {
                    return vec![];
                }
                vec![Action::Notify(Notification::Heartbeat { now })]
            }
            Event::FlowBlock { rank, on } => {
                if !self.receiving() {
                    return vec![];
                }
                vec![Action::Notify(Notification::FlowBlock { rank, on })]
            }
            Event::StateRequested {
                origin,
                id,
                payload,
            } => {
                if !self.status.has_view() {
                    return vec![];
                }
                self.xfer.on_state_request(origin, id, payload)
            }
            Event::StateReplied { from, id, payload } => {
                if !self.receiving() {
                    return vec![];
                }
                let actions = self.xfer.on_state_reply(from, id, payload);
                self.note_transfer_resolution(&actions);
                actions
            }
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
        self.coordinator.set_time(now);
    }

    fn now(&self) -> Duration {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;
    use vsync_coordinator::CoordinatorConfig;
    use vsync_types::{Address, XferStatus};

    fn endpoint(name: &str) -> (EndpointId, Address) {
        (EndpointId::new(name), Address::new(format!("{name}:6789")))
    }

    fn make_member(name: &str, config: MemberConfig) -> MemberStateMachine {
        MemberStateMachine::new(EndpointId::new(name), config)
    }

    fn found(names: &[&str], quorum: Option<usize>) -> ViewState {
        let coordinator = ViewChangeCoordinator::new(CoordinatorConfig {
            quorum_size: quorum,
            ..Default::default()
        });
        let founders: Vec<_> = names.iter().map(|n| endpoint(n)).collect();
        coordinator
            .initial_view(&JoinOptions::new("test"), &founders)
            .unwrap()
    }

    fn next(view: &ViewState, request: &ViewChangeRequest, quorum: Option<usize>) -> ViewState {
        let coordinator = ViewChangeCoordinator::new(CoordinatorConfig {
            quorum_size: quorum,
            ..Default::default()
        });
        coordinator.next_view(view, request).unwrap()
    }

    /// Join and install `view`, leaving the member Normal.
    fn joined(name: &str, view: &ViewState, config: MemberConfig) -> MemberStateMachine {
        let mut member = make_member(name, config);
        member.join(JoinOptions::new("test")).unwrap();
        member.handle(Event::view(view.clone()));
        assert_eq!(member.status(), MemberStatus::Normal);
        member
    }

    fn notifications(actions: &[Action]) -> Vec<&'static str> {
        actions
            .iter()
            .filter(|a| !a.is_downcall())
            .map(|a| a.type_name())
            .collect()
    }

    fn transmitted(actions: &[Action]) -> Vec<&OutboundMessage> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Transmit(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    #[traced_test]
    #[test]
    fn test_single_member_founds_group() {
        let mut member = make_member("a", MemberConfig::default());

        let actions = member.join(JoinOptions::new("test")).unwrap();
        assert!(matches!(
            &actions[..],
            [Action::RequestJoin(options)] if options.endpoint == Some(EndpointId::new("a"))
        ));
        assert_eq!(member.status(), MemberStatus::Joining);

        let actions = member.handle(Event::view(found(&["a"], None)));
        assert_eq!(notifications(&actions), vec!["AcceptedView"]);
        match &actions[0] {
            Action::Notify(Notification::AcceptedView { view, local }) => {
                assert_eq!(view.members, vec![EndpointId::new("a")]);
                assert_eq!(view.ltime, LogicalTime(1));
                assert!(view.is_primary);
                assert_eq!(local.rank, Rank(0));
                assert!(local.am_coordinator);
            }
            other => panic!("unexpected action {:?}", other),
        }
        assert_eq!(member.status(), MemberStatus::Normal);
    }

    #[traced_test]
    #[test]
    fn test_join_only_from_joinable_status() {
        let view = found(&["a"], None);
        let mut member = joined("a", &view, MemberConfig::default());

        assert_eq!(
            member.join(JoinOptions::new("test")).unwrap_err(),
            MembershipError::InvalidState {
                op: "join",
                status: MemberStatus::Normal
            }
        );
    }

    #[traced_test]
    #[test]
    fn test_block_then_install_drains_fifo() {
        let view = found(&["a", "b"], None);
        let mut member = joined("a", &view, MemberConfig::default());

        let request = ViewChangeRequest::new().join(endpoint("c").0, endpoint("c").1);
        let actions = member.handle(Event::ViewChangeProposed(request.clone()));
        assert_eq!(notifications(&actions), vec!["Block"]);
        assert!(matches!(actions.last(), Some(Action::BlockOk)));
        assert_eq!(member.status(), MemberStatus::Blocked);

        assert!(member.cast(vec![1]).unwrap().is_empty());
        assert!(member.send(Rank(1), vec![2]).unwrap().is_empty());
        assert!(member.scast(vec![3]).unwrap().is_empty());
        assert_eq!(member.delayed_sends(), 3);

        let actions = member.handle(Event::view(next(&view, &request, None)));
        let sent: Vec<u8> = transmitted(&actions).iter().map(|m| m.payload()[0]).collect();
        assert_eq!(sent, vec![1, 2, 3]);
        assert_eq!(member.delayed_sends(), 0);
        assert_eq!(member.status(), MemberStatus::Normal);

        // The accepted view is reported before the drained sends.
        let first_transmit = actions
            .iter()
            .position(|a| matches!(a, Action::Transmit(_)))
            .unwrap();
        let accepted = actions
            .iter()
            .position(|a| matches!(a, Action::Notify(Notification::AcceptedView { .. })))
            .unwrap();
        assert!(accepted < first_transmit);
    }

    #[traced_test]
    #[test]
    fn test_repeated_block_is_acknowledged_once() {
        let view = found(&["a", "b"], None);
        let mut member = joined("a", &view, MemberConfig::default());

        member.handle(Event::BlockRequested);
        let actions = member.handle(Event::BlockRequested);
        assert!(matches!(actions[..], [Action::BlockOk]));
    }

    #[traced_test]
    #[test]
    fn test_leave_and_exit() {
        let view = found(&["a", "b"], None);
        let mut member = joined("b", &view, MemberConfig::default());

        let actions = member.leave().unwrap();
        assert!(matches!(actions.last(), Some(Action::RequestLeave)));
        assert_eq!(member.status(), MemberStatus::Leaving);
        assert!(matches!(
            member.cast(vec![1]),
            Err(MembershipError::InvalidState { op: "cast", .. })
        ));

        let actions = member.handle(Event::ExitConfirmed);
        assert_eq!(notifications(&actions), vec!["Exit"]);
        assert_eq!(member.status(), MemberStatus::Left);

        // Exit is reported once; nothing is delivered afterwards.
        assert!(member.handle(Event::ExitConfirmed).is_empty());
        assert!(member
            .handle(Event::MessageReceived {
                origin: Rank(0),
                kind: SendKind::Cast,
                payload: vec![1],
            })
            .is_empty());
        assert!(member.view().is_none());
    }

    #[traced_test]
    #[test]
    fn test_exit_while_not_leaving_is_ignored() {
        let view = found(&["a"], None);
        let mut member = joined("a", &view, MemberConfig::default());

        assert!(member.handle(Event::ExitConfirmed).is_empty());
        assert_eq!(member.status(), MemberStatus::Normal);
        assert!(logs_contain("Exit confirmed while not leaving"));
    }

    #[traced_test]
    #[test]
    fn test_leave_while_joining_is_sticky() {
        let mut member = make_member("a", MemberConfig::default());
        member.join(JoinOptions::new("test")).unwrap();

        assert!(member.leave().unwrap().is_empty());
        assert!(member.leave_pending());

        let actions = member.handle(Event::view(found(&["a"], None)));
        assert_eq!(notifications(&actions), vec!["AcceptedView"]);
        assert!(matches!(actions.last(), Some(Action::RequestLeave)));
        assert_eq!(member.status(), MemberStatus::Leaving);
    }

    #[traced_test]
    #[test]
    fn test_rejoin_after_leave() {
        let view = found(&["a"], None);
        let mut member = joined("a", &view, MemberConfig::default());
        member.leave().unwrap();
        member.handle(Event::ExitConfirmed);

        member.join(JoinOptions::new("test")).unwrap();
        assert_eq!(member.status(), MemberStatus::Joining);
        assert_eq!(member.ltime(), LogicalTime::ZERO);

        // Rejoining while leaving clears the leave intent.
        let mut member = joined("a", &view, MemberConfig::default());
        member.leave().unwrap();
        member.join(JoinOptions::new("test")).unwrap();
        assert!(!member.leave_pending());
    }

    #[traced_test]
    #[test]
    fn test_logical_time_must_advance() {
        let view = found(&["a"], None);
        let mut member = joined("a", &view, MemberConfig::default());

        member.handle(Event::BlockRequested);
        assert!(member.handle(Event::view(view.clone())).is_empty());
        assert!(logs_contain("does not advance logical time"));
        assert_eq!(member.status(), MemberStatus::Blocked);
    }

    #[traced_test]
    #[test]
    fn test_delivered_view_wins_over_candidate() {
        let view = found(&["a", "b"], None);
        let mut member = joined("a", &view, MemberConfig::default());

        let proposed = ViewChangeRequest::new().leave(EndpointId::new("b"));
        member.handle(Event::ViewChangeProposed(proposed));

        let delivered = next(&view, &ViewChangeRequest::new(), None);
        member.handle(Event::view(delivered.clone()));

        assert!(logs_contain("adopting delivered view"));
        assert_eq!(member.view().unwrap().members, delivered.members);
    }

    #[traced_test]
    #[test]
    fn test_quorum_loss_fails_primary_only_member() {
        let config = MemberConfig::new().with_quorum(3).with_primary_only(true);
        let view = found(&["a", "b", "c"], Some(3));
        let mut member = joined("a", &view, config);

        member.handle(Event::BlockRequested);
        member.cast(vec![9]).unwrap();

        let shrunk = next(
            &view,
            &ViewChangeRequest::new().suspect(EndpointId::new("c")),
            Some(3),
        );
        let actions = member.handle(Event::view(shrunk));

        assert_eq!(notifications(&actions), vec!["QuorumLost"]);
        assert!(transmitted(&actions).is_empty());
        assert_eq!(member.status(), MemberStatus::Failed);
        assert!(matches!(
            member.cast(vec![1]),
            Err(MembershipError::QuorumLost {
                members: 2,
                quorum: 3
            })
        ));
        assert!(member.failure().unwrap().is_fatal());
    }

    #[traced_test]
    #[test]
    fn test_non_primary_view_installs_without_policy() {
        let config = MemberConfig::new().with_quorum(3);
        let view = found(&["a", "b", "c"], Some(3));
        let mut member = joined("a", &view, config);

        let shrunk = next(
            &view,
            &ViewChangeRequest::new().suspect(EndpointId::new("c")),
            Some(3),
        );
        member.handle(Event::BlockRequested);
        member.handle(Event::view(shrunk));
        assert_eq!(member.status(), MemberStatus::Normal);
        assert!(!member.view().unwrap().is_primary);
    }

    #[traced_test]
    #[test]
    fn test_control_downcalls_require_normal() {
        let view = found(&["a", "b"], None);
        let mut member = joined("a", &view, MemberConfig::default());

        assert!(matches!(
            member.suspect(&[Rank(1)]).unwrap()[..],
            [Action::Control(GroupControl::Suspect(_))]
        ));
        assert_eq!(
            member.suspect(&[Rank(5)]).unwrap_err(),
            MembershipError::RankOutOfBounds {
                rank: Rank(5),
                members: 2
            }
        );
        assert!(member.prompt().is_ok());
        assert!(member.rekey().is_ok());
        assert!(member.change_protocol("Top:Bottom").is_ok());
        assert!(member.change_properties("Gmp:Sync").is_ok());
        assert!(member.attach_view_message(b"hello".to_vec()).is_ok());

        member.handle(Event::BlockRequested);
        assert!(matches!(
            member.prompt(),
            Err(MembershipError::InvalidState { op: "prompt", .. })
        ));
    }

    #[traced_test]
    #[test]
    fn test_view_message_only_from_coordinator() {
        let view = found(&["a", "b"], None);
        let mut member = joined("b", &view, MemberConfig::default());

        assert_eq!(
            member.attach_view_message(vec![1]).unwrap_err(),
            MembershipError::NotCoordinator
        );
    }

    #[traced_test]
    #[test]
    fn test_view_message_follows_accepted_view() {
        let view = found(&["a", "b"], None);
        let mut member = joined("b", &view, MemberConfig::default());

        member.handle(Event::BlockRequested);
        let actions = member.handle(Event::ViewDelivered {
            view: Box::new(next(&view, &ViewChangeRequest::new(), None)),
            view_message: Some(b"hi".to_vec()),
        });
        assert_eq!(notifications(&actions), vec!["AcceptedView", "ViewMessage"]);
        assert!(matches!(
            &actions[1],
            Action::Notify(Notification::ViewMessage { origin, .. }) if origin == &EndpointId::new("a")
        ));
    }

    #[traced_test]
    #[test]
    fn test_async_transfer_canceled_by_next_view() {
        let view = found(&["a", "b"], None);
        let mut member = joined("b", &view, MemberConfig::default());

        let (id, actions) = member.request_state(XferMode::Async, vec![]).unwrap();
        assert_eq!(transmitted(&actions).len(), 1);

        member.handle(Event::BlockRequested);
        let actions = member.handle(Event::view(next(&view, &ViewChangeRequest::new(), None)));
        assert!(matches!(
            &actions[0],
            Action::Notify(Notification::XferCanceled { id: canceled }) if *canceled == id
        ));
        assert!(matches!(
            member.xfer_done(id),
            Err(MembershipError::StaleTransfer { .. })
        ));
    }

    #[traced_test]
    #[test]
    fn test_sync_transfer_success_clears_obligation() {
        let base = found(&["a"], None);
        let request = ViewChangeRequest::new().join(endpoint("b").0, endpoint("b").1);
        let view = next(&base, &request, None);
        let mut member = joined("b", &view, MemberConfig::default());
        assert!(
            member
                .members()
                .get(&EndpointId::new("b"))
                .unwrap()
                .transfer_obligation
        );

        let (id, _) = member.request_state(XferMode::Sync, vec![]).unwrap();
        let actions = member.handle(Event::StateReplied {
            from: EndpointId::new("a"),
            id,
            payload: b"state".to_vec(),
        });
        assert!(matches!(
            &actions[0],
            Action::Notify(Notification::StateTransfer { status: XferStatus::Success(_), .. })
        ));
        assert!(
            !member
                .members()
                .get(&EndpointId::new("b"))
                .unwrap()
                .transfer_obligation
        );
    }

    #[traced_test]
    #[test]
    fn test_upcalls_become_notifications() {
        let view = found(&["a", "b"], None);
        let mut member = joined("a", &view, MemberConfig::default());

        let actions = member.handle(Event::MessageReceived {
            origin: Rank(1),
            kind: SendKind::Send,
            payload: vec![1],
        });
        assert_eq!(notifications(&actions), vec!["ReceiveSend"]);

        let actions = member.handle(Event::Heartbeat {
            now: Duration::from_secs(1),
        });
        assert_eq!(notifications(&actions), vec!["Heartbeat"]);

        let actions = member.handle(Event::FlowBlock {
            rank: Some(Rank(1)),
            on: true,
        });
        assert_eq!(notifications(&actions), vec!["FlowBlock"]);
    }

    #[traced_test]
    #[test]
    fn test_deferred_send_to_departed_member_is_dropped() {
        let view = found(&["a", "b", "c"], None);
        let mut member = joined("a", &view, MemberConfig::default());

        let request = ViewChangeRequest::new().leave(EndpointId::new("b"));
        member.handle(Event::ViewChangeProposed(request.clone()));
        assert!(member.send(Rank(1), b"for-b".to_vec()).unwrap().is_empty());

        // "c" takes rank 1 in the next view but must not get b's message.
        let next_view = next(&view, &request, None);
        assert_eq!(next_view.member_at(Rank(1)), Some(&EndpointId::new("c")));
        let actions = member.handle(Event::view(next_view));
        assert!(transmitted(&actions).is_empty());
        assert_eq!(member.delayed_sends(), 0);
    }

    #[traced_test]
    #[test]
    fn test_deferred_send_follows_member_to_new_rank() {
        let view = found(&["a", "c"], None);
        let mut member = joined("a", &view, MemberConfig::default());

        let (b, b_addr) = endpoint("b");
        let request = ViewChangeRequest::new().join(b, b_addr);
        member.handle(Event::ViewChangeProposed(request.clone()));
        member.send(Rank(1), b"for-c".to_vec()).unwrap();

        let actions = member.handle(Event::view(next(&view, &request, None)));
        let sent = transmitted(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(
            *sent[0],
            OutboundMessage::Send {
                destination: Rank(2),
                payload: b"for-c".to_vec(),
            }
        );
    }

    #[traced_test]
    #[test]
    fn test_point_to_point_send_needs_a_view() {
        let mut member = make_member("a", MemberConfig::default());
        member.join(JoinOptions::new("test")).unwrap();

        let err = member.send(Rank(0), vec![1]).unwrap_err();
        assert_eq!(
            err,
            MembershipError::RankOutOfBounds {
                rank: Rank(0),
                members: 0
            }
        );
        assert!(member.cast(vec![2]).unwrap().is_empty());
        assert_eq!(member.delayed_sends(), 1);
    }

    #[traced_test]
    #[test]
    fn test_joiner_does_not_mark_existing_members_as_owing_state() {
        let base = found(&["a"], None);
        let request = ViewChangeRequest::new().join(endpoint("b").0, endpoint("b").1);
        let view = next(&base, &request, None);
        assert!(view.is_transfer_view);

        let member = joined("b", &view, MemberConfig::default());
        let records = member.members();
        assert!(!records.get(&EndpointId::new("a")).unwrap().transfer_obligation);
        assert!(records.get(&EndpointId::new("b")).unwrap().transfer_obligation);
    }
}
