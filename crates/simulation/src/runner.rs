//! Simulated group: a deterministic total-order transport.

use crate::{EventQueue, NetworkConfig, NodeIndex};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use vsync_coordinator::ViewChangeCoordinator;
use vsync_core::{
    Action, Event, GroupControl, MemberStatus, MembershipError, Notification, OutboundMessage,
    StateMachine, ViewChangeRequest,
};
use vsync_member::MemberStateMachine;
use vsync_types::{
    Address, EndpointId, JoinOptions, Rank, SendKind, TransferId, ViewState, XferMode, XferStatus,
};

/// What one node observed through its notifications.
#[derive(Debug, Default, Clone)]
pub struct NodeLog {
    /// Installed views, in order.
    pub views: Vec<ViewState>,
    /// Number of block notifications.
    pub blocks: usize,
    /// Multicasts received: (origin rank, payload).
    pub casts: Vec<(Rank, Vec<u8>)>,
    /// Point-to-point messages received: (origin rank, payload).
    pub sends: Vec<(Rank, Vec<u8>)>,
    /// View messages received.
    pub view_messages: Vec<(EndpointId, Vec<u8>)>,
    /// Number of exit notifications.
    pub exits: usize,
    /// Messages received between an exit and the next view.
    pub delivered_after_exit: usize,
    /// State requests addressed to this node.
    pub asked: Vec<(EndpointId, TransferId)>,
    /// Synchronous transfer resolutions.
    pub transfers: Vec<(TransferId, XferStatus)>,
    /// Asynchronous state received.
    pub got_state: Vec<(TransferId, Vec<u8>)>,
    /// Asynchronous transfers canceled.
    pub canceled: Vec<TransferId>,
    /// Heartbeats seen.
    pub heartbeats: usize,
    /// Flow control changes seen.
    pub flow_blocks: Vec<(Option<Rank>, bool)>,
    /// Quorum failure, if any.
    pub quorum_lost: Option<MembershipError>,

    departed: bool,
}

impl NodeLog {
    fn record(&mut self, notification: Notification) {
        match notification {
            Notification::Block => self.blocks += 1,
            Notification::AcceptedView { view, .. } => {
                self.departed = false;
                self.views.push(*view);
            }
            Notification::ViewMessage { origin, payload } => {
                self.view_messages.push((origin, payload))
            }
            Notification::Exit => {
                self.departed = true;
                self.exits += 1;
            }
            Notification::ReceiveCast { origin, payload } => {
                self.note_delivery();
                self.casts.push((origin, payload));
            }
            Notification::ReceiveSend { origin, payload } => {
                self.note_delivery();
                self.sends.push((origin, payload));
            }
            Notification::Heartbeat { .. } => self.heartbeats += 1,
            Notification::FlowBlock { rank, on } => self.flow_blocks.push((rank, on)),
            Notification::AskState { origin, id, .. } => self.asked.push((origin, id)),
            Notification::StateTransfer { id, status } => self.transfers.push((id, status)),
            Notification::GotState { id, payload } => self.got_state.push((id, payload)),
            Notification::XferCanceled { id } => self.canceled.push(id),
            Notification::QuorumLost(error) => self.quorum_lost = Some(error),
        }
    }

    fn note_delivery(&mut self) {
        if self.departed {
            self.delivered_after_exit += 1;
        }
    }
}

/// Counters collected over a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulationStats {
    /// Events delivered to nodes.
    pub events_processed: u64,
    /// Views agreed by the group.
    pub views_installed: u64,
    /// Application messages routed.
    pub messages_routed: u64,
    /// Transfer completions reported to the transport.
    pub xfers_done: u64,
}

struct SimNode {
    machine: MemberStateMachine,
    address: Address,
    crashed: bool,
    log: NodeLog,
}

/// Membership changes waiting for the next view change.
#[derive(Debug, Default)]
struct PendingChanges {
    joins: BTreeSet<NodeIndex>,
    leaves: BTreeSet<NodeIndex>,
    suspects: BTreeSet<NodeIndex>,
    protocol: Option<String>,
    properties: Option<String>,
    prompt: bool,
    view_message: Option<Vec<u8>>,
}

impl PendingChanges {
    fn is_empty(&self) -> bool {
        self.joins.is_empty()
            && self.leaves.is_empty()
            && self.suspects.is_empty()
            && self.protocol.is_none()
            && self.properties.is_none()
            && !self.prompt
    }
}

/// A view change waiting for block acknowledgements.
struct ViewChange {
    request: ViewChangeRequest,
    waiting: BTreeSet<NodeIndex>,
    view_message: Option<Vec<u8>>,
}

/// A group of member state machines connected by a simulated transport.
///
/// The transport is totally ordered and reliable. View changes run the
/// block protocol: every member of the current view receives the proposed
/// change, blocks and acknowledges; once all live members have
/// acknowledged, the next view is computed and delivered to every member
/// in the same order.
///
/// Nodes that ask to join while no group exists found one together on the
/// next [`step`](SimulatedGroup::step). Casts are delivered to every member
/// except the sender; local sends loop back to the sender only.
pub struct SimulatedGroup {
    config: NetworkConfig,
    nodes: Vec<SimNode>,
    by_endpoint: BTreeMap<EndpointId, NodeIndex>,
    queue: EventQueue,
    coordinator: ViewChangeCoordinator,

    /// The view the group agreed on last.
    view: Option<ViewState>,
    history: Vec<ViewState>,

    pending: PendingChanges,
    change: Option<ViewChange>,

    now: Duration,
    stats: SimulationStats,
}

impl SimulatedGroup {
    /// Create an empty group.
    pub fn new(config: NetworkConfig) -> Self {
        let coordinator = ViewChangeCoordinator::new(config.member_config().coordinator_config());
        Self {
            config,
            nodes: vec![],
            by_endpoint: BTreeMap::new(),
            queue: EventQueue::new(),
            coordinator,
            view: None,
            history: vec![],
            pending: PendingChanges::default(),
            change: None,
            now: Duration::ZERO,
            stats: SimulationStats::default(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════════

    /// Network configuration.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Current simulated time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// The member state machine of a node.
    pub fn member(&self, node: NodeIndex) -> &MemberStateMachine {
        &self.nodes[node as usize].machine
    }

    /// What a node observed.
    pub fn log(&self, node: NodeIndex) -> &NodeLog {
        &self.nodes[node as usize].log
    }

    /// Endpoint of a node.
    pub fn endpoint(&self, node: NodeIndex) -> &EndpointId {
        self.nodes[node as usize].machine.local()
    }

    /// Node with the given endpoint.
    pub fn node_of(&self, endpoint: &EndpointId) -> Option<NodeIndex> {
        self.by_endpoint.get(endpoint).copied()
    }

    /// Number of nodes, including ones that never joined.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The view the group agreed on last.
    pub fn view(&self) -> Option<&ViewState> {
        self.view.as_ref()
    }

    /// Every view the group agreed on.
    pub fn history(&self) -> &[ViewState] {
        &self.history
    }

    /// Run counters.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Number of events waiting for delivery.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Whether a view change is in progress.
    pub fn changing(&self) -> bool {
        self.change.is_some()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Nodes
    // ═══════════════════════════════════════════════════════════════════════════

    /// Add a node that has not joined yet.
    pub fn add_node(&mut self, name: &str) -> NodeIndex {
        let index = self.nodes.len() as NodeIndex;
        let endpoint = EndpointId::new(name);
        self.by_endpoint.insert(endpoint.clone(), index);
        self.nodes.push(SimNode {
            machine: MemberStateMachine::new(endpoint, self.config.member_config()),
            address: Address::new(format!("sim://{name}")),
            crashed: false,
            log: NodeLog::default(),
        });
        index
    }

    /// Stop delivering to a node and have the group suspect it.
    pub fn crash(&mut self, node: NodeIndex) {
        info!(node, "Crashing node");
        self.nodes[node as usize].crashed = true;
        if self.is_member(node) {
            self.pending.suspects.insert(node);
        }
        if self.change.is_some() {
            self.on_block_ok(node);
        } else {
            self.advance_membership();
        }
    }

    fn is_member(&self, node: NodeIndex) -> bool {
        self.view
            .as_ref()
            .map(|v| v.contains(self.endpoint(node)))
            .unwrap_or(false)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Downcalls
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run an application downcall on a node and route its actions.
    pub fn downcall(
        &mut self,
        node: NodeIndex,
        f: impl FnOnce(&mut MemberStateMachine) -> Result<Vec<Action>, MembershipError>,
    ) -> Result<(), MembershipError> {
        let machine = &mut self.nodes[node as usize].machine;
        machine.set_time(self.now);
        let actions = f(machine)?;
        self.process_actions(node, actions);
        Ok(())
    }

    /// Join the simulated group.
    pub fn join(&mut self, node: NodeIndex) -> Result<(), MembershipError> {
        let options = JoinOptions::new(self.config.group_name.clone());
        self.downcall(node, |m| m.join(options))
    }

    /// Leave the group.
    pub fn leave(&mut self, node: NodeIndex) -> Result<(), MembershipError> {
        self.downcall(node, |m| m.leave())
    }

    /// Multicast from a node.
    pub fn cast(&mut self, node: NodeIndex, payload: Vec<u8>) -> Result<(), MembershipError> {
        self.downcall(node, |m| m.cast(payload))
    }

    /// State-aware multicast from a node.
    pub fn scast(&mut self, node: NodeIndex, payload: Vec<u8>) -> Result<(), MembershipError> {
        self.downcall(node, |m| m.scast(payload))
    }

    /// Point-to-point send from a node.
    pub fn send(
        &mut self,
        node: NodeIndex,
        destination: Rank,
        payload: Vec<u8>,
    ) -> Result<(), MembershipError> {
        self.downcall(node, |m| m.send(destination, payload))
    }

    /// Local send.
    pub fn lsend(&mut self, node: NodeIndex, payload: Vec<u8>) -> Result<(), MembershipError> {
        self.downcall(node, |m| m.lsend(payload))
    }

    /// Request state from the other members.
    pub fn request_state(
        &mut self,
        node: NodeIndex,
        mode: XferMode,
        payload: Vec<u8>,
    ) -> Result<TransferId, MembershipError> {
        let machine = &mut self.nodes[node as usize].machine;
        machine.set_time(self.now);
        let (id, actions) = machine.request_state(mode, payload)?;
        self.process_actions(node, actions);
        Ok(id)
    }

    /// Answer a state request.
    pub fn send_state(
        &mut self,
        node: NodeIndex,
        origin: EndpointId,
        id: TransferId,
        payload: Vec<u8>,
    ) -> Result<(), MembershipError> {
        self.downcall(node, |m| m.send_state(origin, id, payload))
    }

    /// Acknowledge an asynchronous transfer.
    pub fn xfer_done(&mut self, node: NodeIndex, id: TransferId) -> Result<(), MembershipError> {
        self.downcall(node, |m| m.xfer_done(id))
    }

    /// Deliver a heartbeat to every live member.
    pub fn heartbeat(&mut self) {
        let now = self.now;
        for node in self.member_nodes() {
            self.queue.schedule(now, node, Event::Heartbeat { now });
        }
    }

    /// Switch flow control toward `rank` at `node`.
    pub fn flow_block(&mut self, node: NodeIndex, rank: Option<Rank>, on: bool) {
        self.queue
            .schedule(self.now, node, Event::FlowBlock { rank, on });
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Event Loop
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deliver the next event. Returns false when the queue is empty.
    pub fn step(&mut self) -> bool {
        if self.view.is_none() && !self.pending.joins.is_empty() {
            self.found_group();
        }

        let Some((key, node, event)) = self.queue.pop() else {
            return false;
        };
        self.now = self.now.max(key.time);

        let sim_node = &mut self.nodes[node as usize];
        if sim_node.crashed {
            trace!(node, event = event.type_name(), "Dropping event for crashed node");
            return true;
        }

        trace!(node, event = event.type_name(), "Delivering event");
        self.stats.events_processed += 1;
        sim_node.machine.set_time(self.now);
        let actions = sim_node.machine.handle(event);
        self.process_actions(node, actions);
        true
    }

    /// Deliver events until the queue is empty or `max_events` were
    /// delivered. Returns the number delivered.
    pub fn run_until_idle(&mut self, max_events: usize) -> usize {
        let mut delivered = 0;
        while delivered < max_events && self.step() {
            delivered += 1;
        }
        if !self.queue.is_empty() {
            warn!(
                pending = self.queue.len(),
                "Simulation stopped with events still queued"
            );
        }
        delivered
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Action Routing
    // ═══════════════════════════════════════════════════════════════════════════

    fn process_actions(&mut self, node: NodeIndex, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Transmit(message) => self.route(node, message),
                Action::RequestJoin(_) => {
                    self.pending.joins.insert(node);
                    self.advance_membership();
                }
                Action::RequestLeave => {
                    self.pending.leaves.insert(node);
                    self.advance_membership();
                }
                Action::BlockOk => self.on_block_ok(node),
                Action::Control(control) => self.on_control(node, control),
                Action::Notify(notification) => {
                    if matches!(notification, Notification::QuorumLost(_)) {
                        self.on_block_ok(node);
                    }
                    self.nodes[node as usize].log.record(notification);
                }
            }
        }
    }

    fn route(&mut self, node: NodeIndex, message: OutboundMessage) {
        let Some(view) = self.view.as_ref() else {
            debug!(node, "Dropping message sent without a group");
            return;
        };
        let sender = self.nodes[node as usize].machine.local().clone();
        let Some(origin) = view.rank_of(&sender) else {
            debug!(node, "Dropping message from non-member");
            return;
        };
        let at = self.now + self.config.latency;
        let kind = message.send_kind();

        let deliveries: Vec<(NodeIndex, Event)> = match message {
            OutboundMessage::Cast { payload } | OutboundMessage::SCast { payload } => {
                let kind = kind.unwrap_or(SendKind::Cast);
                view.members
                    .iter()
                    .filter(|m| **m != sender)
                    .filter_map(|m| self.by_endpoint.get(m).copied())
                    .map(|to| {
                        (
                            to,
                            Event::MessageReceived {
                                origin,
                                kind,
                                payload: payload.clone(),
                            },
                        )
                    })
                    .collect()
            }
            OutboundMessage::Send {
                destination,
                payload,
            } => view
                .member_at(destination)
                .and_then(|m| self.by_endpoint.get(m).copied())
                .map(|to| {
                    vec![(
                        to,
                        Event::MessageReceived {
                            origin,
                            kind: SendKind::Send,
                            payload,
                        },
                    )]
                })
                .unwrap_or_default(),
            OutboundMessage::LSend { payload } => vec![(
                node,
                Event::MessageReceived {
                    origin,
                    kind: SendKind::LSend,
                    payload,
                },
            )],
            OutboundMessage::StateRequest { id, payload } => view
                .members
                .iter()
                .filter(|m| **m != sender)
                .filter_map(|m| self.by_endpoint.get(m).copied())
                .map(|to| {
                    (
                        to,
                        Event::StateRequested {
                            origin: sender.clone(),
                            id,
                            payload: payload.clone(),
                        },
                    )
                })
                .collect(),
            OutboundMessage::StateReply { to, id, payload } => self
                .by_endpoint
                .get(&to)
                .map(|to| {
                    vec![(
                        *to,
                        Event::StateReplied {
                            from: sender.clone(),
                            id,
                            payload,
                        },
                    )]
                })
                .unwrap_or_default(),
        };

        for (to, event) in deliveries {
            if matches!(event, Event::MessageReceived { .. }) {
                self.stats.messages_routed += 1;
            }
            self.queue.schedule(at, to, event);
        }
    }

    fn on_control(&mut self, node: NodeIndex, control: GroupControl) {
        match control {
            GroupControl::Suspect(ranks) => {
                let suspects: Vec<NodeIndex> = match &self.view {
                    Some(view) => ranks
                        .iter()
                        .filter_map(|r| view.member_at(*r))
                        .filter_map(|e| self.by_endpoint.get(e).copied())
                        .collect(),
                    None => vec![],
                };
                self.pending.suspects.extend(suspects);
            }
            GroupControl::Prompt | GroupControl::Rekey => self.pending.prompt = true,
            GroupControl::ChangeProtocol(protocol) => self.pending.protocol = Some(protocol),
            GroupControl::ChangeProperties(properties) => {
                self.pending.properties = Some(properties)
            }
            GroupControl::XferDone => {
                self.stats.xfers_done += 1;
                return;
            }
            GroupControl::ViewMessage(payload) => {
                debug!(node, "View message attached to next view");
                self.pending.view_message = Some(payload);
                return;
            }
        }
        self.advance_membership();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // View Changes
    // ═══════════════════════════════════════════════════════════════════════════

    /// Nodes of the current view that are alive.
    fn member_nodes(&self) -> Vec<NodeIndex> {
        let Some(view) = &self.view else {
            return vec![];
        };
        view.members
            .iter()
            .filter_map(|m| self.by_endpoint.get(m).copied())
            .filter(|n| !self.nodes[*n as usize].crashed)
            .collect()
    }

    /// Start a view change if one is needed and none is running.
    fn advance_membership(&mut self) {
        if self.change.is_some() || self.pending.is_empty() {
            return;
        }

        // Without a group, joiners found one together on the next step.
        let Some(current) = self.view.clone() else {
            return;
        };

        let pending = std::mem::take(&mut self.pending);
        let endpoints = |nodes: &BTreeSet<NodeIndex>| -> Vec<EndpointId> {
            nodes
                .iter()
                .map(|n| self.endpoint(*n).clone())
                .filter(|e| current.contains(e))
                .collect()
        };

        let mut request = ViewChangeRequest {
            joins: pending
                .joins
                .iter()
                .map(|n| (self.endpoint(*n).clone(), self.nodes[*n as usize].address.clone()))
                .filter(|(e, _)| !current.contains(e))
                .collect(),
            leaves: endpoints(&pending.leaves),
            suspects: endpoints(&pending.suspects),
            protocol: pending.protocol,
            properties: pending.properties,
        };
        if !request.changes_membership()
            && !pending.prompt
            && request.protocol.is_none()
            && request.properties.is_none()
        {
            self.pending.view_message = pending.view_message;
            return;
        }
        request.joins.sort();

        let waiting: BTreeSet<NodeIndex> = self
            .member_nodes()
            .into_iter()
            .filter(|n| self.nodes[*n as usize].machine.status() != MemberStatus::Failed)
            .collect();

        info!(
            ltime = current.ltime.0,
            joins = request.joins.len(),
            leaves = request.leaves.len(),
            suspects = request.suspects.len(),
            "Starting view change"
        );

        let at = self.now + self.config.latency;
        for node in &waiting {
            self.queue
                .schedule(at, *node, Event::ViewChangeProposed(request.clone()));
        }

        self.change = Some(ViewChange {
            request,
            waiting,
            view_message: pending.view_message,
        });

        if self.change.as_ref().map(|c| c.waiting.is_empty()).unwrap_or(false) {
            self.complete_view_change();
        }
    }

    /// Form the first view from the nodes asking to join.
    fn found_group(&mut self) {
        let founders: Vec<NodeIndex> = std::mem::take(&mut self.pending.joins)
            .into_iter()
            .filter(|n| self.nodes[*n as usize].machine.status() == MemberStatus::Joining)
            .collect();
        self.pending.leaves.clear();
        self.pending.suspects.clear();

        let members: Vec<(EndpointId, Address)> = founders
            .iter()
            .map(|n| (self.endpoint(*n).clone(), self.nodes[*n as usize].address.clone()))
            .collect();

        self.coordinator.set_time(self.now);
        let options = JoinOptions::new(self.config.group_name.clone());
        let Some(view) = self.coordinator.initial_view(&options, &members) else {
            return;
        };

        let at = self.now + self.config.latency;
        for node in founders {
            self.queue.schedule(at, node, Event::view(view.clone()));
        }
        self.install(view);
    }

    fn on_block_ok(&mut self, node: NodeIndex) {
        let done = match &mut self.change {
            Some(change) => {
                change.waiting.remove(&node);
                change.waiting.is_empty()
            }
            None => false,
        };
        if done {
            self.complete_view_change();
        }
    }

    /// Every live member blocked: compute and deliver the next view.
    fn complete_view_change(&mut self) {
        let Some(change) = self.change.take() else {
            return;
        };
        let Some(current) = self.view.clone() else {
            return;
        };

        self.coordinator.set_time(self.now);
        let next = self.coordinator.next_view(&current, &change.request);
        let at = self.now + self.config.latency;

        match next {
            Some(view) => {
                for endpoint in &view.members {
                    if let Some(node) = self.by_endpoint.get(endpoint).copied() {
                        self.queue.schedule(
                            at,
                            node,
                            Event::ViewDelivered {
                                view: Box::new(view.clone()),
                                view_message: change.view_message.clone(),
                            },
                        );
                    }
                }
                self.install(view);
            }
            None => {
                info!(ltime = current.ltime.0, "Group dissolved");
                self.view = None;
            }
        }

        for endpoint in &change.request.leaves {
            if let Some(node) = self.by_endpoint.get(endpoint).copied() {
                self.queue.schedule(at, node, Event::ExitConfirmed);
            }
        }

        self.advance_membership();
    }

    fn install(&mut self, view: ViewState) {
        debug!(
            ltime = view.ltime.0,
            members = view.len(),
            is_primary = view.is_primary,
            "Group agreed on view"
        );
        self.stats.views_installed += 1;
        self.history.push(view.clone());
        self.view = Some(view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use tracing_test::traced_test;
    use vsync_types::LogicalTime;

    const MAX_EVENTS: usize = 100_000;

    /// Create a group whose named members all joined and installed a view.
    fn formed(config: NetworkConfig, names: &[&str]) -> (SimulatedGroup, Vec<NodeIndex>) {
        let mut group = SimulatedGroup::new(config);
        let nodes: Vec<NodeIndex> = names.iter().map(|n| group.add_node(n)).collect();
        for node in &nodes {
            group.join(*node).unwrap();
        }
        group.run_until_idle(MAX_EVENTS);
        for node in &nodes {
            assert_eq!(group.member(*node).status(), MemberStatus::Normal);
        }
        (group, nodes)
    }

    fn payloads(received: &[(Rank, Vec<u8>)]) -> Vec<Vec<u8>> {
        received.iter().map(|(_, p)| p.clone()).collect()
    }

    #[traced_test]
    #[test]
    fn test_single_member_founds_and_dissolves_group() {
        let (mut group, nodes) = formed(NetworkConfig::new(), &["a"]);
        let a = nodes[0];

        let view = group.view().unwrap();
        assert_eq!(view.ltime, LogicalTime(1));
        assert_eq!(view.members, vec![EndpointId::new("a")]);
        let local = group.member(a).local_state().unwrap();
        assert_eq!(local.rank, Rank(0));
        assert!(local.am_coordinator);
        assert_eq!(group.log(a).views.len(), 1);

        group.leave(a).unwrap();
        group.run_until_idle(MAX_EVENTS);

        assert_eq!(group.member(a).status(), MemberStatus::Left);
        assert_eq!(group.log(a).exits, 1);
        assert!(group.view().is_none());
    }

    #[traced_test]
    #[test]
    fn test_founders_share_first_view() {
        let (group, nodes) = formed(NetworkConfig::new(), &["c", "a", "b"]);

        assert_eq!(group.history().len(), 1);
        let view = group.view().unwrap();
        assert_eq!(
            view.members,
            vec![EndpointId::new("a"), EndpointId::new("b"), EndpointId::new("c")]
        );
        // "c" was added first but ranks follow endpoint order.
        assert_eq!(group.member(nodes[0]).local_state().unwrap().rank, Rank(2));
        assert_eq!(group.member(nodes[1]).local_state().unwrap().rank, Rank(0));
    }

    #[traced_test]
    #[test]
    fn test_join_installs_transfer_view_everywhere() {
        let (mut group, nodes) = formed(NetworkConfig::new(), &["a", "b"]);
        let c = group.add_node("c");

        group.join(c).unwrap();
        group.run_until_idle(MAX_EVENTS);

        let view = group.view().unwrap().clone();
        assert_eq!(view.ltime, LogicalTime(2));
        assert!(view.is_transfer_view);
        for node in nodes.iter().chain(std::iter::once(&c)) {
            assert_eq!(group.member(*node).view(), Some(&view));
        }
        assert_eq!(group.log(nodes[0]).blocks, 1);
        assert_eq!(group.log(c).blocks, 0);
    }

    #[traced_test]
    #[test]
    fn test_leaving_member_receives_casts_sent_before_exit() {
        let (mut group, nodes) = formed(NetworkConfig::new(), &["a", "b"]);
        let (a, b) = (nodes[0], nodes[1]);

        group.leave(b).unwrap();
        group.cast(a, b"last".to_vec()).unwrap();
        group.run_until_idle(MAX_EVENTS);

        let log = group.log(b);
        assert_eq!(log.casts, vec![(Rank(0), b"last".to_vec())]);
        assert_eq!(log.exits, 1);
        assert_eq!(log.delivered_after_exit, 0);
        assert_eq!(group.member(b).status(), MemberStatus::Left);

        assert_eq!(group.member(a).status(), MemberStatus::Normal);
        assert_eq!(group.view().unwrap().members, vec![EndpointId::new("a")]);
        assert!(group.log(a).casts.is_empty());
    }

    #[traced_test]
    #[test]
    fn test_blocked_sends_drain_in_order_into_next_view() {
        let (mut group, nodes) = formed(NetworkConfig::new(), &["a", "b"]);
        let (a, b) = (nodes[0], nodes[1]);
        let c = group.add_node("c");

        group.join(c).unwrap();
        while group.member(a).status() != MemberStatus::Blocked {
            assert!(group.step());
        }
        for i in 1..=3u8 {
            group.cast(a, vec![i]).unwrap();
        }
        group.cast(c, vec![9]).unwrap();
        assert_eq!(group.member(a).delayed_sends(), 3);
        assert_eq!(group.member(c).delayed_sends(), 1);

        group.run_until_idle(MAX_EVENTS);

        assert_eq!(
            payloads(&group.log(b).casts),
            vec![vec![1], vec![2], vec![3], vec![9]]
        );
        assert_eq!(payloads(&group.log(c).casts), vec![vec![1], vec![2], vec![3]]);
        assert_eq!(group.log(b).casts[3].0, Rank(2));
        assert_eq!(group.member(a).delayed_sends(), 0);
    }

    #[traced_test]
    #[test]
    fn test_send_to_leaving_member_never_reaches_successor() {
        let (mut group, nodes) = formed(NetworkConfig::new(), &["a", "b", "c"]);
        let (a, b, c) = (nodes[0], nodes[1], nodes[2]);

        group.leave(b).unwrap();
        while group.member(a).status() != MemberStatus::Blocked {
            assert!(group.step());
        }
        group.send(a, Rank(1), b"for-b".to_vec()).unwrap();
        group.run_until_idle(MAX_EVENTS);

        assert_eq!(
            group.view().unwrap().members,
            vec![EndpointId::new("a"), EndpointId::new("c")]
        );
        assert!(group.log(c).sends.is_empty());
        assert!(group.log(b).sends.is_empty());
        assert_eq!(group.log(b).exits, 1);
    }

    #[traced_test]
    #[test]
    fn test_send_deferred_across_join_reaches_intended_member() {
        let (mut group, nodes) = formed(NetworkConfig::new(), &["a", "c"]);
        let (a, c) = (nodes[0], nodes[1]);
        let b = group.add_node("b");

        group.join(b).unwrap();
        while group.member(a).status() != MemberStatus::Blocked {
            assert!(group.step());
        }
        group.send(a, Rank(1), b"for-c".to_vec()).unwrap();
        group.run_until_idle(MAX_EVENTS);

        assert_eq!(group.member(c).local_state().unwrap().rank, Rank(2));
        assert_eq!(group.log(c).sends, vec![(Rank(0), b"for-c".to_vec())]);
        assert!(group.log(b).sends.is_empty());
    }

    #[traced_test]
    #[test]
    fn test_point_to_point_and_local_sends() {
        let (mut group, nodes) = formed(NetworkConfig::new(), &["a", "b", "c"]);
        let (a, b, c) = (nodes[0], nodes[1], nodes[2]);

        group.send(a, Rank(2), b"to-c".to_vec()).unwrap();
        group.lsend(b, b"self".to_vec()).unwrap();
        let err = group.send(a, Rank(5), b"nobody".to_vec()).unwrap_err();
        assert_eq!(
            err,
            MembershipError::RankOutOfBounds {
                rank: Rank(5),
                members: 3
            }
        );
        group.run_until_idle(MAX_EVENTS);

        assert_eq!(group.log(c).sends, vec![(Rank(0), b"to-c".to_vec())]);
        assert_eq!(group.log(b).sends, vec![(Rank(1), b"self".to_vec())]);
        assert!(group.log(a).sends.is_empty());
    }

    #[traced_test]
    #[test]
    fn test_quorum_loss_fails_primary_only_members() {
        let config = NetworkConfig::new().with_quorum(3).with_primary_only(true);
        let (mut group, nodes) = formed(config, &["a", "b", "c", "d"]);
        let (a, b, c, d) = (nodes[0], nodes[1], nodes[2], nodes[3]);
        assert!(group.view().unwrap().is_primary);

        group.leave(b).unwrap();
        group.leave(c).unwrap();
        group.run_until_idle(MAX_EVENTS);

        let lost = MembershipError::QuorumLost {
            members: 2,
            quorum: 3,
        };
        for node in [a, d] {
            assert_eq!(group.member(node).status(), MemberStatus::Failed);
            assert_eq!(group.log(node).quorum_lost, Some(lost.clone()));
        }
        assert_eq!(group.cast(a, b"x".to_vec()).unwrap_err(), lost);
        assert_eq!(group.leave(d).unwrap_err(), lost);

        for node in [b, c] {
            assert_eq!(group.member(node).status(), MemberStatus::Left);
            assert_eq!(group.log(node).exits, 1);
        }
    }

    #[traced_test]
    #[test]
    fn test_async_transfer_canceled_by_view_change() {
        let (mut group, nodes) = formed(NetworkConfig::new(), &["a", "b"]);
        let (a, b) = (nodes[0], nodes[1]);
        let c = group.add_node("c");

        let id = group.request_state(a, XferMode::Async, b"q".to_vec()).unwrap();
        group.join(c).unwrap();
        group.run_until_idle(MAX_EVENTS);

        assert_eq!(group.log(b).asked, vec![(EndpointId::new("a"), id)]);
        assert_eq!(group.log(a).canceled, vec![id]);
        assert!(group.log(a).got_state.is_empty());

        let err = group
            .send_state(b, EndpointId::new("a"), id, b"late".to_vec())
            .unwrap_err();
        assert_eq!(
            err,
            MembershipError::StaleTransfer {
                id,
                current: LogicalTime(2)
            }
        );
    }

    #[traced_test]
    #[test]
    fn test_async_transfer_acknowledged_once() {
        let (mut group, nodes) = formed(NetworkConfig::new(), &["a", "b"]);
        let (a, b) = (nodes[0], nodes[1]);

        let id = group.request_state(a, XferMode::Async, b"q".to_vec()).unwrap();
        group.run_until_idle(MAX_EVENTS);
        let (origin, asked) = group.log(b).asked[0].clone();
        assert_eq!(asked, id);

        group.send_state(b, origin, id, b"state".to_vec()).unwrap();
        group.run_until_idle(MAX_EVENTS);
        assert_eq!(group.log(a).got_state, vec![(id, b"state".to_vec())]);

        group.xfer_done(a, id).unwrap();
        group.xfer_done(a, id).unwrap();
        assert_eq!(group.stats().xfers_done, 1);
        assert_eq!(group.member(a).pending_transfers(), 0);
    }

    #[traced_test]
    #[test]
    fn test_sync_transfer_takes_first_reply() {
        let (mut group, nodes) = formed(NetworkConfig::new(), &["a", "b", "c"]);
        let (a, b, c) = (nodes[0], nodes[1], nodes[2]);

        let id = group.request_state(a, XferMode::Sync, b"q".to_vec()).unwrap();
        group.run_until_idle(MAX_EVENTS);

        let (origin, _) = group.log(b).asked[0].clone();
        group
            .send_state(b, origin.clone(), id, b"from-b".to_vec())
            .unwrap();
        group.send_state(c, origin, id, b"from-c".to_vec()).unwrap();
        group.run_until_idle(MAX_EVENTS);

        assert_eq!(
            group.log(a).transfers,
            vec![(id, XferStatus::Success(b"from-b".to_vec()))]
        );
        assert_eq!(group.stats().xfers_done, 1);
    }

    #[traced_test]
    #[test]
    fn test_sync_transfer_without_providers_terminates() {
        let (mut group, nodes) = formed(NetworkConfig::new(), &["a"]);

        let id = group
            .request_state(nodes[0], XferMode::Sync, vec![])
            .unwrap();

        assert_eq!(group.log(nodes[0]).transfers, vec![(id, XferStatus::Terminated)]);
        assert_eq!(group.stats().xfers_done, 1);
    }

    #[traced_test]
    #[test]
    fn test_view_message_reaches_every_member() {
        let (mut group, nodes) = formed(NetworkConfig::new(), &["a", "b"]);
        let (a, b) = (nodes[0], nodes[1]);

        let err = group
            .downcall(b, |m| m.attach_view_message(b"nope".to_vec()))
            .unwrap_err();
        assert_eq!(err, MembershipError::NotCoordinator);

        group
            .downcall(a, |m| m.attach_view_message(b"hello".to_vec()))
            .unwrap();
        assert!(!group.changing());
        group.downcall(a, |m| m.prompt()).unwrap();
        group.run_until_idle(MAX_EVENTS);

        let expected = vec![(EndpointId::new("a"), b"hello".to_vec())];
        assert_eq!(group.log(a).view_messages, expected);
        assert_eq!(group.log(b).view_messages, expected);

        let view = group.view().unwrap();
        assert_eq!(view.ltime, LogicalTime(2));
        assert!(!view.is_transfer_view);
    }

    #[traced_test]
    #[test]
    fn test_protocol_change_installs_new_stack() {
        let (mut group, nodes) = formed(NetworkConfig::new(), &["a", "b"]);

        group
            .downcall(nodes[1], |m| m.change_protocol("Top:Pt2pt:Mnak"))
            .unwrap();
        group.run_until_idle(MAX_EVENTS);

        assert_eq!(group.view().unwrap().protocol, "Top:Pt2pt:Mnak");
        assert_eq!(
            group.member(nodes[0]).view().unwrap().protocol,
            "Top:Pt2pt:Mnak"
        );
    }

    #[traced_test]
    #[test]
    fn test_crashed_member_is_excluded() {
        let (mut group, nodes) = formed(NetworkConfig::new(), &["a", "b", "c"]);
        let (a, c) = (nodes[0], nodes[2]);

        group.crash(c);
        group.run_until_idle(MAX_EVENTS);

        let view = group.view().unwrap();
        assert_eq!(view.ltime, LogicalTime(2));
        assert_eq!(view.members, vec![EndpointId::new("a"), EndpointId::new("b")]);
        assert_eq!(group.log(a).views.len(), 2);
        assert_eq!(group.log(c).views.len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_suspected_member_never_sees_next_view() {
        let (mut group, nodes) = formed(NetworkConfig::new(), &["a", "b", "c"]);
        let (a, c) = (nodes[0], nodes[2]);

        group.downcall(a, |m| m.suspect(&[Rank(2)])).unwrap();
        group.run_until_idle(MAX_EVENTS);

        assert_eq!(group.view().unwrap().len(), 2);
        assert_eq!(group.member(c).status(), MemberStatus::Blocked);
        assert_eq!(group.member(c).ltime(), LogicalTime(1));
        assert_eq!(group.log(c).blocks, 1);
    }

    #[traced_test]
    #[test]
    fn test_heartbeat_and_flow_control_reach_members() {
        let (mut group, nodes) = formed(NetworkConfig::new(), &["a", "b"]);

        group.heartbeat();
        group.flow_block(nodes[1], Some(Rank(0)), true);
        group.run_until_idle(MAX_EVENTS);

        assert_eq!(group.log(nodes[0]).heartbeats, 1);
        assert_eq!(group.log(nodes[1]).heartbeats, 1);
        assert_eq!(group.log(nodes[1]).flow_blocks, vec![(Some(Rank(0)), true)]);
    }

    /// Seeded churn around an anchor member that never leaves.
    fn churn(seed: u64) -> SimulatedGroup {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut group = SimulatedGroup::new(NetworkConfig::new().with_seed(seed));
        let nodes: Vec<NodeIndex> = (0..6).map(|i| group.add_node(&format!("n{i}"))).collect();

        group.join(nodes[0]).unwrap();
        group.run_until_idle(MAX_EVENTS);

        for step in 0..150u32 {
            let node = nodes[rng.gen_range(1..nodes.len())];
            match group.member(node).status() {
                MemberStatus::Bogus | MemberStatus::Left => group.join(node).unwrap(),
                MemberStatus::Normal if rng.gen_bool(0.3) => group.leave(node).unwrap(),
                MemberStatus::Normal => group.cast(node, step.to_le_bytes().to_vec()).unwrap(),
                _ => {}
            }
            for _ in 0..rng.gen_range(0..6) {
                group.step();
            }
        }
        group.run_until_idle(MAX_EVENTS);
        group
    }

    #[traced_test]
    #[test]
    fn test_random_churn_preserves_view_invariants() {
        let group = churn(7);
        assert_eq!(group.pending_events(), 0);
        assert!(!group.changing());

        let history = group.history();
        assert!(history.len() > 1);
        for pair in history.windows(2) {
            assert_eq!(pair[1].ltime, pair[0].ltime.next());
        }
        for view in history {
            assert_eq!(view.coordinator_rank, Rank(0));
            assert_eq!(view.members.len(), view.addresses.len());
            assert!(view.members.windows(2).all(|w| w[0] < w[1]));
        }

        let current = group.view().unwrap();
        let mut coordinators = 0;
        for node in 0..group.node_count() as NodeIndex {
            let member = group.member(node);
            let log = group.log(node);
            assert!(log.views.windows(2).all(|w| w[0].ltime < w[1].ltime));
            assert_eq!(log.delivered_after_exit, 0);

            if current.contains(member.local()) {
                assert_eq!(member.status(), MemberStatus::Normal);
                assert_eq!(member.view(), Some(current));
                if member.local_state().unwrap().am_coordinator {
                    coordinators += 1;
                }
            } else {
                assert_ne!(member.status(), MemberStatus::Normal);
            }
        }
        assert_eq!(coordinators, 1);
    }

    #[test]
    fn test_same_seed_same_history() {
        let first = churn(42);
        let second = churn(42);
        assert_eq!(first.history(), second.history());
        assert_eq!(first.stats(), second.stats());
    }
}
