//! Thread-safe group member handle.

use crate::{GroupCallbacks, RuntimeConfig, Transport};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, trace, warn};
use vsync_core::{
    Action, Event, GroupControl, MemberStatus, MembershipError, Notification, StateMachine,
};
use vsync_member::MemberStateMachine;
use vsync_types::{
    EndpointId, JoinOptions, LocalState, Rank, TransferId, ViewState, XferMode, XferStatus,
};

/// State guarded by the member lock.
struct Inner {
    machine: MemberStateMachine,

    /// Callers blocked in `leave`, woken by the exit.
    exit_waiters: Vec<Sender<()>>,

    /// Synchronous transfers a caller is blocked on.
    waiting: HashSet<TransferId>,

    /// Resolutions of waited-on transfers not yet picked up.
    resolved: HashMap<TransferId, XferStatus>,
}

/// A group member shared between the protocol thread and application
/// threads.
///
/// One mutex guards the member. Transport downcalls run while it is held,
/// so a delivery gate drain and its transmissions are atomic with respect
/// to concurrent senders. Application callbacks run after it is released.
pub struct GroupMember<T: Transport> {
    inner: Mutex<Inner>,

    /// Signalled when a waited-on synchronous transfer resolves.
    transfer_resolved: Condvar,

    transport: T,
    callbacks: Box<dyn GroupCallbacks>,
    config: RuntimeConfig,

    /// Origin of the member clock.
    started: Instant,
}

impl<T: Transport> GroupMember<T> {
    /// Create a member that has not joined yet.
    pub fn new(
        local: EndpointId,
        transport: T,
        callbacks: Box<dyn GroupCallbacks>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                machine: MemberStateMachine::new(local, config.member.clone()),
                exit_waiters: vec![],
                waiting: HashSet::new(),
                resolved: HashMap::new(),
            }),
            transfer_resolved: Condvar::new(),
            transport,
            callbacks,
            config,
            started: Instant::now(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════════

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Lifecycle status.
    pub fn status(&self) -> MemberStatus {
        self.inner.lock().machine.status()
    }

    /// Currently installed view.
    pub fn view(&self) -> Option<ViewState> {
        self.inner.lock().machine.view().cloned()
    }

    /// Local projection of the installed view.
    pub fn local_state(&self) -> Option<LocalState> {
        self.inner.lock().machine.local_state().cloned()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Transport Upcalls
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deliver a transport upcall. Called from the protocol thread.
    pub fn deliver(&self, event: Event) -> Result<(), MembershipError> {
        trace!(event = event.type_name(), "Delivering event");
        self.run(|inner| Ok(((), inner.machine.handle(event))))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Lifecycle Downcalls
    // ═══════════════════════════════════════════════════════════════════════════

    /// Join a group. Returns as soon as the request is handed to the
    /// transport; the first view arrives through `on_accepted_view`.
    pub fn join(&self, options: JoinOptions) -> Result<(), MembershipError> {
        self.run(|inner| Ok(((), inner.machine.join(options)?)))
    }

    /// Join with the options from the runtime configuration.
    pub fn join_configured(&self) -> Result<(), MembershipError> {
        self.join(self.config.join.clone())
    }

    /// Leave the group and wait for the exit confirmation.
    ///
    /// Fails with `Timeout` when no confirmation arrives within the
    /// configured leave timeout; the member stays leaving and the call may
    /// be retried. Must not be called from the protocol thread, which is the
    /// one delivering the confirmation.
    pub fn leave(&self) -> Result<(), MembershipError> {
        let (tx, rx) = channel::bounded(1);
        self.run(|inner| {
            let actions = inner.machine.leave()?;
            inner.exit_waiters.push(tx);
            Ok(((), actions))
        })?;

        let timeout = self.config.leave_timeout();
        match rx.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "No exit confirmation before timeout");
                Err(MembershipError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(self
                .inner
                .lock()
                .machine
                .failure()
                .cloned()
                .unwrap_or(MembershipError::Timeout(timeout))),
        }
    }

    /// Leave the group without waiting. The exit arrives through `on_exit`.
    pub fn request_leave(&self) -> Result<(), MembershipError> {
        self.run(|inner| Ok(((), inner.machine.leave()?)))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Data Downcalls
    // ═══════════════════════════════════════════════════════════════════════════

    /// Send to the member at `destination`.
    pub fn send(&self, destination: Rank, payload: Vec<u8>) -> Result<(), MembershipError> {
        self.run(|inner| Ok(((), inner.machine.send(destination, payload)?)))
    }

    /// Multicast to the group.
    pub fn cast(&self, payload: Vec<u8>) -> Result<(), MembershipError> {
        self.run(|inner| Ok(((), inner.machine.cast(payload)?)))
    }

    /// State-aware multicast.
    pub fn scast(&self, payload: Vec<u8>) -> Result<(), MembershipError> {
        self.run(|inner| Ok(((), inner.machine.scast(payload)?)))
    }

    /// Local send.
    pub fn lsend(&self, payload: Vec<u8>) -> Result<(), MembershipError> {
        self.run(|inner| Ok(((), inner.machine.lsend(payload)?)))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Group Control Downcalls
    // ═══════════════════════════════════════════════════════════════════════════

    /// Report members as failure-suspected.
    pub fn suspect(&self, ranks: &[Rank]) -> Result<(), MembershipError> {
        self.run(|inner| Ok(((), inner.machine.suspect(ranks)?)))
    }

    /// Ask for a new view.
    pub fn prompt(&self) -> Result<(), MembershipError> {
        self.run(|inner| Ok(((), inner.machine.prompt()?)))
    }

    /// Ask for the group key to be refreshed.
    pub fn rekey(&self) -> Result<(), MembershipError> {
        self.run(|inner| Ok(((), inner.machine.rekey()?)))
    }

    /// Switch protocol stack.
    pub fn change_protocol(&self, protocol: &str) -> Result<(), MembershipError> {
        self.run(|inner| Ok(((), inner.machine.change_protocol(protocol)?)))
    }

    /// Switch property list.
    pub fn change_properties(&self, properties: &str) -> Result<(), MembershipError> {
        self.run(|inner| Ok(((), inner.machine.change_properties(properties)?)))
    }

    /// Attach a message to the next view. Coordinator only.
    pub fn view_message(&self, payload: Vec<u8>) -> Result<(), MembershipError> {
        self.run(|inner| Ok(((), inner.machine.attach_view_message(payload)?)))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // State Transfer
    // ═══════════════════════════════════════════════════════════════════════════

    /// Request state and wait for the first reply.
    ///
    /// Resolves to `Terminated` when no provider answers before the view
    /// changes, and fails with `Timeout` after the configured synchronous
    /// transfer timeout.
    pub fn request_state(&self, payload: Vec<u8>) -> Result<XferStatus, MembershipError> {
        let id = self.run(|inner| {
            let (id, actions) = inner.machine.request_state(XferMode::Sync, payload)?;
            inner.waiting.insert(id);
            Ok((id, actions))
        })?;

        let timeout = self.config.sync_transfer_timeout();
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(status) = inner.resolved.remove(&id) {
                return Ok(status);
            }
            if self
                .transfer_resolved
                .wait_until(&mut inner, deadline)
                .timed_out()
            {
                if let Some(status) = inner.resolved.remove(&id) {
                    return Ok(status);
                }
                inner.waiting.remove(&id);
                warn!(%id, ?timeout, "Synchronous state transfer timed out");
                return Err(MembershipError::Timeout(timeout));
            }
        }
    }

    /// Request state without waiting. The state arrives through
    /// `on_got_state` (acknowledge with `xfer_done`) or the request is
    /// canceled through `on_xfer_canceled`.
    pub fn request_state_async(&self, payload: Vec<u8>) -> Result<TransferId, MembershipError> {
        self.run(|inner| inner.machine.request_state(XferMode::Async, payload))
    }

    /// Answer a state request received through `on_ask_state`.
    pub fn send_state(
        &self,
        origin: EndpointId,
        id: TransferId,
        payload: Vec<u8>,
    ) -> Result<(), MembershipError> {
        self.run(|inner| Ok(((), inner.machine.send_state(origin, id, payload)?)))
    }

    /// Acknowledge an asynchronous transfer. Idempotent.
    pub fn xfer_done(&self, id: TransferId) -> Result<(), MembershipError> {
        self.run(|inner| Ok(((), inner.machine.xfer_done(id)?)))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Action Execution
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run `f` under the lock, execute the downcalls it produced, release
    /// the lock and dispatch the notifications.
    fn run<R>(
        &self,
        f: impl FnOnce(&mut Inner) -> Result<(R, Vec<Action>), MembershipError>,
    ) -> Result<R, MembershipError> {
        let (value, notifications, outcome) = {
            let mut inner = self.inner.lock();
            inner.machine.set_time(self.started.elapsed());
            let (value, actions) = f(&mut *inner)?;
            let (notifications, outcome) = self.execute(&mut *inner, actions);
            (value, notifications, outcome)
        };

        for notification in &notifications {
            self.dispatch(notification);
        }

        outcome.map(|()| value)
    }

    /// Perform downcalls and lock-side bookkeeping. Returns the
    /// notifications to dispatch and the first transport failure.
    fn execute(
        &self,
        inner: &mut Inner,
        actions: Vec<Action>,
    ) -> (Vec<Notification>, Result<(), MembershipError>) {
        let mut notifications = vec![];
        let mut outcome = Ok(());

        for action in actions {
            let result = match action {
                Action::Transmit(message) => self.transport.request_send(&message),
                Action::RequestJoin(options) => self.transport.request_join(&options),
                Action::RequestLeave => self.transport.request_leave(),
                Action::BlockOk => self.transport.block_ok(),
                Action::Control(control) => self.control(&control),
                Action::Notify(notification) => {
                    self.note(inner, &notification);
                    notifications.push(notification);
                    Ok(())
                }
            };

            if let Err(e) = result {
                warn!(error = %e, "Transport downcall failed");
                if outcome.is_ok() {
                    outcome = Err(e.into());
                }
            }
        }

        (notifications, outcome)
    }

    fn control(&self, control: &GroupControl) -> Result<(), crate::TransportError> {
        match control {
            GroupControl::Suspect(ranks) => self.transport.suspect(ranks),
            GroupControl::Prompt => self.transport.prompt(),
            GroupControl::Rekey => self.transport.rekey(),
            GroupControl::ChangeProtocol(protocol) => self.transport.change_protocol(protocol),
            GroupControl::ChangeProperties(properties) => {
                self.transport.change_properties(properties)
            }
            GroupControl::XferDone => self.transport.xfer_done(),
            GroupControl::ViewMessage(payload) => self.transport.view_message(payload),
        }
    }

    /// Bookkeeping for notifications that wake blocked callers.
    fn note(&self, inner: &mut Inner, notification: &Notification) {
        match notification {
            Notification::Exit => {
                for waiter in inner.exit_waiters.drain(..) {
                    let _ = waiter.try_send(());
                }
            }
            Notification::StateTransfer { id, status } => {
                if inner.waiting.remove(id) {
                    inner.resolved.insert(*id, status.clone());
                    self.transfer_resolved.notify_all();
                }
            }
            Notification::QuorumLost(_) => {
                // Dropping the senders wakes blocked leavers with the failure.
                inner.exit_waiters.clear();
            }
            _ => {}
        }
    }

    fn dispatch(&self, notification: &Notification) {
        debug!(notification = notification.type_name(), "Dispatching callback");
        let callbacks = &self.callbacks;
        match notification {
            Notification::Block => callbacks.on_block(),
            Notification::AcceptedView { view, local } => callbacks.on_accepted_view(view, local),
            Notification::ViewMessage { origin, payload } => {
                callbacks.on_view_message(origin, payload)
            }
            Notification::Exit => callbacks.on_exit(),
            Notification::ReceiveCast { origin, payload } => {
                callbacks.on_receive_cast(*origin, payload)
            }
            Notification::ReceiveSend { origin, payload } => {
                callbacks.on_receive_send(*origin, payload)
            }
            Notification::Heartbeat { now } => callbacks.on_heartbeat(*now),
            Notification::FlowBlock { rank, on } => callbacks.on_flow_block(*rank, *on),
            Notification::AskState {
                origin,
                id,
                payload,
            } => callbacks.on_ask_state(origin, *id, payload),
            Notification::StateTransfer { id, status } => callbacks.on_state_transfer(*id, status),
            Notification::GotState { id, payload } => callbacks.on_got_state(*id, payload),
            Notification::XferCanceled { id } => callbacks.on_xfer_canceled(*id),
            Notification::QuorumLost(error) => callbacks.on_quorum_lost(error),
        }
    }
}
