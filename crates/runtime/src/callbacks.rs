//! Application callbacks.

use std::time::Duration;
use tracing::error;
use vsync_core::MembershipError;
use vsync_types::{EndpointId, LocalState, Rank, TransferId, ViewState, XferStatus};

/// Application upcalls.
///
/// Every method has a default. All are no-ops except
/// [`on_quorum_lost`](GroupCallbacks::on_quorum_lost), which logs and
/// panics. Callbacks run with the member lock released and may call back
/// into the member.
#[allow(unused_variables)]
pub trait GroupCallbacks: Send + Sync {
    /// A multicast arrived.
    fn on_receive_cast(&self, origin: Rank, payload: &[u8]) {}

    /// A point-to-point message arrived.
    fn on_receive_send(&self, origin: Rank, payload: &[u8]) {}

    /// The coordinator attached a message to the installed view.
    fn on_view_message(&self, origin: &EndpointId, payload: &[u8]) {}

    /// A new view was installed.
    fn on_accepted_view(&self, view: &ViewState, local: &LocalState) {}

    /// A view change is starting; sends are deferred until the next view.
    fn on_block(&self) {}

    /// The member left the group.
    fn on_exit(&self) {}

    /// Periodic heartbeat.
    fn on_heartbeat(&self, now: Duration) {}

    /// Flow control toward `rank` (or the whole group) changed.
    fn on_flow_block(&self, rank: Option<Rank>, on: bool) {}

    /// Another member asks for our state. Answer with `send_state`.
    fn on_ask_state(&self, origin: &EndpointId, id: TransferId, payload: &[u8]) {}

    /// A synchronous transfer resolved.
    fn on_state_transfer(&self, id: TransferId, status: &XferStatus) {}

    /// An asynchronous transfer produced state. Acknowledge with `xfer_done`.
    fn on_got_state(&self, id: TransferId, payload: &[u8]) {}

    /// An asynchronous transfer was canceled.
    fn on_xfer_canceled(&self, id: TransferId) {}

    /// The member failed on quorum loss.
    fn on_quorum_lost(&self, error: &MembershipError) {
        fail_fast(error)
    }
}

/// Default reaction to quorum loss: log and abort the calling thread.
pub fn fail_fast(error: &MembershipError) -> ! {
    error!(%error, "Primary partition lost");
    panic!("{error}")
}

/// No-op callbacks.
pub struct NoCallbacks;

impl GroupCallbacks for NoCallbacks {}

/// Callbacks assembled from closures.
///
/// Unset entries fall back to the [`GroupCallbacks`] defaults.
///
/// # Example
///
/// ```ignore
/// let callbacks = CallbackTable::new()
///     .with_receive_cast(|origin, payload| println!("{origin}: {payload:?}"))
///     .with_block(|| println!("blocked"));
/// ```
#[derive(Default)]
pub struct CallbackTable {
    receive_cast: Option<Box<dyn Fn(Rank, &[u8]) + Send + Sync>>,
    receive_send: Option<Box<dyn Fn(Rank, &[u8]) + Send + Sync>>,
    view_message: Option<Box<dyn Fn(&EndpointId, &[u8]) + Send + Sync>>,
    accepted_view: Option<Box<dyn Fn(&ViewState, &LocalState) + Send + Sync>>,
    block: Option<Box<dyn Fn() + Send + Sync>>,
    exit: Option<Box<dyn Fn() + Send + Sync>>,
    heartbeat: Option<Box<dyn Fn(Duration) + Send + Sync>>,
    flow_block: Option<Box<dyn Fn(Option<Rank>, bool) + Send + Sync>>,
    ask_state: Option<Box<dyn Fn(&EndpointId, TransferId, &[u8]) + Send + Sync>>,
    state_transfer: Option<Box<dyn Fn(TransferId, &XferStatus) + Send + Sync>>,
    got_state: Option<Box<dyn Fn(TransferId, &[u8]) + Send + Sync>>,
    xfer_canceled: Option<Box<dyn Fn(TransferId) + Send + Sync>>,
    quorum_lost: Option<Box<dyn Fn(&MembershipError) + Send + Sync>>,
}

impl CallbackTable {
    /// Create a table with every entry unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the multicast handler.
    pub fn with_receive_cast(mut self, f: impl Fn(Rank, &[u8]) + Send + Sync + 'static) -> Self {
        self.receive_cast = Some(Box::new(f));
        self
    }

    /// Set the point-to-point handler.
    pub fn with_receive_send(mut self, f: impl Fn(Rank, &[u8]) + Send + Sync + 'static) -> Self {
        self.receive_send = Some(Box::new(f));
        self
    }

    /// Set the view message handler.
    pub fn with_view_message(
        mut self,
        f: impl Fn(&EndpointId, &[u8]) + Send + Sync + 'static,
    ) -> Self {
        self.view_message = Some(Box::new(f));
        self
    }

    /// Set the view installation handler.
    pub fn with_accepted_view(
        mut self,
        f: impl Fn(&ViewState, &LocalState) + Send + Sync + 'static,
    ) -> Self {
        self.accepted_view = Some(Box::new(f));
        self
    }

    /// Set the block handler.
    pub fn with_block(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.block = Some(Box::new(f));
        self
    }

    /// Set the exit handler.
    pub fn with_exit(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.exit = Some(Box::new(f));
        self
    }

    /// Set the heartbeat handler.
    pub fn with_heartbeat(mut self, f: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.heartbeat = Some(Box::new(f));
        self
    }

    /// Set the flow control handler.
    pub fn with_flow_block(
        mut self,
        f: impl Fn(Option<Rank>, bool) + Send + Sync + 'static,
    ) -> Self {
        self.flow_block = Some(Box::new(f));
        self
    }

    /// Set the state request handler.
    pub fn with_ask_state(
        mut self,
        f: impl Fn(&EndpointId, TransferId, &[u8]) + Send + Sync + 'static,
    ) -> Self {
        self.ask_state = Some(Box::new(f));
        self
    }

    /// Set the synchronous transfer handler.
    pub fn with_state_transfer(
        mut self,
        f: impl Fn(TransferId, &XferStatus) + Send + Sync + 'static,
    ) -> Self {
        self.state_transfer = Some(Box::new(f));
        self
    }

    /// Set the asynchronous state handler.
    pub fn with_got_state(mut self, f: impl Fn(TransferId, &[u8]) + Send + Sync + 'static) -> Self {
        self.got_state = Some(Box::new(f));
        self
    }

    /// Set the transfer cancellation handler.
    pub fn with_xfer_canceled(mut self, f: impl Fn(TransferId) + Send + Sync + 'static) -> Self {
        self.xfer_canceled = Some(Box::new(f));
        self
    }

    /// Set the quorum loss handler.
    pub fn with_quorum_lost(
        mut self,
        f: impl Fn(&MembershipError) + Send + Sync + 'static,
    ) -> Self {
        self.quorum_lost = Some(Box::new(f));
        self
    }
}

impl GroupCallbacks for CallbackTable {
    fn on_receive_cast(&self, origin: Rank, payload: &[u8]) {
        if let Some(f) = &self.receive_cast {
            f(origin, payload)
        }
    }

    fn on_receive_send(&self, origin: Rank, payload: &[u8]) {
        if let Some(f) = &self.receive_send {
            f(origin, payload)
        }
    }

    fn on_view_message(&self, origin: &EndpointId, payload: &[u8]) {
        if let Some(f) = &self.view_message {
            f(origin, payload)
        }
    }

    fn on_accepted_view(&self, view: &ViewState, local: &LocalState) {
        if let Some(f) = &self.accepted_view {
            f(view, local)
        }
    }

    fn on_block(&self) {
        if let Some(f) = &self.block {
            f()
        }
    }

    fn on_exit(&self) {
        if let Some(f) = &self.exit {
            f()
        }
    }

    fn on_heartbeat(&self, now: Duration) {
        if let Some(f) = &self.heartbeat {
            f(now)
        }
    }

    fn on_flow_block(&self, rank: Option<Rank>, on: bool) {
        if let Some(f) = &self.flow_block {
            f(rank, on)
        }
    }

    fn on_ask_state(&self, origin: &EndpointId, id: TransferId, payload: &[u8]) {
        if let Some(f) = &self.ask_state {
            f(origin, id, payload)
        }
    }

    fn on_state_transfer(&self, id: TransferId, status: &XferStatus) {
        if let Some(f) = &self.state_transfer {
            f(id, status)
        }
    }

    fn on_got_state(&self, id: TransferId, payload: &[u8]) {
        if let Some(f) = &self.got_state {
            f(id, payload)
        }
    }

    fn on_xfer_canceled(&self, id: TransferId) {
        if let Some(f) = &self.xfer_canceled {
            f(id)
        }
    }

    fn on_quorum_lost(&self, error: &MembershipError) {
        match &self.quorum_lost {
            Some(f) => f(error),
            None => fail_fast(error),
        }
    }
}
