use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a [`Service`](crate::server::Service).
///
/// States only ever move forward, so they are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    Initializing,
    Binding,
    Registering,
    Running,
    ShuttingDown,
    Stopped,
}

/// Local addresses the two listeners ended up bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddrs {
    pub rpc: SocketAddr,
    pub status: SocketAddr,
}

pub(crate) struct Shared {
    state: watch::Sender<State>,
    bound: watch::Sender<Option<BoundAddrs>>,
    shutdown: CancellationToken,
    rpc_stop: CancellationToken,
    status_stop: CancellationToken,
}

impl Shared {
    pub(crate) fn new() -> Arc<Self> {
        let shutdown = CancellationToken::new();
        Arc::new(Self {
            state: watch::Sender::new(State::Initializing),
            bound: watch::Sender::new(None),
            rpc_stop: shutdown.child_token(),
            status_stop: shutdown.child_token(),
            shutdown,
        })
    }

    pub(crate) fn set_state(&self, state: State) {
        self.state.send_if_modified(|current| {
            if state > *current {
                *current = state;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn set_bound(&self, addrs: BoundAddrs) {
        self.bound.send_replace(Some(addrs));
    }

    /// Parent token: cancelling it stops everything.
    pub(crate) fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Child token stopping only the gRPC server.
    pub(crate) fn rpc_stop(&self) -> &CancellationToken {
        &self.rpc_stop
    }

    /// Child token stopping only the status server.
    pub(crate) fn status_stop(&self) -> &CancellationToken {
        &self.status_stop
    }
}

/// Cloneable remote control for a service, usable from any task.
#[derive(Clone)]
pub struct ServiceHandle {
    shared: Arc<Shared>,
}

impl ServiceHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn state(&self) -> State {
        *self.shared.state.borrow()
    }

    /// Waits until the service has reached `target` (or any later state),
    /// and returns the state it is in.
    pub async fn wait_for(&self, target: State) -> State {
        let mut rx = self.shared.state.subscribe();
        match rx.wait_for(|state| *state >= target).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Waits until the service is fully stopped.
    pub async fn stopped(&self) {
        self.wait_for(State::Stopped).await;
    }

    /// Waits for both listeners to be bound. `None` if the service stopped
    /// before getting there.
    pub async fn bound_addrs(&self) -> Option<BoundAddrs> {
        let mut bound = self.shared.bound.subscribe();
        let mut state = self.shared.state.subscribe();
        tokio::select! {
            addrs = bound.wait_for(Option::is_some) => addrs.ok().and_then(|addrs| *addrs),
            _ = state.wait_for(|state| *state == State::Stopped) => *self.shared.bound.borrow(),
        }
    }

    /// Requests the whole service to stop. Safe to call any number of times,
    /// from any number of tasks.
    pub fn shutdown(&self) {
        self.shared.shutdown().cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shared.shutdown().is_cancelled()
    }

    /// Stops the gRPC server alone, as if its listener had been closed
    /// underneath it. The status server follows.
    pub fn close_rpc_listener(&self) {
        self.shared.rpc_stop().cancel();
    }

    /// Stops the status server alone. The gRPC server follows.
    pub fn close_status_listener(&self) {
        self.shared.status_stop().cancel();
    }
}
