//! In-memory session runtime for testing.
//!
//! Records every call the coordinator makes and lets tests drive the peer
//! roster by hand with [`MockSessionRuntime::connect_peer`] and
//! [`MockSessionRuntime::disconnect_peer`].  Two mocks can be linked so that a
//! client start on one registers a peer on the other, which is enough to run
//! two coordinators against each other without sockets.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::application::runtime::{NetworkSessionRuntime, PeerEvent, PeerId, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Offline,
    Host,
    Client { connected: bool },
}

struct MockState {
    mode: Mode,
    peers: Vec<PeerId>,
    next_peer: PeerId,
    host_starts: Vec<(IpAddr, u16)>,
    client_starts: Vec<SocketAddr>,
    shutdowns: usize,
    stages: Vec<String>,
    fail_host_start: bool,
    fail_client_start: bool,
    auto_connect: bool,
    linked_host: Option<Arc<MockSessionRuntime>>,
    /// Peer id this runtime holds on the linked host while joined.
    seat_on_host: Option<PeerId>,
}

/// A scripted [`NetworkSessionRuntime`].
pub struct MockSessionRuntime {
    state: Mutex<MockState>,
    events: broadcast::Sender<PeerEvent>,
}

impl MockSessionRuntime {
    /// Creates an offline runtime whose client starts connect immediately.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(MockState {
                mode: Mode::Offline,
                peers: Vec::new(),
                next_peer: 1,
                host_starts: Vec::new(),
                client_starts: Vec::new(),
                shutdowns: 0,
                stages: Vec::new(),
                fail_host_start: false,
                fail_client_start: false,
                auto_connect: true,
                linked_host: None,
                seat_on_host: None,
            }),
            events,
        }
    }

    /// Makes every `start_host` call fail.
    pub fn failing_host_start(self) -> Self {
        self.lock().fail_host_start = true;
        self
    }

    /// Makes every `start_client` call fail.
    pub fn failing_client_start(self) -> Self {
        self.lock().fail_client_start = true;
        self
    }

    /// Client starts succeed but never report a connection.
    pub fn without_auto_connect(self) -> Self {
        self.lock().auto_connect = false;
        self
    }

    /// Routes client starts to `host`: a successful start registers a peer on
    /// it, and shutting down removes that peer again.
    pub fn link_host(&self, host: Arc<MockSessionRuntime>) {
        self.lock().linked_host = Some(host);
    }

    /// Adds a remote peer to a hosted session and reports it.
    pub fn connect_peer(&self) -> PeerId {
        let id = {
            let mut state = self.lock();
            let id = state.next_peer;
            state.next_peer += 1;
            state.peers.push(id);
            id
        };
        let _ = self.events.send(PeerEvent::Connected(id));
        id
    }

    /// Removes a remote peer.  Returns `false` if it was not connected.
    pub fn disconnect_peer(&self, id: PeerId) -> bool {
        let removed = {
            let mut state = self.lock();
            let before = state.peers.len();
            state.peers.retain(|p| *p != id);
            state.peers.len() != before
        };
        if removed {
            let _ = self.events.send(PeerEvent::Disconnected(id));
        }
        removed
    }

    pub fn host_starts(&self) -> Vec<(IpAddr, u16)> {
        self.lock().host_starts.clone()
    }

    pub fn client_starts(&self) -> Vec<SocketAddr> {
        self.lock().client_starts.clone()
    }

    pub fn shutdown_count(&self) -> usize {
        self.lock().shutdowns
    }

    pub fn stages(&self) -> Vec<String> {
        self.lock().stages.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Leaves the current session without counting a shutdown call.
    fn close_session(&self) {
        let (dropped, seat) = {
            let mut state = self.lock();
            state.mode = Mode::Offline;
            let dropped = std::mem::take(&mut state.peers);
            let seat = state
                .seat_on_host
                .take()
                .and_then(|id| state.linked_host.clone().map(|host| (host, id)));
            (dropped, seat)
        };
        for id in dropped {
            let _ = self.events.send(PeerEvent::Disconnected(id));
        }
        if let Some((host, id)) = seat {
            host.disconnect_peer(id);
        }
    }
}

impl Default for MockSessionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkSessionRuntime for MockSessionRuntime {
    async fn start_host(&self, bind: IpAddr, port: u16) -> Result<(), RuntimeError> {
        self.close_session();
        let mut state = self.lock();
        state.host_starts.push((bind, port));
        if state.fail_host_start {
            return Err(RuntimeError::HostStart {
                addr: SocketAddr::new(bind, port),
                source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "mock host failure"),
            });
        }
        state.mode = Mode::Host;
        Ok(())
    }

    async fn start_client(&self, addr: SocketAddr) -> Result<(), RuntimeError> {
        self.close_session();
        let (auto_connect, host) = {
            let mut state = self.lock();
            state.client_starts.push(addr);
            if state.fail_client_start {
                return Err(RuntimeError::ClientStart {
                    addr,
                    reason: "mock client failure".to_string(),
                });
            }
            state.mode = Mode::Client { connected: false };
            (state.auto_connect, state.linked_host.clone())
        };
        if !auto_connect {
            return Ok(());
        }

        let seat = host.map(|host| host.connect_peer());
        {
            let mut state = self.lock();
            state.mode = Mode::Client { connected: true };
            state.seat_on_host = seat;
        }
        let _ = self.events.send(PeerEvent::Connected(0));
        Ok(())
    }

    async fn shutdown(&self) {
        self.lock().shutdowns += 1;
        self.close_session();
    }

    fn connected_peers(&self) -> usize {
        let state = self.lock();
        match state.mode {
            Mode::Offline => 0,
            Mode::Host => 1 + state.peers.len(),
            Mode::Client { connected: true } => 2,
            Mode::Client { connected: false } => 1,
        }
    }

    fn is_host(&self) -> bool {
        self.lock().mode == Mode::Host
    }

    fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    async fn load_stage(&self, stage: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        if state.mode != Mode::Host {
            return Err(RuntimeError::NotHosting);
        }
        state.stages.push(stage.to_string());
        Ok(())
    }
}
