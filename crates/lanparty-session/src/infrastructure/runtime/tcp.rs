//! Minimal TCP game-session runtime.
//!
//! Hosting opens a TCP listener; every accepted stream is one remote peer.
//! Joining opens one stream to the host.  The only traffic is line-based
//! control text from host to clients:
//!
//! ```text
//! stage <name>\n
//! ```
//!
//! Game-state synchronisation is out of scope; this runtime exists so the
//! coordinator can be driven end to end on a real network.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::runtime::{NetworkSessionRuntime, PeerEvent, PeerId, RuntimeError};

/// How long a client waits for the host to accept its connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Roster-event buffer per subscriber.
const EVENT_CAPACITY: usize = 64;

/// Peer id a client uses for its host.
const HOST_PEER: PeerId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Offline,
    Host,
    Client,
}

struct TcpState {
    mode: Mode,
    local_addr: Option<SocketAddr>,
    /// Outgoing line queues of connected remote peers (host only).
    writers: HashMap<PeerId, mpsc::UnboundedSender<String>>,
    session: Option<CancellationToken>,
}

struct Inner {
    state: Mutex<TcpState>,
    events: broadcast::Sender<PeerEvent>,
    next_peer: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, TcpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a peer to the roster of the session `token` belongs to.
    fn register(&self, id: PeerId, tx: mpsc::UnboundedSender<String>, token: &CancellationToken) -> bool {
        {
            let mut state = self.lock();
            if token.is_cancelled() || state.mode != Mode::Host {
                return false;
            }
            state.writers.insert(id, tx);
        }
        let _ = self.events.send(PeerEvent::Connected(id));
        true
    }

    fn unregister(&self, id: PeerId) {
        let removed = self.lock().writers.remove(&id).is_some();
        if removed {
            let _ = self.events.send(PeerEvent::Disconnected(id));
        }
    }

    /// Closes the current session.  Returns `true` if one was open.
    fn close(&self) -> bool {
        let (dropped, was_client) = {
            let mut state = self.lock();
            let Some(token) = state.session.take() else {
                return false;
            };
            token.cancel();
            let was_client = state.mode == Mode::Client;
            state.mode = Mode::Offline;
            state.local_addr = None;
            let dropped: Vec<PeerId> = state.writers.drain().map(|(id, _)| id).collect();
            (dropped, was_client)
        };
        for id in dropped {
            let _ = self.events.send(PeerEvent::Disconnected(id));
        }
        if was_client {
            let _ = self.events.send(PeerEvent::Disconnected(HOST_PEER));
        }
        true
    }
}

/// A [`NetworkSessionRuntime`] over plain TCP.
pub struct TcpSessionRuntime {
    inner: Arc<Inner>,
}

impl TcpSessionRuntime {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(TcpState {
                    mode: Mode::Offline,
                    local_addr: None,
                    writers: HashMap::new(),
                    session: None,
                }),
                events,
                next_peer: AtomicU64::new(1),
            }),
        }
    }

    /// Address of the hosting listener, or of the client's end of its stream.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().local_addr
    }
}

impl Default for TcpSessionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TcpSessionRuntime {
    fn drop(&mut self) {
        self.inner.close();
    }
}

#[async_trait]
impl NetworkSessionRuntime for TcpSessionRuntime {
    async fn start_host(&self, bind: IpAddr, port: u16) -> Result<(), RuntimeError> {
        self.inner.close();

        let addr = SocketAddr::new(bind, port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RuntimeError::HostStart { addr, source })?;
        let local = listener
            .local_addr()
            .map_err(|source| RuntimeError::HostStart { addr, source })?;

        let token = CancellationToken::new();
        {
            let mut state = self.inner.lock();
            state.mode = Mode::Host;
            state.local_addr = Some(local);
            state.session = Some(token.clone());
        }
        info!("game session listening on TCP {local}");

        tokio::spawn(accept_loop(Arc::clone(&self.inner), listener, token));
        Ok(())
    }

    async fn start_client(&self, addr: SocketAddr) -> Result<(), RuntimeError> {
        self.inner.close();

        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(RuntimeError::ClientStart {
                    addr,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(RuntimeError::ClientStart {
                    addr,
                    reason: format!("no answer within {CONNECT_TIMEOUT:?}"),
                })
            }
        };

        let token = CancellationToken::new();
        {
            let mut state = self.inner.lock();
            state.mode = Mode::Client;
            state.local_addr = stream.local_addr().ok();
            state.session = Some(token.clone());
        }
        info!("connected to game session at {addr}");
        let _ = self.inner.events.send(PeerEvent::Connected(HOST_PEER));

        tokio::spawn(client_loop(Arc::clone(&self.inner), stream, token));
        Ok(())
    }

    async fn shutdown(&self) {
        if self.inner.close() {
            info!("game session closed");
        }
    }

    fn connected_peers(&self) -> usize {
        let state = self.inner.lock();
        match state.mode {
            Mode::Offline => 0,
            Mode::Host => 1 + state.writers.len(),
            Mode::Client => 2,
        }
    }

    fn is_host(&self) -> bool {
        self.inner.lock().mode == Mode::Host
    }

    fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.inner.events.subscribe()
    }

    async fn load_stage(&self, stage: &str) -> Result<(), RuntimeError> {
        if stage.is_empty() || stage.contains(['\n', '\r']) {
            return Err(RuntimeError::Stage {
                stage: stage.to_string(),
                reason: "stage names must be a single non-empty line".to_string(),
            });
        }

        let state = self.inner.lock();
        if state.mode != Mode::Host {
            return Err(RuntimeError::NotHosting);
        }
        let line = format!("stage {stage}\n");
        for (id, tx) in &state.writers {
            if tx.send(line.clone()).is_err() {
                debug!("peer {id} left before the stage change reached it");
            }
        }
        info!("stage {stage:?} sent to {} peer(s)", state.writers.len());
        Ok(())
    }
}

// ── Connection tasks ──────────────────────────────────────────────────────────

async fn accept_loop(inner: Arc<Inner>, listener: TcpListener, token: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let id = inner.next_peer.fetch_add(1, Ordering::Relaxed);
                    debug!("accepted peer {id} from {remote}");
                    tokio::spawn(serve_peer(Arc::clone(&inner), stream, id, token.child_token()));
                }
                Err(e) => warn!("game session accept failed: {e}"),
            },
        }
    }
    debug!("game session listener stopped");
}

async fn serve_peer(inner: Arc<Inner>, stream: TcpStream, id: PeerId, token: CancellationToken) {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut outgoing) = mpsc::unbounded_channel::<String>();
    if !inner.register(id, tx, &token) {
        return;
    }
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            line = outgoing.recv() => match line {
                Some(line) => {
                    if let Err(e) = write_half.write_all(line.as_bytes()).await {
                        debug!("write to peer {id} failed: {e}");
                        break;
                    }
                }
                None => break,
            },
            incoming = lines.next_line() => match incoming {
                Ok(Some(line)) => debug!("peer {id}: {line}"),
                Ok(None) => {
                    info!("peer {id} disconnected");
                    break;
                }
                Err(e) => {
                    debug!("read from peer {id} failed: {e}");
                    break;
                }
            },
        }
    }

    inner.unregister(id);
}

async fn client_loop(inner: Arc<Inner>, stream: TcpStream, token: CancellationToken) {
    let mut lines = BufReader::new(stream).lines();

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            incoming = lines.next_line() => match incoming {
                Ok(Some(line)) => match line.strip_prefix("stage ") {
                    Some(stage) => info!("host started stage {stage:?}"),
                    None => debug!("host: {line}"),
                },
                Ok(None) => {
                    info!("host closed the game session");
                    break;
                }
                Err(e) => {
                    warn!("game session connection failed: {e}");
                    break;
                }
            },
        }
    }

    // A newer session cancels this token before replacing it.
    if !token.is_cancelled() {
        inner.close();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
