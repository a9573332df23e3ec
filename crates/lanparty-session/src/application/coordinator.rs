//! SessionCoordinator: elects host or client and sequences session start-up.
//!
//! One call to [`SessionCoordinator::start_matchmaking`] runs one attempt:
//! search for a host, join it if an acceptable one answers, otherwise host a
//! session, announce it, and start the game once the roster is full.
//!
//! # Cancellation
//!
//! Every attempt owns a root [`CancellationToken`].  Sub-flows run under
//! children of it:
//!
//! ```text
//! attempt root
//! ├── search          (passed to DiscoverySystem::find_session)
//! └── host
//!     └── broadcast   (passed to DiscoverySystem::start_session)
//! ```
//!
//! [`SessionCoordinator::cancel`] cancels the root, so the cancellation reaches
//! every suspension point of the attempt.  Stopping the broadcast when the room
//! fills cancels only the broadcast leaf.
//!
//! # Attempt generations
//!
//! State writes carry the generation of the attempt that made them.  Cancelling
//! bumps the generation, so a cancelled attempt that is still unwinding can
//! never overwrite the role of the next one.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lanparty_core::domain::role::{HostPhase, SessionRole};
use lanparty_core::protocol::validation::DEFAULT_MAX_CAPACITY;
use lanparty_core::protocol::{DiscoveryStatus, ValidationRules};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::discovery::DiscoverySystem;
use crate::application::runtime::{NetworkSessionRuntime, PeerEvent, RuntimeError};

/// Error type for a matchmaking attempt.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Another attempt is still searching or hosting.
    #[error("a matchmaking attempt is already in progress ({0})")]
    AlreadyActive(SessionRole),

    /// A room must hold at least the local peer.
    #[error("invalid session capacity {0}")]
    InvalidCapacity(u32),

    /// The runtime refused to host.  The attempt was aborted.
    #[error("failed to start hosting: {0}")]
    HostStart(#[source] RuntimeError),

    /// The runtime refused the stage change.  The attempt was aborted.
    #[error("failed to start the game: {0}")]
    StageTransition(#[source] RuntimeError),
}

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Connected as a client to the host at `endpoint`.
    Joined { endpoint: SocketAddr },
    /// Hosted a full room and asked the runtime to load the first stage.
    GameStarting,
    /// The attempt was cancelled before reaching either terminal state.
    Cancelled,
}

/// Settings for [`SessionCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Port the runtime hosts on; also the port announced to searchers.
    pub game_port: u16,
    /// Address the runtime binds when hosting.
    pub bind_address: IpAddr,
    /// Delay between the room filling up and the stage transition.
    pub auto_start_delay: Duration,
    /// Stage loaded on hand-off.
    pub stage: String,
    /// When set, a roster that dropped below capacity during the countdown
    /// re-arms broadcasting instead of starting short-handed.
    pub recheck_capacity_before_start: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            game_port: 7777,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            auto_start_delay: Duration::from_secs(3),
            stage: "WaitScene".to_string(),
            recheck_capacity_before_start: false,
        }
    }
}

// ── Room-full latch ───────────────────────────────────────────────────────────

/// One-shot flag set when the roster first reaches capacity.
///
/// Claimed with a compare-and-set so that exactly one of several racing
/// observers wins.
#[derive(Debug, Default)]
pub struct RoomFullLatch(AtomicBool);

impl RoomFullLatch {
    /// Sets the flag.  Returns `true` only for the caller that flipped it.
    pub fn try_claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

// ── Coordinator ───────────────────────────────────────────────────────────────

struct CoordinatorState {
    role: SessionRole,
    capacity: u32,
    attempt: u64,
    attempt_token: Option<CancellationToken>,
    room_full: Arc<RoomFullLatch>,
    /// The runtime was asked to host or join during the current attempt.
    runtime_engaged: bool,
}

struct Shared {
    state: Mutex<CoordinatorState>,
    role_tx: watch::Sender<SessionRole>,
    /// Held for the duration of a search so that a new search cannot bind the
    /// discovery port before a cancelled one has released it.
    search_lock: tokio::sync::Mutex<()>,
}

/// The background announcement task of a hosted session.
struct Broadcast {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Broadcast {
    async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!("broadcast task ended abnormally: {e}");
        }
    }
}

enum JoinResult {
    Joined,
    Cancelled,
    Failed,
}

/// Orchestrates role election for one local peer.
///
/// Cheap to clone; clones share state, so one clone can run
/// [`start_matchmaking`](Self::start_matchmaking) while another calls
/// [`cancel`](Self::cancel).
#[derive(Clone)]
pub struct SessionCoordinator {
    discovery: Arc<dyn DiscoverySystem>,
    runtime: Arc<dyn NetworkSessionRuntime>,
    config: CoordinatorConfig,
    shared: Arc<Shared>,
}

impl SessionCoordinator {
    pub fn new(
        discovery: Arc<dyn DiscoverySystem>,
        runtime: Arc<dyn NetworkSessionRuntime>,
        config: CoordinatorConfig,
    ) -> Self {
        let (role_tx, _) = watch::channel(SessionRole::Idle);
        Self {
            discovery,
            runtime,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(CoordinatorState {
                    role: SessionRole::Idle,
                    capacity: 0,
                    attempt: 0,
                    attempt_token: None,
                    room_full: Arc::new(RoomFullLatch::default()),
                    runtime_engaged: false,
                }),
                role_tx,
                search_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Current role.
    pub fn role(&self) -> SessionRole {
        self.lock().role
    }

    /// Target capacity of the current (or last) attempt.
    pub fn capacity(&self) -> u32 {
        self.lock().capacity
    }

    /// Whether the room-full transition has fired in the current attempt.
    pub fn is_room_full(&self) -> bool {
        self.lock().room_full.is_set()
    }

    /// Subscribes to role changes.
    pub fn watch_role(&self) -> watch::Receiver<SessionRole> {
        self.shared.role_tx.subscribe()
    }

    /// Runs one matchmaking attempt for a room of `capacity` players.
    ///
    /// Allowed from `Idle` and from a finished attempt (`Client` or
    /// `Hosting(HandoffToRuntime)`); starting the runtime again closes the
    /// previous session.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidCapacity`] for a capacity of zero or above
    ///   [`DEFAULT_MAX_CAPACITY`], which no searcher would accept.
    /// - [`SessionError::AlreadyActive`] while another attempt is running.
    /// - [`SessionError::HostStart`] / [`SessionError::StageTransition`] when
    ///   the runtime fails; the coordinator is back in `Idle` afterwards.
    pub async fn start_matchmaking(&self, capacity: u32) -> Result<MatchOutcome, SessionError> {
        if capacity == 0 || capacity > DEFAULT_MAX_CAPACITY {
            return Err(SessionError::InvalidCapacity(capacity));
        }
        let (attempt, root, room_full) = self.begin_attempt(capacity)?;
        info!("matchmaking started (capacity {capacity})");

        if let Some(endpoint) = self.search(capacity, &root).await {
            match self.join(attempt, endpoint, &root).await {
                JoinResult::Joined => {
                    info!("joined session at {endpoint}");
                    return Ok(MatchOutcome::Joined { endpoint });
                }
                JoinResult::Cancelled => return Ok(MatchOutcome::Cancelled),
                JoinResult::Failed => info!("could not join {endpoint}; hosting instead"),
            }
        }
        if root.is_cancelled() {
            return Ok(MatchOutcome::Cancelled);
        }

        self.host(attempt, capacity, &root, &room_full).await
    }

    /// Cancels the running attempt and shuts down any session it opened.
    ///
    /// Returns `false`, touching nothing, when the coordinator is idle.
    pub async fn cancel(&self) -> bool {
        let engaged = {
            let mut state = self.lock();
            if !state.role.is_active() {
                return false;
            }
            info!("cancelling matchmaking ({})", state.role);
            self.reset_locked(&mut state)
        };
        if engaged {
            self.runtime.shutdown().await;
        }
        true
    }

    // ── Attempt flow ─────────────────────────────────────────────────────────

    fn begin_attempt(
        &self,
        capacity: u32,
    ) -> Result<(u64, CancellationToken, Arc<RoomFullLatch>), SessionError> {
        let mut state = self.lock();
        if state.role.is_active() && !state.role.is_terminal() {
            return Err(SessionError::AlreadyActive(state.role));
        }
        if let Some(previous) = state.attempt_token.take() {
            previous.cancel();
        }

        let root = CancellationToken::new();
        state.attempt += 1;
        state.capacity = capacity;
        state.attempt_token = Some(root.clone());
        state.room_full = Arc::new(RoomFullLatch::default());
        state.role = SessionRole::Searching;
        self.shared.role_tx.send_replace(SessionRole::Searching);

        Ok((state.attempt, root, Arc::clone(&state.room_full)))
    }

    /// Searches once and returns the endpoint of an acceptable host.
    async fn search(&self, capacity: u32, root: &CancellationToken) -> Option<SocketAddr> {
        let result = {
            let _port = self.shared.search_lock.lock().await;
            if root.is_cancelled() {
                return None;
            }
            self.discovery.find_session(root.child_token()).await
        };

        match result.status() {
            DiscoveryStatus::Success => {
                if let Err(e) = result.check(&ValidationRules::for_capacity(capacity)) {
                    info!("ignoring announcement: {e}");
                    return None;
                }
                let endpoint = result.endpoint();
                if endpoint.is_none() {
                    warn!("announcement address {:?} is not usable", result.ip());
                }
                endpoint
            }
            DiscoveryStatus::NotFound => {
                info!("no session found");
                None
            }
            DiscoveryStatus::Canceled => {
                debug!("search cancelled");
                None
            }
            DiscoveryStatus::Error => {
                warn!(
                    "discovery failed, treating as not found: {}",
                    result.error().unwrap_or("unknown error")
                );
                None
            }
        }
    }

    async fn join(
        &self,
        attempt: u64,
        endpoint: SocketAddr,
        root: &CancellationToken,
    ) -> JoinResult {
        if !self.transition(attempt, SessionRole::Client) {
            return JoinResult::Cancelled;
        }
        self.mark_engaged(attempt);

        if let Err(e) = self.runtime.start_client(endpoint).await {
            warn!("client start failed: {e}");
            self.runtime.shutdown().await;
            return JoinResult::Failed;
        }
        if root.is_cancelled() {
            // Cancelled while connecting; drop the fresh connection.
            self.runtime.shutdown().await;
            return JoinResult::Cancelled;
        }

        // Subscribe only now: starting the client closes any previous session,
        // and its departures must not read as the new host dropping us.
        let mut events = self.runtime.subscribe();
        match self.runtime.connected_peers() {
            0 => {
                warn!("host {endpoint} dropped the connection");
                self.runtime.shutdown().await;
                return JoinResult::Failed;
            }
            1 => {}
            _ => return JoinResult::Joined,
        }

        loop {
            tokio::select! {
                biased;
                _ = root.cancelled() => return JoinResult::Cancelled,
                event = events.recv() => match event {
                    Ok(PeerEvent::Connected(_)) => return JoinResult::Joined,
                    Ok(PeerEvent::Disconnected(_)) => {
                        warn!("host {endpoint} dropped the connection");
                        self.runtime.shutdown().await;
                        return JoinResult::Failed;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.runtime.connected_peers() > 0 {
                            return JoinResult::Joined;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("runtime closed its event channel");
                        self.runtime.shutdown().await;
                        return JoinResult::Failed;
                    }
                },
            }
        }
    }

    async fn host(
        &self,
        attempt: u64,
        capacity: u32,
        root: &CancellationToken,
        room_full: &RoomFullLatch,
    ) -> Result<MatchOutcome, SessionError> {
        if !self.transition(attempt, SessionRole::BecomingHost) {
            return Ok(MatchOutcome::Cancelled);
        }
        let host_scope = root.child_token();
        let mut events = self.runtime.subscribe();
        self.mark_engaged(attempt);

        if let Err(e) = self
            .runtime
            .start_host(self.config.bind_address, self.config.game_port)
            .await
        {
            error!("host start failed: {e}");
            self.abort(attempt).await;
            return Err(SessionError::HostStart(e));
        }
        if host_scope.is_cancelled() {
            // Cancelled while the listener was opening; close it again.
            self.runtime.shutdown().await;
            return Ok(MatchOutcome::Cancelled);
        }
        info!(
            "hosting on {}:{}",
            self.config.bind_address, self.config.game_port
        );

        if !self.transition(attempt, SessionRole::Hosting(HostPhase::Broadcasting)) {
            return Ok(MatchOutcome::Cancelled);
        }
        let mut broadcast = Some(self.spawn_broadcast(capacity, &host_scope));
        if !self.transition(attempt, SessionRole::Hosting(HostPhase::WaitingForPeers)) {
            stop_broadcast(&mut broadcast).await;
            return Ok(MatchOutcome::Cancelled);
        }

        loop {
            let peers = self.runtime.connected_peers();
            if peers >= capacity as usize && !host_scope.is_cancelled() && room_full.try_claim() {
                info!("room full ({peers}/{capacity})");
                self.transition(attempt, SessionRole::Hosting(HostPhase::RoomFull));
                stop_broadcast(&mut broadcast).await;

                if !self.transition(attempt, SessionRole::Hosting(HostPhase::CountdownToStart)) {
                    return Ok(MatchOutcome::Cancelled);
                }
                tokio::select! {
                    biased;
                    _ = host_scope.cancelled() => return Ok(MatchOutcome::Cancelled),
                    _ = tokio::time::sleep(self.config.auto_start_delay) => {}
                }

                let peers = self.runtime.connected_peers();
                if self.config.recheck_capacity_before_start && peers < capacity as usize {
                    info!("roster dropped to {peers}/{capacity} during countdown; announcing again");
                    room_full.reset();
                    broadcast = Some(self.spawn_broadcast(capacity, &host_scope));
                    if !self.transition(attempt, SessionRole::Hosting(HostPhase::WaitingForPeers)) {
                        stop_broadcast(&mut broadcast).await;
                        return Ok(MatchOutcome::Cancelled);
                    }
                    continue;
                }

                return self.hand_off(attempt).await;
            }

            tokio::select! {
                biased;
                _ = host_scope.cancelled() => {
                    stop_broadcast(&mut broadcast).await;
                    return Ok(MatchOutcome::Cancelled);
                }
                event = events.recv() => match event {
                    Ok(PeerEvent::Connected(peer)) => {
                        info!("peer {peer} connected ({}/{capacity})", self.runtime.connected_peers());
                    }
                    Ok(PeerEvent::Disconnected(peer)) => {
                        info!("peer {peer} disconnected ({}/{capacity})", self.runtime.connected_peers());
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!("missed {missed} roster events; re-reading peer count");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("runtime closed its event channel; abandoning host attempt");
                        stop_broadcast(&mut broadcast).await;
                        self.abort(attempt).await;
                        return Ok(MatchOutcome::Cancelled);
                    }
                },
            }
        }
    }

    async fn hand_off(&self, attempt: u64) -> Result<MatchOutcome, SessionError> {
        let still_hosting = {
            let state = self.lock();
            state.attempt == attempt
                && state.role == SessionRole::Hosting(HostPhase::CountdownToStart)
        } && self.runtime.is_host();
        if !still_hosting {
            info!("no longer hosting; skipping stage transition");
            return Ok(MatchOutcome::Cancelled);
        }

        match self.runtime.load_stage(&self.config.stage).await {
            Ok(()) => {
                info!("loading stage {:?}", self.config.stage);
                self.transition(attempt, SessionRole::Hosting(HostPhase::HandoffToRuntime));
                Ok(MatchOutcome::GameStarting)
            }
            Err(e) => {
                error!("stage transition failed: {e}");
                self.abort(attempt).await;
                Err(SessionError::StageTransition(e))
            }
        }
    }

    fn spawn_broadcast(&self, capacity: u32, host_scope: &CancellationToken) -> Broadcast {
        let token = host_scope.child_token();
        let discovery = Arc::clone(&self.discovery);
        let port = self.config.game_port;
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            discovery.start_session(port, capacity, task_token).await;
        });
        Broadcast { token, task }
    }

    // ── State helpers ────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the current attempt to `role`.  Returns `false` without touching
    /// state if `attempt` is no longer current.
    fn transition(&self, attempt: u64, role: SessionRole) -> bool {
        let mut state = self.lock();
        if state.attempt != attempt {
            return false;
        }
        debug!("role {} -> {role}", state.role);
        state.role = role;
        self.shared.role_tx.send_replace(role);
        true
    }

    fn mark_engaged(&self, attempt: u64) {
        let mut state = self.lock();
        if state.attempt == attempt {
            state.runtime_engaged = true;
        }
    }

    /// Ends `attempt` after a fatal failure, if it is still current.
    async fn abort(&self, attempt: u64) {
        let engaged = {
            let mut state = self.lock();
            if state.attempt != attempt {
                return;
            }
            self.reset_locked(&mut state)
        };
        if engaged {
            self.runtime.shutdown().await;
        }
    }

    /// Cancels the current attempt and returns to `Idle`.  Returns whether the
    /// runtime needs shutting down.
    fn reset_locked(&self, state: &mut CoordinatorState) -> bool {
        state.attempt += 1;
        if let Some(token) = state.attempt_token.take() {
            token.cancel();
        }
        state.room_full.reset();
        state.role = SessionRole::Idle;
        self.shared.role_tx.send_replace(SessionRole::Idle);
        std::mem::take(&mut state.runtime_engaged)
    }
}

async fn stop_broadcast(broadcast: &mut Option<Broadcast>) {
    if let Some(running) = broadcast.take() {
        running.stop().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
