//! Integration tests for the session coordinator.
//!
//! # Purpose
//!
//! These tests run [`SessionCoordinator`] through its public API against real
//! and scripted collaborators.  They verify:
//!
//! - End to end over loopback: one peer finds nothing and hosts, a second
//!   peer finds the first and joins, and the host starts the game.
//! - A burst of peer connections fires the room-full transition exactly once,
//!   and announcing stops before the countdown begins.
//! - Cancelling a search frees the discovery port for the very next attempt.
//! - A failed host start aborts the attempt and leaves the coordinator ready
//!   for a retry.
//! - A client that already joined a session can join again on a new attempt.
//!
//! # Role sequence
//!
//! ```text
//! Peer A                                   Peer B
//! ──────                                   ──────
//! Searching  (window closes, NotFound)
//! BecomingHost → Hosting/Broadcasting
//! Hosting/WaitingForPeers   ── announce ─▶ Searching
//!                           ◀─ connect ──  Client
//! Hosting/RoomFull → CountdownToStart
//! Hosting/HandoffToRuntime
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lanparty_core::domain::role::{HostPhase, SessionRole};
use lanparty_core::protocol::{Announcement, DiscoveryMessage, DiscoveryStatus};
use lanparty_session::application::coordinator::{
    CoordinatorConfig, MatchOutcome, SessionCoordinator, SessionError,
};
use lanparty_session::application::discovery::DiscoverySystem;
use lanparty_session::application::runtime::NetworkSessionRuntime;
use lanparty_session::infrastructure::network::{LanBroadcastDiscovery, LanDiscoveryConfig};
use lanparty_session::infrastructure::runtime::{MockSessionRuntime, TcpSessionRuntime};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

// ── Helpers ───────────────────────────────────────────────────────────────────

fn free_udp_port() -> u16 {
    let probe = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).expect("bind probe");
    probe.local_addr().expect("probe address").port()
}

fn free_tcp_port() -> u16 {
    let probe = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind probe");
    probe.local_addr().expect("probe address").port()
}

fn loopback_discovery(port: u16, timeout: Duration) -> LanBroadcastDiscovery {
    LanBroadcastDiscovery::new(LanDiscoveryConfig {
        port,
        timeout,
        broadcast_interval: Duration::from_millis(500),
        broadcast_addr: Ipv4Addr::LOCALHOST,
        advertise_addr: Some(Ipv4Addr::LOCALHOST),
        ..LanDiscoveryConfig::default()
    })
}

async fn wait_for_role(rx: &mut watch::Receiver<SessionRole>, role: SessionRole) {
    tokio::time::timeout(WAIT, rx.wait_for(|r| *r == role))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {role}"))
        .map(|_| ())
        .expect("role sender dropped");
}

/// Discovery that always returns the same search result.  Announcing runs
/// until cancelled and records the coordinator's role at the moment it stops.
struct ScriptedDiscovery {
    result: DiscoveryMessage,
    observed: Mutex<Option<watch::Receiver<SessionRole>>>,
    roles_at_stop: Mutex<Vec<SessionRole>>,
}

impl ScriptedDiscovery {
    fn new(result: DiscoveryMessage) -> Self {
        Self {
            result,
            observed: Mutex::new(None),
            roles_at_stop: Mutex::new(Vec::new()),
        }
    }

    fn observe(&self, roles: watch::Receiver<SessionRole>) {
        *self.observed.lock().unwrap() = Some(roles);
    }

    fn roles_at_stop(&self) -> Vec<SessionRole> {
        self.roles_at_stop.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiscoverySystem for ScriptedDiscovery {
    async fn find_session(&self, _cancel: CancellationToken) -> DiscoveryMessage {
        self.result.clone()
    }

    async fn start_session(&self, _game_port: u16, _capacity: u32, cancel: CancellationToken) {
        cancel.cancelled().await;
        let role = self
            .observed
            .lock()
            .unwrap()
            .as_ref()
            .map(|rx| *rx.borrow());
        if let Some(role) = role {
            self.roles_at_stop.lock().unwrap().push(role);
        }
    }
}

/// Wraps a discovery and records every search status.
struct RecordingDiscovery<D> {
    inner: D,
    statuses: Mutex<Vec<DiscoveryStatus>>,
}

#[async_trait]
impl<D: DiscoverySystem> DiscoverySystem for RecordingDiscovery<D> {
    async fn find_session(&self, cancel: CancellationToken) -> DiscoveryMessage {
        let result = self.inner.find_session(cancel).await;
        self.statuses.lock().unwrap().push(result.status());
        result
    }

    async fn start_session(&self, game_port: u16, capacity: u32, cancel: CancellationToken) {
        self.inner.start_session(game_port, capacity, cancel).await;
    }
}

// ── End to end ────────────────────────────────────────────────────────────────

/// Peer A searches for 1200 ms, finds nothing and hosts, announcing every
/// 500 ms.  Peer B then searches, finds A and joins.  A fills its room of two
/// and starts the game.  Neither side sees a cancelled outcome.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_peers_elect_host_and_start_game() {
    // Arrange
    let discovery_port = free_udp_port();
    let game_port = free_tcp_port();
    let config = CoordinatorConfig {
        game_port,
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        auto_start_delay: Duration::from_millis(200),
        ..CoordinatorConfig::default()
    };
    let runtime_a = Arc::new(TcpSessionRuntime::new());
    let runtime_b = Arc::new(TcpSessionRuntime::new());
    let peer_a = SessionCoordinator::new(
        Arc::new(loopback_discovery(discovery_port, Duration::from_millis(1200))),
        runtime_a.clone(),
        config.clone(),
    );
    let peer_b = SessionCoordinator::new(
        Arc::new(loopback_discovery(discovery_port, Duration::from_secs(3))),
        runtime_b.clone(),
        config,
    );
    let mut roles_a = peer_a.watch_role();

    // Act
    let task_a = tokio::spawn({
        let peer_a = peer_a.clone();
        async move { peer_a.start_matchmaking(2).await }
    });
    wait_for_role(&mut roles_a, SessionRole::Hosting(HostPhase::WaitingForPeers)).await;
    let outcome_b = tokio::time::timeout(WAIT, peer_b.start_matchmaking(2))
        .await
        .expect("peer B finished")
        .expect("peer B succeeded");
    let outcome_a = tokio::time::timeout(WAIT, task_a)
        .await
        .expect("peer A finished")
        .unwrap()
        .expect("peer A succeeded");

    // Assert
    assert_eq!(
        outcome_b,
        MatchOutcome::Joined {
            endpoint: (Ipv4Addr::LOCALHOST, game_port).into()
        }
    );
    assert_eq!(outcome_a, MatchOutcome::GameStarting);
    assert_eq!(peer_b.role(), SessionRole::Client);
    assert_eq!(
        peer_a.role(),
        SessionRole::Hosting(HostPhase::HandoffToRuntime)
    );
    assert!(runtime_a.is_host());
    assert_eq!(runtime_a.connected_peers(), 2);

    peer_b.cancel().await;
    peer_a.cancel().await;
}

/// A second attempt on a joined client closes the first connection while it
/// connects again.  That departure belongs to the old session and must not
/// push the new attempt into hosting.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_joined_client_can_join_again() {
    // Arrange
    let host = TcpSessionRuntime::new();
    host.start_host(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
        .await
        .expect("host on ephemeral port");
    let game_addr = host.local_addr().expect("listener address");
    let found = DiscoveryMessage::ok(Announcement::lan("127.0.0.1", game_addr.port(), 2));
    let runtime = Arc::new(TcpSessionRuntime::new());
    let client = SessionCoordinator::new(
        Arc::new(ScriptedDiscovery::new(found)),
        runtime.clone(),
        CoordinatorConfig {
            game_port: free_tcp_port(),
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..CoordinatorConfig::default()
        },
    );

    // Act
    let first = tokio::time::timeout(WAIT, client.start_matchmaking(2))
        .await
        .expect("first attempt finished")
        .expect("first attempt succeeded");
    let second = tokio::time::timeout(WAIT, client.start_matchmaking(2))
        .await
        .expect("second attempt finished")
        .expect("second attempt succeeded");

    // Assert
    assert_eq!(first, MatchOutcome::Joined { endpoint: game_addr });
    assert_eq!(second, MatchOutcome::Joined { endpoint: game_addr });
    assert_eq!(client.role(), SessionRole::Client);
    assert!(!runtime.is_host());

    client.cancel().await;
    host.shutdown().await;
}

// ── Room full ─────────────────────────────────────────────────────────────────

/// Connections racing in from several threads each see a full roster; the
/// game is still started exactly once, and announcing had already stopped
/// when the countdown began.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connect_burst_starts_game_once() {
    // Arrange
    let discovery = Arc::new(ScriptedDiscovery::new(DiscoveryMessage::not_found(None)));
    let runtime = Arc::new(MockSessionRuntime::new());
    let coordinator = SessionCoordinator::new(
        discovery.clone(),
        runtime.clone(),
        CoordinatorConfig {
            auto_start_delay: Duration::from_millis(50),
            ..CoordinatorConfig::default()
        },
    );
    discovery.observe(coordinator.watch_role());
    let mut roles = coordinator.watch_role();
    let task = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.start_matchmaking(3).await }
    });
    wait_for_role(&mut roles, SessionRole::Hosting(HostPhase::WaitingForPeers)).await;

    // Act
    let joins: Vec<_> = (0..6)
        .map(|_| {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.connect_peer() })
        })
        .collect();
    for join in joins {
        join.await.unwrap();
    }
    let outcome = tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();

    // Assert
    assert_eq!(outcome, MatchOutcome::GameStarting);
    assert_eq!(runtime.stages(), vec!["WaitScene".to_string()]);
    assert_eq!(
        discovery.roles_at_stop(),
        vec![SessionRole::Hosting(HostPhase::RoomFull)]
    );
}

// ── Cancellation ──────────────────────────────────────────────────────────────

/// Cancelling during a search, then starting again at once: the second
/// search binds the same port and runs to `NotFound`, not `Error`.
#[tokio::test]
async fn test_cancel_during_search_frees_port_for_next_attempt() {
    // Arrange
    let discovery = Arc::new(RecordingDiscovery {
        inner: loopback_discovery(free_udp_port(), Duration::from_millis(800)),
        statuses: Mutex::new(Vec::new()),
    });
    let runtime = Arc::new(MockSessionRuntime::new());
    let coordinator = SessionCoordinator::new(
        discovery.clone(),
        runtime.clone(),
        CoordinatorConfig::default(),
    );
    let first = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.start_matchmaking(2).await }
    });
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Act
    assert!(coordinator.cancel().await);
    let first_outcome = first.await.unwrap().unwrap();
    let mut roles = coordinator.watch_role();
    let second = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.start_matchmaking(2).await }
    });
    wait_for_role(&mut roles, SessionRole::Hosting(HostPhase::WaitingForPeers)).await;

    // Assert
    assert_eq!(first_outcome, MatchOutcome::Cancelled);
    assert_eq!(
        *discovery.statuses.lock().unwrap(),
        vec![DiscoveryStatus::Canceled, DiscoveryStatus::NotFound]
    );
    assert_eq!(runtime.host_starts().len(), 1);

    coordinator.cancel().await;
    assert_eq!(second.await.unwrap().unwrap(), MatchOutcome::Cancelled);
}

/// Cancelling an idle coordinator changes nothing and touches no resource.
#[tokio::test]
async fn test_cancel_idle_coordinator_is_a_no_op() {
    let runtime = Arc::new(MockSessionRuntime::new());
    let coordinator = SessionCoordinator::new(
        Arc::new(ScriptedDiscovery::new(DiscoveryMessage::not_found(None))),
        runtime.clone(),
        CoordinatorConfig::default(),
    );

    assert!(!coordinator.cancel().await);
    assert_eq!(coordinator.role(), SessionRole::Idle);
    assert_eq!(runtime.shutdown_count(), 0);
}

// ── Failures ──────────────────────────────────────────────────────────────────

/// A host-start failure is surfaced, the coordinator returns to `Idle`, and
/// the user can retry.
#[tokio::test]
async fn test_host_start_failure_is_reported_and_retryable() {
    // Arrange
    let runtime = Arc::new(MockSessionRuntime::new().failing_host_start());
    let coordinator = SessionCoordinator::new(
        Arc::new(ScriptedDiscovery::new(DiscoveryMessage::not_found(None))),
        runtime.clone(),
        CoordinatorConfig::default(),
    );

    // Act
    let first = coordinator.start_matchmaking(2).await;
    let role_after_failure = coordinator.role();
    let second = coordinator.start_matchmaking(2).await;

    // Assert
    assert!(matches!(first, Err(SessionError::HostStart(_))));
    assert_eq!(role_after_failure, SessionRole::Idle);
    assert!(matches!(second, Err(SessionError::HostStart(_))));
}

/// A search error degrades to hosting instead of failing the attempt.
#[tokio::test]
async fn test_search_error_degrades_to_hosting() {
    // Arrange
    let discovery = Arc::new(ScriptedDiscovery::new(DiscoveryMessage::fail("socket error")));
    let runtime = Arc::new(MockSessionRuntime::new());
    let coordinator = SessionCoordinator::new(
        discovery,
        runtime.clone(),
        CoordinatorConfig {
            auto_start_delay: Duration::from_millis(10),
            ..CoordinatorConfig::default()
        },
    );
    let mut roles = coordinator.watch_role();
    let task = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.start_matchmaking(2).await }
    });

    // Act
    wait_for_role(&mut roles, SessionRole::Hosting(HostPhase::WaitingForPeers)).await;
    runtime.connect_peer();
    let outcome = tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();

    // Assert
    assert_eq!(outcome, MatchOutcome::GameStarting);
    assert_eq!(runtime.host_starts().len(), 1);
}

/// Two coordinators linked through in-memory runtimes: the joiner occupies a
/// seat on the host's roster, which fills the room.
#[tokio::test]
async fn test_linked_mock_runtimes_fill_room() {
    // Arrange
    let host_runtime = Arc::new(MockSessionRuntime::new());
    let host = SessionCoordinator::new(
        Arc::new(ScriptedDiscovery::new(DiscoveryMessage::not_found(None))),
        host_runtime.clone(),
        CoordinatorConfig {
            auto_start_delay: Duration::from_millis(10),
            ..CoordinatorConfig::default()
        },
    );
    let joiner_runtime = Arc::new(MockSessionRuntime::new());
    joiner_runtime.link_host(host_runtime.clone());
    let joiner = SessionCoordinator::new(
        Arc::new(ScriptedDiscovery::new(DiscoveryMessage::ok(
            lanparty_core::protocol::Announcement::lan("127.0.0.1", 7777, 2),
        ))),
        joiner_runtime.clone(),
        CoordinatorConfig::default(),
    );
    let mut host_roles = host.watch_role();
    let host_task = tokio::spawn({
        let host = host.clone();
        async move { host.start_matchmaking(2).await }
    });
    wait_for_role(&mut host_roles, SessionRole::Hosting(HostPhase::WaitingForPeers)).await;

    // Act
    let joined = joiner.start_matchmaking(2).await.unwrap();
    let hosted = tokio::time::timeout(WAIT, host_task).await.unwrap().unwrap().unwrap();

    // Assert
    assert!(matches!(joined, MatchOutcome::Joined { .. }));
    assert_eq!(hosted, MatchOutcome::GameStarting);
    assert_eq!(host_runtime.stages().len(), 1);
}
