//! WebSocket Broadcast Gateway
//!
//! Accepts WebSocket connections, drives the engine at the tick rate and
//! fans engine events out to every connected client. The engine is the
//! only authority: the gateway validates nothing about the game itself,
//! it just translates messages and routes events.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::core::fair::{CrashPointGenerator, FairnessError};
use crate::game::engine::{CrashEngine, EngineConfig};
use crate::game::events::GameEvent;
use crate::game::state::PlayerId;
use crate::network::protocol::{
    ClientMessage, ErrorCode, ServerMessage, HISTORY_RESPONSE_CAP,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-client outbound queue depth. A client that falls this far
    /// behind starts dropping messages instead of stalling the table.
    pub client_queue_depth: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            max_connections: 1000,
            client_queue_depth: 64,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The fairness generator could not be seeded.
    #[error("Fairness generator: {0}")]
    Fairness(#[from] FairnessError),
}

/// Connected client state.
struct ConnectedClient {
    /// Player identifier, set after a `join`.
    player_id: Option<PlayerId>,
    /// Connection time.
    #[allow(dead_code)]
    connected_at: Instant,
    /// Outbound queue to this client's sender task.
    sender: mpsc::Sender<ServerMessage>,
}

type ClientMap = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The game server: one engine, one table, many sockets.
pub struct GameServer {
    config: ServerConfig,
    engine: Arc<RwLock<CrashEngine>>,
    /// Tick interval the driver loop runs at.
    tick_interval_ms: u64,
    clients: ClientMap,
    /// Engine timestamps count from here.
    epoch: Instant,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server around a freshly seeded engine.
    pub fn new(config: ServerConfig) -> Result<Self, GameServerError> {
        let generator = CrashPointGenerator::new()?;
        Ok(Self::with_engine(
            config,
            CrashEngine::new(EngineConfig::default(), generator),
            EngineConfig::default().tick_interval_ms,
        ))
    }

    /// Create a server around an existing engine (tests and replays).
    pub fn with_engine(config: ServerConfig, engine: CrashEngine, tick_interval_ms: u64) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            engine: Arc::new(RwLock::new(engine)),
            tick_interval_ms,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            epoch: Instant::now(),
            shutdown_tx,
        }
    }

    /// Milliseconds since the server started; the engine's clock.
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Run the accept loop and the tick driver until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Crash server listening on {}", self.config.bind_addr);

        let tick_handle = self.spawn_tick_loop();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let connected = self.clients.read().await.len();
                            if connected >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        tick_handle.abort();
        Ok(())
    }

    /// Spawn the loop that drives the engine and routes its events.
    fn spawn_tick_loop(&self) -> tokio::task::JoinHandle<()> {
        let engine = self.engine.clone();
        let clients = self.clients.clone();
        let epoch = self.epoch;
        let tick_ms = self.tick_interval_ms;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(tick_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now_ms = epoch.elapsed().as_millis() as u64;
                        let events = engine.write().await.update(now_ms);
                        if !events.is_empty() {
                            Self::route_events(&clients, &events).await;
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    /// Deliver engine events: table-wide fan-out for most, direct delivery
    /// for player-addressed ones. `try_send` so a slow consumer drops its
    /// own messages instead of stalling the tick.
    async fn route_events(clients: &ClientMap, events: &[GameEvent]) {
        let clients = clients.read().await;
        for event in events {
            let Some(msg) = ServerMessage::from_event(event) else {
                continue;
            };
            match event.private_recipient() {
                Some(target) => {
                    for client in clients.values() {
                        if client.player_id == Some(target) {
                            let _ = client.sender.try_send(msg.clone());
                        }
                    }
                }
                None => {
                    for client in clients.values() {
                        if client.sender.try_send(msg.clone()).is_err() {
                            debug!("Dropping broadcast for a slow client");
                        }
                    }
                }
            }
        }
    }

    /// Fan one message out to every connected client.
    async fn broadcast(clients: &ClientMap, msg: ServerMessage) {
        let clients = clients.read().await;
        for client in clients.values() {
            let _ = client.sender.try_send(msg.clone());
        }
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let engine = self.engine.clone();
        let epoch = self.epoch;
        let version = self.config.version.clone();
        let queue_depth = self.config.client_queue_depth;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(queue_depth);

            {
                let mut clients = clients.write().await;
                clients.insert(
                    addr,
                    ConnectedClient {
                        player_id: None,
                        connected_at: Instant::now(),
                        sender: msg_tx.clone(),
                    },
                );
            }

            // Sender task: serialize and push queued messages to the socket.
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx
                                            .send(ServerMessage::error(
                                                ErrorCode::BadMessage,
                                                "Invalid message format",
                                            ))
                                            .await;
                                        continue;
                                    }
                                };
                                Self::handle_client_message(
                                    addr, client_msg, &clients, &engine, epoch, &version, &msg_tx,
                                )
                                .await;
                            }
                            Some(Ok(Message::Ping(_))) => {
                                let _ = msg_tx
                                    .send(ServerMessage::Pong {
                                        timestamp: 0,
                                        server_time: unix_ms(),
                                    })
                                    .await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx
                            .send(ServerMessage::Shutdown {
                                reason: "Server shutting down".to_string(),
                            })
                            .await;
                        break;
                    }
                }
            }

            sender_task.abort();

            // Remove the socket and release the player's seat.
            let player_id = {
                let mut clients_guard = clients.write().await;
                clients_guard.remove(&addr).and_then(|c| c.player_id)
            };
            if let Some(id) = player_id {
                engine.write().await.disconnect_player(id);
                let count = engine.read().await.player_count() as u32;
                Self::broadcast(&clients, ServerMessage::PlayersOnline { count }).await;
            }

            debug!("Client {} cleaned up", addr);
        });
    }

    /// Handle one parsed client message.
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        clients: &ClientMap,
        engine: &Arc<RwLock<CrashEngine>>,
        epoch: Instant,
        version: &str,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let now_ms = epoch.elapsed().as_millis() as u64;
        let joined = {
            let clients = clients.read().await;
            clients.get(&addr).and_then(|c| c.player_id)
        };

        match msg {
            ClientMessage::Join { player_id } => {
                let id = player_id
                    .as_deref()
                    .and_then(PlayerId::from_uuid_str)
                    .unwrap_or_else(PlayerId::random);

                let (balance, snapshot, count) = {
                    let mut engine = engine.write().await;
                    // A re-join releases the seat held by this socket so the
                    // ledger tracks sockets, not join requests.
                    if let Some(prev) = joined.filter(|prev| *prev != id) {
                        engine.disconnect_player(prev);
                    }
                    let seed_balance = engine.initial_balance();
                    let balance = engine.connect_player(id, seed_balance).balance;
                    (balance, engine.snapshot(), engine.player_count() as u32)
                };
                {
                    let mut clients = clients.write().await;
                    if let Some(client) = clients.get_mut(&addr) {
                        client.player_id = Some(id);
                    }
                }

                let _ = sender
                    .send(ServerMessage::Welcome {
                        player_id: id.to_uuid_string(),
                        balance,
                        snapshot,
                        server_version: version.to_string(),
                    })
                    .await;
                Self::broadcast(clients, ServerMessage::PlayersOnline { count }).await;
                info!("Player {} joined from {}", id.to_uuid_string(), addr);
            }

            ClientMessage::PlaceBet { amount } => {
                let Some(id) = joined else {
                    let _ = sender
                        .send(ServerMessage::error(ErrorCode::NotJoined, "Join first"))
                        .await;
                    return;
                };
                let result = engine.write().await.place_bet(id, amount, now_ms);
                let reply = match result {
                    Ok(balance) => ServerMessage::BetConfirmed { amount, balance },
                    Err(e) => ServerMessage::rejection(e),
                };
                let _ = sender.send(reply).await;
            }

            ClientMessage::CashOut => {
                let Some(id) = joined else {
                    let _ = sender
                        .send(ServerMessage::error(ErrorCode::NotJoined, "Join first"))
                        .await;
                    return;
                };
                let result = engine.write().await.cash_out(id, now_ms);
                let reply = match result {
                    Ok(receipt) => ServerMessage::CashOutConfirmed {
                        multiplier: receipt.multiplier,
                        payout: receipt.payout,
                        balance: receipt.balance,
                    },
                    Err(e) => ServerMessage::rejection(e),
                };
                let _ = sender.send(reply).await;
            }

            ClientMessage::StartAutobet { settings } => {
                let Some(id) = joined else {
                    let _ = sender
                        .send(ServerMessage::error(ErrorCode::NotJoined, "Join first"))
                        .await;
                    return;
                };
                let reply = match engine.write().await.start_autobet(id, settings) {
                    Ok(()) => ServerMessage::AutobetStarted,
                    Err(e) => ServerMessage::rejection(e),
                };
                let _ = sender.send(reply).await;
            }

            ClientMessage::StopAutobet => {
                let Some(id) = joined else {
                    let _ = sender
                        .send(ServerMessage::error(ErrorCode::NotJoined, "Join first"))
                        .await;
                    return;
                };
                let reply = match engine.write().await.stop_autobet(id) {
                    Ok(Some(state)) => ServerMessage::AutobetStopped {
                        reason: crate::game::autobet::StopReason::Manual,
                        state,
                    },
                    Ok(None) => {
                        ServerMessage::error(ErrorCode::NoActiveBet, "Autobet is not running")
                    }
                    Err(e) => ServerMessage::rejection(e),
                };
                let _ = sender.send(reply).await;
            }

            ClientMessage::RequestHistory { limit } => {
                let limit = limit.unwrap_or(HISTORY_RESPONSE_CAP).min(HISTORY_RESPONSE_CAP);
                let rounds = engine.read().await.history(limit);
                let _ = sender.send(ServerMessage::GameHistory { rounds }).await;
            }

            ClientMessage::VerifyFairness {
                seed,
                nonce,
                crash_point,
            } => {
                let reply = match CrashEngine::verify_crash_point(&seed, nonce, crash_point) {
                    Some(valid) => ServerMessage::FairnessResult {
                        nonce,
                        crash_point,
                        valid,
                    },
                    None => ServerMessage::error(
                        ErrorCode::BadSeed,
                        "Seed must be 32 hex-encoded bytes",
                    ),
                };
                let _ = sender.send(reply).await;
            }

            ClientMessage::Ping { timestamp } => {
                let _ = sender
                    .send(ServerMessage::Pong {
                        timestamp,
                        server_time: unix_ms(),
                    })
                    .await;
            }
        }
    }

    /// Signal every task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Active socket count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Seated player count.
    pub async fn player_count(&self) -> usize {
        self.engine.read().await.player_count()
    }

    /// Hex server seed, for end-of-run fairness disclosure.
    pub async fn seed_hex(&self) -> String {
        self.engine.read().await.seed_hex()
    }
}

/// Wall-clock milliseconds, for pong timestamps only.
fn unix_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::autobet::{Autobet, AutobetSettings, StopReason};
    use crate::game::state::PlayerId;

    fn test_server() -> GameServer {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let engine = CrashEngine::new(
            EngineConfig::default(),
            CrashPointGenerator::from_seed([3u8; 32]),
        );
        GameServer::with_engine(config, engine, EngineConfig::default().tick_interval_ms)
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.client_queue_depth, 64);
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = test_server();
        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.player_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let server = test_server();
        server.shutdown();
        // Should not panic
    }

    #[tokio::test]
    async fn test_event_routing_broadcast_and_private() {
        let clients: ClientMap = Arc::new(RwLock::new(BTreeMap::new()));
        let alice = PlayerId::new([1; 16]);
        let bob = PlayerId::new([2; 16]);

        let (alice_tx, mut alice_rx) = mpsc::channel(8);
        let (bob_tx, mut bob_rx) = mpsc::channel(8);
        {
            let mut guard = clients.write().await;
            guard.insert(
                "127.0.0.1:1001".parse().unwrap(),
                ConnectedClient {
                    player_id: Some(alice),
                    connected_at: Instant::now(),
                    sender: alice_tx,
                },
            );
            guard.insert(
                "127.0.0.1:1002".parse().unwrap(),
                ConnectedClient {
                    player_id: Some(bob),
                    connected_at: Instant::now(),
                    sender: bob_tx,
                },
            );
        }

        let autobet = Autobet::new(AutobetSettings::default());
        let events = vec![
            GameEvent::bet_placed(alice, 1.0, 9.0, false),
            GameEvent::autobet_stopped(alice, StopReason::ConditionsMet, autobet.state),
        ];
        GameServer::route_events(&clients, &events).await;

        // Both see the bet; only alice sees her autobet stop.
        assert!(matches!(
            alice_rx.try_recv().unwrap(),
            ServerMessage::BetPlaced { .. }
        ));
        assert!(matches!(
            alice_rx.try_recv().unwrap(),
            ServerMessage::AutobetStopped { .. }
        ));
        assert!(matches!(
            bob_rx.try_recv().unwrap(),
            ServerMessage::BetPlaced { .. }
        ));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejoin_releases_previous_seat() {
        let clients: ClientMap = Arc::new(RwLock::new(BTreeMap::new()));
        let engine = Arc::new(RwLock::new(CrashEngine::new(
            EngineConfig::default(),
            CrashPointGenerator::from_seed([3u8; 32]),
        )));
        let addr: SocketAddr = "127.0.0.1:1001".parse().unwrap();
        let (tx, _rx) = mpsc::channel(32);
        clients.write().await.insert(
            addr,
            ConnectedClient {
                player_id: None,
                connected_at: Instant::now(),
                sender: tx.clone(),
            },
        );

        let epoch = Instant::now();
        for _ in 0..5 {
            GameServer::handle_client_message(
                addr,
                ClientMessage::Join { player_id: None },
                &clients,
                &engine,
                epoch,
                "test",
                &tx,
            )
            .await;
        }

        // One socket holds one seat, no matter how often it joins.
        assert_eq!(engine.read().await.player_count(), 1);
        let seated = clients
            .read()
            .await
            .get(&addr)
            .and_then(|c| c.player_id)
            .unwrap();
        assert!(engine.read().await.player(seated).is_some());
    }

    #[tokio::test]
    async fn test_slow_client_does_not_block_routing() {
        let clients: ClientMap = Arc::new(RwLock::new(BTreeMap::new()));
        let id = PlayerId::new([1; 16]);

        // Queue of one, never drained.
        let (tx, _rx) = mpsc::channel(1);
        clients.write().await.insert(
            "127.0.0.1:1001".parse().unwrap(),
            ConnectedClient {
                player_id: Some(id),
                connected_at: Instant::now(),
                sender: tx,
            },
        );

        let events: Vec<GameEvent> = (0..10)
            .map(|i| GameEvent::multiplier_update(uuid::Uuid::new_v4(), 1.0 + i as f64))
            .collect();
        // Must return promptly; try_send drops once the queue is full.
        GameServer::route_events(&clients, &events).await;
    }
}
