//! WebSocket Game Server
//!
//! Async WebSocket gateway in front of the round service. Handles
//! authentication, commit/reveal routing, event subscriptions and the move
//! deadline sweeper.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ProtocolConfig;
use crate::network::auth::{validate_token, AuthConfig, AuthError};
use crate::network::protocol::{
    AuthRequest, AuthResult, ClientMessage, ErrorCode, MatchRef, RoundReply, ServerError, ServerMessage,
};
use crate::proof::oracle::ProofOracle;
use crate::round::events::{EventBus, MatchEvent};
use crate::round::machine::RoundService;
use crate::round::store::RoundStore;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle connections are dropped after this long.
    pub idle_timeout: Duration,
    /// Deadline sweeper period.
    pub sweep_interval: Duration,
    /// JWT validation settings.
    pub auth: AuthConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(5),
            auth: AuthConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Gateway settings derived from the protocol configuration.
    pub fn from_protocol(config: &ProtocolConfig) -> Self {
        Self {
            bind_addr: config.bind_addr,
            sweep_interval: config.sweep_interval(),
            auth: config.auth.clone(),
            ..Self::default()
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

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,
}

/// Connected client state shared with the cleanup loop.
struct ConnectedClient {
    /// Address after auth.
    address: Option<String>,
    /// Last activity.
    last_activity: Instant,
    /// Closes the connection task.
    kick: mpsc::Sender<()>,
}

/// Per-connection state owned by the connection task.
#[derive(Debug, Default)]
struct Connection {
    /// Authenticated address.
    address: Option<String>,
    /// Matches whose events are forwarded.
    subscriptions: BTreeSet<String>,
}

impl Connection {
    fn wants(&self, event: &MatchEvent) -> bool {
        self.subscriptions.contains(&event.match_id)
    }
}

/// The game server.
pub struct GameServer<S, O> {
    /// Server configuration.
    config: ServerConfig,
    /// Round state machine.
    service: Arc<RoundService<S, O>>,
    /// Event source for subscriptions.
    events: EventBus,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl<S: RoundStore, O: ProofOracle> GameServer<S, O> {
    /// Create a new game server. `events` must be the bus the service emits to.
    pub fn new(config: ServerConfig, service: Arc<RoundService<S, O>>, events: EventBus) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            service,
            events,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", self.config.bind_addr);
        if !self.config.auth.is_configured() {
            warn!("Authentication not configured; clients may act as any address");
        }

        let sweeper_handle = tokio::spawn(Self::run_sweeper_loop(
            self.service.clone(),
            self.config.sweep_interval,
        ));
        let cleanup_handle = tokio::spawn(Self::run_cleanup_loop(self.clients.clone(), self.config.idle_timeout));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("{}, rejecting {}", GameServerError::ConnectionLimitReached, addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
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

        sweeper_handle.abort();
        cleanup_handle.abort();

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let service = self.service.clone();
        let config = self.config.clone();
        let mut events_rx = self.events.subscribe();
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
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);
            let (kick_tx, mut kick_rx) = mpsc::channel::<()>(1);

            clients.write().await.insert(
                addr,
                ConnectedClient {
                    address: None,
                    last_activity: Instant::now(),
                    kick: kick_tx,
                },
            );

            // Spawn message sender task
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

            let mut conn = Connection::default();
            let mut bus_open = true;

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error(ServerError::new(
                                            ErrorCode::InvalidMessage,
                                            format!("Invalid message format: {}", e),
                                        ))).await;
                                        continue;
                                    }
                                };

                                {
                                    let mut clients = clients.write().await;
                                    if let Some(client) = clients.get_mut(&addr) {
                                        client.last_activity = Instant::now();
                                    }
                                }

                                let reply = Self::handle_client_message(&service, &config, &mut conn, client_msg).await;
                                if let ServerMessage::AuthResult(AuthResult { success: true, .. }) = &reply {
                                    let mut clients = clients.write().await;
                                    if let Some(client) = clients.get_mut(&addr) {
                                        client.address = conn.address.clone();
                                    }
                                }
                                let _ = msg_tx.send(reply).await;
                            }
                            Some(Ok(Message::Ping(_))) => {
                                let _ = msg_tx.send(ServerMessage::Pong {
                                    timestamp: 0,
                                    server_time: server_time_ms(),
                                }).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    event = events_rx.recv(), if bus_open => {
                        match event {
                            Ok(event) if conn.wants(&event) => {
                                let _ = msg_tx.send(ServerMessage::Event(event)).await;
                            }
                            Ok(_) => {}
                            Err(RecvError::Lagged(skipped)) => {
                                warn!("Client {} lagged, {} events dropped", addr, skipped);
                            }
                            Err(RecvError::Closed) => {
                                debug!("Event bus closed");
                                bus_open = false;
                            }
                        }
                    }
                    _ = kick_rx.recv() => {
                        info!("Closing idle client {}", addr);
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Let queued replies drain before the writer goes away.
            drop(msg_tx);
            let _ = sender_task.await;

            clients.write().await.remove(&addr);
            info!("Client {} cleaned up", addr);
        });
    }

    /// Handle a client message and produce its reply.
    async fn handle_client_message(
        service: &RoundService<S, O>,
        config: &ServerConfig,
        conn: &mut Connection,
        msg: ClientMessage,
    ) -> ServerMessage {
        if let Err(reply) = Self::authorize(config, conn, &msg) {
            return ServerMessage::Error(reply);
        }

        let now = Utc::now();
        match msg {
            ClientMessage::Auth(auth) => Self::handle_auth(config, conn, auth),
            ClientMessage::CreateMatch(req) => {
                if let Some(address) = &conn.address {
                    if address != req.player1.trim() && address != req.player2.trim() {
                        return ServerMessage::Error(ServerError::new(
                            ErrorCode::AddressMismatch,
                            "Cannot create a match you are not seated in",
                        ));
                    }
                }
                match service
                    .create_match(&req.match_id, &req.player1, &req.player2, req.format, now)
                    .await
                {
                    Ok(record) => ServerMessage::Match(record),
                    Err(e) => ServerMessage::Error(ServerError::from(&e)),
                }
            }
            ClientMessage::StartMatch(MatchRef { match_id }) => match service.start_match(&match_id, now).await {
                Ok(record) => ServerMessage::Match(record),
                Err(e) => ServerMessage::Error(ServerError::from(&e)),
            },
            ClientMessage::Commit(req) => {
                let (match_id, round) = (req.match_id.clone(), req.round);
                match service.commit(req, now).await {
                    Ok(response) => ServerMessage::Round(RoundReply {
                        match_id,
                        round,
                        response,
                    }),
                    Err(e) => ServerMessage::Error(ServerError::from(&e)),
                }
            }
            ClientMessage::Reveal(req) => {
                let (match_id, round) = (req.match_id.clone(), req.round);
                match service.reveal(req, now).await {
                    Ok(response) => ServerMessage::Round(RoundReply {
                        match_id,
                        round,
                        response,
                    }),
                    Err(e) => ServerMessage::Error(ServerError::from(&e)),
                }
            }
            ClientMessage::Status(req) => match service.round_status(&req.match_id, req.round).await {
                Ok(status) => ServerMessage::Status(status),
                Err(e) => ServerMessage::Error(ServerError::from(&e)),
            },
            ClientMessage::Subscribe(MatchRef { match_id }) => {
                conn.subscriptions.insert(match_id.clone());
                debug!("Subscribed to {}", match_id);
                ServerMessage::Subscribed(MatchRef { match_id })
            }
            ClientMessage::Unsubscribe(MatchRef { match_id }) => {
                conn.subscriptions.remove(&match_id);
                ServerMessage::Unsubscribed(MatchRef { match_id })
            }
            ClientMessage::Ping { timestamp } => ServerMessage::Pong {
                timestamp,
                server_time: server_time_ms(),
            },
        }
    }

    /// Gate player actions on the authenticated address.
    fn authorize(config: &ServerConfig, conn: &Connection, msg: &ClientMessage) -> Result<(), ServerError> {
        if !config.auth.is_configured() {
            return Ok(());
        }
        let needs_auth = matches!(
            msg,
            ClientMessage::CreateMatch(_) | ClientMessage::StartMatch(_) | ClientMessage::Commit(_) | ClientMessage::Reveal(_)
        );
        if !needs_auth {
            return Ok(());
        }
        let Some(address) = conn.address.as_deref() else {
            return Err(ServerError::new(ErrorCode::NotAuthenticated, "Must authenticate first"));
        };
        if let Some(acting) = msg.acting_address() {
            if acting.trim() != address {
                warn!("Connection authenticated as {} tried to act as {}", address, acting);
                return Err(ServerError::new(
                    ErrorCode::AddressMismatch,
                    "Authenticated address does not match request address",
                ));
            }
        }
        Ok(())
    }

    /// Handle authentication.
    fn handle_auth(config: &ServerConfig, conn: &mut Connection, auth: AuthRequest) -> ServerMessage {
        match validate_token(&auth.token, &config.auth) {
            Ok(address) => {
                debug!("Client authenticated as {} (client {})", address, auth.client_version);
                conn.address = Some(address.clone());
                ServerMessage::AuthResult(AuthResult {
                    success: true,
                    address: Some(address),
                    error: None,
                    server_version: config.version.clone(),
                })
            }
            Err(e) => {
                debug!("Authentication failed: {}", e);
                let code = match e {
                    AuthError::Expired => ErrorCode::TokenExpired,
                    AuthError::NotConfigured | AuthError::BadKey(_) => ErrorCode::AuthFailed,
                    _ => ErrorCode::InvalidToken,
                };
                ServerMessage::Error(ServerError::new(code, e.to_string()))
            }
        }
    }

    /// Run the move deadline sweeper.
    async fn run_sweeper_loop(service: Arc<RoundService<S, O>>, period: Duration) {
        let mut interval = interval(period);

        loop {
            interval.tick().await;
            match service.sweep_deadlines(Utc::now()).await {
                Ok(reports) => {
                    for report in reports {
                        info!(
                            "Deadline sweep: match {} round {} forced {:?}",
                            report.match_id, report.round, report.forced
                        );
                    }
                }
                Err(e) => warn!("Deadline sweep failed: {}", e),
            }
        }
    }

    /// Run cleanup loop.
    async fn run_cleanup_loop(clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>, idle_timeout: Duration) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            let now = Instant::now();
            let clients = clients.read().await;
            for (addr, client) in clients.iter() {
                if now.duration_since(client.last_activity) > idle_timeout {
                    debug!("Kicking idle client {} ({:?})", addr, client.address);
                    let _ = client.kick.try_send(());
                }
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Number of connections that have authenticated.
    pub async fn authenticated_count(&self) -> usize {
        self.clients.read().await.values().filter(|c| c.address.is_some()).count()
    }
}

fn server_time_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}
