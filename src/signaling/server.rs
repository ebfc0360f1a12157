use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};

use super::actor::RoomRegistry;
use super::broker::Broker;
use super::messages::{ClientMessage, ServerMessage};
use super::relay::{Signal, SignalingRelay};
use super::session::{SessionEvent, SessionLifecycleController, SessionTable};
use super::types::{Destination, ErrorCode, OutboundMessage, RoomId, SessionId, UserId};
use crate::config::Config;

pub const DEFAULT_SIGNALING_PORT: u16 = 3479;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a connection task needs
#[derive(Clone)]
struct ConnectionContext {
    broker: Broker,
    relay: SignalingRelay,
    controller: SessionLifecycleController,
    allowed_origins: Arc<Vec<String>>,
}

pub struct SignalingServer {
    registry: RoomRegistry,
    ctx: ConnectionContext,
}

impl SignalingServer {
    pub fn new(config: &Config) -> Self {
        let registry = RoomRegistry::spawn(config.max_participants);
        let broker = Broker::new();
        let sessions = SessionTable::new();

        let relay = SignalingRelay::new(registry.clone(), broker.clone(), sessions.clone());
        let controller = SessionLifecycleController::new(registry.clone(), broker.clone(), sessions);

        Self {
            registry,
            ctx: ConnectionContext {
                broker,
                relay,
                controller,
                allowed_origins: Arc::new(config.allowed_origins.clone()),
            },
        }
    }

    /// Read-only queries (participants, eligibility, stats) for admin surfaces
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub async fn run(&self, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Signaling server listening on {}", addr);

        loop {
            let (stream, addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    return Ok(());
                }
            };
            let ctx = self.ctx.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, ctx).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

/// Attributes read from the upgrade request's query string
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Handshake {
    #[serde(default)]
    user_id: Option<UserId>,
    #[serde(default)]
    room_id: Option<RoomId>,
}

fn parse_handshake(query: Option<&str>) -> Handshake {
    let Some(query) = query else {
        return Handshake::default();
    };
    match serde_urlencoded::from_str::<Handshake>(query) {
        Ok(handshake) => Handshake {
            user_id: handshake.user_id.filter(|id| !id.is_empty()),
            room_id: handshake.room_id.filter(|id| !id.is_empty()),
        },
        Err(e) => {
            warn!("Ignoring malformed handshake query {:?}: {}", query, e);
            Handshake::default()
        }
    }
}

fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    origin.is_some_and(|origin| allowed.iter().any(|a| a == origin))
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: ConnectionContext,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut handshake = Handshake::default();
    let allowed_origins = ctx.allowed_origins.clone();
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let origin = req
            .headers()
            .get("origin")
            .and_then(|value| value.to_str().ok());
        if !origin_allowed(&allowed_origins, origin) {
            warn!("Rejected origin {:?} from {}", origin, addr);
            let mut err = ErrorResponse::new(Some("origin not allowed".to_string()));
            *err.status_mut() = StatusCode::FORBIDDEN;
            return Err(err);
        }
        handshake = parse_handshake(req.uri().query());
        Ok(resp)
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let session_id = SessionId::generate();
    info!("WebSocket connection from {} (session {})", addr, session_id);

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    ctx.broker.register(session_id, tx).await;
    if let Some(user_id) = &handshake.user_id {
        ctx.broker
            .subscribe(session_id, Destination::User(user_id.clone()))
            .await;
    }
    ctx.controller
        .handle(SessionEvent::Connected {
            session_id,
            user_id: handshake.user_id,
            room_id: handshake.room_id,
        })
        .await;

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", addr);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(tokio::time::Instant::now() + PONG_TIMEOUT);
                debug!("Ping sent to {}", addr);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", addr);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        handle_text_message(&text, session_id, &ctx).await;
                    }
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", addr);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", addr);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    ctx.broker.unregister(&session_id).await;
    ctx.controller
        .handle(SessionEvent::Disconnected { session_id })
        .await;

    send_task.abort();
    info!("WebSocket disconnected: {} (session {})", addr, session_id);

    Ok(())
}

async fn handle_text_message(text: &str, session_id: SessionId, ctx: &ConnectionContext) {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("Invalid message from {}: {}", session_id, e);
            let err = ServerMessage::Error {
                code: ErrorCode::InvalidMessage,
                message: format!("Invalid message: {}", e),
            };
            ctx.broker.send_to_session(&session_id, &err).await;
            return;
        }
    };

    match client_msg {
        ClientMessage::Subscribe { destination } => {
            match destination.parse::<Destination>() {
                Ok(dest) => {
                    ctx.broker.subscribe(session_id, dest).await;
                }
                Err(e) => {
                    warn!("Session {} subscribe ignored: {}", session_id, e);
                    return;
                }
            }
            ctx.controller
                .handle(SessionEvent::Subscribed {
                    session_id,
                    destination,
                })
                .await;
        }

        ClientMessage::Unsubscribe { destination } => {
            if let Ok(dest) = destination.parse::<Destination>() {
                ctx.broker.unsubscribe(&session_id, &dest).await;
            }
            ctx.controller
                .handle(SessionEvent::Unsubscribed {
                    session_id,
                    destination,
                })
                .await;
        }

        ClientMessage::JoinRoom(request) => {
            // the joining session must hear its own room-state / error reply
            ctx.broker
                .subscribe(session_id, Destination::User(request.user_id.clone()))
                .await;
            ctx.relay.join(session_id, request).await;
        }

        ClientMessage::LeaveRoom(request) => ctx.relay.leave(session_id, request).await,

        ClientMessage::Offer(offer) => {
            let _ = ctx.relay.forward(Signal::Offer(offer)).await;
        }
        ClientMessage::Answer(answer) => {
            let _ = ctx.relay.forward(Signal::Answer(answer)).await;
        }
        ClientMessage::IceCandidate(candidate) => {
            let _ = ctx.relay.forward(Signal::IceCandidate(candidate)).await;
        }
    }
}
