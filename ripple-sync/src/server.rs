//! The Feed Authority: single source of truth for message identity,
//! ordering, and ownership.
//!
//! Architecture:
//! ```text
//! Session A ──┐                       ┌──► Session A
//!             ├── FeedServer ─────────┤
//! Session B ──┘       │     broadcast └──► Session B
//!                     │
//!              canonical store
//!              (id counter + ownership)
//! ```
//!
//! Each accepted connection is one task. The upgrade callback validates
//! the identity/proof headers before the websocket handshake completes;
//! a bad proof is refused with HTTP 401 and never becomes a session.
//! Accepted events are validated under the canonical-store lock (one
//! total order for racing mutations), then fanned out to every open
//! session — including the origin, whose echo is what confirms its
//! optimistic state. Rejections go back on the origin's connection only.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use crate::auth::Authenticator;
use crate::broadcast::{BroadcastGroup, SessionInfo};
use crate::protocol::{
    self, ClientEvent, MessageId, RejectReason, ServerEvent, IDENTITY_HEADER, PROOF_HEADER,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Broadcast buffer per session before a lagging session drops frames.
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3030".to_string(),
            broadcast_capacity: 256,
        }
    }
}

/// Server-wide counters.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_sessions: u64,
    pub events_received: u64,
    pub rejects_sent: u64,
}

/// Authority failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
}

/// A message in canonical form.
#[derive(Debug, Clone)]
struct CanonicalMessage {
    author: String,
    content: String,
}

/// The canonical message store. One mutex gives racing mutations a total
/// order; the loser of a race against a delete observes `not_found`.
struct FeedState {
    next_id: MessageId,
    messages: HashMap<MessageId, CanonicalMessage>,
}

impl FeedState {
    fn new() -> Self {
        Self {
            next_id: 1,
            messages: HashMap::new(),
        }
    }
}

/// The feed authority server.
pub struct FeedServer {
    config: ServerConfig,
    listener: TcpListener,
    auth: Arc<Authenticator>,
    feed: Arc<Mutex<FeedState>>,
    group: Arc<BroadcastGroup>,
    stats: Arc<RwLock<ServerStats>>,
}

impl FeedServer {
    /// Bind the listener. Call [`run`](Self::run) afterwards to serve.
    pub async fn bind(config: ServerConfig, auth: Arc<Authenticator>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let group = Arc::new(BroadcastGroup::new(config.broadcast_capacity));
        Ok(Self {
            config,
            listener,
            auth,
            feed: Arc::new(Mutex::new(FeedState::new())),
            group,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        })
    }

    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve connections until the task is dropped.
    pub async fn run(&self) -> Result<(), ServerError> {
        log::info!("feed authority listening on {}", self.config.bind_addr);
        loop {
            let (stream, addr) = self.listener.accept().await?;
            log::debug!("new connection attempt from {addr}");

            let auth = self.auth.clone();
            let feed = self.feed.clone();
            let group = self.group.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, auth, feed, group, stats).await {
                    log::warn!("connection from {addr} ended with error: {e}");
                }
            });
        }
    }

    /// Snapshot of the server counters.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Number of live canonical messages.
    pub async fn message_count(&self) -> usize {
        self.feed.lock().await.messages.len()
    }

    /// Number of open sessions.
    pub async fn session_count(&self) -> usize {
        self.group.session_count().await
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    auth: Arc<Authenticator>,
    feed: Arc<Mutex<FeedState>>,
    group: Arc<BroadcastGroup>,
    stats: Arc<RwLock<ServerStats>>,
) -> Result<(), ServerError> {
    // Validate identity/proof headers before completing the upgrade.
    // The broadcast subscription is created inside the callback, before
    // the handshake response is sent, so an accepted session observes
    // every frame broadcast after its open() returned.
    let mut identity: Option<String> = None;
    let mut subscription: Option<broadcast::Receiver<Arc<String>>> = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let headers = request.headers();
        let ident = headers.get(IDENTITY_HEADER).and_then(|v| v.to_str().ok());
        let proof = headers.get(PROOF_HEADER).and_then(|v| v.to_str().ok());
        if let (Some(ident), Some(proof)) = (ident, proof) {
            if auth.verify(ident, proof).is_ok() {
                identity = Some(ident.to_string());
                subscription = Some(group.subscribe());
                return Ok(response);
            }
        }
        let mut refusal = ErrorResponse::new(Some("invalid handshake credentials".to_string()));
        *refusal.status_mut() = StatusCode::UNAUTHORIZED;
        Err(refusal)
    };

    let ws_stream = accept_hdr_async(stream, callback)
        .await
        .map_err(|e| ServerError::Handshake(e.to_string()))?;
    let identity =
        identity.ok_or_else(|| ServerError::Handshake("identity not captured".to_string()))?;
    let mut broadcast_rx = subscription
        .ok_or_else(|| ServerError::Handshake("subscription not captured".to_string()))?;

    let info = SessionInfo::new(identity.clone());
    let session_id = info.session_id;
    group.add_session(info).await;

    {
        let mut s = stats.write().await;
        s.total_connections += 1;
        s.active_sessions += 1;
    }
    log::info!("session open: {identity} ({session_id}) from {addr}");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(txt))) => {
                        stats.write().await.events_received += 1;
                        match protocol::decode::<ClientEvent>(txt.as_str()) {
                            Ok(event) => {
                                if handle_client_event(event, &identity, &feed, &group, &mut ws_sender, &stats)
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Err(e) => {
                                log::warn!("dropping malformed frame from {identity}: {e}");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("websocket error for {identity}: {e}");
                        break;
                    }
                }
            }
            frame = broadcast_rx.recv() => {
                match frame {
                    Ok(frame) => {
                        if ws_sender.send(Message::text(frame.as_str())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // This session misses those frames; no redelivery.
                        log::warn!("session {identity} lagged by {n} frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    group.remove_session(&session_id).await;
    stats.write().await.active_sessions -= 1;
    log::info!("session closed: {identity} ({session_id})");
    Ok(())
}

/// The origin's websocket failed mid-send; its connection loop should end.
#[derive(Debug, Error)]
#[error("origin transport closed")]
struct OriginClosed;

/// Validate one client event against the canonical store, then either
/// broadcast its canonical form or report the rejection to the origin.
///
/// Accepted mutations are broadcast while the store guard is still held,
/// so the fan-out order every session observes is exactly the order the
/// canonical store applied them. Rejections never touch the broadcast
/// path and are sent after the guard is released.
async fn handle_client_event<S>(
    event: ClientEvent,
    identity: &str,
    feed: &Mutex<FeedState>,
    group: &BroadcastGroup,
    ws_sender: &mut S,
    stats: &RwLock<ServerStats>,
) -> Result<(), OriginClosed>
where
    S: SinkExt<Message> + Unpin,
{
    let rejection = {
        let mut feed = feed.lock().await;
        let outcome = match event {
            ClientEvent::Create { content } => {
                let id = feed.next_id;
                feed.next_id += 1;
                feed.messages.insert(
                    id,
                    CanonicalMessage {
                        author: identity.to_string(),
                        content: content.clone(),
                    },
                );
                Ok(ServerEvent::Created {
                    id,
                    author: identity.to_string(),
                    content,
                })
            }
            ClientEvent::Edit { id, content } => match feed.messages.get_mut(&id) {
                None => Err((RejectReason::NotFound, id)),
                Some(message) if message.author != identity => {
                    Err((RejectReason::Forbidden, id))
                }
                Some(message) => {
                    message.content = content.clone();
                    Ok(ServerEvent::Edited { id, content })
                }
            },
            ClientEvent::Delete { id } => match feed.messages.get(&id) {
                None => Err((RejectReason::NotFound, id)),
                Some(message) if message.author != identity => {
                    Err((RejectReason::Forbidden, id))
                }
                Some(_) => {
                    feed.messages.remove(&id);
                    Ok(ServerEvent::Deleted { id })
                }
            },
        };

        match outcome {
            Ok(event) => {
                if let Err(e) = group.broadcast(&event) {
                    log::error!("failed to broadcast event: {e}");
                }
                None
            }
            Err(rejected) => Some(rejected),
        }
    };

    if let Some((reason, id)) = rejection {
        log::debug!("rejecting mutation of message {id} by {identity}: {reason}");
        stats.write().await.rejects_sent += 1;
        let rejection = ServerEvent::Rejected { reason, id };
        match protocol::encode(&rejection) {
            Ok(frame) => {
                // To the origin only — rejections are never broadcast.
                if ws_sender.send(Message::text(frame)).await.is_err() {
                    return Err(OriginClosed);
                }
            }
            Err(e) => log::error!("failed to encode rejection: {e}"),
        }
    }
    Ok(())
}
