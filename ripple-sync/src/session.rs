//! Client side of one authenticated feed connection.
//!
//! A [`Session`] owns exactly one websocket connection for one proven
//! identity. The lifecycle is the three-state machine
//! `Connecting → Open → Closed`; `Closed` is terminal, and a closed
//! session must be discarded — reconnection is the caller's decision,
//! never automatic.
//!
//! Identity and proof travel as request headers on the upgrade (never as
//! URL parameters, which end up in transport logs). Sending is
//! fire-and-forget: `send` enqueues and returns; ordering correctness is
//! restored by the feed view when the authority's echo arrives.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::auth::ProofToken;
use crate::protocol::{self, ClientEvent, ServerEvent, IDENTITY_HEADER, PROOF_HEADER};

/// Connection lifecycle state. Transitions are one-way:
/// Connecting -> Open -> Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Handshake in flight. This phase lives entirely inside
    /// [`Session::open`]: by the time a caller holds a `Session`,
    /// [`Session::state`] reports `Open` or `Closed`, never this.
    Connecting,
    Open,
    Closed,
}

/// Session channel failures.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The authority refused the identity/proof before the transport
    /// completed. Fatal to this open attempt; no retry is implied.
    #[error("authority rejected the handshake credentials")]
    AuthRejected,
    /// Network-level failure.
    #[error("transport failure: {0}")]
    Transport(String),
    /// A send was attempted on a session that is not open.
    #[error("session channel is not open")]
    NotOpen,
}

/// One authenticated connection to the Feed Authority.
pub struct Session {
    identity: String,
    state: Arc<RwLock<ChannelState>>,
    outgoing: Option<mpsc::UnboundedSender<ClientEvent>>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Session {
    /// Open a connection to `url`, carrying `identity` and `proof` as
    /// handshake headers.
    ///
    /// Fails with [`SessionError::AuthRejected`] when the authority
    /// refuses the proof (HTTP 401 before the upgrade), or
    /// [`SessionError::Transport`] on any lower-level failure. On
    /// success the channel is [`ChannelState::Open`].
    pub async fn open(
        url: &str,
        identity: &str,
        proof: &ProofToken,
    ) -> Result<Self, SessionError> {
        let state = Arc::new(RwLock::new(ChannelState::Connecting));

        let mut request = url
            .into_client_request()
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(
            IDENTITY_HEADER,
            HeaderValue::from_str(identity)
                .map_err(|_| SessionError::Transport("identity is not header-safe".into()))?,
        );
        headers.insert(
            PROOF_HEADER,
            HeaderValue::from_str(proof.as_str())
                .map_err(|_| SessionError::Transport("proof token is not header-safe".into()))?,
        );

        let ws_stream = match connect_async(request).await {
            Ok((stream, _response)) => stream,
            Err(WsError::Http(response)) if response.status() == StatusCode::UNAUTHORIZED => {
                return Err(SessionError::AuthRejected);
            }
            Err(e) => return Err(SessionError::Transport(e.to_string())),
        };

        *state.write().await = ChannelState::Open;

        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();

        // Writer task: drain the outgoing queue onto the socket.
        tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let frame = match protocol::encode(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::error!("dropping unencodable event: {e}");
                        continue;
                    }
                };
                if ws_writer.send(Message::text(frame)).await.is_err() {
                    break;
                }
            }
            // Outgoing queue dropped: close the socket gracefully.
            let _ = ws_writer.close().await;
        });

        // Reader task: decode authority frames in delivery order.
        let reader_state = state.clone();
        let identity_owned = identity.to_string();
        tokio::spawn(async move {
            while let Some(result) = ws_reader.next().await {
                match result {
                    Ok(Message::Text(txt)) => match protocol::decode::<ServerEvent>(txt.as_str()) {
                        Ok(event) => {
                            if event_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("dropping malformed frame: {e}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("websocket error for {identity_owned}: {e}");
                        break;
                    }
                }
            }
            *reader_state.write().await = ChannelState::Closed;
            // event_tx drops here, ending the event stream exactly once.
        });

        Ok(Self {
            identity: identity.to_string(),
            state,
            outgoing: Some(out_tx),
            events: event_rx,
        })
    }

    /// The proven identity of this session.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Current channel state.
    pub async fn state(&self) -> ChannelState {
        *self.state.read().await
    }

    /// Enqueue a client event. Fire-and-forget: returns as soon as the
    /// event is queued, without waiting for any acknowledgment.
    pub async fn send(&self, event: ClientEvent) -> Result<(), SessionError> {
        if *self.state.read().await != ChannelState::Open {
            return Err(SessionError::NotOpen);
        }
        self.outgoing
            .as_ref()
            .ok_or(SessionError::NotOpen)?
            .send(event)
            .map_err(|_| SessionError::NotOpen)
    }

    /// Receive the next authority event, in transport delivery order.
    ///
    /// Returns `None` exactly once, when the channel has closed — the
    /// close notification for this session.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Close the channel gracefully. Immediate and idempotent.
    pub async fn close(&mut self) {
        let mut state = self.state.write().await;
        if *state != ChannelState::Closed {
            *state = ChannelState::Closed;
        }
        // Dropping the sender ends the writer task, which closes the socket.
        self.outgoing = None;
    }
}
