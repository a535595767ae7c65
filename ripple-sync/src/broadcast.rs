//! Fan-out of authority events to every open session.
//!
//! Built on a tokio broadcast channel carrying pre-encoded frames behind
//! an `Arc`, so a broadcast serializes each event exactly once regardless
//! of how many sessions are connected. Every subscriber gets an
//! independent receiver buffering up to `capacity` frames; a session that
//! falls further behind than that simply misses frames (no redelivery).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{self, ProtocolError, ServerEvent};

/// Identity of one connected session, as seen by the fan-out group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Per-connection id, unique even when one identity connects twice.
    pub session_id: Uuid,
    /// The proven identity this connection authenticated as.
    pub identity: String,
}

impl SessionInfo {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            identity: identity.into(),
        }
    }
}

/// Broadcast counters.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub events_broadcast: u64,
    pub active_sessions: usize,
}

/// Fan-out group over all sessions on the single global feed.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<String>>,
    sessions: Arc<RwLock<HashMap<Uuid, SessionInfo>>>,
    capacity: usize,
    events_broadcast: AtomicU64,
}

impl BroadcastGroup {
    /// `capacity` is the per-receiver frame buffer before lagging
    /// sessions start losing frames.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            events_broadcast: AtomicU64::new(0),
        }
    }

    /// Subscribe to the frame stream.
    ///
    /// Synchronous so the authority can subscribe inside the upgrade
    /// callback, before the handshake response reaches the client — a
    /// session therefore never misses a frame broadcast after its
    /// handshake completed.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<String>> {
        self.sender.subscribe()
    }

    /// Register a session in the group's registry.
    pub async fn add_session(&self, info: SessionInfo) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(info.session_id, info);
    }

    /// Remove a session from the group.
    pub async fn remove_session(&self, session_id: &Uuid) -> Option<SessionInfo> {
        self.sessions.write().await.remove(session_id)
    }

    /// Encode an event once and fan it out to every subscriber,
    /// including the origin session. Returns the subscriber count.
    pub fn broadcast(&self, event: &ServerEvent) -> Result<usize, ProtocolError> {
        let frame = Arc::new(protocol::encode(event)?);
        let count = self.sender.send(frame).unwrap_or(0);
        self.events_broadcast.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Identities currently connected (one entry per connection).
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            events_broadcast: self.events_broadcast.load(Ordering::Relaxed),
            active_sessions: self.sessions.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
