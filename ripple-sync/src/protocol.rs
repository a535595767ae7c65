//! Wire protocol for feed synchronization.
//!
//! Events travel as self-describing JSON text frames with a `type`
//! discriminator:
//!
//! ```text
//! client → authority   {"type":"message","content":"hi"}
//!                      {"type":"edit","id":7,"content":"hello"}
//!                      {"type":"delete","id":7}
//! authority → clients  {"type":"message","id":7,"author":"alice","content":"hi"}
//!                      {"type":"edit","id":7,"content":"hello"}
//!                      {"type":"delete","id":7}
//! authority → origin   {"type":"reject","reason":"forbidden","id":7}
//! ```
//!
//! Client-originated variants never carry an `id` for creation — ids are
//! assigned by the authority alone. Every variant round-trips losslessly
//! through [`encode`]/[`decode`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical message identifier, assigned by the Feed Authority.
///
/// Ids are drawn from a monotonic counter and never reused within the
/// authority's lifetime.
pub type MessageId = u64;

/// Handshake header carrying the session identity.
///
/// Identity and proof ride in headers rather than the URL so that
/// credentials never land in transport or proxy logs.
pub const IDENTITY_HEADER: &str = "x-ripple-identity";

/// Handshake header carrying the proof token from [`crate::auth::Authenticator::login`].
pub const PROOF_HEADER: &str = "x-ripple-proof";

/// Events a client originates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Create a new message. The authority assigns the id and author.
    #[serde(rename = "message")]
    Create { content: String },
    /// Edit an existing message owned by this session.
    Edit { id: MessageId, content: String },
    /// Delete an existing message owned by this session.
    Delete { id: MessageId },
}

/// Events the authority originates.
///
/// `Created`/`Edited`/`Deleted` are broadcast to every open session,
/// including the origin. `Rejected` is delivered to the originating
/// session only and is never broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A message was created and assigned a canonical id.
    #[serde(rename = "message")]
    Created {
        id: MessageId,
        author: String,
        content: String,
    },
    /// A message's content changed.
    #[serde(rename = "edit")]
    Edited { id: MessageId, content: String },
    /// A message was removed.
    #[serde(rename = "delete")]
    Deleted { id: MessageId },
    /// An `Edit`/`Delete` from this session was refused.
    #[serde(rename = "reject")]
    Rejected { reason: RejectReason, id: MessageId },
}

/// Why the authority refused a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The message exists but is owned by another identity.
    Forbidden,
    /// No message with that id exists (possibly lost a race with a delete).
    NotFound,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forbidden => write!(f, "forbidden"),
            Self::NotFound => write!(f, "not_found"),
        }
    }
}

/// Protocol codec errors.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("failed to encode event: {0}")]
    Encode(String),
    #[error("failed to decode event: {0}")]
    Decode(String),
}

/// Serialize an event to its wire form.
pub fn encode<T: Serialize>(event: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Deserialize an event from its wire form.
pub fn decode<'a, T: Deserialize<'a>>(frame: &'a str) -> Result<T, ProtocolError> {
    serde_json::from_str(frame).map_err(|e| ProtocolError::Decode(e.to_string()))
}
