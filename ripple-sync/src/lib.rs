//! # ripple-sync — Real-time message feed synchronization for Ripple
//!
//! Keeps every connected participant's view of a shared message feed
//! consistent as messages are created, edited, and deleted, with
//! per-message ownership and optimistic local edits.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐      WebSocket       ┌─────────────┐
//! │ FeedSynchronizer │ ◄──────────────────► │ FeedServer  │
//! │  Session + View  │   JSON text frames   │ (authority) │
//! └────────┬─────────┘                      └──────┬──────┘
//!          │                                       │
//!          ▼                                       ▼
//! ┌──────────────────┐                     ┌───────────────┐
//! │ FeedView (local) │                     │ canonical ids │
//! │ order + entries  │                     │ + ownership   │
//! └──────────────────┘                     └───────┬───────┘
//!                                                  │
//!                                          ┌───────┴────────┐
//!                                          │ BroadcastGroup │
//!                                          │ (all sessions) │
//!                                          └────────────────┘
//! ```
//!
//! The authority is the only component that assigns message ids; its
//! broadcast order is the canonical feed order. Clients apply events in
//! arrival order and never reorder. Optimistic creates render a local
//! placeholder that is confirmed in place by the authority's echo.
//!
//! ## Modules
//!
//! - [`protocol`] — wire events and JSON codec
//! - [`auth`] — user registry and handshake proof tokens
//! - [`broadcast`] — fan-out to all open sessions
//! - [`server`] — the Feed Authority
//! - [`session`] — client channel lifecycle (Connecting → Open → Closed)
//! - [`feed`] — materialized view and reconciliation
//! - [`sync`] — the Feed Synchronizer facade

pub mod auth;
pub mod broadcast;
pub mod feed;
pub mod protocol;
pub mod server;
pub mod session;
pub mod sync;

// Re-exports for convenience
pub use auth::{AuthConfig, AuthError, Authenticator, ProofToken};
pub use broadcast::{BroadcastGroup, BroadcastStats, SessionInfo};
pub use feed::{FeedChange, FeedView, LocalId, Message, MessageKey};
pub use protocol::{
    ClientEvent, MessageId, ProtocolError, RejectReason, ServerEvent, IDENTITY_HEADER,
    PROOF_HEADER,
};
pub use server::{FeedServer, ServerConfig, ServerError, ServerStats};
pub use session::{ChannelState, Session, SessionError};
pub use sync::{FeedSynchronizer, SyncError};
