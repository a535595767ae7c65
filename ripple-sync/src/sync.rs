//! The Feed Synchronizer: one session plus its materialized view.
//!
//! Ties a [`Session`] to a [`FeedView`] behind a `&mut self` API, which
//! is the single-writer discipline the view requires — incoming events
//! and locally-originated mutations can never interleave mid-apply.
//!
//! The ownership checks in [`edit_message`](FeedSynchronizer::edit_message)
//! and [`delete_message`](FeedSynchronizer::delete_message) are a UX
//! guard, not a security boundary: the Feed Authority re-validates every
//! mutation independently, and its verdict arrives as a
//! [`FeedChange::Rejected`] if a stale local view let one through.

use thiserror::Error;

use crate::feed::{FeedChange, FeedView, LocalId};
use crate::protocol::{ClientEvent, MessageId};
use crate::session::{Session, SessionError};

/// Synchronizer failures.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// This session's identity does not own the message.
    #[error("message {id} is owned by another identity")]
    NotOwner { id: MessageId },
    /// No message with that id exists in the local view.
    #[error("no message {id} in the local feed")]
    UnknownMessage { id: MessageId },
    #[error(transparent)]
    Channel(#[from] SessionError),
}

/// Client-side reconciliation engine for one session.
pub struct FeedSynchronizer {
    session: Session,
    view: FeedView,
}

impl FeedSynchronizer {
    pub fn new(session: Session) -> Self {
        let view = FeedView::new(session.identity());
        Self { session, view }
    }

    /// The local materialized view.
    pub fn view(&self) -> &FeedView {
        &self.view
    }

    /// Send a new message, rendering an optimistic placeholder
    /// immediately. The placeholder is confirmed in place when the
    /// authority's `Created` echo arrives.
    pub async fn send_message(&mut self, content: &str) -> Result<LocalId, SyncError> {
        self.session
            .send(ClientEvent::Create {
                content: content.to_string(),
            })
            .await?;
        Ok(self.view.stage_create(content))
    }

    /// Edit a message this identity owns.
    pub async fn edit_message(&mut self, id: MessageId, content: &str) -> Result<(), SyncError> {
        self.check_ownership(id)?;
        self.session
            .send(ClientEvent::Edit {
                id,
                content: content.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Delete a message this identity owns.
    pub async fn delete_message(&mut self, id: MessageId) -> Result<(), SyncError> {
        self.check_ownership(id)?;
        self.session.send(ClientEvent::Delete { id }).await?;
        Ok(())
    }

    /// Pull the next state change from the channel.
    ///
    /// Events with no effect on this view (edits or deletes for ids it
    /// never saw) are dropped silently here and the loop continues.
    /// Returns `None` exactly once, when the channel has closed.
    pub async fn recv_change(&mut self) -> Option<FeedChange> {
        loop {
            let event = self.session.recv().await?;
            if let Some(change) = self.view.apply(event) {
                return Some(change);
            }
        }
    }

    /// Close the underlying channel. Idempotent; the view keeps its
    /// last-known state for inspection.
    pub async fn close(&mut self) {
        self.session.close().await;
    }

    fn check_ownership(&self, id: MessageId) -> Result<(), SyncError> {
        match self.view.get(id) {
            None => Err(SyncError::UnknownMessage { id }),
            Some(message) if message.author != self.view.identity() => {
                Err(SyncError::NotOwner { id })
            }
            Some(_) => Ok(()),
        }
    }
}
