//! Local materialized view of the message feed.
//!
//! [`FeedView`] is pure state: it applies authority events in arrival
//! order and reports what changed as [`FeedChange`] values. Rendering is
//! the caller's concern — nothing here touches a presentation surface.
//!
//! Ordering: the view's sequence is exactly the order `Created` events
//! arrived on the channel. Edits mutate in place and deletes remove
//! without reordering. The one exception is an optimistic placeholder,
//! which keeps the position where it was staged when its confirming
//! `Created` arrives.

use std::collections::{HashMap, VecDeque};

use crate::protocol::{MessageId, RejectReason, ServerEvent};

/// Client-local identifier for an unconfirmed optimistic message.
///
/// Deliberately a distinct type from [`MessageId`] so a placeholder can
/// never be mistaken for (or collide with) an authority-assigned id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(u64);

/// Key under which a feed entry is addressed locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Optimistic placeholder awaiting its `Created` echo.
    Pending(LocalId),
    /// Confirmed message with an authority-assigned id.
    Assigned(MessageId),
}

/// One entry in the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub key: MessageKey,
    pub author: String,
    pub content: String,
}

impl Message {
    /// The canonical id, if the message has been confirmed.
    pub fn assigned_id(&self) -> Option<MessageId> {
        match self.key {
            MessageKey::Assigned(id) => Some(id),
            MessageKey::Pending(_) => None,
        }
    }

    /// Whether this entry is an unconfirmed placeholder.
    pub fn is_pending(&self) -> bool {
        matches!(self.key, MessageKey::Pending(_))
    }
}

/// A state change produced by applying an authority event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedChange {
    /// A message from another session (or an unanticipated echo) was
    /// appended to the tail.
    Appended(Message),
    /// An optimistic placeholder was confirmed in place.
    Confirmed { local: LocalId, message: Message },
    /// An existing message's content changed.
    Edited { id: MessageId, content: String },
    /// A message was removed.
    Removed { id: MessageId },
    /// The authority refused one of this session's mutations.
    Rejected { reason: RejectReason, id: MessageId },
}

/// Ordered, mutable view of the live feed for one session.
#[derive(Debug)]
pub struct FeedView {
    identity: String,
    order: Vec<MessageKey>,
    entries: HashMap<MessageKey, Message>,
    /// Unconfirmed placeholders, oldest first (FIFO confirmation rule).
    pending: VecDeque<LocalId>,
    next_local: u64,
}

impl FeedView {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            order: Vec::new(),
            entries: HashMap::new(),
            pending: VecDeque::new(),
            next_local: 0,
        }
    }

    /// The identity this view belongs to.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Stage an optimistic placeholder for a `Create` this session just
    /// sent. The placeholder renders immediately at the tail and is
    /// confirmed (replaced in place, never duplicated) when the matching
    /// `Created` echo arrives.
    pub fn stage_create(&mut self, content: &str) -> LocalId {
        let local = LocalId(self.next_local);
        self.next_local += 1;
        let key = MessageKey::Pending(local);
        self.order.push(key);
        self.entries.insert(
            key,
            Message {
                key,
                author: self.identity.clone(),
                content: content.to_string(),
            },
        );
        self.pending.push_back(local);
        local
    }

    /// Apply one authority event.
    ///
    /// Returns `None` when the event had no effect — an edit or delete
    /// for an id this view never saw (a reachable race, not an error),
    /// dropped here with a diagnostic only.
    pub fn apply(&mut self, event: ServerEvent) -> Option<FeedChange> {
        match event {
            ServerEvent::Created {
                id,
                author,
                content,
            } => Some(self.apply_created(id, author, content)),
            ServerEvent::Edited { id, content } => {
                let key = MessageKey::Assigned(id);
                match self.entries.get_mut(&key) {
                    Some(entry) => {
                        entry.content = content.clone();
                        Some(FeedChange::Edited { id, content })
                    }
                    None => {
                        log::debug!("dropping edit for unknown message {id}");
                        None
                    }
                }
            }
            ServerEvent::Deleted { id } => {
                let key = MessageKey::Assigned(id);
                if self.entries.remove(&key).is_some() {
                    self.order.retain(|k| *k != key);
                    Some(FeedChange::Removed { id })
                } else {
                    log::debug!("dropping delete for unknown message {id}");
                    None
                }
            }
            ServerEvent::Rejected { reason, id } => {
                log::warn!("authority rejected mutation of message {id}: {reason}");
                Some(FeedChange::Rejected { reason, id })
            }
        }
    }

    fn apply_created(&mut self, id: MessageId, author: String, content: String) -> FeedChange {
        let key = MessageKey::Assigned(id);

        // FIFO reconciliation: the oldest unconfirmed placeholder from
        // this session matches the next Created carrying our identity.
        if author == self.identity {
            if let Some(local) = self.pending.pop_front() {
                let old = MessageKey::Pending(local);
                if let Some(pos) = self.order.iter().position(|k| *k == old) {
                    self.order[pos] = key;
                }
                self.entries.remove(&old);
                let message = Message {
                    key,
                    author,
                    content,
                };
                self.entries.insert(key, message.clone());
                return FeedChange::Confirmed { local, message };
            }
        }

        let message = Message {
            key,
            author,
            content,
        };
        self.order.push(key);
        self.entries.insert(key, message.clone());
        FeedChange::Appended(message)
    }

    /// Live messages in feed order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.order.iter().filter_map(|key| self.entries.get(key))
    }

    /// Look up a confirmed message by canonical id.
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.entries.get(&MessageKey::Assigned(id))
    }

    /// Whether this session's identity authored the given message.
    pub fn owns(&self, id: MessageId) -> bool {
        self.get(id).is_some_and(|m| m.author == self.identity)
    }

    /// Number of live entries, placeholders included.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of unconfirmed placeholders.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(id: MessageId, author: &str, content: &str) -> ServerEvent {
        ServerEvent::Created {
            id,
            author: author.into(),
            content: content.into(),
        }
    }

    fn contents(view: &FeedView) -> Vec<&str> {
        view.messages().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn test_order_matches_delivery_order() {
        let mut view = FeedView::new("carol");
        view.apply(created(5, "alice", "first")).unwrap();
        view.apply(created(2, "bob", "second")).unwrap();
        view.apply(created(9, "alice", "third")).unwrap();

        // Delivery order wins; the view never sorts by id.
        assert_eq!(contents(&view), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_edit_preserves_position() {
        let mut view = FeedView::new("carol");
        view.apply(created(1, "alice", "a")).unwrap();
        view.apply(created(2, "bob", "b")).unwrap();
        view.apply(created(3, "alice", "c")).unwrap();

        let change = view
            .apply(ServerEvent::Edited {
                id: 2,
                content: "b2".into(),
            })
            .unwrap();
        assert_eq!(
            change,
            FeedChange::Edited {
                id: 2,
                content: "b2".into()
            }
        );
        assert_eq!(contents(&view), vec!["a", "b2", "c"]);
    }

    #[test]
    fn test_delete_removes_in_place() {
        let mut view = FeedView::new("carol");
        view.apply(created(1, "alice", "a")).unwrap();
        view.apply(created(2, "bob", "b")).unwrap();
        view.apply(created(3, "alice", "c")).unwrap();

        let change = view.apply(ServerEvent::Deleted { id: 2 }).unwrap();
        assert_eq!(change, FeedChange::Removed { id: 2 });
        assert_eq!(contents(&view), vec!["a", "c"]);
        assert!(view.get(2).is_none());
    }

    #[test]
    fn test_delete_twice_is_noop() {
        let mut view = FeedView::new("carol");
        view.apply(created(1, "alice", "a")).unwrap();

        assert!(view.apply(ServerEvent::Deleted { id: 1 }).is_some());
        // Second delete for the same id: silent no-op, same final state.
        assert!(view.apply(ServerEvent::Deleted { id: 1 }).is_none());
        assert!(view.is_empty());
    }

    #[test]
    fn test_edit_unknown_id_is_dropped() {
        let mut view = FeedView::new("carol");
        view.apply(created(1, "alice", "a")).unwrap();

        assert!(view
            .apply(ServerEvent::Edited {
                id: 999,
                content: "x".into()
            })
            .is_none());
        assert_eq!(contents(&view), vec!["a"]);
    }

    #[test]
    fn test_delete_unknown_id_is_dropped() {
        let mut view = FeedView::new("carol");
        assert!(view.apply(ServerEvent::Deleted { id: 999 }).is_none());
        assert!(view.is_empty());
    }

    #[test]
    fn test_optimistic_create_reconciles_to_one_message() {
        let mut view = FeedView::new("alice");
        let local = view.stage_create("hi");
        assert_eq!(view.len(), 1);
        assert_eq!(view.pending_count(), 1);

        let change = view.apply(created(7, "alice", "hi")).unwrap();
        match change {
            FeedChange::Confirmed {
                local: confirmed,
                message,
            } => {
                assert_eq!(confirmed, local);
                assert_eq!(message.assigned_id(), Some(7));
            }
            other => panic!("expected Confirmed, got {other:?}"),
        }

        // Exactly one message with id 7 — never two, never zero.
        assert_eq!(view.len(), 1);
        assert_eq!(view.pending_count(), 0);
        assert_eq!(view.get(7).unwrap().content, "hi");
    }

    #[test]
    fn test_fifo_reconciliation_of_multiple_pending() {
        let mut view = FeedView::new("alice");
        let first = view.stage_create("one");
        let second = view.stage_create("two");

        let change = view.apply(created(10, "alice", "one")).unwrap();
        assert!(matches!(change, FeedChange::Confirmed { local, .. } if local == first));

        let change = view.apply(created(11, "alice", "two")).unwrap();
        assert!(matches!(change, FeedChange::Confirmed { local, .. } if local == second));

        assert_eq!(view.pending_count(), 0);
        assert_eq!(contents(&view), vec!["one", "two"]);
    }

    #[test]
    fn test_placeholder_keeps_staged_position() {
        let mut view = FeedView::new("alice");
        view.stage_create("mine");
        // A foreign message raced ahead of our echo.
        view.apply(created(1, "bob", "theirs")).unwrap();
        view.apply(created(2, "alice", "mine")).unwrap();

        // The placeholder was staged first and keeps that slot.
        assert_eq!(contents(&view), vec!["mine", "theirs"]);
        assert_eq!(view.get(2).unwrap().content, "mine");
    }

    #[test]
    fn test_same_author_created_without_pending_appends() {
        // Echo arrives for a create this view never staged (the caller
        // chose not to render optimistically, or another session shares
        // the identity).
        let mut view = FeedView::new("alice");
        let change = view.apply(created(4, "alice", "hi")).unwrap();
        assert!(matches!(change, FeedChange::Appended(_)));
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_foreign_created_never_consumes_pending() {
        let mut view = FeedView::new("alice");
        view.stage_create("mine");

        let change = view.apply(created(1, "bob", "theirs")).unwrap();
        assert!(matches!(change, FeedChange::Appended(_)));
        assert_eq!(view.pending_count(), 1);
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn test_ownership_lookup() {
        let mut view = FeedView::new("alice");
        view.apply(created(1, "alice", "mine")).unwrap();
        view.apply(created(2, "bob", "theirs")).unwrap();

        assert!(view.owns(1));
        assert!(!view.owns(2));
        assert!(!view.owns(999));
    }

    #[test]
    fn test_rejected_is_surfaced() {
        let mut view = FeedView::new("alice");
        let change = view
            .apply(ServerEvent::Rejected {
                reason: RejectReason::Forbidden,
                id: 3,
            })
            .unwrap();
        assert_eq!(
            change,
            FeedChange::Rejected {
                reason: RejectReason::Forbidden,
                id: 3
            }
        );
    }

    #[test]
    fn test_interleaved_edits_and_deletes_keep_created_order() {
        let mut view = FeedView::new("carol");
        view.apply(created(1, "alice", "a")).unwrap();
        view.apply(ServerEvent::Edited {
            id: 1,
            content: "a!".into(),
        })
        .unwrap();
        view.apply(created(2, "bob", "b")).unwrap();
        view.apply(ServerEvent::Deleted { id: 1 }).unwrap();
        view.apply(created(3, "alice", "c")).unwrap();

        assert_eq!(contents(&view), vec!["b", "c"]);
    }

    #[test]
    fn test_pending_placeholder_has_no_assigned_id() {
        let mut view = FeedView::new("alice");
        view.stage_create("draft");
        let entry = view.messages().next().unwrap();
        assert!(entry.is_pending());
        assert_eq!(entry.assigned_id(), None);
        assert_eq!(entry.author, "alice");
    }
}
