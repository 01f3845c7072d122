use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::message::{Message, MessageBody};

/// Delivery state of an optimistic send, keyed by the client-chosen temp id
/// until the server assigns a real one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OutboxState {
    Sending,
    Confirmed { message_id: Uuid },
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub temp_id: String,
    pub conversation_id: Uuid,
    pub body: MessageBody,
    pub state: OutboxState,
    pub queued_at: DateTime<Utc>,
}

/// Client-side reconciliation model. Sends render immediately as pending;
/// the matching server event (carrying the temp id back) confirms them. A
/// failure keeps the entry visible so the user can retry by hand, never
/// automatically.
#[derive(Debug, Default)]
pub struct SyncAgent {
    outbox: HashMap<String, OutboxEntry>,
    /// Cursor of the newest message known to be durable, per conversation.
    last_seen: HashMap<Uuid, (DateTime<Utc>, Uuid)>,
}

impl SyncAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an optimistic send. The entry shows as Sending until the
    /// server confirms or the send fails.
    pub fn send_optimistic(
        &mut self,
        temp_id: impl Into<String>,
        conversation_id: Uuid,
        body: MessageBody,
    ) -> &OutboxEntry {
        let temp_id = temp_id.into();
        let entry = OutboxEntry {
            temp_id: temp_id.clone(),
            conversation_id,
            body,
            state: OutboxState::Sending,
            queued_at: Utc::now(),
        };
        self.outbox.entry(temp_id).or_insert(entry)
    }

    /// Apply a created event from the server. When it carries our temp id
    /// the pending entry flips to Confirmed; either way the cursor advances.
    pub fn apply_created(&mut self, message: &Message, temp_id: Option<&str>) {
        if let Some(temp_id) = temp_id {
            if let Some(entry) = self.outbox.get_mut(temp_id) {
                entry.state = OutboxState::Confirmed {
                    message_id: message.id,
                };
            }
        }
        self.advance_cursor(message);
    }

    pub fn mark_failed(&mut self, temp_id: &str) {
        if let Some(entry) = self.outbox.get_mut(temp_id) {
            if entry.state == OutboxState::Sending {
                entry.state = OutboxState::Failed;
            }
        }
    }

    /// Reset a failed entry for a user-initiated retry.
    pub fn retry(&mut self, temp_id: &str) -> Option<&OutboxEntry> {
        let entry = self.outbox.get_mut(temp_id)?;
        if entry.state != OutboxState::Failed {
            return None;
        }
        entry.state = OutboxState::Sending;
        entry.queued_at = Utc::now();
        Some(entry)
    }

    pub fn entry(&self, temp_id: &str) -> Option<&OutboxEntry> {
        self.outbox.get(temp_id)
    }

    /// Entries still awaiting a user decision or a server response.
    pub fn pending(&self) -> impl Iterator<Item = &OutboxEntry> {
        self.outbox
            .values()
            .filter(|e| !matches!(e.state, OutboxState::Confirmed { .. }))
    }

    /// Drop confirmed entries; their content now lives in the store.
    pub fn compact(&mut self) {
        self.outbox
            .retain(|_, e| !matches!(e.state, OutboxState::Confirmed { .. }));
    }

    fn advance_cursor(&mut self, message: &Message) {
        let cursor = (message.created_at, message.id);
        self.last_seen
            .entry(message.conversation_id)
            .and_modify(|c| {
                if cursor > *c {
                    *c = cursor;
                }
            })
            .or_insert(cursor);
    }

    /// After a reconnect, the catch-up fetch starts from the last message
    /// known durable in each conversation; None means fetch from the top.
    pub fn resync_from(&self, conversation_id: Uuid) -> Option<(DateTime<Utc>, Uuid)> {
        self.last_seen.get(&conversation_id).copied()
    }

    /// Full backfill request after a reconnect: every tracked conversation
    /// paired with its catch-up cursor. Presence and typing are not included;
    /// gaps there are lossy by design.
    pub fn resync_request(&self) -> Vec<(Uuid, DateTime<Utc>, Uuid)> {
        self.last_seen
            .iter()
            .map(|(conversation_id, (at, id))| (*conversation_id, *at, *id))
            .collect()
    }

    /// Drain failed entries for re-submission. The caller re-queues each one
    /// through send_optimistic, keeping its temp id.
    pub fn take_failed(&mut self) -> Vec<OutboxEntry> {
        let failed_ids: Vec<String> = self
            .outbox
            .values()
            .filter(|e| e.state == OutboxState::Failed)
            .map(|e| e.temp_id.clone())
            .collect();
        failed_ids
            .into_iter()
            .filter_map(|id| self.outbox.remove(&id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::MessageStatus;

    fn server_message(conversation_id: Uuid) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: Uuid::new_v4(),
            body: MessageBody::Text { text: "hi".into() },
            reply_to: None,
            is_ai_generated: false,
            status: MessageStatus::Sent,
            read_by: vec![],
            reactions: vec![],
            is_edited: false,
            edited_at: None,
            edit_history: vec![],
            is_deleted: false,
            deleted_for: vec![],
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn optimistic_send_confirms_on_matching_event() {
        let mut agent = SyncAgent::new();
        let conversation = Uuid::new_v4();
        agent.send_optimistic("tmp-1", conversation, MessageBody::Text { text: "hi".into() });
        assert_eq!(agent.entry("tmp-1").unwrap().state, OutboxState::Sending);

        let message = server_message(conversation);
        agent.apply_created(&message, Some("tmp-1"));
        assert_eq!(
            agent.entry("tmp-1").unwrap().state,
            OutboxState::Confirmed {
                message_id: message.id
            }
        );
    }

    #[test]
    fn failure_requires_manual_retry() {
        let mut agent = SyncAgent::new();
        agent.send_optimistic(
            "tmp-2",
            Uuid::new_v4(),
            MessageBody::Text { text: "x".into() },
        );
        agent.mark_failed("tmp-2");
        assert_eq!(agent.entry("tmp-2").unwrap().state, OutboxState::Failed);
        // Stays failed until the user acts.
        assert_eq!(agent.pending().count(), 1);

        let entry = agent.retry("tmp-2").unwrap();
        assert_eq!(entry.state, OutboxState::Sending);
    }

    #[test]
    fn retry_only_applies_to_failed_entries() {
        let mut agent = SyncAgent::new();
        agent.send_optimistic(
            "tmp-3",
            Uuid::new_v4(),
            MessageBody::Text { text: "x".into() },
        );
        assert!(agent.retry("tmp-3").is_none());
        assert!(agent.retry("missing").is_none());
    }

    #[test]
    fn events_from_others_only_advance_the_cursor() {
        let mut agent = SyncAgent::new();
        let conversation = Uuid::new_v4();
        assert!(agent.resync_from(conversation).is_none());

        let message = server_message(conversation);
        agent.apply_created(&message, None);
        assert_eq!(
            agent.resync_from(conversation),
            Some((message.created_at, message.id))
        );
        assert_eq!(agent.pending().count(), 0);
    }

    #[test]
    fn take_failed_drains_only_failed_entries() {
        let mut agent = SyncAgent::new();
        let conversation = Uuid::new_v4();
        agent.send_optimistic("ok", conversation, MessageBody::Text { text: "1".into() });
        agent.send_optimistic("bad", conversation, MessageBody::Text { text: "2".into() });
        agent.mark_failed("bad");

        let drained = agent.take_failed();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].temp_id, "bad");
        assert!(agent.entry("bad").is_none());
        assert!(agent.entry("ok").is_some());
    }

    #[test]
    fn resync_request_covers_all_tracked_conversations() {
        let mut agent = SyncAgent::new();
        let a = server_message(Uuid::new_v4());
        let b = server_message(Uuid::new_v4());
        agent.apply_created(&a, None);
        agent.apply_created(&b, None);

        let request = agent.resync_request();
        assert_eq!(request.len(), 2);
        assert!(request
            .iter()
            .any(|(c, _, id)| *c == a.conversation_id && *id == a.id));
        assert!(request
            .iter()
            .any(|(c, _, id)| *c == b.conversation_id && *id == b.id));
    }

    #[test]
    fn compact_drops_confirmed_entries() {
        let mut agent = SyncAgent::new();
        let conversation = Uuid::new_v4();
        agent.send_optimistic("a", conversation, MessageBody::Text { text: "1".into() });
        agent.send_optimistic("b", conversation, MessageBody::Text { text: "2".into() });
        let message = server_message(conversation);
        agent.apply_created(&message, Some("a"));

        agent.compact();
        assert!(agent.entry("a").is_none());
        assert!(agent.entry("b").is_some());
    }
}
