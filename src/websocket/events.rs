use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::conversation::{Conversation, ParticipantRole};
use crate::models::message::Message;
use crate::redis_client::RedisClient;
use crate::websocket::{pubsub, RoomId};

/// Everything the server pushes to clients. Events carry full hydrated
/// payloads so a client can reconcile from any single event without a
/// follow-up fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutboundEvent {
    #[serde(rename = "message.created")]
    MessageCreated {
        message: Message,
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },
    #[serde(rename = "message.edited")]
    MessageEdited { message: Message },
    #[serde(rename = "message.deleted")]
    MessageDeleted {
        message: Message,
        for_everyone: bool,
    },
    #[serde(rename = "reaction.added")]
    ReactionAdded { message: Message, user_id: Uuid },
    #[serde(rename = "reaction.removed")]
    ReactionRemoved { message: Message, user_id: Uuid },
    #[serde(rename = "read.marked")]
    ReadMarked {
        conversation_id: Uuid,
        user_id: Uuid,
        messages: Vec<Message>,
    },
    #[serde(rename = "typing.started")]
    TypingStarted {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    #[serde(rename = "typing.stopped")]
    TypingStopped {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    #[serde(rename = "presence.online")]
    PresenceOnline { user_id: Uuid },
    #[serde(rename = "presence.offline")]
    PresenceOffline {
        user_id: Uuid,
        last_seen: DateTime<Utc>,
    },
    #[serde(rename = "member.added")]
    MemberAdded {
        conversation: Conversation,
        user_id: Uuid,
        added_by: Uuid,
    },
    #[serde(rename = "member.removed")]
    MemberRemoved {
        conversation: Conversation,
        user_id: Uuid,
        removed_by: Uuid,
    },
    #[serde(rename = "member.role_changed")]
    MemberRoleChanged {
        conversation: Conversation,
        user_id: Uuid,
        role: ParticipantRole,
        changed_by: Uuid,
    },
    #[serde(rename = "conversation.updated")]
    ConversationUpdated { conversation: Conversation },
    #[serde(rename = "error")]
    Error {
        code: u16,
        message: String,
        retryable: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },
}

impl OutboundEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            OutboundEvent::MessageCreated { .. } => "message.created",
            OutboundEvent::MessageEdited { .. } => "message.edited",
            OutboundEvent::MessageDeleted { .. } => "message.deleted",
            OutboundEvent::ReactionAdded { .. } => "reaction.added",
            OutboundEvent::ReactionRemoved { .. } => "reaction.removed",
            OutboundEvent::ReadMarked { .. } => "read.marked",
            OutboundEvent::TypingStarted { .. } => "typing.started",
            OutboundEvent::TypingStopped { .. } => "typing.stopped",
            OutboundEvent::PresenceOnline { .. } => "presence.online",
            OutboundEvent::PresenceOffline { .. } => "presence.offline",
            OutboundEvent::MemberAdded { .. } => "member.added",
            OutboundEvent::MemberRemoved { .. } => "member.removed",
            OutboundEvent::MemberRoleChanged { .. } => "member.role_changed",
            OutboundEvent::ConversationUpdated { .. } => "conversation.updated",
            OutboundEvent::Error { .. } => "error",
        }
    }

    pub fn error(err: &AppError, temp_id: Option<String>) -> Self {
        OutboundEvent::Error {
            code: err.status_code(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            temp_id,
        }
    }

    /// Wire frame: the tagged event plus a server timestamp.
    pub fn to_payload(&self) -> AppResult<String> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| AppError::Internal(format!("event serialization: {e}")))?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("timestamp".into(), json!(Utc::now()));
        }
        serde_json::to_string(&value)
            .map_err(|e| AppError::Internal(format!("event serialization: {e}")))
    }
}

/// Publish an event to a room's channel. Every instance, this one included,
/// receives it through its pattern subscription and fans out to local
/// connections, so there is exactly one delivery path.
pub async fn publish(redis: &RedisClient, room: RoomId, event: &OutboundEvent) -> AppResult<()> {
    let payload = event.to_payload()?;
    pubsub::publish(redis, &room.channel(), &payload).await
}

/// Publish to each recipient's personal room. Used for events that target
/// users rather than a conversation, like direct conversation creation.
pub async fn publish_to_users(
    redis: &RedisClient,
    user_ids: &[Uuid],
    event: &OutboundEvent,
) -> AppResult<()> {
    let payload = event.to_payload()?;
    for user_id in user_ids {
        pubsub::publish(redis, &RoomId::User(*user_id).channel(), &payload).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::{MessageBody, MessageStatus, ReadReceipt};

    fn sample_message() -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            body: MessageBody::Text {
                text: "hello".into(),
            },
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
    fn read_marked_carries_updated_messages() {
        let reader = Uuid::new_v4();
        let mut message = sample_message();
        message.status = MessageStatus::Read;
        message.read_by.push(ReadReceipt {
            user_id: reader,
            read_at: Utc::now(),
        });

        let event = OutboundEvent::ReadMarked {
            conversation_id: message.conversation_id,
            user_id: reader,
            messages: vec![message],
        };
        let value: serde_json::Value =
            serde_json::from_str(&event.to_payload().unwrap()).unwrap();
        assert_eq!(value["event"], "read.marked");
        // A client can take the new receipts and status from the event
        // alone, without a follow-up fetch.
        assert_eq!(value["messages"][0]["status"], "read");
        assert_eq!(
            value["messages"][0]["read_by"][0]["user_id"],
            reader.to_string()
        );
    }

    #[test]
    fn message_deleted_carries_the_tombstoned_entity() {
        let mut message = sample_message();
        message.is_deleted = true;
        message.body = MessageBody::Text {
            text: String::new(),
        };

        let event = OutboundEvent::MessageDeleted {
            message,
            for_everyone: true,
        };
        let value: serde_json::Value =
            serde_json::from_str(&event.to_payload().unwrap()).unwrap();
        assert_eq!(value["event"], "message.deleted");
        assert_eq!(value["for_everyone"], true);
        assert_eq!(value["message"]["is_deleted"], true);
        assert_eq!(value["message"]["body"]["text"], "");
    }

    #[test]
    fn events_use_dotted_names() {
        let event = OutboundEvent::TypingStarted {
            conversation_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        };
        let value: serde_json::Value =
            serde_json::from_str(&event.to_payload().unwrap()).unwrap();
        assert_eq!(value["event"], "typing.started");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn error_event_carries_retryability() {
        let event = OutboundEvent::error(&AppError::Unavailable, Some("tmp-1".into()));
        let value: serde_json::Value =
            serde_json::from_str(&event.to_payload().unwrap()).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["code"], 503);
        assert_eq!(value["retryable"], true);
        assert_eq!(value["temp_id"], "tmp-1");
    }

    #[test]
    fn event_type_matches_serialized_tag() {
        let event = OutboundEvent::PresenceOffline {
            user_id: Uuid::new_v4(),
            last_seen: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], event.event_type());
    }
}
