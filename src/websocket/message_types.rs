use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::message::MessageBody;

/// Client-to-server frames. Unknown types fail deserialization and are
/// answered with an error frame on the offending connection only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsInbound {
    SendMessage {
        conversation_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
        body: MessageBody,
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to: Option<Uuid>,
        #[serde(default)]
        is_ai_generated: bool,
    },
    EditMessage {
        message_id: Uuid,
        text: String,
    },
    DeleteMessage {
        message_id: Uuid,
        #[serde(default)]
        for_everyone: bool,
    },
    AddReaction {
        message_id: Uuid,
        emoji: String,
    },
    RemoveReaction {
        message_id: Uuid,
    },
    MarkRead {
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
    },
    TypingStart {
        conversation_id: Uuid,
    },
    TypingStop {
        conversation_id: Uuid,
    },
    JoinConversation {
        conversation_id: Uuid,
    },
    LeaveConversation {
        conversation_id: Uuid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_frame_parses() {
        let raw = serde_json::json!({
            "type": "send_message",
            "conversation_id": Uuid::new_v4(),
            "temp_id": "tmp-42",
            "body": { "type": "text", "text": "hi" }
        });
        let frame: WsInbound = serde_json::from_value(raw).unwrap();
        match frame {
            WsInbound::SendMessage {
                temp_id,
                body,
                reply_to,
                is_ai_generated,
                ..
            } => {
                assert_eq!(temp_id.as_deref(), Some("tmp-42"));
                assert_eq!(body.text(), Some("hi"));
                assert!(reply_to.is_none());
                assert!(!is_ai_generated);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let raw = serde_json::json!({ "type": "self_destruct" });
        assert!(serde_json::from_value::<WsInbound>(raw).is_err());
    }
}
