use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque descriptor returned by the media/upload collaborator. The core
/// stores it verbatim and never inspects file bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub url: String,
    pub filename: Option<String>,
    pub mimetype: Option<String>,
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactCard {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Closed tagged content variant. Each variant carries only its own payload;
/// the shared envelope (ids, timestamps, status) lives on Message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    Text { text: String },
    Image { media: MediaDescriptor },
    Video { media: MediaDescriptor },
    Audio { media: MediaDescriptor },
    File { media: MediaDescriptor },
    Location { location: GeoPoint },
    Contact { contact: ContactCard },
    AiSuggestion { text: String },
}

impl MessageBody {
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::Text { .. } => "text",
            MessageBody::Image { .. } => "image",
            MessageBody::Video { .. } => "video",
            MessageBody::Audio { .. } => "audio",
            MessageBody::File { .. } => "file",
            MessageBody::Location { .. } => "location",
            MessageBody::Contact { .. } => "contact",
            MessageBody::AiSuggestion { .. } => "ai_suggestion",
        }
    }

    /// Editable text, if this body has any.
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageBody::Text { text } | MessageBody::AiSuggestion { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sent" => Some(MessageStatus::Sent),
            "delivered" => Some(MessageStatus::Delivered),
            "read" => Some(MessageStatus::Read),
            "failed" => Some(MessageStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditRecord {
    pub body: String,
    pub edited_at: DateTime<Utc>,
}

/// Fully hydrated message. Outbound events carry this whole struct so a
/// client that missed intermediate events reaches a consistent view from any
/// single event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub body: MessageBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    pub is_ai_generated: bool,
    pub status: MessageStatus,
    pub read_by: Vec<ReadReceipt>,
    pub reactions: Vec<Reaction>,
    pub is_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    pub edit_history: Vec<EditRecord>,
    pub is_deleted: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub deleted_for: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// The per-user hide list and the global tombstone are independent; a
    /// message is invisible to a user when either applies.
    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        !self.is_deleted && !self.deleted_for.contains(&user_id)
    }

    pub fn is_read_by(&self, user_id: Uuid) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message(sender: Uuid) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: sender,
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
    fn body_round_trips_with_type_tag() {
        let body = MessageBody::Image {
            media: MediaDescriptor {
                url: "https://cdn.example/x.png".into(),
                filename: Some("x.png".into()),
                mimetype: Some("image/png".into()),
                size: Some(1024),
                thumbnail: None,
                duration: None,
                width: Some(64),
                height: Some(64),
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "image");
        let back: MessageBody = serde_json::from_value(json).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn ai_suggestion_tag() {
        let body = MessageBody::AiSuggestion { text: "hi!".into() };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "ai_suggestion");
        assert_eq!(body.kind(), "ai_suggestion");
    }

    #[test]
    fn hidden_for_one_user_visible_to_others() {
        let viewer = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut msg = text_message(Uuid::new_v4());
        msg.deleted_for.push(viewer);
        assert!(!msg.is_visible_to(viewer));
        assert!(msg.is_visible_to(other));
    }

    #[test]
    fn global_tombstone_hides_from_everyone() {
        let mut msg = text_message(Uuid::new_v4());
        msg.is_deleted = true;
        assert!(!msg.is_visible_to(Uuid::new_v4()));
    }

    #[test]
    fn read_receipts_are_per_user() {
        let reader = Uuid::new_v4();
        let mut msg = text_message(Uuid::new_v4());
        assert!(!msg.is_read_by(reader));
        msg.read_by.push(ReadReceipt {
            user_id: reader,
            read_at: Utc::now(),
        });
        assert!(msg.is_read_by(reader));
        assert!(!msg.is_read_by(Uuid::new_v4()));
    }
}
