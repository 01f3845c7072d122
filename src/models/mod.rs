pub mod conversation;
pub mod message;

pub use conversation::{Conversation, ConversationKind, Participant, ParticipantRole};
pub use message::{Message, MessageBody, MessageStatus};
