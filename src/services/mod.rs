pub mod conversation_service;
pub mod message_service;
pub mod presence_service;
pub mod push;
