use chrono::Utc;
use uuid::Uuid;

use chat_core_service::models::message::{Message, MessageBody, MessageStatus};
use chat_core_service::sync::{OutboxState, SyncAgent};
use chat_core_service::websocket::events::OutboundEvent;
use chat_core_service::websocket::{ConnectionRegistry, RoomId};

fn message(conversation_id: Uuid, sender_id: Uuid) -> Message {
    Message {
        id: Uuid::new_v4(),
        conversation_id,
        sender_id,
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

#[tokio::test]
async fn fanout_preserves_per_connection_order() {
    let registry = ConnectionRegistry::new();
    let room = RoomId::Conversation(Uuid::new_v4());
    let (id, mut rx) = registry.register(Uuid::new_v4()).await;
    registry.join_room(id, room).await;

    for i in 0..10 {
        registry.broadcast(room, &format!("event-{i}")).await;
    }
    for i in 0..10 {
        assert_eq!(rx.recv().await.unwrap(), format!("event-{i}"));
    }
}

#[tokio::test]
async fn membership_is_snapshotted_per_event() {
    let registry = ConnectionRegistry::new();
    let room = RoomId::Conversation(Uuid::new_v4());
    let (early, mut rx_early) = registry.register(Uuid::new_v4()).await;
    registry.join_room(early, room).await;

    registry.broadcast(room, "before-join").await;

    let (late, mut rx_late) = registry.register(Uuid::new_v4()).await;
    registry.join_room(late, room).await;
    assert_eq!(registry.members_of(room).await.len(), 2);
    registry.broadcast(room, "after-join").await;

    assert_eq!(rx_early.recv().await.unwrap(), "before-join");
    assert_eq!(rx_early.recv().await.unwrap(), "after-join");
    // The late joiner only sees events published after it joined.
    assert_eq!(rx_late.recv().await.unwrap(), "after-join");
    assert!(rx_late.try_recv().is_err());
}

#[tokio::test]
async fn disconnected_connections_are_skipped() {
    let registry = ConnectionRegistry::new();
    let room = RoomId::Conversation(Uuid::new_v4());
    let (stay, mut rx_stay) = registry.register(Uuid::new_v4()).await;
    let (gone, rx_gone) = registry.register(Uuid::new_v4()).await;
    registry.join_room(stay, room).await;
    registry.join_room(gone, room).await;

    drop(rx_gone);
    registry.unregister(gone).await;

    registry.broadcast(room, "still-works").await;
    assert_eq!(rx_stay.recv().await.unwrap(), "still-works");
}

#[test]
fn created_event_payload_reconciles_an_optimistic_send() {
    let conversation_id = Uuid::new_v4();
    let sender_id = Uuid::new_v4();
    let mut agent = SyncAgent::new();
    agent.send_optimistic(
        "tmp-7",
        conversation_id,
        MessageBody::Text {
            text: "hello".into(),
        },
    );

    // Server side: persist, then serialize the event exactly as broadcast.
    let persisted = message(conversation_id, sender_id);
    let event = OutboundEvent::MessageCreated {
        message: persisted.clone(),
        temp_id: Some("tmp-7".into()),
    };
    let payload = event.to_payload().unwrap();

    // Client side: parse the frame and reconcile.
    let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(value["event"], "message.created");
    assert_eq!(value["temp_id"], "tmp-7");
    let received: Message = serde_json::from_value(value["message"].clone()).unwrap();
    let temp_id = value["temp_id"].as_str().map(str::to_owned);

    agent.apply_created(&received, temp_id.as_deref());
    assert_eq!(
        agent.entry("tmp-7").unwrap().state,
        OutboxState::Confirmed {
            message_id: persisted.id
        }
    );
    assert_eq!(
        agent.resync_from(conversation_id).map(|(_, id)| id),
        Some(persisted.id)
    );
}

#[test]
fn failed_send_stays_visible_until_manual_retry() {
    let mut agent = SyncAgent::new();
    agent.send_optimistic(
        "tmp-8",
        Uuid::new_v4(),
        MessageBody::Text { text: "x".into() },
    );

    let err = chat_core_service::error::AppError::Unavailable;
    let event = OutboundEvent::error(&err, Some("tmp-8".into()));
    let value: serde_json::Value =
        serde_json::from_str(&event.to_payload().unwrap()).unwrap();
    assert_eq!(value["retryable"], true);

    agent.mark_failed(value["temp_id"].as_str().unwrap());
    assert_eq!(agent.entry("tmp-8").unwrap().state, OutboxState::Failed);
    assert!(agent.retry("tmp-8").is_some());
    assert_eq!(agent.entry("tmp-8").unwrap().state, OutboxState::Sending);
}
