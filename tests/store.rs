use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use chat_core_service::db::MIGRATOR;
use chat_core_service::error::AppError;
use chat_core_service::models::message::MessageBody;
use chat_core_service::services::conversation_service::ConversationService;
use chat_core_service::services::message_service::{MessageService, NewMessage};

/// Bootstrap a database pool for store tests.
async fn bootstrap_pool() -> Pool<Postgres> {
    let db_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL env var required for store tests");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .expect("failed to connect to DATABASE_URL");
    MIGRATOR.run(&pool).await.expect("migrations failed");
    pool
}

fn text(body: &str) -> MessageBody {
    MessageBody::Text { text: body.into() }
}

#[tokio::test]
#[ignore] // Run with: cargo test --test store -- --ignored
async fn direct_conversation_member_cannot_leave() {
    let pool = bootstrap_pool().await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let conversation = ConversationService::create_direct(&pool, alice, bob)
        .await
        .expect("create direct");

    // Neither side may drop out of a direct conversation; both participants
    // must stay active so the pair always has two members.
    for leaver in [alice, bob] {
        let result =
            ConversationService::remove_participant(&pool, conversation.id, leaver, leaver).await;
        assert!(
            matches!(result, Err(AppError::PermissionDenied)),
            "self-removal from a direct conversation must be rejected"
        );
    }

    let reloaded = ConversationService::get(&pool, conversation.id)
        .await
        .expect("reload");
    assert_eq!(reloaded.active_participants().count(), 2);
}

#[tokio::test]
#[ignore]
async fn delete_for_everyone_leaves_no_recoverable_text() {
    let pool = bootstrap_pool().await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let conversation = ConversationService::create_direct(&pool, alice, bob)
        .await
        .expect("create direct");

    let message = MessageService::append(
        &pool,
        conversation.id,
        NewMessage {
            sender_id: alice,
            body: text("first draft"),
            reply_to: None,
            is_ai_generated: false,
        },
    )
    .await
    .expect("append");
    MessageService::edit(&pool, message.id, alice, "second draft".into(), 48)
        .await
        .expect("edit");

    let deleted = MessageService::delete(&pool, message.id, alice, true)
        .await
        .expect("delete");

    assert!(deleted.is_deleted);
    assert_eq!(deleted.body.text(), Some(""));
    assert!(
        deleted.edit_history.is_empty(),
        "pre-edit history must be purged with the tombstone"
    );
}

#[tokio::test]
#[ignore]
async fn mark_read_keeps_the_earliest_timestamp() {
    let pool = bootstrap_pool().await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let conversation = ConversationService::create_direct(&pool, alice, bob)
        .await
        .expect("create direct");

    let message = MessageService::append(
        &pool,
        conversation.id,
        NewMessage {
            sender_id: alice,
            body: text("read me"),
            reply_to: None,
            is_ai_generated: false,
        },
    )
    .await
    .expect("append");

    let first = MessageService::mark_read(&pool, conversation.id, bob, &[message.id])
        .await
        .expect("first read");
    assert_eq!(first.len(), 1);
    let first_read_at = first[0]
        .read_by
        .iter()
        .find(|r| r.user_id == bob)
        .expect("receipt")
        .read_at;

    // Re-reading is a no-op: nothing newly marked, timestamp unmoved.
    let second = MessageService::mark_read(&pool, conversation.id, bob, &[message.id])
        .await
        .expect("second read");
    assert!(second.is_empty());

    let reloaded = MessageService::get(&pool, message.id).await.expect("get");
    let receipt = reloaded
        .read_by
        .iter()
        .find(|r| r.user_id == bob)
        .expect("receipt");
    assert_eq!(receipt.read_at, first_read_at);
}
