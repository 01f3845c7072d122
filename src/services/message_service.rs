use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::message::{
    EditRecord, Message, MessageBody, MessageStatus, Reaction, ReadReceipt,
};
use crate::services::conversation_service::ConversationService;

/// Opaque keyset cursor over (created_at, id). Encoded so clients cannot
/// depend on its shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn encode(&self) -> String {
        let raw = format!("{}|{}", self.created_at.timestamp_micros(), self.id);
        URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(token: &str) -> AppResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| AppError::BadRequest("malformed cursor".into()))?;
        let raw = String::from_utf8(bytes)
            .map_err(|_| AppError::BadRequest("malformed cursor".into()))?;
        let (micros, id) = raw
            .split_once('|')
            .ok_or_else(|| AppError::BadRequest("malformed cursor".into()))?;
        let micros: i64 = micros
            .parse()
            .map_err(|_| AppError::BadRequest("malformed cursor".into()))?;
        let created_at = DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| AppError::BadRequest("malformed cursor".into()))?;
        let id = id
            .parse()
            .map_err(|_| AppError::BadRequest("malformed cursor".into()))?;
        Ok(Self { created_at, id })
    }
}

#[derive(Debug)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub next_cursor: Option<String>,
}

#[derive(Debug)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub body: MessageBody,
    pub reply_to: Option<Uuid>,
    pub is_ai_generated: bool,
}

/// A sender may edit only while the message is younger than the window.
pub fn edit_window_open(
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    window_hours: i64,
) -> bool {
    now - created_at <= Duration::hours(window_hours)
}

pub struct MessageService;

impl MessageService {
    /// Persist a message and bump the conversation's last-activity pointers
    /// in one transaction. Ordering inside a conversation is fixed at this
    /// point; distribution happens after and never reorders.
    pub async fn append(
        db: &PgPool,
        conversation_id: Uuid,
        new: NewMessage,
    ) -> AppResult<Message> {
        ConversationService::require_member(db, conversation_id, new.sender_id).await?;

        if let Some(reply_to) = new.reply_to {
            let exists = sqlx::query(
                "SELECT 1 FROM messages WHERE id = $1 AND conversation_id = $2 AND is_deleted = FALSE",
            )
            .bind(reply_to)
            .bind(conversation_id)
            .fetch_optional(db)
            .await?;
            if exists.is_none() {
                return Err(AppError::BadRequest(
                    "reply target not found in this conversation".into(),
                ));
            }
        }
        if let Some(text) = new.body.text() {
            if text.is_empty() {
                return Err(AppError::BadRequest("message text cannot be empty".into()));
            }
            if text.len() > 10_000 {
                return Err(AppError::BadRequest(
                    "message text too long (max 10000)".into(),
                ));
            }
        }

        let auto_delete_days: i32 =
            sqlx::query("SELECT auto_delete_days FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .fetch_one(db)
                .await?
                .get("auto_delete_days");
        let expires_at =
            (auto_delete_days > 0).then(|| Utc::now() + Duration::days(auto_delete_days as i64));

        let id = Uuid::new_v4();
        let body_json = serde_json::to_value(&new.body)
            .map_err(|e| AppError::Internal(format!("body serialization: {e}")))?;

        let mut tx = db.begin().await?;
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, body, reply_to, \
                                   is_ai_generated, status, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, 'sent', $7)",
        )
        .bind(id)
        .bind(conversation_id)
        .bind(new.sender_id)
        .bind(&body_json)
        .bind(new.reply_to)
        .bind(new.is_ai_generated)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE conversations SET last_message_id = $2, last_activity = NOW(), updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Self::get(db, id).await
    }

    /// Fetch one message with receipts, reactions and edit history hydrated.
    pub async fn get(db: &PgPool, id: Uuid) -> AppResult<Message> {
        let row = sqlx::query(
            "SELECT id, conversation_id, sender_id, body, reply_to, is_ai_generated, status, \
                    is_edited, edited_at, is_deleted, expires_at, created_at \
             FROM messages WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)?;

        let mut message = Self::from_row(&row)?;
        Self::hydrate(db, std::slice::from_mut(&mut message)).await?;
        Ok(message)
    }

    /// Sender-only edit of text bodies within the edit window. The previous
    /// text is appended to the edit history before the body changes.
    pub async fn edit(
        db: &PgPool,
        message_id: Uuid,
        editor_id: Uuid,
        new_text: String,
        edit_window_hours: i64,
    ) -> AppResult<Message> {
        if new_text.is_empty() {
            return Err(AppError::BadRequest("message text cannot be empty".into()));
        }
        let message = Self::get(db, message_id).await?;
        if message.is_deleted {
            return Err(AppError::NotFound);
        }
        if message.sender_id != editor_id {
            return Err(AppError::PermissionDenied);
        }
        let old_text = match message.body.text() {
            Some(t) => t.to_owned(),
            None => {
                return Err(AppError::BadRequest(
                    "only text messages can be edited".into(),
                ))
            }
        };
        if !edit_window_open(message.created_at, Utc::now(), edit_window_hours) {
            return Err(AppError::EditWindowExpired {
                max_edit_hours: edit_window_hours,
            });
        }

        let new_body = match &message.body {
            MessageBody::AiSuggestion { .. } => MessageBody::AiSuggestion { text: new_text },
            _ => MessageBody::Text { text: new_text },
        };
        let body_json = serde_json::to_value(&new_body)
            .map_err(|e| AppError::Internal(format!("body serialization: {e}")))?;

        let mut tx = db.begin().await?;
        sqlx::query("INSERT INTO message_edits (message_id, body, edited_at) VALUES ($1, $2, NOW())")
            .bind(message_id)
            .bind(&old_text)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE messages SET body = $2, is_edited = TRUE, edited_at = NOW() WHERE id = $1",
        )
        .bind(message_id)
        .bind(&body_json)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Self::get(db, message_id).await
    }

    /// Delete for everyone: sender only; the body is blanked, the global
    /// tombstone set, and the pre-edit history purged so no text survives.
    /// Delete for me: any member; records a per-user hide.
    pub async fn delete(
        db: &PgPool,
        message_id: Uuid,
        actor_id: Uuid,
        for_everyone: bool,
    ) -> AppResult<Message> {
        let message = Self::get(db, message_id).await?;
        ConversationService::require_member(db, message.conversation_id, actor_id).await?;

        if for_everyone {
            if message.sender_id != actor_id {
                return Err(AppError::PermissionDenied);
            }
            let blank = serde_json::to_value(MessageBody::Text {
                text: String::new(),
            })
            .map_err(|e| AppError::Internal(format!("body serialization: {e}")))?;
            let mut tx = db.begin().await?;
            sqlx::query(
                "UPDATE messages SET is_deleted = TRUE, deleted_at = NOW(), body = $2 \
                 WHERE id = $1",
            )
            .bind(message_id)
            .bind(&blank)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM message_edits WHERE message_id = $1")
                .bind(message_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        } else {
            sqlx::query(
                "INSERT INTO message_hides (message_id, user_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(message_id)
            .bind(actor_id)
            .execute(db)
            .await?;
        }

        Self::get(db, message_id).await
    }

    /// One reaction per user per message, last write wins. Re-sending the
    /// same emoji changes nothing.
    pub async fn add_reaction(
        db: &PgPool,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    ) -> AppResult<Message> {
        if emoji.is_empty() || emoji.len() > 32 {
            return Err(AppError::BadRequest("invalid reaction emoji".into()));
        }
        let message = Self::get(db, message_id).await?;
        if message.is_deleted {
            return Err(AppError::NotFound);
        }
        ConversationService::require_member(db, message.conversation_id, user_id).await?;

        sqlx::query(
            "INSERT INTO message_reactions (message_id, user_id, emoji) VALUES ($1, $2, $3) \
             ON CONFLICT (message_id, user_id) DO UPDATE SET emoji = EXCLUDED.emoji, created_at = NOW() \
             WHERE message_reactions.emoji IS DISTINCT FROM EXCLUDED.emoji",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(&emoji)
        .execute(db)
        .await?;

        Self::get(db, message_id).await
    }

    /// Removing an absent reaction is a no-op.
    pub async fn remove_reaction(
        db: &PgPool,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Message> {
        let message = Self::get(db, message_id).await?;
        ConversationService::require_member(db, message.conversation_id, user_id).await?;

        sqlx::query("DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2")
            .bind(message_id)
            .bind(user_id)
            .execute(db)
            .await?;

        Self::get(db, message_id).await
    }

    /// Record read receipts for a batch of messages. Receipts are append-only
    /// and idempotent; a re-read never moves an existing timestamp. Returns
    /// the newly marked messages in their updated state.
    pub async fn mark_read(
        db: &PgPool,
        conversation_id: Uuid,
        reader_id: Uuid,
        message_ids: &[Uuid],
    ) -> AppResult<Vec<Message>> {
        ConversationService::require_member(db, conversation_id, reader_id).await?;

        let mut newly_read = Vec::new();
        let mut tx = db.begin().await?;
        for &message_id in message_ids {
            let owned = sqlx::query(
                "SELECT sender_id FROM messages WHERE id = $1 AND conversation_id = $2",
            )
            .bind(message_id)
            .bind(conversation_id)
            .fetch_optional(&mut *tx)
            .await?;
            let sender_id: Uuid = match owned {
                Some(row) => row.get("sender_id"),
                None => continue,
            };
            // Senders do not generate receipts for their own messages.
            if sender_id == reader_id {
                continue;
            }
            let inserted = sqlx::query(
                "INSERT INTO message_reads (message_id, user_id, read_at) VALUES ($1, $2, NOW()) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(message_id)
            .bind(reader_id)
            .execute(&mut *tx)
            .await?;
            if inserted.rows_affected() > 0 {
                newly_read.push(message_id);
            }

            // Promote to read once every other active participant has a receipt.
            sqlx::query(
                "UPDATE messages m SET status = 'read' WHERE m.id = $1 AND m.status <> 'read' \
                 AND NOT EXISTS ( \
                    SELECT 1 FROM conversation_participants cp \
                    WHERE cp.conversation_id = m.conversation_id AND cp.is_active = TRUE \
                      AND cp.user_id <> m.sender_id \
                      AND NOT EXISTS ( \
                        SELECT 1 FROM message_reads r \
                        WHERE r.message_id = m.id AND r.user_id = cp.user_id))",
            )
            .bind(message_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Self::get_many(db, &newly_read).await
    }

    /// Fetch and hydrate a batch of messages, preserving the id order.
    pub async fn get_many(db: &PgPool, ids: &[Uuid]) -> AppResult<Vec<Message>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id, conversation_id, sender_id, body, reply_to, is_ai_generated, status, \
                    is_edited, edited_at, is_deleted, expires_at, created_at \
             FROM messages WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(db)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            messages.push(Self::from_row(row)?);
        }
        Self::hydrate(db, &mut messages).await?;
        messages.sort_by_key(|m| ids.iter().position(|id| *id == m.id));
        Ok(messages)
    }

    /// Keyset-paginated history, newest first. Globally deleted messages and
    /// messages the viewer hid are excluded.
    pub async fn list(
        db: &PgPool,
        conversation_id: Uuid,
        viewer_id: Uuid,
        cursor: Option<Cursor>,
        limit: i64,
        max_page_size: i64,
    ) -> AppResult<MessagePage> {
        ConversationService::require_member(db, conversation_id, viewer_id).await?;
        let limit = limit.clamp(1, max_page_size);

        let rows = match cursor {
            Some(c) => {
                sqlx::query(
                    "SELECT id, conversation_id, sender_id, body, reply_to, is_ai_generated, \
                            status, is_edited, edited_at, is_deleted, expires_at, created_at \
                     FROM messages \
                     WHERE conversation_id = $1 AND is_deleted = FALSE \
                       AND (created_at, id) < ($2, $3) \
                       AND NOT EXISTS (SELECT 1 FROM message_hides h \
                                       WHERE h.message_id = messages.id AND h.user_id = $4) \
                     ORDER BY created_at DESC, id DESC LIMIT $5",
                )
                .bind(conversation_id)
                .bind(c.created_at)
                .bind(c.id)
                .bind(viewer_id)
                .bind(limit)
                .fetch_all(db)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, conversation_id, sender_id, body, reply_to, is_ai_generated, \
                            status, is_edited, edited_at, is_deleted, expires_at, created_at \
                     FROM messages \
                     WHERE conversation_id = $1 AND is_deleted = FALSE \
                       AND NOT EXISTS (SELECT 1 FROM message_hides h \
                                       WHERE h.message_id = messages.id AND h.user_id = $2) \
                     ORDER BY created_at DESC, id DESC LIMIT $3",
                )
                .bind(conversation_id)
                .bind(viewer_id)
                .bind(limit)
                .fetch_all(db)
                .await?
            }
        };

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            messages.push(Self::from_row(row)?);
        }
        Self::hydrate(db, &mut messages).await?;

        let next_cursor = (messages.len() as i64 == limit)
            .then(|| {
                messages.last().map(|m| {
                    Cursor {
                        created_at: m.created_at,
                        id: m.id,
                    }
                    .encode()
                })
            })
            .flatten();

        // Fetched newest-first for the keyset scan, returned in
        // chronological order for rendering.
        messages.reverse();

        Ok(MessagePage {
            messages,
            next_cursor,
        })
    }

    /// The most recent visible messages in chronological order, for building
    /// an AI reply prompt. Text is extracted here so callers never see raw
    /// bodies they do not need.
    pub async fn recent_context(
        db: &PgPool,
        conversation_id: Uuid,
        n: i64,
    ) -> AppResult<Vec<(Uuid, String)>> {
        let rows = sqlx::query(
            "SELECT sender_id, body FROM messages \
             WHERE conversation_id = $1 AND is_deleted = FALSE \
             ORDER BY created_at DESC, id DESC LIMIT $2",
        )
        .bind(conversation_id)
        .bind(n)
        .fetch_all(db)
        .await?;

        let mut context = Vec::new();
        for row in rows.into_iter().rev() {
            let body: serde_json::Value = row.get("body");
            let body: MessageBody = match serde_json::from_value(body) {
                Ok(b) => b,
                Err(_) => continue,
            };
            if let Some(text) = body.text() {
                context.push((row.get("sender_id"), text.to_owned()));
            }
        }
        Ok(context)
    }

    /// Hard-delete messages past their expiry. Runs on a timer; expiry is
    /// the one case where rows actually leave the table.
    pub async fn sweep_expired(db: &PgPool) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE expires_at IS NOT NULL AND expires_at <= NOW()")
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    pub fn spawn_expiry_sweeper(db: PgPool, config: Arc<Config>) {
        tokio::spawn(async move {
            let period =
                std::time::Duration::from_secs(config.expiry_sweep_interval_seconds.max(1));
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match Self::sweep_expired(&db).await {
                    Ok(0) => {}
                    Ok(n) => info!(deleted = n, "expired messages swept"),
                    Err(e) => error!(error = %e, "expiry sweep failed"),
                }
            }
        });
    }

    fn from_row(row: &sqlx::postgres::PgRow) -> AppResult<Message> {
        let body: serde_json::Value = row.get("body");
        let body: MessageBody = serde_json::from_value(body)
            .map_err(|e| AppError::Internal(format!("stored body malformed: {e}")))?;
        let status: String = row.get("status");
        Ok(Message {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            sender_id: row.get("sender_id"),
            body,
            reply_to: row.get("reply_to"),
            is_ai_generated: row.get("is_ai_generated"),
            status: MessageStatus::parse(&status).unwrap_or(MessageStatus::Sent),
            read_by: vec![],
            reactions: vec![],
            is_edited: row.get("is_edited"),
            edited_at: row.get("edited_at"),
            edit_history: vec![],
            is_deleted: row.get("is_deleted"),
            deleted_for: vec![],
            expires_at: row.get("expires_at"),
            created_at: row.get("created_at"),
        })
    }

    async fn hydrate(db: &PgPool, messages: &mut [Message]) -> AppResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();

        let reads = sqlx::query(
            "SELECT message_id, user_id, read_at FROM message_reads \
             WHERE message_id = ANY($1) ORDER BY read_at ASC",
        )
        .bind(&ids)
        .fetch_all(db)
        .await?;
        let reactions = sqlx::query(
            "SELECT message_id, user_id, emoji, created_at FROM message_reactions \
             WHERE message_id = ANY($1) ORDER BY created_at ASC",
        )
        .bind(&ids)
        .fetch_all(db)
        .await?;
        let edits = sqlx::query(
            "SELECT message_id, body, edited_at FROM message_edits \
             WHERE message_id = ANY($1) ORDER BY id ASC",
        )
        .bind(&ids)
        .fetch_all(db)
        .await?;
        let hides = sqlx::query(
            "SELECT message_id, user_id FROM message_hides WHERE message_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(db)
        .await?;

        for message in messages.iter_mut() {
            for r in reads.iter().filter(|r| r.get::<Uuid, _>("message_id") == message.id) {
                message.read_by.push(ReadReceipt {
                    user_id: r.get("user_id"),
                    read_at: r.get("read_at"),
                });
            }
            for r in reactions
                .iter()
                .filter(|r| r.get::<Uuid, _>("message_id") == message.id)
            {
                message.reactions.push(Reaction {
                    user_id: r.get("user_id"),
                    emoji: r.get("emoji"),
                    created_at: r.get("created_at"),
                });
            }
            for e in edits.iter().filter(|e| e.get::<Uuid, _>("message_id") == message.id) {
                message.edit_history.push(EditRecord {
                    body: e.get("body"),
                    edited_at: e.get("edited_at"),
                });
            }
            for h in hides.iter().filter(|h| h.get::<Uuid, _>("message_id") == message.id) {
                message.deleted_for.push(h.get("user_id"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let cursor = Cursor {
            created_at: Utc::now(),
            id: Uuid::new_v4(),
        };
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded.id, cursor.id);
        assert_eq!(
            decoded.created_at.timestamp_micros(),
            cursor.created_at.timestamp_micros()
        );
    }

    #[test]
    fn edit_window_closes_after_configured_hours() {
        let created = Utc::now();
        assert!(edit_window_open(created, created + Duration::hours(1), 48));
        assert!(edit_window_open(created, created + Duration::hours(47), 48));
        assert!(!edit_window_open(
            created,
            created + Duration::hours(48) + Duration::seconds(1),
            48
        ));
        assert!(!edit_window_open(created, created + Duration::hours(72), 48));
    }

    #[test]
    fn cursor_rejects_garbage() {
        assert!(matches!(
            Cursor::decode("not base64!!"),
            Err(AppError::BadRequest(_))
        ));
        let bogus = URL_SAFE_NO_PAD.encode("no-separator-here");
        assert!(matches!(
            Cursor::decode(&bogus),
            Err(AppError::BadRequest(_))
        ));
    }
}
