use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::conversation::{
    check_addition, check_removal, direct_key, Conversation, ConversationKind,
    ConversationSettings, Participant, ParticipantRole,
};

#[derive(Debug, Default)]
pub struct GroupMeta {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Default)]
pub struct SettingsPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub mute_notifications: Option<bool>,
    pub allow_ai_replies: Option<bool>,
    pub auto_delete_days: Option<i32>,
    pub only_admins_can_add_members: Option<bool>,
    pub max_members: Option<i32>,
}

pub struct ConversationService;

impl ConversationService {
    /// Create a 1:1 conversation. If an active direct conversation between the
    /// same pair already exists, no new record is created and the existing id
    /// is surfaced in the error.
    pub async fn create_direct(
        db: &PgPool,
        creator_id: Uuid,
        other_id: Uuid,
    ) -> AppResult<Conversation> {
        if creator_id == other_id {
            return Err(AppError::BadRequest(
                "direct conversation requires two distinct participants".into(),
            ));
        }

        let key = direct_key(creator_id, other_id);
        if let Some(existing_id) = Self::find_direct(db, &key).await? {
            return Err(AppError::DuplicateDirectConversation {
                existing_id,
            });
        }

        let id = Uuid::new_v4();
        let mut tx = db.begin().await?;
        let insert = sqlx::query(
            "INSERT INTO conversations (id, kind, direct_key) VALUES ($1, 'direct', $2)",
        )
        .bind(id)
        .bind(&key)
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert {
            // Lost a race with a concurrent creation of the same pair.
            if is_unique_violation(&e) {
                tx.rollback().await?;
                if let Some(existing_id) = Self::find_direct(db, &key).await? {
                    return Err(AppError::DuplicateDirectConversation { existing_id });
                }
            }
            return Err(e.into());
        }

        sqlx::query(
            "INSERT INTO conversation_participants (conversation_id, user_id, role) \
             VALUES ($1, $2, 'owner'), ($1, $3, 'member')",
        )
        .bind(id)
        .bind(creator_id)
        .bind(other_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Self::get(db, id).await
    }

    /// Create a group conversation with the creator as owner.
    pub async fn create_group(
        db: &PgPool,
        creator_id: Uuid,
        meta: GroupMeta,
        member_ids: &[Uuid],
        default_max_members: i32,
    ) -> AppResult<Conversation> {
        if let Some(name) = meta.name.as_deref() {
            if name.trim().is_empty() {
                return Err(AppError::BadRequest("group name cannot be empty".into()));
            }
            if name.len() > 100 {
                return Err(AppError::BadRequest("group name too long (max 100)".into()));
            }
        }
        if meta.description.as_deref().map_or(0, str::len) > 500 {
            return Err(AppError::BadRequest(
                "group description too long (max 500)".into(),
            ));
        }

        let mut members: Vec<Uuid> = vec![creator_id];
        for m in member_ids {
            if !members.contains(m) {
                members.push(*m);
            }
        }
        if members.len() as i32 > default_max_members {
            return Err(AppError::CapacityExceeded {
                max_members: default_max_members,
            });
        }

        let id = Uuid::new_v4();
        let mut tx = db.begin().await?;
        sqlx::query(
            "INSERT INTO conversations (id, kind, name, description, avatar_url, max_members) \
             VALUES ($1, 'group', $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(&meta.name)
        .bind(&meta.description)
        .bind(&meta.avatar_url)
        .bind(default_max_members)
        .execute(&mut *tx)
        .await?;

        for user_id in &members {
            let role = if *user_id == creator_id {
                "owner"
            } else {
                "member"
            };
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, user_id, role) \
                 VALUES ($1, $2, $3)",
            )
            .bind(id)
            .bind(user_id)
            .bind(role)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Self::get(db, id).await
    }

    /// Fetch a conversation with its full participant list. Soft-deleted
    /// conversations behave as absent.
    pub async fn get(db: &PgPool, id: Uuid) -> AppResult<Conversation> {
        let row = sqlx::query(
            "SELECT id, kind, name, description, avatar_url, last_message_id, last_activity, \
                    mute_notifications, allow_ai_replies, auto_delete_days, \
                    only_admins_can_add_members, max_members, is_archived, is_deleted, created_at \
             FROM conversations WHERE id = $1 AND is_deleted = FALSE",
        )
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)?;

        let participant_rows = sqlx::query(
            "SELECT user_id, role, joined_at, left_at, is_active \
             FROM conversation_participants WHERE conversation_id = $1 ORDER BY joined_at ASC",
        )
        .bind(id)
        .fetch_all(db)
        .await?;

        let participants = participant_rows
            .into_iter()
            .map(|r| Participant {
                user_id: r.get("user_id"),
                role: ParticipantRole::parse(r.get("role")).unwrap_or(ParticipantRole::Member),
                joined_at: r.get("joined_at"),
                left_at: r.get("left_at"),
                is_active: r.get("is_active"),
            })
            .collect();

        Ok(Conversation {
            id: row.get("id"),
            kind: ConversationKind::parse(row.get("kind")).unwrap_or(ConversationKind::Group),
            name: row.get("name"),
            description: row.get("description"),
            avatar_url: row.get("avatar_url"),
            participants,
            last_message_id: row.get("last_message_id"),
            last_activity: row.get("last_activity"),
            settings: ConversationSettings {
                mute_notifications: row.get("mute_notifications"),
                allow_ai_replies: row.get("allow_ai_replies"),
                auto_delete_days: row.get("auto_delete_days"),
                only_admins_can_add_members: row.get("only_admins_can_add_members"),
                max_members: row.get("max_members"),
            },
            is_archived: row.get("is_archived"),
            is_deleted: row.get("is_deleted"),
            created_at: row.get("created_at"),
        })
    }

    /// Conversation ids the user actively participates in, most recent first.
    pub async fn conversation_ids_for_user(db: &PgPool, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT c.id FROM conversations c \
             JOIN conversation_participants cp ON cp.conversation_id = c.id \
             WHERE cp.user_id = $1 AND cp.is_active = TRUE AND c.is_deleted = FALSE \
             ORDER BY c.last_activity DESC",
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("id")).collect())
    }

    pub async fn list_for_user(db: &PgPool, user_id: Uuid) -> AppResult<Vec<Conversation>> {
        let ids = Self::conversation_ids_for_user(db, user_id).await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(Self::get(db, id).await?);
        }
        Ok(out)
    }

    pub async fn is_active_member(
        db: &PgPool,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<bool> {
        let rec = sqlx::query(
            "SELECT 1 FROM conversation_participants cp \
             JOIN conversations c ON c.id = cp.conversation_id \
             WHERE cp.conversation_id = $1 AND cp.user_id = $2 \
               AND cp.is_active = TRUE AND c.is_deleted = FALSE \
             LIMIT 1",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(db)
        .await?;
        Ok(rec.is_some())
    }

    pub async fn require_member(
        db: &PgPool,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<()> {
        if Self::is_active_member(db, conversation_id, user_id).await? {
            Ok(())
        } else {
            Err(AppError::NotAMember)
        }
    }

    pub async fn active_participant_ids(
        db: &PgPool,
        conversation_id: Uuid,
    ) -> AppResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT user_id FROM conversation_participants \
             WHERE conversation_id = $1 AND is_active = TRUE",
        )
        .bind(conversation_id)
        .fetch_all(db)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("user_id")).collect())
    }

    /// Add a participant to a group conversation. Rejoining a conversation
    /// the target previously left reactivates the old row instead of
    /// duplicating it.
    pub async fn add_participant(
        db: &PgPool,
        conversation_id: Uuid,
        actor_id: Uuid,
        target_id: Uuid,
        role: ParticipantRole,
    ) -> AppResult<Conversation> {
        if role == ParticipantRole::Owner {
            return Err(AppError::BadRequest(
                "cannot add a participant as owner".into(),
            ));
        }

        let conversation = Self::get(db, conversation_id).await?;
        if conversation.kind != ConversationKind::Group {
            // A direct conversation has exactly two participants, ever.
            return Err(AppError::PermissionDenied);
        }
        let actor_role = conversation
            .role_of(actor_id)
            .ok_or(AppError::NotAMember)?;
        check_addition(actor_role, conversation.settings.only_admins_can_add_members)?;

        let existing = conversation
            .participants
            .iter()
            .find(|p| p.user_id == target_id);
        if let Some(p) = existing {
            if p.is_active {
                return Err(AppError::AlreadyMember);
            }
        }

        let active_count = conversation.active_participants().count() as i32;
        if active_count >= conversation.settings.max_members {
            return Err(AppError::CapacityExceeded {
                max_members: conversation.settings.max_members,
            });
        }

        let mut tx = db.begin().await?;
        if existing.is_some() {
            sqlx::query(
                "UPDATE conversation_participants \
                 SET is_active = TRUE, left_at = NULL, joined_at = NOW(), role = $3 \
                 WHERE conversation_id = $1 AND user_id = $2",
            )
            .bind(conversation_id)
            .bind(target_id)
            .bind(role.as_str())
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, user_id, role) \
                 VALUES ($1, $2, $3)",
            )
            .bind(conversation_id)
            .bind(target_id)
            .bind(role.as_str())
            .execute(&mut *tx)
            .await?;
        }
        Self::touch(&mut tx, conversation_id).await?;
        tx.commit().await?;

        Self::get(db, conversation_id).await
    }

    /// Remove a participant (or leave). The participant row is deactivated,
    /// never deleted, so rejoin history is preserved.
    pub async fn remove_participant(
        db: &PgPool,
        conversation_id: Uuid,
        actor_id: Uuid,
        target_id: Uuid,
    ) -> AppResult<Conversation> {
        let conversation = Self::get(db, conversation_id).await?;
        let actor_role = conversation
            .role_of(actor_id)
            .ok_or(AppError::NotAMember)?;
        let target_role = conversation
            .role_of(target_id)
            .ok_or(AppError::NotFound)?;

        check_removal(
            conversation.kind,
            actor_role,
            target_role,
            actor_id == target_id,
        )?;

        let mut tx = db.begin().await?;
        sqlx::query(
            "UPDATE conversation_participants \
             SET is_active = FALSE, left_at = NOW() \
             WHERE conversation_id = $1 AND user_id = $2 AND is_active = TRUE",
        )
        .bind(conversation_id)
        .bind(target_id)
        .execute(&mut *tx)
        .await?;
        Self::touch(&mut tx, conversation_id).await?;
        tx.commit().await?;

        Self::get(db, conversation_id).await
    }

    /// Change a member's role. Owner only. Promoting someone to owner
    /// transfers ownership: the current owner is demoted to admin in the
    /// same transaction.
    pub async fn update_role(
        db: &PgPool,
        conversation_id: Uuid,
        actor_id: Uuid,
        target_id: Uuid,
        new_role: ParticipantRole,
    ) -> AppResult<Conversation> {
        let conversation = Self::get(db, conversation_id).await?;
        if conversation.kind != ConversationKind::Group {
            return Err(AppError::PermissionDenied);
        }
        let actor_role = conversation
            .role_of(actor_id)
            .ok_or(AppError::NotAMember)?;
        if actor_role != ParticipantRole::Owner {
            return Err(AppError::PermissionDenied);
        }
        let target_role = conversation
            .role_of(target_id)
            .ok_or(AppError::NotFound)?;
        if target_role == ParticipantRole::Owner {
            return Err(AppError::BadRequest("cannot change the owner's role".into()));
        }

        let mut tx = db.begin().await?;
        if new_role == ParticipantRole::Owner {
            sqlx::query(
                "UPDATE conversation_participants SET role = 'admin' \
                 WHERE conversation_id = $1 AND user_id = $2",
            )
            .bind(conversation_id)
            .bind(actor_id)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "UPDATE conversation_participants SET role = $3 \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(target_id)
        .bind(new_role.as_str())
        .execute(&mut *tx)
        .await?;
        Self::touch(&mut tx, conversation_id).await?;
        tx.commit().await?;

        Self::get(db, conversation_id).await
    }

    /// Partial update of display fields and settings. Admin only.
    pub async fn update_settings(
        db: &PgPool,
        conversation_id: Uuid,
        actor_id: Uuid,
        patch: SettingsPatch,
    ) -> AppResult<Conversation> {
        let conversation = Self::get(db, conversation_id).await?;
        let actor_role = conversation
            .role_of(actor_id)
            .ok_or(AppError::NotAMember)?;
        if !actor_role.is_admin() {
            return Err(AppError::PermissionDenied);
        }

        sqlx::query(
            "UPDATE conversations SET \
                name = COALESCE($2, name), \
                description = COALESCE($3, description), \
                avatar_url = COALESCE($4, avatar_url), \
                mute_notifications = COALESCE($5, mute_notifications), \
                allow_ai_replies = COALESCE($6, allow_ai_replies), \
                auto_delete_days = COALESCE($7, auto_delete_days), \
                only_admins_can_add_members = COALESCE($8, only_admins_can_add_members), \
                max_members = COALESCE($9, max_members), \
                updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(&patch.name)
        .bind(&patch.description)
        .bind(&patch.avatar_url)
        .bind(patch.mute_notifications)
        .bind(patch.allow_ai_replies)
        .bind(patch.auto_delete_days)
        .bind(patch.only_admins_can_add_members)
        .bind(patch.max_members)
        .execute(db)
        .await?;

        Self::get(db, conversation_id).await
    }

    /// Soft-archive; the conversation stays readable and can be unarchived.
    pub async fn set_archived(
        db: &PgPool,
        conversation_id: Uuid,
        actor_id: Uuid,
        archived: bool,
    ) -> AppResult<Conversation> {
        Self::require_member(db, conversation_id, actor_id).await?;
        sqlx::query(
            "UPDATE conversations SET is_archived = $2, \
                archived_at = CASE WHEN $2 THEN NOW() ELSE NULL END, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(archived)
        .execute(db)
        .await?;
        Self::get(db, conversation_id).await
    }

    /// Soft-delete a group. Owner only; conversations are never hard-deleted.
    pub async fn soft_delete(
        db: &PgPool,
        conversation_id: Uuid,
        actor_id: Uuid,
    ) -> AppResult<()> {
        let conversation = Self::get(db, conversation_id).await?;
        if conversation.kind != ConversationKind::Group {
            return Err(AppError::PermissionDenied);
        }
        if conversation.role_of(actor_id) != Some(ParticipantRole::Owner) {
            return Err(AppError::PermissionDenied);
        }
        sqlx::query(
            "UPDATE conversations SET is_deleted = TRUE, deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(conversation_id)
        .execute(db)
        .await?;
        Ok(())
    }

    pub(crate) async fn touch(
        tx: &mut Transaction<'_, Postgres>,
        conversation_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE conversations SET last_activity = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn find_direct(db: &PgPool, key: &str) -> AppResult<Option<Uuid>> {
        let row = sqlx::query(
            "SELECT id FROM conversations \
             WHERE kind = 'direct' AND direct_key = $1 AND is_deleted = FALSE",
        )
        .bind(key)
        .fetch_optional(db)
        .await?;
        Ok(row.map(|r| r.get("id")))
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}
