use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "direct" => Some(ConversationKind::Direct),
            "group" => Some(ConversationKind::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Member,
    Admin,
    Owner,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Member => "member",
            ParticipantRole::Admin => "admin",
            ParticipantRole::Owner => "owner",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "member" => Some(ParticipantRole::Member),
            "admin" => Some(ParticipantRole::Admin),
            "owner" => Some(ParticipantRole::Owner),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, ParticipantRole::Admin | ParticipantRole::Owner)
    }
}

/// Removal rules, kept pure so they are testable without a database:
/// - a direct conversation always keeps both participants; closing one is
///   an archive or per-user hide, never a removal
/// - self-removal from a group is allowed, except an owner must transfer
///   first
/// - removing others requires admin
/// - admins cannot remove the owner, and only the owner removes admins
pub fn check_removal(
    kind: ConversationKind,
    actor: ParticipantRole,
    target: ParticipantRole,
    is_self: bool,
) -> Result<(), AppError> {
    if kind == ConversationKind::Direct {
        return Err(AppError::PermissionDenied);
    }
    if is_self {
        if actor == ParticipantRole::Owner {
            return Err(AppError::OwnerMustTransfer);
        }
        return Ok(());
    }
    if !actor.is_admin() {
        return Err(AppError::PermissionDenied);
    }
    if target == ParticipantRole::Owner {
        return Err(AppError::PermissionDenied);
    }
    if target == ParticipantRole::Admin && actor != ParticipantRole::Owner {
        return Err(AppError::PermissionDenied);
    }
    Ok(())
}

/// Add rules: when only_admins_can_add_members is set, only admins/owner may
/// add; otherwise any active member may.
pub fn check_addition(actor: ParticipantRole, only_admins_can_add: bool) -> Result<(), AppError> {
    if only_admins_can_add && !actor.is_admin() {
        return Err(AppError::PermissionDenied);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSettings {
    pub mute_notifications: bool,
    pub allow_ai_replies: bool,
    pub auto_delete_days: i32,
    pub only_admins_can_add_members: bool,
    pub max_members: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub participants: Vec<Participant>,
    pub last_message_id: Option<Uuid>,
    pub last_activity: DateTime<Utc>,
    pub settings: ConversationSettings,
    pub is_archived: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn active_participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| p.is_active)
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.active_participants().any(|p| p.user_id == user_id)
    }

    pub fn role_of(&self, user_id: Uuid) -> Option<ParticipantRole> {
        self.active_participants()
            .find(|p| p.user_id == user_id)
            .map(|p| p.role)
    }
}

/// Canonical lookup key for a direct conversation pair, order-independent.
pub fn direct_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ParticipantRole::*;

    #[test]
    fn direct_key_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(direct_key(a, b), direct_key(b, a));
    }

    #[test]
    fn member_can_leave_group() {
        assert!(check_removal(ConversationKind::Group, Member, Member, true).is_ok());
        assert!(check_removal(ConversationKind::Group, Admin, Admin, true).is_ok());
    }

    #[test]
    fn direct_conversation_never_loses_a_participant() {
        // Leaving or removing would strand a one-person direct chat; a
        // direct conversation is closed by archiving or hiding instead.
        assert!(matches!(
            check_removal(ConversationKind::Direct, Member, Member, true),
            Err(AppError::PermissionDenied)
        ));
        assert!(matches!(
            check_removal(ConversationKind::Direct, Owner, Member, false),
            Err(AppError::PermissionDenied)
        ));
    }

    #[test]
    fn owner_cannot_leave_without_transfer() {
        assert!(matches!(
            check_removal(ConversationKind::Group, Owner, Owner, true),
            Err(AppError::OwnerMustTransfer)
        ));
    }

    #[test]
    fn member_cannot_remove_others() {
        assert!(matches!(
            check_removal(ConversationKind::Group, Member, Member, false),
            Err(AppError::PermissionDenied)
        ));
    }

    #[test]
    fn admin_can_remove_member_but_not_owner_or_admin() {
        assert!(check_removal(ConversationKind::Group, Admin, Member, false).is_ok());
        assert!(matches!(
            check_removal(ConversationKind::Group, Admin, Owner, false),
            Err(AppError::PermissionDenied)
        ));
        assert!(matches!(
            check_removal(ConversationKind::Group, Admin, Admin, false),
            Err(AppError::PermissionDenied)
        ));
    }

    #[test]
    fn owner_can_remove_admin() {
        assert!(check_removal(ConversationKind::Group, Owner, Admin, false).is_ok());
        assert!(check_removal(ConversationKind::Group, Owner, Member, false).is_ok());
    }

    #[test]
    fn left_participants_are_not_members() {
        let user = Uuid::new_v4();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            kind: ConversationKind::Group,
            name: None,
            description: None,
            avatar_url: None,
            participants: vec![Participant {
                user_id: user,
                role: Member,
                joined_at: Utc::now(),
                left_at: Some(Utc::now()),
                is_active: false,
            }],
            last_message_id: None,
            last_activity: Utc::now(),
            settings: ConversationSettings {
                mute_notifications: false,
                allow_ai_replies: true,
                auto_delete_days: 0,
                only_admins_can_add_members: false,
                max_members: 256,
            },
            is_archived: false,
            is_deleted: false,
            created_at: Utc::now(),
        };
        assert!(!conversation.is_participant(user));
        assert_eq!(conversation.role_of(user), None);
    }

    #[test]
    fn addition_respects_admin_only_setting() {
        assert!(check_addition(Member, false).is_ok());
        assert!(matches!(
            check_addition(Member, true),
            Err(AppError::PermissionDenied)
        ));
        assert!(check_addition(Admin, true).is_ok());
        assert!(check_addition(Owner, true).is_ok());
    }
}
