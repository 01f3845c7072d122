use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::models::message::Message;

/// Boundary to the push delivery collaborator. The core decides WHO gets a
/// push (offline recipients of a persisted message); delivery itself is the
/// collaborator's problem.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn notify(&self, recipient_id: Uuid, message: &Message);
}

/// Default notifier that only logs. Push failures must never affect message
/// persistence or distribution, so there is no error channel here.
pub struct LogPushNotifier;

#[async_trait]
impl PushNotifier for LogPushNotifier {
    async fn notify(&self, recipient_id: Uuid, message: &Message) {
        info!(
            recipient = %recipient_id,
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            kind = message.body.kind(),
            "push notification queued"
        );
    }
}
