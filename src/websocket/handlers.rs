use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::verify_jwt;
use crate::services::conversation_service::ConversationService;
use crate::services::message_service::{MessageService, NewMessage};
use crate::services::presence_service::PresenceService;
use crate::state::AppState;
use crate::websocket::events::{self, OutboundEvent};
use crate::websocket::message_types::WsInbound;
use crate::websocket::{ConnectionId, RoomId};

/// Upgrade endpoint. Browsers cannot set headers on a websocket handshake,
/// so the token is also accepted as a query parameter.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = params
        .get("token")
        .cloned()
        .or_else(|| bearer_token(&headers))
        .ok_or(AppError::Unauthorized)?;
    let user_id = verify_jwt(&token, &state.config.jwt_secret)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user_id)))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

async fn handle_socket(mut socket: WebSocket, state: AppState, user_id: Uuid) {
    let (conn_id, mut outbound) = state.registry.register(user_id).await;
    info!(%conn_id, user = %user_id, "websocket connected");

    // Join every conversation the user belongs to so events start flowing
    // before the client sends anything.
    let conversation_ids = match ConversationService::conversation_ids_for_user(&state.db, user_id).await
    {
        Ok(ids) => ids,
        Err(e) => {
            warn!(user = %user_id, error = %e, "failed to load conversations on connect");
            Vec::new()
        }
    };
    for id in &conversation_ids {
        state
            .registry
            .join_room(conn_id, RoomId::Conversation(*id))
            .await;
    }

    if let Err(e) = PresenceService::set_online(
        &state.redis,
        user_id,
        &conn_id.to_string(),
        state.config.presence_ttl_seconds,
    )
    .await
    {
        warn!(user = %user_id, error = %e, "failed to set presence");
    }
    announce_presence(
        &state,
        &conversation_ids,
        &OutboundEvent::PresenceOnline { user_id },
    )
    .await;

    // Conversations this connection is currently typing in; cleared on
    // disconnect so peers do not see a stuck indicator.
    let mut typing_in: HashSet<Uuid> = HashSet::new();

    loop {
        tokio::select! {
            payload = outbound.recv() => {
                match payload {
                    Some(text) => {
                        if socket.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_frame(&state, conn_id, user_id, &text, &mut typing_in).await;
                        // Any traffic counts as a heartbeat.
                        let _ = PresenceService::refresh_online(
                            &state.redis,
                            user_id,
                            &conn_id.to_string(),
                            state.config.presence_ttl_seconds,
                        )
                        .await;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if socket.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                        let _ = PresenceService::refresh_online(
                            &state.redis,
                            user_id,
                            &conn_id.to_string(),
                            state.config.presence_ttl_seconds,
                        )
                        .await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%conn_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    disconnect(&state, conn_id, user_id, typing_in).await;
}

async fn handle_frame(
    state: &AppState,
    conn_id: ConnectionId,
    user_id: Uuid,
    raw: &str,
    typing_in: &mut HashSet<Uuid>,
) {
    let frame: WsInbound = match serde_json::from_str(raw) {
        Ok(f) => f,
        Err(e) => {
            let err = AppError::BadRequest(format!("malformed frame: {e}"));
            send_error(state, conn_id, &err, None).await;
            return;
        }
    };

    let temp_id = match &frame {
        WsInbound::SendMessage { temp_id, .. } => temp_id.clone(),
        _ => None,
    };
    if let Err(e) = dispatch(state, conn_id, user_id, frame, typing_in).await {
        send_error(state, conn_id, &e, temp_id).await;
    }
}

/// Failures address only the offending connection, never the room.
async fn send_error(
    state: &AppState,
    conn_id: ConnectionId,
    err: &AppError,
    temp_id: Option<String>,
) {
    let event = OutboundEvent::error(err, temp_id);
    match event.to_payload() {
        Ok(payload) => state.registry.send_to(conn_id, &payload).await,
        Err(e) => warn!(%conn_id, error = %e, "failed to serialize error frame"),
    }
}

/// Every mutation follows the same shape: validate membership and
/// permissions, persist, then publish the hydrated result. A failure at any
/// step goes only to the originating connection.
async fn dispatch(
    state: &AppState,
    conn_id: ConnectionId,
    user_id: Uuid,
    frame: WsInbound,
    typing_in: &mut HashSet<Uuid>,
) -> AppResult<()> {
    match frame {
        WsInbound::SendMessage {
            conversation_id,
            temp_id,
            body,
            reply_to,
            is_ai_generated,
        } => {
            let message = MessageService::append(
                &state.db,
                conversation_id,
                NewMessage {
                    sender_id: user_id,
                    body,
                    reply_to,
                    is_ai_generated,
                },
            )
            .await?;

            notify_offline_recipients(state, &message).await;
            events::publish(
                &state.redis,
                RoomId::Conversation(conversation_id),
                &OutboundEvent::MessageCreated { message, temp_id },
            )
            .await
        }
        WsInbound::EditMessage { message_id, text } => {
            let message = MessageService::edit(
                &state.db,
                message_id,
                user_id,
                text,
                state.config.edit_window_hours,
            )
            .await?;
            let room = RoomId::Conversation(message.conversation_id);
            events::publish(&state.redis, room, &OutboundEvent::MessageEdited { message }).await
        }
        WsInbound::DeleteMessage {
            message_id,
            for_everyone,
        } => {
            let message =
                MessageService::delete(&state.db, message_id, user_id, for_everyone).await?;
            let room = RoomId::Conversation(message.conversation_id);
            let event = OutboundEvent::MessageDeleted {
                message,
                for_everyone,
            };
            if for_everyone {
                events::publish(&state.redis, room, &event).await
            } else {
                // A personal hide is only the hider's business.
                events::publish_to_users(&state.redis, &[user_id], &event).await
            }
        }
        WsInbound::AddReaction { message_id, emoji } => {
            let message =
                MessageService::add_reaction(&state.db, message_id, user_id, emoji).await?;
            let room = RoomId::Conversation(message.conversation_id);
            events::publish(
                &state.redis,
                room,
                &OutboundEvent::ReactionAdded { message, user_id },
            )
            .await
        }
        WsInbound::RemoveReaction { message_id } => {
            let message = MessageService::remove_reaction(&state.db, message_id, user_id).await?;
            let room = RoomId::Conversation(message.conversation_id);
            events::publish(
                &state.redis,
                room,
                &OutboundEvent::ReactionRemoved { message, user_id },
            )
            .await
        }
        WsInbound::MarkRead {
            conversation_id,
            message_ids,
        } => {
            let newly_read =
                MessageService::mark_read(&state.db, conversation_id, user_id, &message_ids)
                    .await?;
            if newly_read.is_empty() {
                return Ok(());
            }
            events::publish(
                &state.redis,
                RoomId::Conversation(conversation_id),
                &OutboundEvent::ReadMarked {
                    conversation_id,
                    user_id,
                    messages: newly_read,
                },
            )
            .await
        }
        WsInbound::TypingStart { conversation_id } => {
            ConversationService::require_member(&state.db, conversation_id, user_id).await?;
            PresenceService::set_typing(
                &state.redis,
                conversation_id,
                user_id,
                state.config.typing_ttl_seconds,
            )
            .await?;
            typing_in.insert(conversation_id);
            events::publish(
                &state.redis,
                RoomId::Conversation(conversation_id),
                &OutboundEvent::TypingStarted {
                    conversation_id,
                    user_id,
                },
            )
            .await
        }
        WsInbound::TypingStop { conversation_id } => {
            PresenceService::clear_typing(&state.redis, conversation_id, user_id).await?;
            typing_in.remove(&conversation_id);
            events::publish(
                &state.redis,
                RoomId::Conversation(conversation_id),
                &OutboundEvent::TypingStopped {
                    conversation_id,
                    user_id,
                },
            )
            .await
        }
        WsInbound::JoinConversation { conversation_id } => {
            ConversationService::require_member(&state.db, conversation_id, user_id).await?;
            state
                .registry
                .join_room(conn_id, RoomId::Conversation(conversation_id))
                .await;
            Ok(())
        }
        WsInbound::LeaveConversation { conversation_id } => {
            state
                .registry
                .leave_room(conn_id, RoomId::Conversation(conversation_id))
                .await;
            Ok(())
        }
    }
}

/// Offline recipients of a freshly persisted message get a push. Delivery is
/// fire-and-forget; a push problem never surfaces to the sender.
async fn notify_offline_recipients(state: &AppState, message: &crate::models::message::Message) {
    let recipients =
        match ConversationService::active_participant_ids(&state.db, message.conversation_id).await
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "failed to load recipients for push");
                return;
            }
        };
    for recipient in recipients {
        if recipient == message.sender_id {
            continue;
        }
        match PresenceService::is_online(&state.redis, recipient).await {
            Ok(true) => {}
            Ok(false) => state.push.notify(recipient, message).await,
            Err(e) => {
                warn!(user = %recipient, error = %e, "presence check failed, skipping push");
            }
        }
    }
}

async fn announce_presence(state: &AppState, conversation_ids: &[Uuid], event: &OutboundEvent) {
    for id in conversation_ids {
        if let Err(e) = events::publish(&state.redis, RoomId::Conversation(*id), event).await {
            warn!(conversation = %id, error = %e, "presence announcement failed");
        }
    }
}

async fn disconnect(
    state: &AppState,
    conn_id: ConnectionId,
    user_id: Uuid,
    typing_in: HashSet<Uuid>,
) {
    let typing_in: Vec<Uuid> = typing_in.into_iter().collect();
    let _ = PresenceService::clear_typing_in(&state.redis, user_id, &typing_in).await;
    for conversation_id in typing_in {
        let _ = events::publish(
            &state.redis,
            RoomId::Conversation(conversation_id),
            &OutboundEvent::TypingStopped {
                conversation_id,
                user_id,
            },
        )
        .await;
    }

    let was_last = state.registry.unregister(conn_id).await;
    info!(%conn_id, user = %user_id, was_last, "websocket disconnected");

    if was_last {
        if let Err(e) = PresenceService::set_offline(&state.redis, user_id).await {
            warn!(user = %user_id, error = %e, "failed to clear presence");
        }
        let conversation_ids =
            match ConversationService::conversation_ids_for_user(&state.db, user_id).await {
                Ok(ids) => ids,
                Err(_) => Vec::new(),
            };
        announce_presence(
            state,
            &conversation_ids,
            &OutboundEvent::PresenceOffline {
                user_id,
                last_seen: Utc::now(),
            },
        )
        .await;
    }
}
