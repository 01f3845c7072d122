pub mod conversations;
pub mod groups;
pub mod messages;
pub mod reactions;

use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;

use crate::middleware::auth::auth_middleware;
use crate::state::AppState;
use crate::websocket::handlers::ws_handler;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/conversations", get(conversations::list).post(conversations::create))
        .route("/conversations/:id", get(conversations::get))
        .route("/conversations/:id", patch(conversations::update_settings))
        .route("/conversations/:id", delete(conversations::delete))
        .route("/conversations/:id/archive", post(conversations::set_archived))
        .route("/conversations/:id/typing", get(conversations::typing))
        .route("/conversations/:id/members", post(groups::add_member))
        .route(
            "/conversations/:id/members/:user_id",
            delete(groups::remove_member),
        )
        .route(
            "/conversations/:id/members/:user_id/role",
            patch(groups::update_role),
        )
        .route(
            "/conversations/:id/messages",
            get(messages::list).post(messages::send),
        )
        .route("/conversations/:id/read", post(messages::mark_read))
        .route("/conversations/:id/context", get(messages::context))
        .route("/messages/:id", patch(messages::edit).delete(messages::delete))
        .route(
            "/messages/:id/reactions",
            put(reactions::add).delete(reactions::remove),
        )
        .route("/presence", get(conversations::online_users))
        .route("/presence/:user_id", get(conversations::presence))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .merge(api)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
