//! Chat Handlers and Router
//!
//! The WebSocket relay endpoint plus the bearer-authenticated query routes.

use crate::core::auth::middleware::mw_require_auth;
use crate::core::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod history;
pub mod presence;
pub mod ws;

pub fn router(state: AppState) -> Router<AppState> {
    let queries = Router::new()
        .route("/messages/history", get(history::get_history))
        .route("/messages/read", post(history::mark_read))
        .route("/conversations/{user_id}", get(history::get_conversations))
        .route("/users/online", get(presence::list_online))
        .route_layer(middleware::from_fn_with_state(state, mw_require_auth));

    Router::new()
        // Sign-in happens over the socket itself
        .route("/ws", get(ws::ws_handler))
        .merge(queries)
}
