use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::models::PresenceView;
use axum::{extract::State, Json};
use tracing::info;

/// GET /users/online
pub async fn list_online(ctx: Ctx, State(state): State<AppState>) -> Json<Vec<PresenceView>> {
    let users = state.registry.views();
    info!("GET /users/online by {} - {} online", ctx.user_id(), users.len());
    Json(users)
}
