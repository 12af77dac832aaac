//! Request/response query surface over the message log.

use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::{Error, Result};
use crate::core::models::{ConversationSummary, Message};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub user_id: String,
    pub other_user_id: String,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// GET /messages/history?userId=&otherUserId=&limit=&offset=
pub async fn get_history(
    ctx: Ctx,
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>> {
    info!(
        "GET /messages/history {} <-> {}",
        query.user_id, query.other_user_id
    );
    ctx.require_self(&query.user_id)?;
    if query.other_user_id.trim().is_empty() {
        return Err(Error::BadRequest("otherUserId is required".into()));
    }

    let page = state.config.page(query.limit, query.offset);
    let messages = state
        .log
        .history(&query.user_id, &query.other_user_id, page)
        .await?;
    Ok(Json(messages))
}

/// GET /conversations/{user_id}
pub async fn get_conversations(
    ctx: Ctx,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ConversationSummary>>> {
    info!("GET /conversations/{}", user_id);
    ctx.require_self(&user_id)?;

    let summaries = state.log.conversations(&user_id).await?;
    Ok(Json(summaries))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadInput {
    pub receiver_id: String,
    pub sender_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadOutput {
    pub updated: u64,
}

/// POST /messages/read
pub async fn mark_read(
    ctx: Ctx,
    State(state): State<AppState>,
    Json(input): Json<MarkReadInput>,
) -> Result<Json<MarkReadOutput>> {
    info!(
        "POST /messages/read {} from {}",
        input.receiver_id, input.sender_id
    );
    ctx.require_self(&input.receiver_id)?;
    if input.sender_id.trim().is_empty() {
        return Err(Error::BadRequest("senderId is required".into()));
    }

    let updated = state
        .log
        .mark_read(&input.receiver_id, &input.sender_id)
        .await?;
    Ok(Json(MarkReadOutput { updated }))
}
