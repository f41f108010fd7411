//! Dealer chat route

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    chat::ChatMessage,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    pub outfit_stage_index: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub reply: String,
}

/// Reply as the dealer; LLM failures produce a canned reply, not an error
pub async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult<Json<SendMessageResponse>> {
    let Json(req) = payload?;

    let message = req.message.trim();
    if message.is_empty() {
        return Err(ApiError::Validation("message is required".to_string()));
    }

    let reply = state
        .chat
        .reply(message, &req.history, req.outfit_stage_index)
        .await;

    Ok(Json(SendMessageResponse { reply }))
}
