use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};

use crate::{
    AppState, dual_debug, dual_error, dual_info,
    error::{ServerError, ServerResult},
    memory::{ConversationTurn, FactMap},
    sanitize::sanitize,
};

pub(crate) const DEFAULT_USER_ID: &str = "default";

pub(crate) const FEATURES: [&str; 4] = ["chat", "memory", "data-storage", "conversation-history"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChatRequest {
    pub message: Option<String>,
    pub api_key: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChatReply {
    pub response: String,
    pub conversation_length: usize,
    pub has_memory: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoreUserDataRequest {
    pub user_id: Option<String>,
    pub data: Option<serde_json::Value>,
}

/// Handler for sending a chat message on behalf of a user
pub(crate) async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ServerResult<Json<ChatReply>> {
    let request_id = request_id(&headers);
    let Json(request) = payload.map_err(|e| reject_body(e, &request_id))?;

    let api_key = non_empty(request.api_key)
        .or_else(|| state.default_api_key.clone())
        .ok_or_else(|| {
            let err_msg = "API key is required";
            dual_error!("{} - request_id: {}", err_msg, request_id);
            ServerError::BadRequest(err_msg.to_string())
        })?;
    let message = non_empty(request.message).ok_or_else(|| {
        let err_msg = "Message is required";
        dual_error!("{} - request_id: {}", err_msg, request_id);
        ServerError::BadRequest(err_msg.to_string())
    })?;
    let user_id = non_empty(request.user_id).unwrap_or_else(|| DEFAULT_USER_ID.to_string());

    dual_info!(
        "Received a new chat request from user: {} ({} characters) - request_id: {}",
        user_id,
        message.len(),
        request_id
    );

    // The pending user turn is shown to the model but only committed together
    // with the reply, so a failed provider call leaves the history untouched.
    let user_turn = ConversationTurn::user(message.as_str());
    let window = state.composer.history_window();
    let mut turns = state.memory.recent_turns(&user_id, window).await;
    turns.push(user_turn.clone());
    let prompt = state.composer.compose(&turns, &message);

    dual_debug!(
        "Prompt built from {} turn(s) - request_id: {}",
        turns.len().min(window),
        request_id
    );

    let raw = state
        .completion
        .complete(&api_key, &prompt)
        .await
        .map_err(|e| {
            dual_error!("Gemini API Error: {} - request_id: {}", e, request_id);
            ServerError::from(e)
        })?;
    let cleaned = sanitize(&raw);

    let conversation_length = state
        .memory
        .append_turns(
            &user_id,
            [user_turn, ConversationTurn::assistant(cleaned.as_str())],
        )
        .await;

    dual_info!(
        "Chat request completed for user {} - request_id: {}",
        user_id,
        request_id
    );

    Ok(Json(ChatReply {
        response: cleaned,
        conversation_length,
        has_memory: true,
    }))
}

/// Handler for remembering facts about a user
pub(crate) async fn store_user_data_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<StoreUserDataRequest>, JsonRejection>,
) -> ServerResult<Json<serde_json::Value>> {
    let request_id = request_id(&headers);
    let Json(request) = payload.map_err(|e| reject_body(e, &request_id))?;

    let data: FactMap = match request.data {
        None | Some(serde_json::Value::Null) => {
            let err_msg = "Data is required";
            dual_error!("{} - request_id: {}", err_msg, request_id);
            return Err(ServerError::BadRequest(err_msg.to_string()));
        }
        Some(serde_json::Value::Object(map)) => map,
        Some(_) => {
            let err_msg = "Data must be a JSON object";
            dual_error!("{} - request_id: {}", err_msg, request_id);
            return Err(ServerError::BadRequest(err_msg.to_string()));
        }
    };
    let user_id = non_empty(request.user_id).unwrap_or_else(|| DEFAULT_USER_ID.to_string());

    let stored = state.memory.merge_facts(&user_id, data).await;

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Data stored successfully",
        "storedData": stored,
    })))
}

/// Handler to get the facts stored for a user
pub(crate) async fn get_user_data_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Json<serde_json::Value> {
    dual_debug!(
        "Getting user data for user: {} - request_id: {}",
        user_id,
        request_id(&headers)
    );

    let data = state.memory.facts(&user_id).await;

    Json(serde_json::json!({
        "success": true,
        "data": data,
    }))
}

/// Handler to get the chat history of a user
pub(crate) async fn get_conversation_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Json<serde_json::Value> {
    let conversation = state.memory.conversation(&user_id).await;

    dual_debug!(
        "Retrieved {} messages for user {} - request_id: {}",
        conversation.len(),
        user_id,
        request_id(&headers)
    );

    Json(serde_json::json!({
        "success": true,
        "messageCount": conversation.len(),
        "conversation": conversation,
    }))
}

/// Handler to clear the chat history of a user
pub(crate) async fn clear_conversation_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Json<serde_json::Value> {
    dual_info!(
        "Clearing conversation for user: {} - request_id: {}",
        user_id,
        request_id(&headers)
    );

    state.memory.clear_conversation(&user_id).await;

    Json(serde_json::json!({
        "success": true,
        "message": "Conversation history cleared",
    }))
}

pub(crate) async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "OK",
        "message": "Server is running",
        "features": FEATURES,
    }))
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn reject_body(rejection: JsonRejection, request_id: &str) -> ServerError {
    let err_msg = format!("Invalid request body: {}", rejection.body_text());
    dual_error!("{} - request_id: {}", err_msg, request_id);
    ServerError::BadRequest(err_msg)
}
