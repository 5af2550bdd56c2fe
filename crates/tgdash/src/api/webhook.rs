//! Webhook ingress handlers.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};
use serde_json::{Value, json};

use super::error::ApiResult;
use super::state::AppState;
use crate::ingress::handle_webhook;

/// POST /api/webhook/{token_id}
pub async fn receive_update(
    State(state): State<AppState>,
    Path(token_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    handle_webhook(&state.hub, Some(&token_id), &body)?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/webhook
pub async fn receive_update_without_token(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    handle_webhook(&state.hub, None, &body)?;
    Ok(Json(json!({ "success": true })))
}

/// GET on any webhook route.
pub async fn webhook_status() -> Json<Value> {
    Json(json!({ "success": true, "status": "ok" }))
}
