//! Development endpoints for driving connected clients without Telegram.
//!
//! Only available when `server.dev_mode` is set.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tgdash_protocol::BroadcastEvent;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::hub::BroadcastReport;

/// Request to broadcast an arbitrary update.
#[derive(Debug, Deserialize)]
pub struct MockEventRequest {
    #[serde(rename = "tokenId", default)]
    pub token_id: Option<String>,
    pub update: Value,
}

#[derive(Debug, Serialize)]
pub struct MockEventResponse {
    pub success: bool,
    pub delivered: usize,
    pub failed: usize,
}

impl From<BroadcastReport> for MockEventResponse {
    fn from(report: BroadcastReport) -> Self {
        Self {
            success: true,
            delivered: report.delivered_count(),
            failed: report.failed_count(),
        }
    }
}

fn require_dev_mode(state: &AppState) -> ApiResult<()> {
    if state.dev_mode {
        Ok(())
    } else {
        Err(ApiError::forbidden(
            "Test harness is only available in development mode",
        ))
    }
}

/// POST /test/event
pub async fn send_mock_event(
    State(state): State<AppState>,
    Json(request): Json<MockEventRequest>,
) -> ApiResult<Json<MockEventResponse>> {
    require_dev_mode(&state)?;
    let report = state
        .hub
        .broadcast(&BroadcastEvent::generic(request.token_id, request.update));
    Ok(Json(report.into()))
}

/// POST /test/heartbeat
pub async fn send_heartbeat(State(state): State<AppState>) -> ApiResult<Json<MockEventResponse>> {
    require_dev_mode(&state)?;
    Ok(Json(state.hub.heartbeat().into()))
}
