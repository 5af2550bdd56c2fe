//! Push channel endpoint.
//!
//! Each request becomes one hub connection whose frames are the response
//! body. The registration lives exactly as long as the body stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use futures::StreamExt;
use log::info;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::hub::{BroadcastHub, ChannelSink};

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(rename = "connectionId")]
    pub connection_id: Option<String>,
}

/// Releases the hub registration when the response body is dropped.
struct ConnectionGuard {
    hub: Arc<BroadcastHub>,
    connection_id: String,
    serial: u64,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.hub.release(&self.connection_id, self.serial) {
            info!("Push connection {} closed", self.connection_id);
        }
    }
}

/// GET /api/events
pub async fn subscribe(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Response> {
    let connection_id = query
        .connection_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let (tx, rx) = mpsc::channel::<Bytes>(state.connection_buffer);
    let serial = state
        .hub
        .connect(&connection_id, Arc::new(ChannelSink::new(tx)))
        .map_err(|e| ApiError::service_unavailable(format!("push channel not opened: {e}")))?;

    let guard = ConnectionGuard {
        hub: state.hub.clone(),
        connection_id,
        serial,
    };
    let stream = ReceiverStream::new(rx).map(move |frame| {
        let _keep = &guard;
        Ok::<_, Infallible>(frame)
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache, no-transform")
        .header(header::CONNECTION, "keep-alive")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::internal(format!("failed to build event stream: {e}")))
}
