//! Update ingress: turn a webhook callback into a broadcast.

use log::{debug, info};
use thiserror::Error;
use tgdash_protocol::{BroadcastEvent, NormalizedMessage};

use crate::hub::{BroadcastHub, BroadcastReport};
use crate::telegram::TelegramUpdate;

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("Missing bot token id")]
    MissingTokenId,

    #[error("Invalid update payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Take the message carried by `update`, attributed to `token_id`.
pub fn extract_message(update: TelegramUpdate, token_id: &str) -> Option<NormalizedMessage> {
    update
        .into_message()
        .map(|message| message.with_source(token_id))
}

/// Parse a raw webhook body.
///
/// Returns `Ok(None)` for well-formed updates that carry no message.
pub fn parse_update(body: &[u8], token_id: &str) -> Result<Option<NormalizedMessage>, IngressError> {
    let update: TelegramUpdate = serde_json::from_slice(body)?;
    Ok(extract_message(update, token_id))
}

/// Handle one webhook callback end to end.
///
/// The token id is checked before the body is looked at. On success the
/// report of the resulting broadcast is returned, or `None` when the update
/// had nothing to broadcast.
pub fn handle_webhook(
    hub: &BroadcastHub,
    token_id: Option<&str>,
    body: &[u8],
) -> Result<Option<BroadcastReport>, IngressError> {
    let token_id = token_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(IngressError::MissingTokenId)?;

    let Some(message) = parse_update(body, token_id)? else {
        debug!("Webhook update for {} carried no message", token_id);
        return Ok(None);
    };

    info!(
        "Webhook message {} in chat {} via {}",
        message.message_id, message.chat.id, token_id
    );
    let report = hub.broadcast(&BroadcastEvent::new_message(token_id, message));
    Ok(Some(report))
}
