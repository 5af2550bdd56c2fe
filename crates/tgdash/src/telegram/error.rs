//! Telegram client error types.

use thiserror::Error;

/// Result type for Telegram API operations.
pub type TelegramResult<T> = Result<T, TelegramError>;

/// Errors that can occur while talking to the Bot API.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// HTTP request failed. The URL (which embeds the token) is stripped.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The API answered with `ok: false`.
    #[error("Telegram API error {code}: {description}")]
    Api {
        code: i32,
        description: String,
        retry_after: Option<u64>,
    },

    /// Non-JSON answer with an error status (proxies, outages).
    #[error("Unexpected HTTP status {status}: {body}")]
    Http { status: u16, body: String },

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Token does not look like `<bot id>:<secret>`.
    #[error("Invalid bot token format")]
    InvalidToken,
}

impl TelegramError {
    /// Whether the API rejected the token itself.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Api { code: 401, .. })
    }

    /// Whether `getUpdates` is blocked because a webhook is active.
    pub fn is_webhook_conflict(&self) -> bool {
        matches!(self, Self::Api { code: 409, .. })
    }
}
