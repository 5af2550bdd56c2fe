//! Thin client for the Telegram Bot HTTP API.
//!
//! Every call is a POST to `{base}/bot{token}/{method}` answered with a JSON
//! envelope `{ok, result | description}`.

mod client;
mod error;
pub mod types;

pub use client::{DEFAULT_API_BASE_URL, TelegramClient, bot_id_from_token};
pub use error::{TelegramError, TelegramResult};
pub use types::{
    ApiEnvelope, BotInfo, ChatDetails, ChatTarget, ResponseParameters, TelegramUpdate, WebhookInfo,
};
