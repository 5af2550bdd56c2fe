//! Telegram Bot API HTTP client.

use log::debug;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tgdash_protocol::NormalizedMessage;

use super::error::{TelegramError, TelegramResult};
use super::types::{ApiEnvelope, BotInfo, ChatDetails, ChatTarget, TelegramUpdate, WebhookInfo};

/// Public Bot API endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";

/// Extract the numeric bot id from a token of the form `<bot id>:<secret>`.
pub fn bot_id_from_token(token: &str) -> Option<i64> {
    let (id, secret) = token.split_once(':')?;
    if secret.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    id.parse().ok()
}

/// Client for the Telegram Bot API. Tokens are passed per call so one client
/// serves every registered bot.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    /// HTTP client.
    client: Client,
    /// Base URL, e.g. "https://api.telegram.org".
    base_url: String,
}

impl TelegramClient {
    /// Create a new client.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> TelegramResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the bot's own account, validating the token.
    pub async fn get_me(&self, token: &str) -> TelegramResult<BotInfo> {
        self.call(token, "getMe", &json!({})).await
    }

    /// Pull pending updates. Fails with a 409 API error while a webhook is set.
    pub async fn get_updates(
        &self,
        token: &str,
        offset: Option<i64>,
        limit: Option<u32>,
    ) -> TelegramResult<Vec<TelegramUpdate>> {
        #[derive(Serialize)]
        struct Params {
            #[serde(skip_serializing_if = "Option::is_none")]
            offset: Option<i64>,
            #[serde(skip_serializing_if = "Option::is_none")]
            limit: Option<u32>,
            timeout: u32,
            allowed_updates: [&'static str; 4],
        }

        let params = Params {
            offset,
            limit,
            timeout: 0,
            allowed_updates: [
                "message",
                "edited_message",
                "channel_post",
                "edited_channel_post",
            ],
        };
        self.call(token, "getUpdates", &params).await
    }

    pub async fn send_message(
        &self,
        token: &str,
        chat: &ChatTarget,
        text: &str,
    ) -> TelegramResult<NormalizedMessage> {
        self.call(token, "sendMessage", &json!({ "chat_id": chat, "text": text }))
            .await
    }

    pub async fn edit_message_text(
        &self,
        token: &str,
        chat: &ChatTarget,
        message_id: i64,
        text: &str,
    ) -> TelegramResult<NormalizedMessage> {
        self.call(
            token,
            "editMessageText",
            &json!({ "chat_id": chat, "message_id": message_id, "text": text }),
        )
        .await
    }

    pub async fn delete_message(
        &self,
        token: &str,
        chat: &ChatTarget,
        message_id: i64,
    ) -> TelegramResult<bool> {
        self.call(
            token,
            "deleteMessage",
            &json!({ "chat_id": chat, "message_id": message_id }),
        )
        .await
    }

    pub async fn get_chat(&self, token: &str, chat: &ChatTarget) -> TelegramResult<ChatDetails> {
        self.call(token, "getChat", &json!({ "chat_id": chat })).await
    }

    /// Point the bot's webhook at `url`.
    pub async fn set_webhook(
        &self,
        token: &str,
        url: &str,
        drop_pending_updates: bool,
    ) -> TelegramResult<bool> {
        self.call(
            token,
            "setWebhook",
            &json!({ "url": url, "drop_pending_updates": drop_pending_updates }),
        )
        .await
    }

    pub async fn delete_webhook(
        &self,
        token: &str,
        drop_pending_updates: bool,
    ) -> TelegramResult<bool> {
        self.call(
            token,
            "deleteWebhook",
            &json!({ "drop_pending_updates": drop_pending_updates }),
        )
        .await
    }

    pub async fn get_webhook_info(&self, token: &str) -> TelegramResult<WebhookInfo> {
        self.call(token, "getWebhookInfo", &json!({})).await
    }

    async fn call<P, T>(&self, token: &str, method: &str, params: &P) -> TelegramResult<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        if bot_id_from_token(token).is_none() {
            return Err(TelegramError::InvalidToken);
        }

        let url = format!("{}/bot{}/{}", self.base_url, token, method);
        debug!("Calling Bot API method {}", method);
        let response = self
            .client
            .post(&url)
            .json(params)
            .send()
            .await
            .map_err(|e| TelegramError::RequestFailed(e.without_url()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TelegramError::RequestFailed(e.without_url()))?;

        parse_envelope(status.as_u16(), &body)
    }
}

/// Turn a raw Bot API answer into the method result.
fn parse_envelope<T: DeserializeOwned>(status: u16, body: &str) -> TelegramResult<T> {
    let envelope: ApiEnvelope<T> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) if (200..300).contains(&status) => {
            return Err(TelegramError::ParseError(e.to_string()));
        }
        Err(_) => {
            return Err(TelegramError::Http {
                status,
                body: body.chars().take(200).collect(),
            });
        }
    };

    if envelope.ok {
        return envelope
            .result
            .ok_or_else(|| TelegramError::ParseError("missing result".to_string()));
    }

    Err(TelegramError::Api {
        code: envelope.error_code.unwrap_or(i32::from(status)),
        description: envelope
            .description
            .unwrap_or_else(|| "unknown error".to_string()),
        retry_after: envelope.parameters.and_then(|p| p.retry_after),
    })
}
