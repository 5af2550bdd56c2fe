//! Operator actions against Telegram, reconciled into the local message store.
//!
//! Everything here is locally initiated: the result of a successful API call
//! is applied to the store right away, and the same message arriving later
//! through the push channel or a poll collapses onto it by identity key.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info};
use thiserror::Error;
use tgdash_protocol::{BroadcastEvent, MessageKey, NormalizedMessage};

use crate::credentials::{BotCredential, CredentialRegistry, RegistryError};
use crate::ingress::extract_message;
use crate::store::MessageStore;
use crate::telegram::{ChatDetails, ChatTarget, TelegramClient, TelegramError, WebhookInfo};

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Telegram(#[from] TelegramError),

    #[error("Bot {0} has an active webhook; delete it before polling")]
    WebhookActive(String),
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;

pub struct Console {
    registry: Arc<CredentialRegistry>,
    telegram: TelegramClient,
    store: Arc<MessageStore>,
    /// Bot ID -> next `getUpdates` offset
    offsets: DashMap<String, i64>,
}

impl Console {
    pub fn new(
        registry: Arc<CredentialRegistry>,
        telegram: TelegramClient,
        store: Arc<MessageStore>,
    ) -> Self {
        Self {
            registry,
            telegram,
            store,
            offsets: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<CredentialRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn telegram(&self) -> &TelegramClient {
        &self.telegram
    }

    /// Look up a bot by id, username or label.
    pub fn bot(&self, reference: &str) -> ConsoleResult<BotCredential> {
        Ok(self.registry.resolve(reference)?)
    }

    pub async fn add_bot(&self, token: &str, label: Option<String>) -> ConsoleResult<BotCredential> {
        Ok(self.registry.add(&self.telegram, token, label).await?)
    }

    /// Unregister a bot and drop the messages attributed to it.
    pub async fn remove_bot(&self, reference: &str) -> ConsoleResult<BotCredential> {
        let bot = self.bot(reference)?;
        self.registry.remove(&bot.id).await?;
        self.store.clear(Some(&HashSet::from([bot.id.clone()])));
        Ok(bot)
    }

    pub async fn refresh_bot(&self, reference: &str) -> ConsoleResult<BotCredential> {
        let bot = self.bot(reference)?;
        Ok(self.registry.refresh(&self.telegram, &bot.id).await?)
    }

    pub async fn send_message(
        &self,
        bot: &str,
        chat: &ChatTarget,
        text: &str,
    ) -> ConsoleResult<NormalizedMessage> {
        let bot = self.bot(bot)?;
        let sent = self.telegram.send_message(&bot.token, chat, text).await?;
        let sent = attribute(sent, &bot);
        info!("Sent message {} to chat {}", sent.message_id, sent.chat.id);
        self.store.ingest(sent.clone());
        Ok(sent)
    }

    pub async fn edit_message(
        &self,
        bot: &str,
        chat: &ChatTarget,
        message_id: i64,
        text: &str,
    ) -> ConsoleResult<NormalizedMessage> {
        let bot = self.bot(bot)?;
        let edited = self
            .telegram
            .edit_message_text(&bot.token, chat, message_id, text)
            .await?;
        let edited = attribute(edited, &bot);
        if !self.store.apply_edit(&edited) {
            debug!("Edited message {} is not in the local store", message_id);
        }
        Ok(edited)
    }

    pub async fn delete_message(
        &self,
        bot: &str,
        chat: &ChatTarget,
        message_id: i64,
    ) -> ConsoleResult<bool> {
        let bot = self.bot(bot)?;
        let deleted = self
            .telegram
            .delete_message(&bot.token, chat, message_id)
            .await?;
        if deleted {
            self.forget(&bot, chat, message_id);
        }
        Ok(deleted)
    }

    /// Pull pending updates for one bot and merge their messages.
    ///
    /// Returns the messages that were pulled.
    pub async fn poll(&self, bot: &str, limit: Option<u32>) -> ConsoleResult<Vec<NormalizedMessage>> {
        let bot = self.bot(bot)?;
        let offset = self.offsets.get(&bot.id).map(|entry| *entry.value());

        let updates = match self.telegram.get_updates(&bot.token, offset, limit).await {
            Ok(updates) => updates,
            Err(err) if err.is_webhook_conflict() => {
                return Err(ConsoleError::WebhookActive(bot.id));
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.offsets.insert(bot.id.clone(), last + 1);
        }

        let messages: Vec<NormalizedMessage> = updates
            .into_iter()
            .filter_map(|update| extract_message(update, &bot.id))
            .collect();
        info!("Polled {} messages for bot {}", messages.len(), bot.id);
        self.store.ingest_many(messages.clone());
        Ok(messages)
    }

    /// Merge one pushed event. Returns whether the store changed.
    pub fn apply_event(&self, event: &BroadcastEvent) -> bool {
        match event {
            BroadcastEvent::NewMessage(payload) => {
                let mut message = payload.message.clone();
                if message.source_token_id.is_none() {
                    message.source_token_id = Some(payload.token_id.clone());
                }
                self.store.ingest(message);
                true
            }
            BroadcastEvent::GenericUpdate(_) | BroadcastEvent::Heartbeat(_) => false,
        }
    }

    /// Point the bot's webhook at this server's ingress route.
    ///
    /// Returns the registered URL.
    pub async fn set_webhook(&self, bot: &str, base_url: &str) -> ConsoleResult<String> {
        let bot = self.bot(bot)?;
        let url = webhook_url(base_url, &bot.id);
        self.telegram.set_webhook(&bot.token, &url, false).await?;
        info!("Webhook for bot {} set to {}", bot.id, url);
        Ok(url)
    }

    pub async fn delete_webhook(&self, bot: &str, drop_pending: bool) -> ConsoleResult<bool> {
        let bot = self.bot(bot)?;
        Ok(self.telegram.delete_webhook(&bot.token, drop_pending).await?)
    }

    pub async fn webhook_info(&self, bot: &str) -> ConsoleResult<WebhookInfo> {
        let bot = self.bot(bot)?;
        Ok(self.telegram.get_webhook_info(&bot.token).await?)
    }

    pub async fn chat_info(&self, bot: &str, chat: &ChatTarget) -> ConsoleResult<ChatDetails> {
        let bot = self.bot(bot)?;
        Ok(self.telegram.get_chat(&bot.token, chat).await?)
    }

    fn forget(&self, bot: &BotCredential, chat: &ChatTarget, message_id: i64) {
        match chat {
            ChatTarget::Id(chat_id) => {
                self.store
                    .remove(&MessageKey::new(*chat_id, message_id, Some(&bot.id)));
            }
            ChatTarget::Username(name) => {
                let name = name.trim_start_matches('@');
                self.store.update(|items| {
                    items.retain(|item| {
                        !(item.data.message_id == message_id
                            && item.data.source_token_id.as_deref() == Some(bot.id.as_str())
                            && item.data.chat.username.as_deref() == Some(name))
                    });
                });
            }
        }
    }
}

/// Ingress URL for a bot under `base_url`.
pub fn webhook_url(base_url: &str, bot_id: &str) -> String {
    format!(
        "{}/api/webhook/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(bot_id)
    )
}

fn attribute(mut message: NormalizedMessage, bot: &BotCredential) -> NormalizedMessage {
    message.source_token_id = Some(bot.id.clone());
    if message.bot_username.is_none() {
        message.bot_username = bot.display_name();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyValueStore;
    use crate::store::{StoreOptions, SystemClock};
    use std::time::Duration;
    use tgdash_protocol::Chat;

    async fn console() -> Console {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let registry = Arc::new(CredentialRegistry::load(kv.clone()).await);
        let store = Arc::new(
            MessageStore::open(
                kv,
                registry.clone(),
                Arc::new(SystemClock),
                StoreOptions::default(),
            )
            .await,
        );
        let telegram = TelegramClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        Console::new(registry, telegram, store)
    }

    #[test]
    fn test_webhook_url() {
        assert_eq!(
            webhook_url("https://bots.example.com/", "123"),
            "https://bots.example.com/api/webhook/123"
        );
    }

    #[tokio::test]
    async fn test_apply_event_ingests_new_messages_only() {
        let console = console().await;
        let now = chrono::Utc::now().timestamp();
        let message = NormalizedMessage::new(1, Chat::new(10), now).with_text("hi");

        assert!(console.apply_event(&BroadcastEvent::new_message("555", message)));
        assert!(!console.apply_event(&BroadcastEvent::generic(None, serde_json::json!({}))));

        let stored = console.store().messages();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].source_token_id.as_deref(), Some("555"));
    }

    #[tokio::test]
    async fn test_unknown_bot() {
        let console = console().await;
        let err = console
            .send_message("nobody", &ChatTarget::Id(1), "hi")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConsoleError::Registry(RegistryError::NotFound(_))
        ));
    }
}
