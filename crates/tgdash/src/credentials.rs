//! Registered bot credentials.
//!
//! The registry is the persisted list of bot tokens the operator has added,
//! each with the cached result of `getMe`. The message store only ever reads
//! from it, through [`BotDirectory`], to attribute messages to a bot name.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::storage::{KeyValueStore, KvError};
use crate::telegram::{BotInfo, TelegramClient, TelegramError, bot_id_from_token};

/// Storage key of the persisted credential list.
pub const CREDENTIALS_KEY: &str = "bot_tokens";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid bot token format")]
    InvalidToken,

    #[error("Bot not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Telegram(#[from] TelegramError),

    #[error("Failed to persist credentials: {0}")]
    Storage(#[from] KvError),

    #[error("Failed to serialize credentials: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// One registered bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotCredential {
    /// Identifier used in webhook URLs and message attribution. Never the token.
    pub id: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Cached `getMe` result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<BotInfo>,
    pub added_at: DateTime<Utc>,
}

impl BotCredential {
    /// Bot username if known, otherwise the operator's label.
    pub fn display_name(&self) -> Option<String> {
        self.bot
            .as_ref()
            .and_then(|b| b.username.clone())
            .or_else(|| self.label.clone())
    }

    /// Token with the secret part hidden, for listings and logs.
    pub fn masked_token(&self) -> String {
        match self.token.split_once(':') {
            Some((id, secret)) if secret.chars().count() > 4 => {
                let tail: String = secret.chars().skip(secret.chars().count() - 4).collect();
                format!("{id}:***{tail}")
            }
            Some((id, _)) => format!("{id}:***"),
            None => "***".to_string(),
        }
    }
}

/// Read-only lookup from token identifier to bot display name.
pub trait BotDirectory: Send + Sync {
    fn display_name(&self, token_id: &str) -> Option<String>;
}

impl BotDirectory for HashMap<String, String> {
    fn display_name(&self, token_id: &str) -> Option<String> {
        self.get(token_id).cloned()
    }
}

/// Persisted set of bot credentials.
pub struct CredentialRegistry {
    kv: Arc<dyn KeyValueStore>,
    /// Credential ID -> credential
    entries: DashMap<String, BotCredential>,
}

impl CredentialRegistry {
    /// Load the registry. Unreadable data yields an empty registry.
    pub async fn load(kv: Arc<dyn KeyValueStore>) -> Self {
        let entries = DashMap::new();
        match kv.get(CREDENTIALS_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<BotCredential>>(&raw) {
                Ok(list) => {
                    for cred in list {
                        entries.insert(cred.id.clone(), cred);
                    }
                }
                Err(err) => warn!("Ignoring unreadable credential list: {}", err),
            },
            Ok(None) => {}
            Err(err) => warn!("Failed to read credential list: {}", err),
        }
        Self { kv, entries }
    }

    /// All credentials, oldest first.
    pub fn list(&self) -> Vec<BotCredential> {
        let mut list: Vec<BotCredential> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        list.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn get(&self, id: &str) -> Option<BotCredential> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    /// Find a credential by id, bot username (with or without `@`), or label.
    pub fn resolve(&self, reference: &str) -> RegistryResult<BotCredential> {
        if let Some(cred) = self.get(reference) {
            return Ok(cred);
        }
        let name = reference.trim_start_matches('@');
        self.list()
            .into_iter()
            .find(|cred| {
                cred.bot.as_ref().and_then(|b| b.username.as_deref()) == Some(name)
                    || cred.label.as_deref() == Some(reference)
            })
            .ok_or_else(|| RegistryError::NotFound(reference.to_string()))
    }

    /// Validate a token with `getMe` and register it.
    ///
    /// Re-adding a bot that is already registered updates its token and
    /// cached metadata in place.
    pub async fn add(
        &self,
        telegram: &TelegramClient,
        token: &str,
        label: Option<String>,
    ) -> RegistryResult<BotCredential> {
        let token = token.trim();
        if bot_id_from_token(token).is_none() {
            return Err(RegistryError::InvalidToken);
        }
        let bot = telegram.get_me(token).await?;
        let id = bot.id.to_string();

        let credential = match self.get(&id) {
            Some(existing) => BotCredential {
                token: token.to_string(),
                label: label.or(existing.label),
                bot: Some(bot),
                ..existing
            },
            None => BotCredential {
                id: id.clone(),
                token: token.to_string(),
                label,
                bot: Some(bot),
                added_at: Utc::now(),
            },
        };

        self.upsert(credential.clone()).await?;
        info!(
            "Registered bot {} ({})",
            credential.id,
            credential.display_name().unwrap_or_default()
        );
        Ok(credential)
    }

    /// Re-fetch `getMe` for a registered bot.
    pub async fn refresh(&self, telegram: &TelegramClient, id: &str) -> RegistryResult<BotCredential> {
        let mut credential = self
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        credential.bot = Some(telegram.get_me(&credential.token).await?);
        self.upsert(credential.clone()).await?;
        Ok(credential)
    }

    /// Insert or replace a credential without contacting Telegram.
    pub async fn upsert(&self, credential: BotCredential) -> RegistryResult<()> {
        self.entries.insert(credential.id.clone(), credential);
        self.persist().await
    }

    pub async fn remove(&self, id: &str) -> RegistryResult<bool> {
        let removed = self.entries.remove(id).is_some();
        if removed {
            self.persist().await?;
            info!("Removed bot {}", id);
        }
        Ok(removed)
    }

    async fn persist(&self) -> RegistryResult<()> {
        let raw = serde_json::to_string(&self.list())?;
        self.kv.set(CREDENTIALS_KEY, &raw).await?;
        Ok(())
    }
}

impl BotDirectory for CredentialRegistry {
    fn display_name(&self, token_id: &str) -> Option<String> {
        self.entries
            .get(token_id)
            .and_then(|entry| entry.value().display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyValueStore;

    fn credential(id: &str, username: Option<&str>, label: Option<&str>) -> BotCredential {
        BotCredential {
            id: id.to_string(),
            token: format!("{id}:AAAAsecretTAIL"),
            label: label.map(str::to_string),
            bot: username.map(|u| BotInfo {
                id: id.parse().unwrap_or_default(),
                is_bot: true,
                first_name: "Bot".to_string(),
                username: Some(u.to_string()),
                can_join_groups: true,
                can_read_all_group_messages: false,
                supports_inline_queries: false,
            }),
            added_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_persists_and_reloads() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let registry = CredentialRegistry::load(kv.clone()).await;
        registry
            .upsert(credential("111", Some("alpha_bot"), None))
            .await
            .unwrap();

        let reloaded = CredentialRegistry::load(kv).await;
        assert_eq!(reloaded.list().len(), 1);
        assert_eq!(reloaded.display_name("111").as_deref(), Some("alpha_bot"));
        assert_eq!(reloaded.display_name("999"), None);
    }

    #[tokio::test]
    async fn test_resolve_by_username_and_label() {
        let registry = CredentialRegistry::load(Arc::new(MemoryKeyValueStore::new())).await;
        registry
            .upsert(credential("111", Some("alpha_bot"), None))
            .await
            .unwrap();
        registry
            .upsert(credential("222", None, Some("staging")))
            .await
            .unwrap();

        assert_eq!(registry.resolve("111").unwrap().id, "111");
        assert_eq!(registry.resolve("@alpha_bot").unwrap().id, "111");
        assert_eq!(registry.resolve("staging").unwrap().id, "222");
        assert!(matches!(
            registry.resolve("nope"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let registry = CredentialRegistry::load(kv.clone()).await;
        registry.upsert(credential("111", None, None)).await.unwrap();

        assert!(registry.remove("111").await.unwrap());
        assert!(!registry.remove("111").await.unwrap());
        assert!(CredentialRegistry::load(kv).await.list().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_list_loads_empty() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(CREDENTIALS_KEY, "{not json").await.unwrap();
        let registry = CredentialRegistry::load(kv).await;
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_masked_token() {
        let cred = credential("111", None, Some("x"));
        assert_eq!(cred.masked_token(), "111:***TAIL");
        assert_eq!(cred.display_name().as_deref(), Some("x"));
    }

    #[test]
    fn test_masked_token_with_multibyte_secret() {
        let mut cred = credential("111", None, None);
        cred.token = "111:sécrétéàü".to_string();
        assert_eq!(cred.masked_token(), "111:***téàü");

        cred.token = "111:éàü".to_string();
        assert_eq!(cred.masked_token(), "111:***");
    }
}
