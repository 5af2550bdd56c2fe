//! Client-side message log.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{info, warn};
use tgdash_protocol::{MessageKey, NormalizedMessage};

use super::clock::Clock;
use super::persist::{DEFAULT_DEBOUNCE, DebouncedWriter};
use super::retention::{RetentionPolicy, StoredMessage};
use crate::credentials::BotDirectory;
use crate::storage::KeyValueStore;

/// Storage key of the persisted message list.
pub const MESSAGES_KEY: &str = "telegram_messages";

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub retention: RetentionPolicy,
    pub debounce: Duration,
    pub key: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            debounce: DEFAULT_DEBOUNCE,
            key: MESSAGES_KEY.to_string(),
        }
    }
}

/// Deduplicated, bounded, expiring message list merged from every arrival
/// path: pushed events, manual polls and the operator's own sends and edits.
///
/// Memory is authoritative. Every change is visible immediately and written
/// to the key-value store after the debounce period; a failed write is logged
/// and leaves memory untouched.
pub struct MessageStore {
    items: Mutex<Vec<StoredMessage>>,
    policy: RetentionPolicy,
    directory: Arc<dyn BotDirectory>,
    clock: Arc<dyn Clock>,
    writer: DebouncedWriter,
}

impl MessageStore {
    /// Load the persisted list and start the writer.
    ///
    /// Unreadable data yields an empty store.
    pub async fn open(
        kv: Arc<dyn KeyValueStore>,
        directory: Arc<dyn BotDirectory>,
        clock: Arc<dyn Clock>,
        options: StoreOptions,
    ) -> Self {
        let loaded = match kv.get(&options.key).await {
            Ok(Some(raw)) => serde_json::from_str::<Vec<StoredMessage>>(&raw).unwrap_or_else(|err| {
                warn!("Discarding unreadable message cache: {}", err);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!("Failed to read message cache: {}", err);
                Vec::new()
            }
        };

        let items = options
            .retention
            .reconcile(loaded, clock.now_ms(), directory.as_ref());
        info!("Loaded {} cached messages", items.len());

        Self {
            items: Mutex::new(items),
            policy: options.retention,
            directory,
            clock,
            writer: DebouncedWriter::spawn(kv, options.key, options.debounce),
        }
    }

    /// Messages, newest first.
    pub fn messages(&self) -> Vec<NormalizedMessage> {
        self.lock().iter().map(|item| item.data.clone()).collect()
    }

    pub fn items(&self) -> Vec<StoredMessage> {
        self.lock().clone()
    }

    pub fn get(&self, key: &MessageKey) -> Option<NormalizedMessage> {
        self.lock()
            .iter()
            .find(|item| &item.key() == key)
            .map(|item| item.data.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Add or replace one message.
    pub fn ingest(&self, message: NormalizedMessage) {
        self.ingest_many([message]);
    }

    /// Add or replace several messages in one pass.
    pub fn ingest_many(&self, messages: impl IntoIterator<Item = NormalizedMessage>) {
        let now = self.clock.now_ms();
        self.update(|items| {
            items.extend(messages.into_iter().map(|m| StoredMessage::new(m, now)));
        });
    }

    /// Apply an arbitrary change, then restore the list invariants.
    pub fn update<R>(&self, transform: impl FnOnce(&mut Vec<StoredMessage>) -> R) -> R {
        let mut items = self.lock();
        let mut next = std::mem::take(&mut *items);
        let result = transform(&mut next);
        *items = self
            .policy
            .reconcile(next, self.clock.now_ms(), self.directory.as_ref());
        self.writer.schedule(items.clone());
        result
    }

    /// Replace the editable content of the stored message with the same
    /// identity as `edited`. Returns whether one was found.
    pub fn apply_edit(&self, edited: &NormalizedMessage) -> bool {
        let key = edited.key();
        self.update(|items| match items.iter_mut().find(|item| item.key() == key) {
            Some(item) => {
                item.data.apply_edit(edited);
                true
            }
            None => false,
        })
    }

    /// Remove the message with `key`. Returns whether one was removed.
    pub fn remove(&self, key: &MessageKey) -> bool {
        self.update(|items| {
            let before = items.len();
            items.retain(|item| &item.key() != key);
            items.len() != before
        })
    }

    /// Drop messages.
    ///
    /// Without a filter everything goes, including the persisted copy.
    /// With a filter only messages attributed to one of the given token ids
    /// are dropped; unattributed messages stay.
    pub fn clear(&self, token_ids: Option<&HashSet<String>>) {
        match token_ids {
            None => {
                let mut items = self.lock();
                items.clear();
                self.writer.remove();
            }
            Some(token_ids) => self.update(|items| {
                items.retain(|item| match item.data.source_token_id.as_ref() {
                    Some(token_id) => !token_ids.contains(token_id),
                    None => true,
                });
            }),
        }
    }

    /// Write pending changes now.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    fn lock(&self) -> MutexGuard<'_, Vec<StoredMessage>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
