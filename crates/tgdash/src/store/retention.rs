//! Retention and reconciliation of the message list.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tgdash_protocol::{MessageKey, NormalizedMessage};

use crate::credentials::BotDirectory;

/// Maximum number of messages kept.
pub const DEFAULT_MAX_ITEMS: usize = 1000;

/// Maximum age of a kept message, measured from when it was stored.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// One persisted entry: the message plus when it was stored (ms since epoch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub data: NormalizedMessage,
    pub timestamp: i64,
}

impl StoredMessage {
    pub fn new(data: NormalizedMessage, timestamp: i64) -> Self {
        Self { data, timestamp }
    }

    pub fn key(&self) -> MessageKey {
        self.data.key()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_items: usize,
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

impl RetentionPolicy {
    /// Whether an item stored at `timestamp` is still within the age window.
    pub fn is_fresh(&self, timestamp: i64, now_ms: i64) -> bool {
        let max_age_ms = i64::try_from(self.max_age.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(timestamp) <= max_age_ms
    }

    /// Bring `items` back in line with every store invariant.
    ///
    /// Expired items are dropped, missing bot names are filled in from
    /// `directory`, duplicates collapse onto the last occurrence, and the
    /// result is sorted newest first and cut to `max_items`.
    pub fn reconcile(
        &self,
        items: Vec<StoredMessage>,
        now_ms: i64,
        directory: &dyn BotDirectory,
    ) -> Vec<StoredMessage> {
        let mut merged: Vec<StoredMessage> = Vec::with_capacity(items.len());
        let mut positions: HashMap<MessageKey, usize> = HashMap::with_capacity(items.len());

        for mut item in items {
            if !self.is_fresh(item.timestamp, now_ms) {
                continue;
            }
            enrich(&mut item.data, directory);
            match positions.get(&item.key()) {
                Some(&index) => merged[index] = item,
                None => {
                    positions.insert(item.key(), merged.len());
                    merged.push(item);
                }
            }
        }

        merged.sort_by(|a, b| b.data.date.cmp(&a.data.date));
        merged.truncate(self.max_items);
        merged
    }
}

/// Fill in the bot display name. An existing name is never replaced.
fn enrich(message: &mut NormalizedMessage, directory: &dyn BotDirectory) {
    if message.bot_username.is_some() {
        return;
    }
    if let Some(token_id) = message.source_token_id.as_deref() {
        message.bot_username = directory.display_name(token_id);
    }
}
