//! Canonical message types.
//!
//! Field names follow the Telegram Bot API (`message_id`, `edit_date`, ...) so a
//! message object taken straight from an update deserializes without mapping.
//! The two dashboard-specific fields, `sourceTokenId` and `botUsername`, use the
//! camelCase names the browser client expects.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

/// Kind of Telegram chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ChatType {
    Private,
    Group,
    Supergroup,
    Channel,
    /// Missing or not recognised.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Chat a message belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Chat {
    #[ts(type = "number")]
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: ChatType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Set for private chats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
}

impl Chat {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            kind: ChatType::Unknown,
            title: None,
            username: None,
            first_name: None,
        }
    }

    /// Human readable chat label: title, then @username, then first name, then the id.
    pub fn label(&self) -> String {
        if let Some(title) = &self.title {
            title.clone()
        } else if let Some(username) = &self.username {
            format!("@{username}")
        } else if let Some(name) = &self.first_name {
            name.clone()
        } else {
            self.id.to_string()
        }
    }
}

/// Sender of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct User {
    #[ts(type = "number")]
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl User {
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(username) => format!("@{username}"),
            None => self.first_name.clone(),
        }
    }
}

/// Generic file attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Document {
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_unique_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "number | null")]
    pub file_size: Option<i64>,
}

/// One resolution of a photo. Telegram sends several per photo message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_unique_id: Option<String>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "number | null")]
    pub file_size: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Video {
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_unique_id: Option<String>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A message as observed by the dashboard, whichever path it arrived on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NormalizedMessage {
    #[ts(type = "number")]
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    /// Unix seconds.
    #[serde(default)]
    #[ts(type = "number")]
    pub date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<Vec<PhotoSize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<Video>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "number | null")]
    pub edit_date: Option<i64>,
    /// Identifier of the registered bot this message was observed through.
    #[serde(
        rename = "sourceTokenId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_token_id: Option<String>,
    #[serde(
        rename = "botUsername",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub bot_username: Option<String>,
}

/// Identity of a message across arrival paths: `(chat.id, message_id, sourceTokenId)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKey {
    pub chat_id: i64,
    pub message_id: i64,
    pub source_token_id: Option<String>,
}

impl MessageKey {
    pub fn new(chat_id: i64, message_id: i64, source_token_id: Option<&str>) -> Self {
        Self {
            chat_id,
            message_id,
            source_token_id: source_token_id.map(str::to_string),
        }
    }
}

impl NormalizedMessage {
    pub fn new(message_id: i64, chat: Chat, date: i64) -> Self {
        Self {
            message_id,
            chat,
            from: None,
            date,
            text: None,
            caption: None,
            entities: None,
            document: None,
            photo: None,
            video: None,
            reply_to_message: None,
            edit_date: None,
            source_token_id: None,
            bot_username: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Attribute this message to a registered bot.
    pub fn with_source(mut self, token_id: impl Into<String>) -> Self {
        self.source_token_id = Some(token_id.into());
        self
    }

    pub fn key(&self) -> MessageKey {
        MessageKey::new(
            self.chat.id,
            self.message_id,
            self.source_token_id.as_deref(),
        )
    }

    /// Replace the editable content with that of `edited`.
    ///
    /// Only text, caption, entities and edit date change; identity and
    /// attribution stay as they were.
    pub fn apply_edit(&mut self, edited: &NormalizedMessage) {
        self.text = edited.text.clone();
        self.caption = edited.caption.clone();
        self.entities = edited.entities.clone();
        self.edit_date = edited.edit_date;
    }

    pub fn is_edited(&self) -> bool {
        self.edit_date.is_some()
    }

    /// Short textual summary for list views.
    pub fn summary(&self) -> String {
        if let Some(text) = self.text.as_deref().or(self.caption.as_deref()) {
            return text.to_string();
        }
        if let Some(doc) = &self.document {
            return format!(
                "[document {}]",
                doc.file_name.as_deref().unwrap_or(&doc.file_id)
            );
        }
        if self.photo.is_some() {
            return "[photo]".to_string();
        }
        if self.video.is_some() {
            return "[video]".to_string();
        }
        "[unsupported message]".to_string()
    }
}
