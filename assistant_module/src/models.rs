use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of an inbound chat message, as persisted in `messages.message_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    File,
    Sticker,
    Location,
    Other,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Video => "video",
            MessageType::Audio => "audio",
            MessageType::File => "file",
            MessageType::Sticker => "sticker",
            MessageType::Location => "location",
            MessageType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "text" => MessageType::Text,
            "image" => MessageType::Image,
            "video" => MessageType::Video,
            "audio" => MessageType::Audio,
            "file" => MessageType::File,
            "sticker" => MessageType::Sticker,
            "location" => MessageType::Location,
            _ => MessageType::Other,
        }
    }

    /// Messages whose payload lives on the platform's content endpoint.
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            MessageType::Image | MessageType::Video | MessageType::Audio | MessageType::File
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub external_id: String,
    pub user_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub quoted_message_id: Option<String>,
    pub group_id: Option<String>,
    pub event_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub external_id: String,
    pub user_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub quoted_message_id: Option<String>,
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub color: Option<String>,
    pub label: Option<String>,
    pub location: Option<String>,
    pub completed: bool,
    pub user_id: String,
    pub group_id: Option<String>,
    pub message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCalendarEvent {
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub color: Option<String>,
    pub label: Option<String>,
    pub location: Option<String>,
    pub user_id: String,
    pub group_id: Option<String>,
    pub message_id: Option<String>,
}

/// Field-wise patch applied by `events.update`; `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct CalendarEventPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub all_day: Option<bool>,
    pub color: Option<String>,
    pub label: Option<String>,
    pub location: Option<String>,
    pub completed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub storage_key: String,
    pub user_id: String,
    pub group_id: Option<String>,
    pub message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub storage_key: String,
    pub user_id: String,
    pub group_id: Option<String>,
    pub message_id: Option<String>,
}

/// Owner and scope of a mutable resource, as loaded from its persisted row.
#[derive(Debug, Clone, Copy)]
pub struct ResourceScope<'a> {
    pub owner_id: &'a str,
    pub group_id: Option<&'a str>,
}

impl CalendarEvent {
    pub fn scope(&self) -> ResourceScope<'_> {
        ResourceScope {
            owner_id: &self.user_id,
            group_id: self.group_id.as_deref(),
        }
    }
}

impl FileRecord {
    pub fn scope(&self) -> ResourceScope<'_> {
        ResourceScope {
            owner_id: &self.user_id,
            group_id: self.group_id.as_deref(),
        }
    }
}
