//! LINE webhook payload parsing.
//!
//! Turns a webhook body into `InboundEvent`s: joins, messages, and
//! everything else as `Unsupported`. Mention offsets from LINE are UTF-16
//! code unit positions, so stripping works on UTF-16 and converts back.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::AdapterError;
use crate::models::MessageType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    User,
    Group,
    Room,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSource {
    pub kind: SourceKind,
    pub user_id: Option<String>,
    /// Group or room id for multi-party chats.
    pub chat_id: Option<String>,
}

impl EventSource {
    pub fn is_multi_party(&self) -> bool {
        matches!(self.kind, SourceKind::Group | SourceKind::Room)
    }

    pub fn group_id(&self) -> Option<&str> {
        match self.kind {
            SourceKind::Group => self.chat_id.as_deref(),
            _ => None,
        }
    }

    pub fn room_id(&self) -> Option<&str> {
        match self.kind {
            SourceKind::Room => self.chat_id.as_deref(),
            _ => None,
        }
    }

    /// Push target: the chat for group/room sources, the user otherwise.
    pub fn push_target(&self) -> Option<&str> {
        if self.is_multi_party() {
            self.chat_id.as_deref()
        } else {
            self.user_id.as_deref()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub index: usize,
    pub length: usize,
    pub is_self: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinEvent {
    pub reply_token: Option<String>,
    pub source: EventSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub external_id: String,
    pub reply_token: Option<String>,
    pub source: EventSource,
    pub message_type: MessageType,
    pub text: Option<String>,
    pub quote_token: Option<String>,
    pub quoted_message_id: Option<String>,
    pub mentions: Vec<Mention>,
    pub file_name: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl MessageEvent {
    pub fn mentions_bot(&self) -> bool {
        self.mentions.iter().any(|mention| mention.is_self)
    }

    /// Text with every bot mention span removed and whitespace trimmed.
    pub fn text_without_bot_mention(&self) -> String {
        let Some(text) = self.text.as_deref() else {
            return String::new();
        };
        let mut spans: Vec<(usize, usize)> = self
            .mentions
            .iter()
            .filter(|mention| mention.is_self)
            .map(|mention| (mention.index, mention.index.saturating_add(mention.length)))
            .collect();
        if spans.is_empty() {
            return text.trim().to_string();
        }
        spans.sort_unstable();
        let units: Vec<u16> = text.encode_utf16().collect();
        let mut kept = Vec::with_capacity(units.len());
        let mut cursor = 0;
        for (start, end) in spans {
            let start = start.min(units.len());
            let end = end.min(units.len());
            if start > cursor {
                kept.extend_from_slice(&units[cursor..start]);
            }
            cursor = cursor.max(end);
        }
        if cursor < units.len() {
            kept.extend_from_slice(&units[cursor..]);
        }
        String::from_utf16_lossy(&kept)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Join(JoinEvent),
    Message(MessageEvent),
    Unsupported,
}

/// Parser for LINE webhook bodies.
#[derive(Debug, Clone, Default)]
pub struct LineInboundAdapter;

impl LineInboundAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Parse a webhook body. Individual events that fail to parse are
    /// logged and reported as `Unsupported`.
    pub fn parse(&self, raw_payload: &[u8]) -> Result<Vec<InboundEvent>, AdapterError> {
        let payload: WebhookPayload = serde_json::from_slice(raw_payload)
            .map_err(|err| AdapterError::ParseError(err.to_string()))?;
        let destination = payload.destination.as_deref();
        Ok(payload
            .events
            .into_iter()
            .map(|raw| match serde_json::from_value::<RawEvent>(raw) {
                Ok(event) => convert_event(event, destination),
                Err(err) => {
                    warn!("line webhook event skipped: {}", err);
                    InboundEvent::Unsupported
                }
            })
            .collect())
    }
}

fn convert_event(event: RawEvent, destination: Option<&str>) -> InboundEvent {
    match event {
        RawEvent::Join(join) => InboundEvent::Join(JoinEvent {
            reply_token: join.reply_token,
            source: join.source.into(),
        }),
        RawEvent::Message(message) => {
            let raw = message.message;
            let mentions = raw
                .mention
                .map(|mention| {
                    mention
                        .mentionees
                        .into_iter()
                        .map(|mentionee| Mention {
                            index: mentionee.index,
                            length: mentionee.length,
                            is_self: mentionee.is_self.unwrap_or_else(|| {
                                destination.is_some() && mentionee.user_id.as_deref() == destination
                            }),
                        })
                        .collect()
                })
                .unwrap_or_default();
            InboundEvent::Message(MessageEvent {
                external_id: raw.id,
                reply_token: message.reply_token,
                source: message.source.into(),
                message_type: MessageType::parse(&raw.message_type),
                text: raw.text,
                quote_token: raw.quote_token,
                quoted_message_id: raw.quoted_message_id,
                mentions,
                file_name: raw.file_name,
                timestamp: message
                    .timestamp
                    .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
            })
        }
        RawEvent::Other => InboundEvent::Unsupported,
    }
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    destination: Option<String>,
    #[serde(default)]
    events: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawEvent {
    Message(RawMessageEvent),
    Join(RawJoinEvent),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessageEvent {
    #[serde(default)]
    reply_token: Option<String>,
    source: RawSource,
    #[serde(default)]
    timestamp: Option<i64>,
    message: RawMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawJoinEvent {
    #[serde(default)]
    reply_token: Option<String>,
    source: RawSource,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawSource {
    User {
        #[serde(rename = "userId", default)]
        user_id: Option<String>,
    },
    Group {
        #[serde(rename = "groupId")]
        group_id: String,
        #[serde(rename = "userId", default)]
        user_id: Option<String>,
    },
    Room {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userId", default)]
        user_id: Option<String>,
    },
}

impl From<RawSource> for EventSource {
    fn from(source: RawSource) -> Self {
        match source {
            RawSource::User { user_id } => EventSource {
                kind: SourceKind::User,
                user_id,
                chat_id: None,
            },
            RawSource::Group { group_id, user_id } => EventSource {
                kind: SourceKind::Group,
                user_id,
                chat_id: Some(group_id),
            },
            RawSource::Room { room_id, user_id } => EventSource {
                kind: SourceKind::Room,
                user_id,
                chat_id: Some(room_id),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: String,
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    quote_token: Option<String>,
    #[serde(default)]
    quoted_message_id: Option<String>,
    #[serde(default)]
    mention: Option<RawMention>,
    #[serde(default)]
    file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMention {
    #[serde(default)]
    mentionees: Vec<RawMentionee>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMentionee {
    index: usize,
    length: usize,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    is_self: Option<bool>,
}
