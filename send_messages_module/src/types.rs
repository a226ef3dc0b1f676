use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Outbound message object for reply/push requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Text {
        text: String,
        #[serde(rename = "quoteToken", skip_serializing_if = "Option::is_none")]
        quote_token: Option<String>,
    },
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Message::Text {
            text: text.into(),
            quote_token: None,
        }
    }

    /// Text message that quotes the inbound message identified by `quote_token`.
    pub fn quoted_text(text: impl Into<String>, quote_token: Option<String>) -> Self {
        Message::Text {
            text: text.into(),
            quote_token,
        }
    }
}

/// User profile as returned by the profile and group/room member endpoints.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub picture_url: Option<String>,
}

/// Binary content of an image/video/audio/file message.
#[derive(Debug, Clone)]
pub struct MessageContent {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReplyRequest<'a> {
    pub(crate) reply_token: &'a str,
    pub(crate) messages: &'a [Message],
}

#[derive(Debug, Serialize)]
pub(crate) struct PushRequest<'a> {
    pub(crate) to: &'a str,
    pub(crate) messages: &'a [Message],
}
