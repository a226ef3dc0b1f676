//! Binary messages: download from the platform, store, record, acknowledge.

use tracing::{info, warn};

use crate::adapters::MessageEvent;
use crate::errors::NormalizeOptions;
use crate::models::{FileRecord, MessageType, NewFileRecord, StoredMessage};
use crate::store::run_blocking;
use crate::BoxError;

use super::super::state::AppState;
use super::dedup::UNKNOWN_USER;
use super::reply::{file_saved_text, reply_best_effort, try_reply};

/// Only a failed acknowledgment reply propagates. Storage failures are
/// answered in chat with the normalized user message.
pub(super) async fn handle_binary(
    state: &AppState,
    event: &MessageEvent,
    stored: &StoredMessage,
) -> Result<(), BoxError> {
    let record = match store_content(state, event, stored).await {
        Ok(record) => record,
        Err(err) => {
            let normalized = state
                .normalizer
                .normalize(&*err, NormalizeOptions::new("inbound.file"));
            reply_best_effort(state, event, normalized.user_message).await;
            return Ok(());
        }
    };
    info!(
        "stored file {} ({} bytes) for message {}",
        record.id, record.size_bytes, event.external_id
    );
    let text = file_saved_text(
        &record.file_name,
        state.config.frontend_base_url.as_deref(),
        record.group_id.as_deref(),
    );
    try_reply(state, event, text).await?;
    Ok(())
}

async fn store_content(
    state: &AppState,
    event: &MessageEvent,
    stored: &StoredMessage,
) -> Result<FileRecord, BoxError> {
    let content = state.line.get_message_content(&event.external_id).await?;
    let file_name = file_name_for(event, &content.content_type);
    let user_id = event
        .source
        .user_id
        .clone()
        .unwrap_or_else(|| UNKNOWN_USER.to_string());
    let group_id = event.source.chat_id.clone();
    let scope = group_id.as_deref().unwrap_or(&user_id).to_string();
    let storage_key = state.blobs.put(&scope, &file_name, &content.bytes).await?;

    let new_file = NewFileRecord {
        file_name,
        content_type: content.content_type,
        size_bytes: content.bytes.len() as i64,
        storage_key: storage_key.clone(),
        user_id,
        group_id,
        message_id: Some(stored.external_id.clone()),
    };
    match run_blocking(&state.store, move |store| store.insert_file(&new_file)).await {
        Ok(record) => Ok(record),
        Err(err) => {
            if let Err(cleanup) = state.blobs.delete(&storage_key).await {
                warn!("failed to remove orphaned blob {}: {}", storage_key, cleanup);
            }
            Err(err.into())
        }
    }
}

/// Platform-supplied name for `file` messages, else `{type}-{id}.{ext}`.
pub(super) fn file_name_for(event: &MessageEvent, content_type: &str) -> String {
    if let Some(name) = event
        .file_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        return name.to_string();
    }
    format!(
        "{}-{}.{}",
        event.message_type.as_str(),
        event.external_id,
        extension_for(content_type, event.message_type)
    )
}

fn extension_for(content_type: &str, message_type: MessageType) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "audio/m4a" | "audio/x-m4a" | "audio/mp4" => "m4a",
        "audio/mpeg" => "mp3",
        "application/pdf" => "pdf",
        _ => match message_type {
            MessageType::Image => "jpg",
            MessageType::Video => "mp4",
            MessageType::Audio => "m4a",
            _ => "bin",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{EventSource, SourceKind};

    fn event(message_type: MessageType, file_name: Option<&str>) -> MessageEvent {
        MessageEvent {
            external_id: "m-9".into(),
            reply_token: Some("rt".into()),
            source: EventSource {
                kind: SourceKind::User,
                user_id: Some("U1".into()),
                chat_id: None,
            },
            message_type,
            text: None,
            quote_token: None,
            quoted_message_id: None,
            mentions: Vec::new(),
            file_name: file_name.map(str::to_string),
            timestamp: None,
        }
    }

    #[test]
    fn platform_file_name_wins() {
        assert_eq!(
            file_name_for(&event(MessageType::File, Some(" report.pdf ")), "application/pdf"),
            "report.pdf"
        );
    }

    #[test]
    fn generated_names_follow_content_type() {
        assert_eq!(
            file_name_for(&event(MessageType::Image, None), "image/png"),
            "image-m-9.png"
        );
        assert_eq!(
            file_name_for(&event(MessageType::Audio, None), "application/octet-stream"),
            "audio-m-9.m4a"
        );
        assert_eq!(
            file_name_for(&event(MessageType::File, None), "text/plain; charset=utf-8"),
            "file-m-9.bin"
        );
    }
}
