use tracing::info;

use crate::adapters::MessageEvent;
use crate::errors::{ErrorNormalizer, MESSAGE_ALREADY_PROCESSED};
use crate::models::{MessageType, NewMessage, StoredMessage};
use crate::store::{run_blocking, StoreError};
use crate::BoxError;

use super::super::state::AppState;

/// Sender id recorded when the platform omits it.
pub(super) const UNKNOWN_USER: &str = "unknown";

/// Record an inbound message once. `None` means it was already recorded,
/// either found up front or lost the insert race to a concurrent delivery.
pub(super) async fn record_message(
    state: &AppState,
    event: &MessageEvent,
) -> Result<Option<StoredMessage>, BoxError> {
    let external_id = event.external_id.clone();
    let existing = run_blocking(&state.store, move |store| {
        store.find_message_by_external_id(&external_id)
    })
    .await?;
    if existing.is_some() {
        info!("message {} already recorded, skipping", event.external_id);
        return Ok(None);
    }

    let new_message = new_message_for(event);
    match run_blocking(&state.store, move |store| store.insert_message(&new_message)).await {
        Ok(stored) => Ok(Some(stored)),
        Err(err) if is_duplicate_delivery(&state.normalizer, &err) => {
            info!(
                "message {} recorded concurrently, treating as duplicate",
                event.external_id
            );
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

fn is_duplicate_delivery(normalizer: &ErrorNormalizer, err: &StoreError) -> bool {
    normalizer.classify(err).code == MESSAGE_ALREADY_PROCESSED
}

pub(super) fn new_message_for(event: &MessageEvent) -> NewMessage {
    NewMessage {
        external_id: event.external_id.clone(),
        user_id: event
            .source
            .user_id
            .clone()
            .unwrap_or_else(|| UNKNOWN_USER.to_string()),
        content: message_content(event),
        message_type: event.message_type,
        quoted_message_id: event.quoted_message_id.clone(),
        group_id: event.source.chat_id.clone(),
    }
}

/// Text for text messages, a bracketed placeholder for everything else.
pub(super) fn message_content(event: &MessageEvent) -> String {
    match event.message_type {
        MessageType::Text => event.text.clone().unwrap_or_default(),
        other => match event.file_name.as_deref() {
            Some(name) => format!("[{}] {}", other.as_str(), name),
            None => format!("[{}]", other.as_str()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{EventSource, SourceKind};

    fn event(
        message_type: MessageType,
        text: Option<&str>,
        file_name: Option<&str>,
    ) -> MessageEvent {
        MessageEvent {
            external_id: "m-1".into(),
            reply_token: None,
            source: EventSource {
                kind: SourceKind::Group,
                user_id: None,
                chat_id: Some("G1".into()),
            },
            message_type,
            text: text.map(str::to_string),
            quote_token: None,
            quoted_message_id: Some("m-0".into()),
            mentions: Vec::new(),
            file_name: file_name.map(str::to_string),
            timestamp: None,
        }
    }

    #[test]
    fn placeholders_for_non_text_messages() {
        assert_eq!(
            message_content(&event(MessageType::Text, Some("開會"), None)),
            "開會"
        );
        assert_eq!(message_content(&event(MessageType::Image, None, None)), "[image]");
        assert_eq!(
            message_content(&event(MessageType::File, None, Some("a.pdf"))),
            "[file] a.pdf"
        );
    }

    #[test]
    fn new_message_keeps_scope_and_quote() {
        let message = new_message_for(&event(MessageType::Text, Some("hi"), None));
        assert_eq!(message.user_id, UNKNOWN_USER);
        assert_eq!(message.group_id.as_deref(), Some("G1"));
        assert_eq!(message.quoted_message_id.as_deref(), Some("m-0"));
    }
}
