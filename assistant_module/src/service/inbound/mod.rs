//! Per-event inbound pipeline: record, filter, extract, materialize, reply.

mod context;
mod dedup;
mod files;
mod materialize;
mod reply;

use chrono::Utc;
use send_messages_module::Message;
use tracing::{debug, info};

use crate::adapters::{InboundEvent, JoinEvent, MessageEvent};
use crate::errors::NormalizeOptions;
use crate::models::{CalendarEvent, MessageType, StoredMessage};
use crate::store::run_blocking;
use crate::BoxError;

use super::state::AppState;
use dedup::{record_message, UNKNOWN_USER};
use materialize::{event_from_candidate, fallback_event, link_message, EventScope};
use reply::{display_name, reply_best_effort};

pub use context::build_ai_input;
pub use materialize::{coerce_timestamp, CoercedTime};
pub use reply::{confirmation_text, deep_link};

const WELCOME_TEXT: &str = "大家好！我是行事曆小幫手。\n在訊息中標記我並描述行程，例如「明天下午3點開會」，我就會幫大家記到群組行事曆。";

pub(super) async fn handle_event(state: &AppState, event: &InboundEvent) -> Result<(), BoxError> {
    match event {
        InboundEvent::Join(join) => handle_join(state, join).await,
        InboundEvent::Message(message) => handle_message(state, message).await,
        InboundEvent::Unsupported => {
            debug!("ignoring unsupported webhook event");
            Ok(())
        }
    }
}

async fn handle_join(state: &AppState, join: &JoinEvent) -> Result<(), BoxError> {
    let Some(target) = join.source.push_target() else {
        debug!("join event without a chat id, nothing to greet");
        return Ok(());
    };
    state
        .line
        .push_message(target, &[Message::text(WELCOME_TEXT)])
        .await?;
    info!("sent welcome message to {}", target);
    Ok(())
}

async fn handle_message(state: &AppState, event: &MessageEvent) -> Result<(), BoxError> {
    let Some(stored) = record_message(state, event).await? else {
        return Ok(());
    };
    if event.source.is_multi_party() && !event.mentions_bot() {
        debug!(
            "message {} in {:?} does not mention the bot, recorded only",
            event.external_id, event.source.chat_id
        );
        return Ok(());
    }
    match event.message_type {
        MessageType::Text => {
            handle_text(state, event, &stored).await;
            Ok(())
        }
        kind if kind.is_binary() => files::handle_binary(state, event, &stored).await,
        kind => {
            debug!("ignoring {} message {}", kind.as_str(), event.external_id);
            Ok(())
        }
    }
}

/// Every failure past this point becomes a chat reply.
async fn handle_text(state: &AppState, event: &MessageEvent, stored: &StoredMessage) {
    let text = if event.source.is_multi_party() {
        event.text_without_bot_mention()
    } else {
        event.text.as_deref().unwrap_or_default().trim().to_string()
    };
    if text.is_empty() {
        debug!("message {} has no text after mention stripping", event.external_id);
        return;
    }

    let reply_text = match create_event_from_text(state, event, stored, &text).await {
        Ok(created) => {
            let name = if event.source.is_multi_party() {
                display_name(state, &event.source).await
            } else {
                None
            };
            confirmation_text(
                &created,
                state.config.default_timezone,
                state.config.frontend_base_url.as_deref(),
                name.as_deref(),
            )
        }
        Err(err) => {
            state
                .normalizer
                .normalize(&*err, NormalizeOptions::new("inbound.extraction"))
                .user_message
        }
    };
    reply_best_effort(state, event, reply_text).await;
}

async fn create_event_from_text(
    state: &AppState,
    event: &MessageEvent,
    stored: &StoredMessage,
    text: &str,
) -> Result<CalendarEvent, BoxError> {
    let timezone = state.config.default_timezone;
    let ai_input = build_ai_input(state, event, text).await?;
    let now = Utc::now();
    let candidate = state.extractor.extract(&ai_input, timezone, now).await?;

    let scope = EventScope {
        user_id: event
            .source
            .user_id
            .clone()
            .unwrap_or_else(|| UNKNOWN_USER.to_string()),
        group_id: event.source.chat_id.clone(),
        message_id: stored.external_id.clone(),
    };
    let new_event = match candidate {
        Some(candidate) => event_from_candidate(&candidate, timezone, now, scope),
        None => {
            info!(
                "no event extracted from message {}, using fallback",
                event.external_id
            );
            fallback_event(text, now, scope)
        }
    };

    let created = run_blocking(&state.store, move |store| store.insert_event(&new_event)).await?;
    info!(
        "created event {} from message {}",
        created.id, event.external_id
    );
    link_message(state, &event.external_id, &created.id).await;
    Ok(created)
}
