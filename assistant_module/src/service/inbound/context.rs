use tracing::debug;

use crate::adapters::MessageEvent;
use crate::store::run_blocking;
use crate::BoxError;

use super::super::state::AppState;

/// Text handed to extraction: the message itself, framed with the quoted
/// message when it quotes one.
pub async fn build_ai_input(
    state: &AppState,
    event: &MessageEvent,
    text: &str,
) -> Result<String, BoxError> {
    let Some(quoted_id) = event.quoted_message_id.clone() else {
        return Ok(text.to_string());
    };
    let quoted = run_blocking(&state.store, move |store| {
        store.find_message_by_external_id(&quoted_id)
    })
    .await?;
    if quoted.is_none() {
        debug!(
            "quoted message {:?} not recorded, using weak framing",
            event.quoted_message_id
        );
    }
    Ok(frame_with_quote(
        quoted.as_ref().map(|message| message.content.as_str()),
        text,
    ))
}

pub(crate) fn frame_with_quote(quoted: Option<&str>, text: &str) -> String {
    match quoted {
        Some(quoted) => format!(
            "使用者引用了先前的訊息：「{}」\n並針對該訊息回覆：「{}」\n請依照回覆內容調整原本的安排。",
            quoted, text
        ),
        None => format!("（使用者正在回覆一則先前的訊息）\n{}", text),
    }
}
