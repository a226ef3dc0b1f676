//! LINE webhook gate: verify, parse, fan out, settle.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::join_all;
use serde_json::json;
use tracing::{error, info, warn};

use crate::adapters::{InboundEvent, LineInboundAdapter};
use crate::errors::{ErrorNormalizer, NormalizeOptions, NormalizedError};
use crate::BoxError;

use super::inbound::handle_event;
use super::request_id;
use super::state::AppState;
use super::verify::verify_line;

/// Acknowledgment for a fully processed batch.
pub const WEBHOOK_ACK: &str = "OK";
/// Acknowledgment when the only failures were unusable reply tokens.
pub const REPLY_TOKEN_SENTINEL: &str = "REPLY_TOKEN_EXPIRED";

pub(super) async fn line_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id(&headers);
    if let Err(err) = state.config.require_webhook() {
        error!("webhook rejected, configuration incomplete: {}", err);
        return NormalizedError::internal("CONFIG_MISSING", err.to_string())
            .with_request_id(Some(request_id))
            .into_response();
    }

    match state.config.line_channel_secret.as_deref() {
        Some(secret) => {
            if let Err(reason) = verify_line(secret, &headers, &body) {
                warn!("line webhook signature rejected: {}", reason);
                return (StatusCode::UNAUTHORIZED, Json(json!({ "status": reason })))
                    .into_response();
            }
        }
        None if state.config.skip_signature_verification() => {
            warn!("LINE_CHANNEL_SECRET not set, accepting unsigned webhook in development");
        }
        None => {
            error!("webhook rejected, LINE_CHANNEL_SECRET not set");
            return NormalizedError::internal("CONFIG_MISSING", "LINE_CHANNEL_SECRET not set")
                .with_request_id(Some(request_id))
                .into_response();
        }
    }

    let events = match LineInboundAdapter::new().parse(&body) {
        Ok(events) => events,
        Err(err) => {
            warn!("failed to parse line webhook: {}", err);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "parse_error"})),
            )
                .into_response();
        }
    };
    info!("line webhook received {} event(s)", events.len());

    let task_state = state.clone();
    let handle = state
        .tracker
        .spawn(async move { dispatch_events(&task_state, &events).await });

    let failure: BoxError = match handle.await {
        Ok(Ok(ack)) => {
            return (StatusCode::OK, Json(json!({"status": ack}))).into_response();
        }
        Ok(Err(err)) => err,
        Err(join_err) => {
            error!("webhook dispatch task failed: {}", join_err);
            return NormalizedError::internal("PANIC", join_err.to_string())
                .with_request_id(Some(request_id))
                .into_response();
        }
    };
    let normalized = state.normalizer.normalize(
        &*failure,
        NormalizeOptions::new("webhook").request_id(Some(request_id)),
    );
    let normalized = if normalized.status < 500 {
        normalized.with_status(500)
    } else {
        normalized
    };
    normalized.into_response()
}

/// Run every event concurrently and settle once all of them finish.
pub(super) async fn dispatch_events(
    state: &AppState,
    events: &[InboundEvent],
) -> Result<&'static str, BoxError> {
    let results = join_all(events.iter().map(|event| handle_event(state, event))).await;
    settle(&state.normalizer, results)
}

/// Collapse per-event results into the batch outcome.
///
/// Reply-token failures alone settle as `REPLY_TOKEN_SENTINEL`; any other
/// failure wins and the first one is returned.
pub fn settle(
    normalizer: &ErrorNormalizer,
    results: Vec<Result<(), BoxError>>,
) -> Result<&'static str, BoxError> {
    let mut reply_token_failures = 0;
    for result in results {
        let Err(err) = result else {
            continue;
        };
        if normalizer.classify(&*err).is_reply_token_error() {
            reply_token_failures += 1;
            continue;
        }
        return Err(err);
    }
    if reply_token_failures > 0 {
        info!(
            "{} event(s) hit an expired reply token, acknowledging",
            reply_token_failures
        );
        return Ok(REPLY_TOKEN_SENTINEL);
    }
    Ok(WEBHOOK_ACK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use send_messages_module::{ApiResponse, ExternalApiError, ExternalService, MessagingError};

    fn reply_token_error() -> BoxError {
        MessagingError::from(ExternalApiError {
            service: ExternalService::Line,
            response: ApiResponse {
                status: 400,
                body: r#"{"message":"Invalid reply token"}"#.into(),
            },
        })
        .into()
    }

    #[test]
    fn all_successes_acknowledge() {
        let normalizer = ErrorNormalizer::new();
        assert_eq!(settle(&normalizer, vec![Ok(()), Ok(())]).unwrap(), WEBHOOK_ACK);
        assert_eq!(settle(&normalizer, Vec::new()).unwrap(), WEBHOOK_ACK);
    }

    #[test]
    fn reply_token_failures_settle_as_sentinel() {
        let normalizer = ErrorNormalizer::new();
        let outcome = settle(&normalizer, vec![Ok(()), Err(reply_token_error())]).unwrap();
        assert_eq!(outcome, REPLY_TOKEN_SENTINEL);
    }

    #[test]
    fn other_failures_surface_past_the_sentinel() {
        let normalizer = ErrorNormalizer::new();
        let err = settle(
            &normalizer,
            vec![
                Err(reply_token_error()),
                Ok(()),
                Err("database is locked".into()),
            ],
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "database is locked");
    }
}
