mod auth;
mod config;
mod inbound;
mod rpc;
mod server;
mod state;
mod verify;
mod webhook;

use axum::http::HeaderMap;
use uuid::Uuid;

pub use auth::{
    authorize, check_create_scope, check_resource_scope, policy_for, AuthError, AuthPolicy,
    Identity, Procedure,
};
pub use config::{AppEnv, ConfigError, ServiceConfig, DEFAULT_INBOUND_BODY_MAX_BYTES};
pub use inbound::{build_ai_input, coerce_timestamp, confirmation_text, deep_link, CoercedTime};
pub use server::{build_router, run_server};
pub use state::AppState;
pub use verify::{compute_line_signature, LINE_SIGNATURE_HEADER};
pub use webhook::{settle, REPLY_TOKEN_SENTINEL, WEBHOOK_ACK};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Caller-supplied request id, or a fresh one.
pub(crate) fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
