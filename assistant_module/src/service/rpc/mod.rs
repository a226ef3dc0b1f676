//! `POST /rpc/:procedure`: policy, input parsing and the two error boundaries.
//!
//! Procedure failures are normalized (and logged) at the procedure boundary,
//! then carried inside an `RpcError` to the HTTP boundary, which rebuilds the
//! envelope without logging again.

mod events;
mod files;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::errors::{NormalizeOptions, NormalizedError, RpcError, RpcErrorCode};
use crate::store::run_blocking;
use crate::validation::{IssueKind, ValidationFailure, ValidationIssue};
use crate::BoxError;

use super::auth::{authorize, Identity, Procedure};
use super::request_id;
use super::state::AppState;

/// Caller facts resolved before a procedure runs.
#[derive(Debug, Clone)]
pub(super) struct CallContext {
    pub(super) identity: Option<Identity>,
    pub(super) request_id: String,
}

impl CallContext {
    /// Identity for personal-scope operations.
    pub(super) fn require_identity(&self) -> Result<&Identity, NormalizedError> {
        self.identity.as_ref().ok_or_else(|| {
            NormalizedError::authentication("personal scope requires a signed-in caller")
        })
    }
}

pub(super) async fn rpc_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id(&headers);
    if let Err(err) = state.config.require_rpc() {
        error!("rpc rejected, configuration incomplete: {}", err);
        return NormalizedError::internal("CONFIG_MISSING", err.to_string())
            .with_request_id(Some(request_id))
            .into_response();
    }

    match dispatch(&state, &name, &headers, &body, &request_id).await {
        Ok(data) => (StatusCode::OK, Json(json!({ "data": data }))).into_response(),
        Err(err) => state
            .normalizer
            .normalize(&*err, NormalizeOptions::new("rpc").request_id(Some(request_id)))
            .into_response(),
    }
}

async fn dispatch(
    state: &AppState,
    name: &str,
    headers: &HeaderMap,
    body: &[u8],
    request_id: &str,
) -> Result<Value, BoxError> {
    let procedure = Procedure::parse(name).ok_or_else(|| {
        RpcError::new(
            RpcErrorCode::NotFound,
            format!("procedure not found: {}", name),
        )
    })?;
    let input = parse_body(body)?;
    let identity = authorize(procedure.policy(), &state.line, headers).await?;
    debug!(
        "rpc {} identity={:?}",
        procedure.name(),
        identity.as_ref().map(|identity| identity.user_id.as_str())
    );
    let ctx = CallContext {
        identity,
        request_id: request_id.to_string(),
    };
    Ok(call(state, procedure, &ctx, &input).await?)
}

fn parse_body(body: &[u8]) -> Result<Value, RpcError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(|err| {
        RpcError::new(RpcErrorCode::BadRequest, "request body is not valid JSON").with_cause(err)
    })
}

/// Procedure boundary: normalize once, then carry the result outward.
async fn call(
    state: &AppState,
    procedure: Procedure,
    ctx: &CallContext,
    input: &Value,
) -> Result<Value, RpcError> {
    let result = match procedure {
        Procedure::Health => health(state).await,
        Procedure::EventsListPersonal => events::list_personal(state, ctx, input).await,
        Procedure::EventsListGroup => events::list_group(state, input).await,
        Procedure::EventsCreate => events::create(state, ctx, input).await,
        Procedure::EventsUpdate => events::update(state, ctx, input).await,
        Procedure::EventsDelete => events::delete(state, ctx, input).await,
        Procedure::FilesListPersonal => files::list_personal(state, ctx).await,
        Procedure::FilesListGroup => files::list_group(state, input).await,
        Procedure::FilesUpload => files::upload(state, ctx, input).await,
        Procedure::FilesRename => files::rename(state, ctx, input).await,
        Procedure::FilesDelete => files::delete(state, ctx, input).await,
    };
    result.map_err(|err| {
        let normalized = state.normalizer.normalize(
            &*err,
            NormalizeOptions::new(procedure.name()).request_id(Some(ctx.request_id.clone())),
        );
        RpcError::carry(normalized, state.normalizer.probe_validation(&*err))
    })
}

async fn health(state: &AppState) -> Result<Value, BoxError> {
    let counts = run_blocking(&state.store, |store| store.table_counts()).await?;
    Ok(json!({ "status": "ok", "counts": counts }))
}

/// Input failure shaped the way the RPC framework reports it.
pub(super) fn invalid_input(failure: ValidationFailure) -> BoxError {
    RpcError::new(RpcErrorCode::BadRequest, "input validation failed")
        .with_cause(failure)
        .into()
}

pub(super) fn end_before_start() -> ValidationIssue {
    ValidationIssue::new("end", IssueKind::Custom, "不可早於開始時間")
}
