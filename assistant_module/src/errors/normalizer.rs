use std::error::Error;
use std::sync::OnceLock;

use regex::Regex;
use send_messages_module::{ExternalApiError, ExternalService, MessagingError};
use tracing::{error, info, warn};

use super::messages;
use super::probes::{default_probes, ValidationProbe};
use super::{
    ErrorType, NormalizedError, RpcError, RpcErrorCode, Severity, MESSAGE_ALREADY_PROCESSED,
    REPLY_TOKEN_INVALID,
};
use crate::extraction::ExtractionError;
use crate::store::StoreError;
use crate::validation::{IssueKind, ValidationFailure, ValidationIssue};

/// Field names the heuristic fallback looks for when no structured issues exist.
const KNOWN_REQUIRED_FIELDS: &[&str] = &[
    "title",
    "start",
    "end",
    "groupId",
    "eventId",
    "fileId",
    "fileName",
    "contentType",
];

const VALIDATION_HINTS: &[&str] = &[
    "validation",
    "invalid input",
    "missing field",
    "unknown field",
    "invalid type:",
];

static MISSING_FIELD: OnceLock<Option<Regex>> = OnceLock::new();
static NOT_NULL_COLUMN: OnceLock<Option<Regex>> = OnceLock::new();

#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    pub request_id: Option<String>,
    pub suppress_log: bool,
    pub context: &'static str,
}

impl NormalizeOptions {
    pub fn new(context: &'static str) -> Self {
        Self {
            context,
            ..Self::default()
        }
    }

    pub fn request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn suppress_log(mut self) -> Self {
        self.suppress_log = true;
        self
    }
}

struct Classified {
    normalized: NormalizedError,
    reconstituted: bool,
}

impl Classified {
    fn fresh(normalized: NormalizedError) -> Self {
        Self {
            normalized,
            reconstituted: false,
        }
    }
}

/// Maps arbitrary errors onto `NormalizedError` and logs them once.
#[derive(Debug, Clone)]
pub struct ErrorNormalizer {
    probes: Vec<ValidationProbe>,
}

impl Default for ErrorNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorNormalizer {
    pub fn new() -> Self {
        Self {
            probes: default_probes(),
        }
    }

    pub fn normalize(
        &self,
        err: &(dyn Error + 'static),
        options: NormalizeOptions,
    ) -> NormalizedError {
        let classified = self.classify_inner(err);
        let normalized = classified.normalized.with_request_id(options.request_id);
        if !options.suppress_log && !classified.reconstituted {
            log_normalized(&normalized, err, options.context);
        }
        normalized
    }

    /// Classification without logging.
    pub fn classify(&self, err: &(dyn Error + 'static)) -> NormalizedError {
        self.classify_inner(err).normalized
    }

    fn classify_inner(&self, err: &(dyn Error + 'static)) -> Classified {
        if let Some(normalized) = find_in_chain::<NormalizedError>(err) {
            return Classified {
                normalized: normalized.clone(),
                reconstituted: true,
            };
        }
        if let Some(classified) = reconstitute_carried(err) {
            return classified;
        }
        if let Some(normalized) = self.classify_validation(err) {
            return Classified::fresh(normalized);
        }
        if let Some(normalized) = classify_external(err) {
            return Classified::fresh(normalized);
        }
        if let Some(normalized) = classify_database(err) {
            return Classified::fresh(normalized);
        }
        if let Some(normalized) = classify_rpc_code(err) {
            return Classified::fresh(normalized);
        }
        Classified::fresh(classify_fallback(err))
    }

    /// First structured validation failure any probe finds.
    pub fn probe_validation(&self, err: &(dyn Error + 'static)) -> Option<ValidationFailure> {
        self.probes.iter().find_map(|probe| (probe.run)(err))
    }

    fn classify_validation(&self, err: &(dyn Error + 'static)) -> Option<NormalizedError> {
        if let Some(failure) = self.probe_validation(err) {
            return Some(NormalizedError::from_validation(&failure));
        }
        if !raised_by_integration(err) && looks_like_validation(err) {
            let failure = synthesize_failure(&render_chain(err));
            return Some(NormalizedError::from_validation(&failure));
        }
        None
    }
}

/// `top: cause: root` rendering of an error's source chain.
pub fn render_chain(err: &(dyn Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        let text = cause.to_string();
        if !rendered.ends_with(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        current = cause.source();
    }
    rendered
}

fn find_in_chain<'a, T: Error + 'static>(err: &'a (dyn Error + 'static)) -> Option<&'a T> {
    let mut current = Some(err);
    while let Some(candidate) = current {
        if let Some(found) = candidate.downcast_ref::<T>() {
            return Some(found);
        }
        current = candidate.source();
    }
    None
}

/// Decode failures from outbound calls describe the remote payload, not the
/// caller's input.
fn raised_by_integration(err: &(dyn Error + 'static)) -> bool {
    find_in_chain::<ExtractionError>(err).is_some()
        || find_in_chain::<MessagingError>(err).is_some()
        || find_in_chain::<ExternalApiError>(err).is_some()
}

fn looks_like_validation(err: &(dyn Error + 'static)) -> bool {
    if let Some(rpc) = err.downcast_ref::<RpcError>() {
        if rpc.carried.is_none() && rpc.code == RpcErrorCode::BadRequest {
            return true;
        }
    }
    if let Some(json) = find_in_chain::<serde_json::Error>(err) {
        if json.is_data() || json.is_syntax() || json.is_eof() {
            return true;
        }
    }
    let text = render_chain(err).to_lowercase();
    VALIDATION_HINTS.iter().any(|hint| text.contains(hint))
}

fn synthesize_failure(text: &str) -> ValidationFailure {
    let missing = MISSING_FIELD
        .get_or_init(|| Regex::new(r"missing field `([A-Za-z_][A-Za-z0-9_]*)`").ok())
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|field| field.as_str().to_string());
    if let Some(field) = missing {
        return ValidationFailure::single(ValidationIssue::required(&field));
    }
    let tokens: Vec<&str> = text
        .split(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_')
        .filter(|token| !token.is_empty())
        .collect();
    if let Some(field) = KNOWN_REQUIRED_FIELDS
        .iter()
        .find(|field| tokens.contains(field))
    {
        return ValidationFailure::single(ValidationIssue::required(field));
    }
    ValidationFailure::single(ValidationIssue {
        path: Vec::new(),
        kind: IssueKind::Custom,
        message: messages::INVALID_INPUT.to_string(),
    })
}

fn classify_external(err: &(dyn Error + 'static)) -> Option<NormalizedError> {
    if let Some(api) = find_in_chain::<ExternalApiError>(err) {
        return Some(classify_api_response(api, err));
    }
    if let Some(extraction) = find_in_chain::<ExtractionError>(err) {
        let code = match extraction {
            ExtractionError::InvalidResponse(_) => "AI_RESPONSE_INVALID",
            ExtractionError::MissingApiKey => "AI_NOT_CONFIGURED",
            _ => "AI_SERVICE_UNAVAILABLE",
        };
        return Some(NormalizedError::new(
            ErrorType::AiService,
            code,
            err.to_string(),
            messages::AI_UNAVAILABLE,
        ));
    }
    if let Some(MessagingError::Config(reason)) = find_in_chain::<MessagingError>(err) {
        return Some(NormalizedError::internal(
            "MESSAGING_NOT_CONFIGURED",
            reason.clone(),
        ));
    }
    if find_in_chain::<reqwest::Error>(err).is_some() {
        return Some(NormalizedError::new(
            ErrorType::ExternalApi,
            "EXTERNAL_SERVICE_UNAVAILABLE",
            err.to_string(),
            messages::EXTERNAL_UNAVAILABLE,
        ));
    }
    None
}

fn classify_api_response(api: &ExternalApiError, err: &(dyn Error + 'static)) -> NormalizedError {
    let status = api.response.status;
    let text = format!("{} {}", api.response.message(), api.response.body).to_lowercase();
    let message = err.to_string();
    if text.contains("invalid reply token")
        || (text.contains("reply token") && text.contains("expired"))
    {
        let mut normalized = NormalizedError::new(
            ErrorType::ExternalApi,
            REPLY_TOKEN_INVALID,
            message,
            messages::REPLY_TOKEN_INVALID,
        )
        .with_status(400);
        normalized.severity = Severity::Low;
        return normalized;
    }
    if status == 429 || text.contains("rate limit") || text.contains("too many requests") {
        return NormalizedError::new(
            ErrorType::RateLimit,
            "RATE_LIMITED",
            message,
            messages::RATE_LIMITED,
        );
    }
    if status == 401
        || text.contains("invalid access token")
        || text.contains("authentication failed")
    {
        return NormalizedError::new(
            ErrorType::Authentication,
            "INVALID_ACCESS_TOKEN",
            message,
            messages::INVALID_ACCESS_TOKEN,
        );
    }
    if api.service == ExternalService::OpenAi {
        return NormalizedError::new(
            ErrorType::AiService,
            "AI_SERVICE_UNAVAILABLE",
            message,
            messages::AI_UNAVAILABLE,
        );
    }
    if (400..500).contains(&status) {
        return NormalizedError::new(
            ErrorType::ExternalApi,
            "EXTERNAL_API_ERROR",
            message,
            messages::EXTERNAL_REJECTED,
        )
        .with_status(status);
    }
    NormalizedError::new(
        ErrorType::ExternalApi,
        "EXTERNAL_SERVICE_UNAVAILABLE",
        message,
        messages::EXTERNAL_UNAVAILABLE,
    )
}

fn classify_database(err: &(dyn Error + 'static)) -> Option<NormalizedError> {
    let store = find_in_chain::<StoreError>(err);
    if let Some(StoreError::NotFound { entity, id }) = store {
        return Some(NormalizedError::not_found(entity, id));
    }
    let text = render_chain(err).to_lowercase();
    let mentions_constraint = text.contains("constraint failed")
        || (text.contains("violates") && text.contains("constraint"));
    if store.is_none() && find_in_chain::<rusqlite::Error>(err).is_none() && !mentions_constraint
    {
        return None;
    }
    let message = err.to_string();
    if text.contains("unique constraint") || text.contains("duplicate key") {
        if text.contains("messages.external_id") || text.contains("messages_external_id") {
            return Some(NormalizedError::new(
                ErrorType::Conflict,
                MESSAGE_ALREADY_PROCESSED,
                message,
                messages::MESSAGE_ALREADY_PROCESSED,
            ));
        }
        return Some(NormalizedError::new(
            ErrorType::Conflict,
            "DUPLICATE_RECORD",
            message,
            messages::DUPLICATE_RECORD,
        ));
    }
    if text.contains("not null constraint") {
        let column = NOT_NULL_COLUMN
            .get_or_init(|| Regex::new(r"not null constraint failed: \w+\.(\w+)").ok())
            .as_ref()
            .and_then(|re| re.captures(&text))
            .and_then(|caps| caps.get(1))
            .map(|column| column.as_str().trim_end_matches("_at").to_string());
        let user_message = match column {
            Some(column) => messages::issue_user_message(&ValidationIssue::required(&column)),
            None => messages::CONSTRAINT_VIOLATION.to_string(),
        };
        return Some(NormalizedError::new(
            ErrorType::Validation,
            "REQUIRED_FIELD_MISSING",
            message,
            user_message,
        ));
    }
    if text.contains("foreign key constraint") {
        return Some(NormalizedError::new(
            ErrorType::Validation,
            "FOREIGN_KEY_VIOLATION",
            message,
            messages::CONSTRAINT_VIOLATION,
        ));
    }
    if text.contains("check constraint") {
        return Some(NormalizedError::new(
            ErrorType::Validation,
            "CONSTRAINT_VIOLATION",
            message,
            messages::CONSTRAINT_VIOLATION,
        ));
    }
    Some(NormalizedError::new(
        ErrorType::Database,
        "DATABASE_ERROR",
        message,
        messages::DATABASE,
    ))
}

/// A carried error's message can read like validation or a constraint
/// failure, so it is matched ahead of the text heuristics.
fn reconstitute_carried(err: &(dyn Error + 'static)) -> Option<Classified> {
    let carried = find_in_chain::<RpcError>(err)?.carried.as_ref()?;
    let normalized = match &carried.validation {
        Some(failure) => {
            let mut rebuilt = NormalizedError::from_validation(failure);
            rebuilt.request_id = carried.normalized.request_id.clone();
            rebuilt
        }
        None => carried.normalized.clone(),
    };
    Some(Classified {
        normalized,
        reconstituted: true,
    })
}

fn classify_rpc_code(err: &(dyn Error + 'static)) -> Option<NormalizedError> {
    let rpc = find_in_chain::<RpcError>(err)?;
    let error_type = rpc.code.error_type();
    Some(NormalizedError::new(
        error_type,
        error_type.default_code(),
        rpc.message.clone(),
        default_user_message(error_type),
    ))
}

fn classify_fallback(err: &(dyn Error + 'static)) -> NormalizedError {
    let text = render_chain(err).to_lowercase();
    let message = err.to_string();
    if text.contains("token") {
        NormalizedError::new(
            ErrorType::Authentication,
            "AUTHENTICATION_FAILED",
            message,
            messages::AUTHENTICATION_REQUIRED,
        )
    } else if text.contains("permission")
        || text.contains("forbidden")
        || text.contains("unauthorized")
    {
        NormalizedError::new(ErrorType::Authorization, "FORBIDDEN", message, messages::FORBIDDEN)
    } else if text.contains("not found") {
        NormalizedError::new(ErrorType::NotFound, "NOT_FOUND", message, messages::NOT_FOUND)
    } else {
        NormalizedError::internal("INTERNAL_ERROR", message)
    }
}

fn default_user_message(error_type: ErrorType) -> &'static str {
    match error_type {
        ErrorType::Validation => messages::INVALID_INPUT,
        ErrorType::Authentication => messages::AUTHENTICATION_REQUIRED,
        ErrorType::Authorization => messages::FORBIDDEN,
        ErrorType::NotFound => messages::NOT_FOUND,
        ErrorType::Conflict => messages::DUPLICATE_RECORD,
        ErrorType::RateLimit => messages::RATE_LIMITED,
        ErrorType::ExternalApi => messages::EXTERNAL_UNAVAILABLE,
        ErrorType::Database => messages::DATABASE,
        ErrorType::AiService => messages::AI_UNAVAILABLE,
        ErrorType::Internal => messages::INTERNAL,
    }
}

fn log_normalized(normalized: &NormalizedError, err: &(dyn Error + 'static), context: &str) {
    let request_id = normalized.request_id.as_deref().unwrap_or("-");
    match normalized.severity {
        Severity::Low => {
            let fields: Vec<String> = normalized
                .details
                .iter()
                .flatten()
                .map(|issue| format!("{}:{}", issue.field, issue.code))
                .collect();
            info!(
                "{} {} {} request_id={} issues={:?}: {}",
                context,
                normalized.error_type,
                normalized.code,
                request_id,
                fields,
                normalized.message
            );
        }
        Severity::Medium => {
            warn!(
                "{} {} {} request_id={}: {}",
                context, normalized.error_type, normalized.code, request_id, normalized.message
            );
        }
        Severity::High | Severity::Critical => {
            error!(
                "{} {} {} request_id={}: {}",
                context,
                normalized.error_type,
                normalized.code,
                request_id,
                render_chain(err)
            );
        }
    }
}
