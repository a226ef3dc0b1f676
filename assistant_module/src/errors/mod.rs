//! Error taxonomy shared by the webhook gate and the RPC surface.
//!
//! Every failure that leaves a boundary is turned into a `NormalizedError` by
//! `ErrorNormalizer`. `RpcError` is the framework-level error procedures raise;
//! it can carry an already-normalized error across a second boundary.

mod messages;
mod normalizer;
mod probes;

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::validation::{ValidationFailure, ValidationIssue};
use crate::BoxError;

pub use messages::{field_label, issue_user_message, validation_user_message};
pub use normalizer::{render_chain, ErrorNormalizer, NormalizeOptions};
pub use probes::{default_probes, ValidationProbe};

pub const REPLY_TOKEN_INVALID: &str = "REPLY_TOKEN_INVALID";
pub const MESSAGE_ALREADY_PROCESSED: &str = "MESSAGE_ALREADY_PROCESSED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    Conflict,
    RateLimit,
    ExternalApi,
    Database,
    AiService,
    Internal,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Validation => "validation",
            ErrorType::Authentication => "authentication",
            ErrorType::Authorization => "authorization",
            ErrorType::NotFound => "not_found",
            ErrorType::Conflict => "conflict",
            ErrorType::RateLimit => "rate_limit",
            ErrorType::ExternalApi => "external_api",
            ErrorType::Database => "database",
            ErrorType::AiService => "ai_service",
            ErrorType::Internal => "internal",
        }
    }

    pub fn default_status(&self) -> u16 {
        match self {
            ErrorType::Validation => 400,
            ErrorType::Authentication => 401,
            ErrorType::Authorization => 403,
            ErrorType::NotFound => 404,
            ErrorType::Conflict => 409,
            ErrorType::RateLimit => 429,
            ErrorType::ExternalApi => 502,
            ErrorType::Database => 500,
            ErrorType::AiService => 503,
            ErrorType::Internal => 500,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ErrorType::Validation | ErrorType::NotFound | ErrorType::Conflict => Severity::Low,
            ErrorType::Authentication | ErrorType::Authorization | ErrorType::RateLimit => {
                Severity::Medium
            }
            ErrorType::ExternalApi | ErrorType::Database | ErrorType::AiService => Severity::High,
            ErrorType::Internal => Severity::Critical,
        }
    }

    fn default_code(&self) -> &'static str {
        match self {
            ErrorType::Validation => "VALIDATION_ERROR",
            ErrorType::Authentication => "AUTHENTICATION_REQUIRED",
            ErrorType::Authorization => "FORBIDDEN",
            ErrorType::NotFound => "NOT_FOUND",
            ErrorType::Conflict => "CONFLICT",
            ErrorType::RateLimit => "RATE_LIMITED",
            ErrorType::ExternalApi => "EXTERNAL_API_ERROR",
            ErrorType::Database => "DATABASE_ERROR",
            ErrorType::AiService => "AI_SERVICE_UNAVAILABLE",
            ErrorType::Internal => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Field-level detail included in validation envelopes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl FieldIssue {
    pub fn from_issue(issue: &ValidationIssue) -> Self {
        Self {
            field: issue.field(),
            code: issue.kind.code().to_string(),
            message: issue_user_message(issue),
        }
    }
}

/// Canonical error shape; serializes to the HTTP error envelope.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{error_type} ({code}): {message}")]
pub struct NormalizedError {
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    #[serde(skip)]
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub user_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldIssue>>,
    #[serde(skip)]
    pub status: u16,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl NormalizedError {
    pub fn new(
        error_type: ErrorType,
        code: impl Into<String>,
        message: impl Into<String>,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            error_type,
            severity: error_type.severity(),
            code: code.into(),
            message: message.into(),
            user_message: user_message.into(),
            details: None,
            status: error_type.default_status(),
            timestamp: Utc::now(),
            request_id: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(
            ErrorType::Authentication,
            "AUTHENTICATION_REQUIRED",
            message,
            messages::AUTHENTICATION_REQUIRED,
        )
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(
            ErrorType::Authorization,
            "FORBIDDEN",
            message,
            messages::FORBIDDEN,
        )
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::new(
            ErrorType::NotFound,
            format!("{}_NOT_FOUND", entity.to_ascii_uppercase()),
            format!("{} not found: {}", entity, id),
            messages::NOT_FOUND,
        )
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorType::Internal, code, message, messages::INTERNAL)
    }

    pub fn from_validation(failure: &ValidationFailure) -> Self {
        let details = failure.issues.iter().map(FieldIssue::from_issue).collect();
        let mut normalized = Self::new(
            ErrorType::Validation,
            ErrorType::Validation.default_code(),
            failure.to_string(),
            validation_user_message(failure),
        );
        normalized.details = Some(details);
        normalized
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        if self.request_id.is_none() {
            self.request_id = request_id;
        }
        self
    }

    pub fn is_reply_token_error(&self) -> bool {
        self.code == REPLY_TOKEN_INVALID
    }

    pub fn http_status(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for NormalizedError {
    fn into_response(self) -> Response {
        (self.http_status(), Json(self)).into_response()
    }
}

/// Framework error code surfaced by procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    TooManyRequests,
    InternalServerError,
}

impl RpcErrorCode {
    pub fn error_type(&self) -> ErrorType {
        match self {
            RpcErrorCode::BadRequest => ErrorType::Validation,
            RpcErrorCode::Unauthorized => ErrorType::Authentication,
            RpcErrorCode::Forbidden => ErrorType::Authorization,
            RpcErrorCode::NotFound => ErrorType::NotFound,
            RpcErrorCode::Conflict => ErrorType::Conflict,
            RpcErrorCode::TooManyRequests => ErrorType::RateLimit,
            RpcErrorCode::InternalServerError => ErrorType::Internal,
        }
    }

    pub fn from_error_type(error_type: ErrorType) -> Self {
        match error_type {
            ErrorType::Validation => RpcErrorCode::BadRequest,
            ErrorType::Authentication => RpcErrorCode::Unauthorized,
            ErrorType::Authorization => RpcErrorCode::Forbidden,
            ErrorType::NotFound => RpcErrorCode::NotFound,
            ErrorType::Conflict => RpcErrorCode::Conflict,
            ErrorType::RateLimit => RpcErrorCode::TooManyRequests,
            _ => RpcErrorCode::InternalServerError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RpcErrorCode::BadRequest => "BAD_REQUEST",
            RpcErrorCode::Unauthorized => "UNAUTHORIZED",
            RpcErrorCode::Forbidden => "FORBIDDEN",
            RpcErrorCode::NotFound => "NOT_FOUND",
            RpcErrorCode::Conflict => "CONFLICT",
            RpcErrorCode::TooManyRequests => "TOO_MANY_REQUESTS",
            RpcErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }
}

/// An already-normalized error riding inside an `RpcError`.
#[derive(Debug, Clone)]
pub struct CarriedError {
    pub normalized: NormalizedError,
    /// Set when the carried error started as a validation failure.
    pub validation: Option<ValidationFailure>,
}

/// Framework-shaped error. Validation data may hide in any of its slots.
#[derive(Debug)]
pub struct RpcError {
    pub code: RpcErrorCode,
    pub message: String,
    pub cause: Option<BoxError>,
    pub original: Option<BoxError>,
    pub data: Option<Value>,
    pub details: Option<Value>,
    pub carried: Option<CarriedError>,
}

impl RpcError {
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            original: None,
            data: None,
            details: None,
            carried: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_original(mut self, original: impl Into<BoxError>) -> Self {
        self.original = Some(original.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Wrap a normalized error so the next boundary can rebuild it without logging again.
    pub fn carry(normalized: NormalizedError, validation: Option<ValidationFailure>) -> Self {
        Self {
            code: RpcErrorCode::from_error_type(normalized.error_type),
            message: normalized.message.clone(),
            cause: None,
            original: None,
            data: None,
            details: None,
            carried: Some(CarriedError {
                normalized,
                validation,
            }),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn std::error::Error + 'static))
    }
}
