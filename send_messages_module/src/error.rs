use std::fmt;

use serde::{Deserialize, Serialize};

/// Which remote service produced an [`ExternalApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalService {
    Line,
    LineIdentity,
    OpenAi,
}

impl fmt::Display for ExternalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ExternalService::Line => "LINE",
            ExternalService::LineIdentity => "LINE identity",
            ExternalService::OpenAi => "OpenAI",
        };
        f.write_str(value)
    }
}

/// Status and raw body of a non-success HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    /// The `message` field of a JSON error body, falling back to the raw body.
    pub fn message(&self) -> String {
        serde_json::from_str::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|value| {
                value
                    .get("message")
                    .or_else(|| value.get("error").and_then(|error| error.get("message")))
                    .and_then(|message| message.as_str())
                    .map(|message| message.to_string())
            })
            .unwrap_or_else(|| self.body.clone())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{service} API returned {}: {}", response.status, response.message())]
pub struct ExternalApiError {
    pub service: ExternalService,
    pub response: ApiResponse,
}

#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Api(#[from] ExternalApiError),
    #[error("messaging config error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_response_message_prefers_json_message() {
        let response = ApiResponse {
            status: 400,
            body: r#"{"message":"Invalid reply token"}"#.to_string(),
        };
        assert_eq!(response.message(), "Invalid reply token");

        let nested = ApiResponse {
            status: 429,
            body: r#"{"error":{"message":"Rate limit reached"}}"#.to_string(),
        };
        assert_eq!(nested.message(), "Rate limit reached");

        let raw = ApiResponse {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(raw.message(), "bad gateway");
    }

    #[test]
    fn external_api_error_display_includes_service_and_status() {
        let err = ExternalApiError {
            service: ExternalService::Line,
            response: ApiResponse {
                status: 400,
                body: r#"{"message":"Invalid reply token"}"#.to_string(),
            },
        };
        assert_eq!(err.to_string(), "LINE API returned 400: Invalid reply token");
    }
}
