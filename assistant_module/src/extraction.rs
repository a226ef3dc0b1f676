//! Calendar event extraction from free-form chat text.
//!
//! Calls the OpenAI chat completions endpoint with a single
//! `create_calendar_event` tool. A tool call yields a candidate event; a plain
//! text answer means the model found nothing to schedule.

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use send_messages_module::{ApiResponse, ExternalApiError, ExternalService};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EXTRACTION_MODEL: &str = "gpt-4o-mini";
pub const EXTRACTION_TOOL: &str = "create_calendar_event";

/// Palette accepted for `color` on events, from the model and from RPC input.
pub const EVENT_COLORS: &[&str] = &["red", "orange", "yellow", "green", "blue", "purple", "gray"];

const EXTRACTION_TIMEOUT: Duration = Duration::from_secs(20);

const SYSTEM_PROMPT: &str = r#"You turn chat messages into calendar events.

If the message describes something to schedule, call create_calendar_event exactly once.
- Resolve relative dates ("明天", "下週一", "tonight") against the current local time given below.
- Write start and end as local ISO 8601 date-times without an offset (YYYY-MM-DDTHH:MM:SS).
- For events without a time of day, write dates only (YYYY-MM-DD) and set allDay to true.
- If no end is mentioned, omit it.
- Keep the title short, in the language of the message.

If there is nothing to schedule, answer with a short plain-text note and do not call the tool."#;

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("openai request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Api(#[from] ExternalApiError),
    #[error("openai response invalid: {0}")]
    InvalidResponse(String),
    #[error("OPENAI_API_KEY not set")]
    MissingApiKey,
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
}

/// Event fields proposed by the model. Timestamps are unparsed here;
/// the inbound pipeline coerces them against the configured timezone.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEvent {
    pub title: String,
    pub start: String,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default, alias = "all_day")]
    pub all_day: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EventExtractor {
    config: ExtractorConfig,
    client: Client,
}

impl EventExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let client = Client::builder()
            .timeout(EXTRACTION_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        info!(
            "EventExtractor initialized: url={}, model={}, key_set={}",
            config.api_url,
            config.model,
            config.api_key.is_some()
        );
        Self { config, client }
    }

    /// Ask the model for a candidate event. `Ok(None)` means no tool call came back.
    pub async fn extract(
        &self,
        text: &str,
        timezone: Tz,
        now: DateTime<Utc>,
    ) -> Result<Option<CandidateEvent>, ExtractionError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ExtractionError::MissingApiKey)?;

        let local_now = now.with_timezone(&timezone);
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: format!(
                        "{}\n\nCurrent local time: {} ({}, {})",
                        SYSTEM_PROMPT,
                        local_now.format("%Y-%m-%dT%H:%M:%S"),
                        timezone.name(),
                        local_now.format("%A")
                    ),
                },
                ChatMessage {
                    role: "user",
                    content: text.to_string(),
                },
            ],
            tools: vec![extraction_tool()],
            tool_choice: "auto",
        };

        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));
        debug!("calling openai extraction: {} model={}", url, self.config.model);
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalApiError {
                service: ExternalService::OpenAi,
                response: ApiResponse { status, body },
            }
            .into());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| ExtractionError::InvalidResponse(err.to_string()))?;
        parse_candidate(parsed)
    }
}

fn parse_candidate(response: ChatResponse) -> Result<Option<CandidateEvent>, ExtractionError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ExtractionError::InvalidResponse("no choices".to_string()))?;
    let Some(call) = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .find(|call| call.function.name == EXTRACTION_TOOL)
    else {
        debug!("openai extraction returned no tool call");
        return Ok(None);
    };
    let candidate: CandidateEvent = serde_json::from_str(&call.function.arguments)
        .map_err(|err| ExtractionError::InvalidResponse(format!("tool arguments: {}", err)))?;
    if candidate.title.trim().is_empty() || candidate.start.trim().is_empty() {
        return Err(ExtractionError::InvalidResponse(
            "tool arguments missing title or start".to_string(),
        ));
    }
    Ok(Some(candidate))
}

fn extraction_tool() -> Tool {
    Tool {
        tool_type: "function",
        function: ToolFunction {
            name: EXTRACTION_TOOL,
            description: "Create one calendar event from the user's message.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "description": "Short event title"},
                    "start": {"type": "string", "description": "Local start, YYYY-MM-DDTHH:MM:SS or YYYY-MM-DD"},
                    "end": {"type": "string", "description": "Local end, same format as start"},
                    "allDay": {"type": "boolean"},
                    "description": {"type": "string"},
                    "location": {"type": "string"},
                    "color": {"type": "string", "enum": EVENT_COLORS},
                    "label": {"type": "string", "description": "One-word category, e.g. 工作, 家庭, 健康"}
                },
                "required": ["title", "start"]
            }),
        },
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    tools: Vec<Tool>,
    tool_choice: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct Tool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ToolFunction,
}

#[derive(Debug, Serialize)]
struct ToolFunction {
    name: &'static str,
    description: &'static str,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: ToolCallFunction,
}

#[derive(Debug, Deserialize)]
struct ToolCallFunction {
    name: String,
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::{Matcher, Server};

    fn extractor(url: String) -> EventExtractor {
        EventExtractor::new(ExtractorConfig {
            api_key: Some("sk-test".to_string()),
            api_url: url,
            model: "gpt-test".to_string(),
        })
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 2, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn tool_call_becomes_candidate() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-test",
                "tool_choice": "auto"
            })))
            .with_status(200)
            .with_body(
                json!({
                    "choices": [{"message": {"role": "assistant", "content": null, "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "create_calendar_event",
                            "arguments": "{\"title\":\"看牙醫\",\"start\":\"2026-10-20T15:00:00\"}"
                        }
                    }]}}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let candidate = extractor(server.url())
            .extract("明天下午3點看牙醫", chrono_tz::Asia::Taipei, now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.title, "看牙醫");
        assert_eq!(candidate.start, "2026-10-20T15:00:00");
        assert_eq!(candidate.end, None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn plain_answer_means_no_candidate() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"沒有行程"}}]}"#)
            .create_async()
            .await;

        let candidate = extractor(server.url())
            .extract("隨便寫點東西", chrono_tz::Asia::Taipei, now())
            .await
            .unwrap();
        assert!(candidate.is_none());
    }

    #[tokio::test]
    async fn upstream_failure_is_an_api_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body(r#"{"error":{"message":"overloaded"}}"#)
            .create_async()
            .await;

        let err = extractor(server.url())
            .extract("明天開會", chrono_tz::Asia::Taipei, now())
            .await
            .unwrap_err();
        match err {
            ExtractionError::Api(api) => {
                assert_eq!(api.service, ExternalService::OpenAi);
                assert_eq!(api.response.status, 500);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_key_fails_before_calling_out() {
        let extractor = EventExtractor::new(ExtractorConfig {
            api_key: None,
            api_url: "http://127.0.0.1:9".to_string(),
            model: "gpt-test".to_string(),
        });
        let err = extractor
            .extract("明天開會", chrono_tz::Asia::Taipei, now())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::MissingApiKey));
    }

    #[test]
    fn malformed_tool_arguments_are_invalid() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"tool_calls": [{"function": {"name": "create_calendar_event", "arguments": "{not json"}}]}}]
        }))
        .unwrap();
        assert!(matches!(
            parse_candidate(response),
            Err(ExtractionError::InvalidResponse(_))
        ));
    }
}
