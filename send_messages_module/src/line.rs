use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::debug;

use crate::error::{ApiResponse, ExternalApiError, ExternalService, MessagingError};
use crate::types::{Message, MessageContent, Profile, PushRequest, ReplyRequest};

pub const DEFAULT_LINE_API_BASE: &str = "https://api.line.me";
pub const DEFAULT_LINE_DATA_API_BASE: &str = "https://api-data.line.me";

/// Client for the LINE Messaging API, authenticated with the channel access token.
#[derive(Debug, Clone)]
pub struct LineClient {
    access_token: String,
    api_base: String,
    data_api_base: String,
    http: Client,
}

impl LineClient {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self::with_base_urls(access_token, DEFAULT_LINE_API_BASE, DEFAULT_LINE_DATA_API_BASE)
    }

    pub fn with_base_urls(
        access_token: impl Into<String>,
        api_base: impl Into<String>,
        data_api_base: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            api_base: trim_base(api_base.into()),
            data_api_base: trim_base(data_api_base.into()),
            http: Client::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Reply to an inbound event. Reply tokens are single use and expire quickly.
    pub async fn reply_message(
        &self,
        reply_token: &str,
        messages: &[Message],
    ) -> Result<(), MessagingError> {
        if self.access_token.trim().is_empty() {
            return Err(MessagingError::Config("missing channel access token".to_string()));
        }
        let request = ReplyRequest {
            reply_token,
            messages,
        };
        let response = self
            .http
            .post(self.api_url("/v2/bot/message/reply"))
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;
        check_response(ExternalService::Line, response).await?;
        debug!("line reply sent messages={}", messages.len());
        Ok(())
    }

    /// Push messages to a user, group or room id.
    pub async fn push_message(&self, to: &str, messages: &[Message]) -> Result<(), MessagingError> {
        if self.access_token.trim().is_empty() {
            return Err(MessagingError::Config("missing channel access token".to_string()));
        }
        let request = PushRequest { to, messages };
        let response = self
            .http
            .post(self.api_url("/v2/bot/message/push"))
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;
        check_response(ExternalService::Line, response).await?;
        debug!("line push sent to={} messages={}", to, messages.len());
        Ok(())
    }

    /// Download the binary content of an image/video/audio/file message.
    pub async fn get_message_content(
        &self,
        message_id: &str,
    ) -> Result<MessageContent, MessagingError> {
        let url = format!(
            "{}/v2/bot/message/{}/content",
            self.data_api_base,
            urlencoding::encode(message_id)
        );
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let response = check_response(ExternalService::Line, response).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response.bytes().await?;
        Ok(MessageContent {
            bytes,
            content_type,
        })
    }

    pub async fn get_group_member_profile(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> Result<Profile, MessagingError> {
        let url = self.api_url(&format!(
            "/v2/bot/group/{}/member/{}",
            urlencoding::encode(group_id),
            urlencoding::encode(user_id)
        ));
        self.get_profile_at(url).await
    }

    pub async fn get_room_member_profile(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<Profile, MessagingError> {
        let url = self.api_url(&format!(
            "/v2/bot/room/{}/member/{}",
            urlencoding::encode(room_id),
            urlencoding::encode(user_id)
        ));
        self.get_profile_at(url).await
    }

    async fn get_profile_at(&self, url: String) -> Result<Profile, MessagingError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let response = check_response(ExternalService::Line, response).await?;
        Ok(response.json::<Profile>().await?)
    }

    /// Resolve the profile owning a user access token (LINE Login / LIFF).
    ///
    /// Uses the caller's token rather than the channel token, so a 401 here
    /// means the caller's token is invalid or expired.
    pub async fn get_profile_for_access_token(
        &self,
        user_access_token: &str,
    ) -> Result<Profile, MessagingError> {
        let response = self
            .http
            .get(self.api_url("/v2/profile"))
            .bearer_auth(user_access_token)
            .send()
            .await?;
        let response = check_response(ExternalService::LineIdentity, response).await?;
        Ok(response.json::<Profile>().await?)
    }
}

async fn check_response(
    service: ExternalService,
    response: reqwest::Response,
) -> Result<reqwest::Response, MessagingError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ExternalApiError {
        service,
        response: ApiResponse { status, body },
    }
    .into())
}

fn trim_base(value: String) -> String {
    value.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn reply_message_sends_token_and_quote() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/bot/message/reply")
            .match_header("authorization", "Bearer channel-token")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "replyToken": "reply-1",
                "messages": [{"type": "text", "text": "hello", "quoteToken": "quote-1"}]
            })))
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        let client = LineClient::with_base_urls("channel-token", server.url(), server.url());
        client
            .reply_message(
                "reply-1",
                &[Message::quoted_text("hello", Some("quote-1".to_string()))],
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn reply_with_expired_token_returns_api_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v2/bot/message/reply")
            .with_status(400)
            .with_body(r#"{"message":"Invalid reply token"}"#)
            .create_async()
            .await;

        let client = LineClient::with_base_urls("channel-token", server.url(), server.url());
        let err = client
            .reply_message("expired", &[Message::text("hi")])
            .await
            .unwrap_err();
        match err {
            MessagingError::Api(api) => {
                assert_eq!(api.service, ExternalService::Line);
                assert_eq!(api.response.status, 400);
                assert_eq!(api.response.message(), "Invalid reply token");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn push_message_targets_group() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/bot/message/push")
            .match_body(Matcher::PartialJson(serde_json::json!({"to": "Gx"})))
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        let client = LineClient::with_base_urls("channel-token", server.url(), server.url());
        client.push_message("Gx", &[Message::text("welcome")]).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn profile_for_access_token_uses_caller_token() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v2/profile")
            .match_header("authorization", "Bearer user-token")
            .with_status(200)
            .with_body(r#"{"userId":"U1","displayName":"Amy"}"#)
            .create_async()
            .await;

        let client = LineClient::with_base_urls("channel-token", server.url(), server.url());
        let profile = client.get_profile_for_access_token("user-token").await.unwrap();
        assert_eq!(profile.user_id, "U1");
        assert_eq!(profile.display_name, "Amy");
    }

    #[tokio::test]
    async fn message_content_reads_bytes_and_type() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v2/bot/message/m-1/content")
            .with_status(200)
            .with_header("content-type", "image/jpeg")
            .with_body(vec![1u8, 2, 3])
            .create_async()
            .await;

        let client = LineClient::with_base_urls("channel-token", server.url(), server.url());
        let content = client.get_message_content("m-1").await.unwrap();
        assert_eq!(content.content_type, "image/jpeg");
        assert_eq!(content.bytes.as_ref(), &[1u8, 2, 3]);
    }
}
