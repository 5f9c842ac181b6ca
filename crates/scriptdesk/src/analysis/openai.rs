//! Backend for OpenAI-compatible `/chat/completions` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tracing::Instrument;

use super::backend::{LlmBackend, LlmError};
use crate::config::LlmSettings;
use crate::sanitize;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Error bodies are cut to this length before they reach logs or errors.
const MAX_ERROR_BODY_LENGTH: usize = 200;

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}

pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    api_key: SecretString,
}

impl OpenAiBackend {
    pub fn new(
        base_url: &str,
        model: &str,
        max_tokens: u32,
        timeout: Duration,
        api_key: SecretString,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Connection(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_tokens,
            api_key,
        })
    }

    pub fn from_settings(settings: &LlmSettings, api_key: SecretString) -> Result<Self, LlmError> {
        Self::new(
            &settings.base_url,
            &settings.model,
            settings.max_tokens,
            Duration::from_secs(settings.timeout_secs),
            api_key,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_completion(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "max_tokens": self.max_tokens,
        });

        log::debug!("Sending completion request ({} bytes of user content)", user.len());

        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited { retry_after_secs });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LlmError::Auth(format!("Endpoint rejected credentials ({})", status)));
        }

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: truncate_body(&text),
            });
        }

        let json: serde_json::Value = resp.json().await?;
        json["choices"]
            .as_array()
            .and_then(|choices| choices.first())
            .and_then(|choice| choice["message"]["content"].as_str())
            .map(str::to_string)
            .ok_or_else(|| LlmError::InvalidReply("Missing choices[0].message.content".into()))
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let span = tracing::debug_span!(
            "llm_request",
            endpoint = %sanitize::redact_url(&self.base_url),
            model = %self.model,
        );
        self.send_completion(system, user).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::retry::{Classify, ErrorKind};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> OpenAiBackend {
        OpenAiBackend::new(
            &format!("{}/v1/", server.uri()),
            "gpt-4o-mini",
            512,
            Duration::from_secs(5),
            SecretString::from("sk-test"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_complete_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": "{\"ok\":true}" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = backend(&server).complete("sys", "user").await.unwrap();
        assert_eq!(reply, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = backend(&server).complete("sys", "user").await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited { retry_after_secs: 7 }));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = backend(&server).complete("sys", "user").await.unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 502, .. }));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_unauthorized_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = backend(&server).complete("sys", "user").await.unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[tokio::test]
    async fn test_missing_content_is_invalid_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": []
            })))
            .mount(&server)
            .await;

        let err = backend(&server).complete("sys", "user").await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidReply(_)));
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let long = "é".repeat(300);
        let truncated = truncate_body(&long);
        assert!(truncated.ends_with("... (truncated)"));
        assert_eq!(truncate_body("short"), "short");
    }
}
