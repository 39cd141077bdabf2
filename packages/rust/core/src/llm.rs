//! Minimal OpenAI-compatible chat client for draft generation.
//!
//! The model is asked for a single JSON object; anything else is an
//! upstream error, and the caller falls back to the template draft.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use trustline_shared::{LlmConfig, Result, TrustlineError, validate_api_key};

const USER_AGENT: &str = concat!("Trustline/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Chat-completions client bound to one model.
#[derive(Debug, Clone)]
pub struct LlmClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TrustlineError::Upstream(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key: api_key.to_string(),
            timeout,
        })
    }

    /// Build a client from `[llm]`. Returns `None` when drafting by model is
    /// disabled; a missing API key is a `Config` error.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let api_key = validate_api_key(config)?;
        Self::new(
            &config.base_url,
            &config.model,
            &api_key,
            Duration::from_secs(config.timeout_secs),
        )
        .map(Some)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one system + user exchange and parse the reply as a JSON object.
    #[instrument(skip_all, fields(model = %self.model))]
    pub async fn complete_json(&self, system: &str, user: &str) -> Result<Value> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            temperature: 0.2,
        };

        let call = async {
            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
                .map_err(|e| TrustlineError::Upstream(format!("llm request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TrustlineError::Upstream(format!("llm returned HTTP {status}")));
            }
            response
                .json::<ChatResponse>()
                .await
                .map_err(|e| TrustlineError::Upstream(format!("llm response unreadable: {e}")))
        };

        let reply = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                TrustlineError::Upstream(format!("llm timed out after {:?}", self.timeout))
            })??;

        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TrustlineError::Upstream("llm returned no content".into()))?;
        debug!(bytes = content.len(), "llm reply received");

        let value: Value = serde_json::from_str(content.trim())
            .map_err(|e| TrustlineError::Upstream(format!("llm reply is not JSON: {e}")))?;
        if !value.is_object() {
            return Err(TrustlineError::Upstream("llm reply is not a JSON object".into()));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn reply(content: &str) -> Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
    }

    #[tokio::test]
    async fn parses_json_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply(r#"{"answer":"30 days"}"#)))
            .expect(1)
            .mount(&server)
            .await;

        let client = LlmClient::new(&server.uri(), "m", "test-key", Duration::from_secs(2)).unwrap();
        let value = client.complete_json("sys", "user").await.unwrap();
        assert_eq!(value["answer"], "30 days");
    }

    #[tokio::test]
    async fn http_error_is_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = LlmClient::new(&server.uri(), "m", "k", Duration::from_secs(2)).unwrap();
        let err = client.complete_json("sys", "user").await.unwrap_err();
        assert_eq!(err.code(), "upstream_error");
    }

    #[tokio::test]
    async fn slow_reply_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(reply("{}"))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = LlmClient::new(&server.uri(), "m", "k", Duration::from_millis(100)).unwrap();
        let err = client.complete_json("sys", "user").await.unwrap_err();
        assert_eq!(err.code(), "upstream_error");
    }

    #[tokio::test]
    async fn non_json_reply_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("sure, here you go")))
            .mount(&server)
            .await;

        let client = LlmClient::new(&server.uri(), "m", "k", Duration::from_secs(2)).unwrap();
        assert!(client.complete_json("sys", "user").await.is_err());
    }

    #[test]
    fn disabled_config_builds_no_client() {
        assert!(LlmClient::from_config(&LlmConfig::default()).unwrap().is_none());
    }
}
