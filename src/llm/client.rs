//! LLM client trait and the Anthropic implementation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{ChatRole, CompletionRequest, CompletionResponse, StopReason, TokenUsage};
use crate::config::LlmConfig;
use crate::error::{Error, Result};

const PROVIDER: &str = "anthropic";

/// LLM client trait.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Complete a prompt.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Provider name, for logs and errors.
    fn provider(&self) -> &str;
}

fn build_http_client(timeout: Duration) -> Result<Client> {
    // Proxy auto-detection can panic in some sandboxes; retry without it.
    match catch_unwind(AssertUnwindSafe(|| Client::builder().timeout(timeout).build())) {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::llm_api(PROVIDER, format!("HTTP client: {}", e))),
    }
}

/// Anthropic Messages API client.
pub struct AnthropicClient {
    config: LlmConfig,
    http: Client,
}

impl AnthropicClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = build_http_client(Self::REQUEST_TIMEOUT)?;
        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }

    fn build_request(&self, request: CompletionRequest) -> AnthropicRequest {
        AnthropicRequest {
            model: request.model.unwrap_or_else(|| self.config.model.clone()),
            messages: request
                .messages
                .into_iter()
                .map(|m| AnthropicMessage {
                    role: match m.role {
                        ChatRole::User => "user".to_string(),
                        ChatRole::Assistant => "assistant".to_string(),
                    },
                    content: m.content,
                })
                .collect(),
            max_tokens: request.max_tokens.unwrap_or(1024),
            system: request.system,
            temperature: request.temperature,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<AnthropicContent>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

fn parse_response(body: &str) -> Result<CompletionResponse> {
    let api_response: AnthropicResponse = serde_json::from_str(body)
        .map_err(|e| Error::llm_api(PROVIDER, format!("Failed to parse response: {}", e)))?;

    let content = api_response
        .content
        .iter()
        .filter_map(|c| c.text.as_deref())
        .collect::<Vec<_>>()
        .join("");

    let stop_reason = api_response.stop_reason.as_deref().map(|r| match r {
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    });

    Ok(CompletionResponse {
        id: api_response.id,
        model: api_response.model,
        content,
        stop_reason,
        usage: TokenUsage {
            input_tokens: api_response.usage.input_tokens,
            output_tokens: api_response.usage.output_tokens,
        },
        timestamp: Utc::now(),
    })
}

#[async_trait]
impl LLMClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let api_request = self.build_request(request);
        let url = format!("{}/v1/messages", self.base_url());
        debug!(model = %api_request.model, "Sending completion request");

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::llm_api(PROVIDER, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::llm_api(PROVIDER, format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<AnthropicError>(&body) {
                return Err(Error::llm_api(
                    PROVIDER,
                    format!("{}: {}", error.error.error_type, error.error.message),
                ));
            }
            return Err(Error::llm_api(PROVIDER, format!("{}: {}", status, body)));
        }

        parse_response(&body)
    }

    fn provider(&self) -> &str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;

    #[test]
    fn test_request_uses_configured_model() {
        let client = AnthropicClient::new(LlmConfig::new("test-key")).unwrap();
        let request = client.build_request(
            CompletionRequest::new()
                .with_system("You decide agent activation")
                .with_message(ChatMessage::user("destination: Germany")),
        );

        assert_eq!(request.model, "claude-3-5-haiku-20241022");
        assert_eq!(request.max_tokens, 1024);
        assert_eq!(request.messages[0].role, "user");

        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("temperature").is_none());
        assert_eq!(json["system"], "You decide agent activation");
    }

    #[test]
    fn test_base_url_override() {
        let mut config = LlmConfig::new("k");
        assert_eq!(
            AnthropicClient::new(config.clone()).unwrap().base_url(),
            "https://api.anthropic.com"
        );
        config.base_url = Some("http://localhost:8080".into());
        assert_eq!(
            AnthropicClient::new(config).unwrap().base_url(),
            "http://localhost:8080"
        );
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "id": "msg_1",
            "model": "claude-3-5-haiku-20241022",
            "content": [{"type": "text", "text": "{\"activate\": "}, {"type": "text", "text": "true}"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 4}
        }"#;
        let response = parse_response(body).unwrap();
        assert_eq!(response.content, "{\"activate\": true}");
        assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(response.usage.total(), 16);

        assert!(matches!(parse_response("{}"), Err(Error::LlmApi { .. })));
    }
}
