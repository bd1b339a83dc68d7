//! Anthropic Claude provider implementation.
//!
//! ## Security
//!
//! This provider uses the centralized [`ApiCredential`] system for credential
//! handling. See the [`secrets`](super::secrets) module for details.

use super::{
    config::ProviderConfig, error_from_response, factory::ProviderFactory, http_client,
    map_send_error, secrets::ApiCredential, ChatMessage, CompletionResponse, LlmProvider,
    ProviderDescriptor, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude provider.
///
/// Available when an API key was configured and the HTTP client could be built.
pub struct AnthropicProvider {
    descriptor: ProviderDescriptor,
    credential: Option<ApiCredential>,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    client: Option<reqwest::Client>,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("model", &self.descriptor.model)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        let credential = config.credential.clone().filter(|c| !c.is_empty());
        if credential.is_none() {
            tracing::warn!("AnthropicProvider: ANTHROPIC_API_KEY not set; provider unavailable");
        }

        Self {
            descriptor: config.descriptor(),
            credential,
            base_url: config
                .endpoint
                .as_deref()
                .unwrap_or(super::config::ANTHROPIC_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.timeout,
            client: http_client(config.timeout),
        }
    }
}

/// Anthropic API request format.
#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<AnthropicMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Anthropic API response format.
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlockResponse>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlockResponse {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<CompletionResponse, ProviderError> {
        let (Some(client), Some(credential)) = (&self.client, &self.credential) else {
            return Err(ProviderError::NotConfigured(
                "Anthropic provider needs ANTHROPIC_API_KEY".to_string(),
            ));
        };

        let request = AnthropicRequest {
            model: &self.descriptor.model,
            max_tokens: self.max_tokens,
            system: (!system.is_empty()).then_some(system),
            messages: messages
                .iter()
                .map(|m| AnthropicMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
            temperature: self.temperature,
        };

        // Expose the credential only at the point of use
        let response = client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", credential.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let content = body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: body.usage.input_tokens,
                completion_tokens: body.usage.output_tokens,
            },
            model: body.model,
            stop_reason: body.stop_reason,
        })
    }

    fn is_available(&self) -> bool {
        self.client.is_some() && self.credential.is_some()
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }
}

/// Factory for Anthropic providers.
pub struct AnthropicProviderFactory;

impl ProviderFactory for AnthropicProviderFactory {
    fn backend(&self) -> super::BackendKind {
        super::BackendKind::Anthropic
    }

    fn create(&self, config: &ProviderConfig) -> Arc<dyn LlmProvider> {
        Arc::new(AnthropicProvider::new(config))
    }

    fn description(&self) -> &'static str {
        "Anthropic Claude Messages API"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{secrets::CredentialSource, BackendKind};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(key: Option<&str>, endpoint: &str) -> ProviderConfig {
        let mut config = ProviderConfig::new(BackendKind::Anthropic);
        config.credential =
            key.map(|k| ApiCredential::new(k, CredentialSource::Programmatic, "Anthropic API key"));
        config.endpoint = Some(endpoint.to_string());
        config
    }

    #[test]
    fn test_availability_requires_key() {
        assert!(AnthropicProvider::new(&config(Some("k"), "http://x")).is_available());
        assert!(!AnthropicProvider::new(&config(None, "http://x")).is_available());
        assert!(!AnthropicProvider::new(&config(Some(""), "http://x")).is_available());
    }

    #[test]
    fn test_api_key_not_in_debug_output() {
        let secret_key = "sk-ant-REDACTED";
        let provider = AnthropicProvider::new(&config(Some(secret_key), "http://x"));

        let debug_output = format!("{:?}", provider);
        assert!(
            !debug_output.contains(secret_key),
            "API key was exposed in Debug output!"
        );
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_complete_against_mock() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "export const a = 1;"}],
                "model": "claude-opus-4-5",
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 12, "output_tokens": 7}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new(&config(Some("test-key"), &server.uri()));
        let response = provider
            .complete("system", &[ChatMessage::user("convert")])
            .await
            .unwrap();

        assert_eq!(response.content, "export const a = 1;");
        assert_eq!(response.usage.total(), 19);
        assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "type": "error",
                "error": {"type": "api_error", "message": "overloaded"}
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new(&config(Some("k"), &server.uri()));
        let err = provider
            .complete("", &[ChatMessage::user("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { status: 500, ref message } if message == "overloaded"));
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new(&config(Some("k"), &server.uri()));
        let err = provider.complete("", &[ChatMessage::user("x")]).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(30)
        ));
    }
}
