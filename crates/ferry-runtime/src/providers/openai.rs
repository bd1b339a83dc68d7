//! OpenAI chat-completions providers.
//!
//! One adapter serves both `openai` (api.openai.com or a proxy) and
//! `openai_compat` (LM Studio, vLLM, Ollama `/v1`, gateways). With an
//! `api_version` set, `openai_compat` talks to Azure OpenAI instead: the
//! model names the deployment and the key goes in the `api-key` header.

use super::{
    config::ProviderConfig, error_from_response, factory::ProviderFactory, http_client,
    map_send_error, secrets::ApiCredential, BackendKind, ChatMessage, CompletionResponse,
    LlmProvider, ProviderDescriptor, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// OpenAI / OpenAI-compatible provider.
pub struct OpenAiProvider {
    descriptor: ProviderDescriptor,
    credential: Option<ApiCredential>,
    base_url: Option<String>,
    api_version: Option<String>,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    client: Option<reqwest::Client>,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("descriptor", &self.descriptor)
            .field("credential", &self.credential)
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        let credential = config.credential.clone().filter(|c| !c.is_empty());
        let base_url = config
            .endpoint
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
        let api_version = match config.backend {
            BackendKind::OpenAiCompat => config.api_version.clone(),
            _ => None,
        };

        if credential.is_none() {
            tracing::warn!(provider = %config.backend, "OpenAiProvider: API key not set; provider unavailable");
        }
        if base_url.is_none() {
            tracing::warn!(provider = %config.backend, "OpenAiProvider: LLM_BASE_URL not set; provider unavailable");
        }

        Self {
            descriptor: config.descriptor(),
            credential,
            base_url,
            api_version,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.timeout,
            client: http_client(config.timeout),
        }
    }

    pub fn is_azure(&self) -> bool {
        self.api_version.is_some()
    }

    fn url(&self, base_url: &str) -> String {
        match &self.api_version {
            Some(version) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                base_url, self.descriptor.model, version
            ),
            None => format!("{}/chat/completions", base_url),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<CompletionResponse, ProviderError> {
        let (Some(client), Some(credential), Some(base_url)) =
            (&self.client, &self.credential, &self.base_url)
        else {
            return Err(ProviderError::NotConfigured(format!(
                "{} provider needs an API key and base URL",
                self.descriptor.backend
            )));
        };

        let mut api_messages = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            api_messages.push(RequestMessage {
                role: "system",
                content: system,
            });
        }
        api_messages.extend(messages.iter().map(|m| RequestMessage {
            role: &m.role,
            content: &m.content,
        }));

        let request = ChatRequest {
            model: &self.descriptor.model,
            messages: api_messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let builder = client.post(self.url(base_url)).json(&request);
        let builder = if self.is_azure() {
            builder.header("api-key", credential.expose())
        } else {
            builder.bearer_auth(credential.expose())
        };

        let response = builder
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))?;
        let usage = body.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        });

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            usage,
            model: body.model.unwrap_or_else(|| self.descriptor.model.clone()),
            stop_reason: choice.finish_reason,
        })
    }

    fn is_available(&self) -> bool {
        self.client.is_some() && self.credential.is_some() && self.base_url.is_some()
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }
}

/// Factory for api.openai.com providers.
pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn backend(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    fn create(&self, config: &ProviderConfig) -> Arc<dyn LlmProvider> {
        Arc::new(OpenAiProvider::new(config))
    }

    fn description(&self) -> &'static str {
        "OpenAI chat completions"
    }
}

/// Factory for OpenAI-compatible endpoints, including Azure OpenAI.
pub struct OpenAiCompatProviderFactory;

impl ProviderFactory for OpenAiCompatProviderFactory {
    fn backend(&self) -> BackendKind {
        BackendKind::OpenAiCompat
    }

    fn create(&self, config: &ProviderConfig) -> Arc<dyn LlmProvider> {
        Arc::new(OpenAiProvider::new(config))
    }

    fn description(&self) -> &'static str {
        "OpenAI-compatible endpoint (LM Studio, vLLM, Azure OpenAI, ...)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::secrets::CredentialSource;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(backend: BackendKind, endpoint: Option<&str>) -> ProviderConfig {
        let mut config = ProviderConfig::new(backend);
        config.endpoint = endpoint.map(str::to_string);
        config.credential = Some(ApiCredential::new(
            "sk-test",
            CredentialSource::Programmatic,
            "OpenAI API key",
        ));
        config
    }

    fn ok_body() -> serde_json::Value {
        serde_json::json!({
            "model": "gpt-4o",
            "choices": [{"message": {"role": "assistant", "content": "fn main() {}"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 20, "completion_tokens": 5}
        })
    }

    #[test]
    fn test_compat_without_base_url_is_unavailable() {
        let provider = OpenAiProvider::new(&config(BackendKind::OpenAiCompat, None));
        assert!(!provider.is_available());
    }

    #[tokio::test]
    async fn test_openai_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(&config(BackendKind::OpenAi, Some(&server.uri())));
        let response = provider
            .complete("system", &[ChatMessage::user("convert")])
            .await
            .unwrap();
        assert_eq!(response.content, "fn main() {}");
        assert_eq!(response.usage.prompt_tokens, 20);
        assert_eq!(response.stop_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_azure_mode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt4-deploy/chat/completions"))
            .and(query_param("api-version", "2024-06-01"))
            .and(header("api-key", "sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(1)
            .mount(&server)
            .await;

        let mut cfg = config(BackendKind::OpenAiCompat, Some(&server.uri()));
        cfg.model = "gpt4-deploy".into();
        cfg.api_version = Some("2024-06-01".into());
        let provider = OpenAiProvider::new(&cfg);
        assert!(provider.is_azure());

        provider
            .complete("", &[ChatMessage::user("x")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(&config(BackendKind::OpenAi, Some(&server.uri())));
        let err = provider.complete("", &[ChatMessage::user("x")]).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthError));
    }

    #[tokio::test]
    async fn test_empty_choices_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(&config(BackendKind::OpenAi, Some(&server.uri())));
        let err = provider.complete("", &[ChatMessage::user("x")]).await.unwrap_err();
        assert!(matches!(err, ProviderError::ParseError(_)));
    }
}
