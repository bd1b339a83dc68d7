//! Ollama native REST provider (`/api/chat`, non-streaming).

use super::{
    config::ProviderConfig, error_from_response, factory::ProviderFactory, http_client,
    map_send_error, BackendKind, ChatMessage, CompletionResponse, LlmProvider,
    ProviderDescriptor, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Local Ollama server provider. Available when a model name is configured.
#[derive(Debug)]
pub struct OllamaProvider {
    descriptor: ProviderDescriptor,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    client: Option<reqwest::Client>,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        if config.model.is_empty() {
            tracing::warn!("OllamaProvider: OLLAMA_MODEL not set; provider unavailable");
        }

        Self {
            descriptor: config.descriptor(),
            base_url: config
                .endpoint
                .as_deref()
                .unwrap_or(super::config::OLLAMA_DEFAULT_HOST)
                .trim_end_matches('/')
                .to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.timeout,
            client: http_client(config.timeout),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
    options: Options,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
    model: Option<String>,
    done_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<CompletionResponse, ProviderError> {
        let Some(client) = self.client.as_ref().filter(|_| self.is_available()) else {
            return Err(ProviderError::NotConfigured(
                "Ollama provider needs OLLAMA_MODEL".to_string(),
            ));
        };

        let mut api_messages = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            api_messages.push(Message {
                role: "system",
                content: system,
            });
        }
        api_messages.extend(messages.iter().map(|m| Message {
            role: &m.role,
            content: &m.content,
        }));

        let request = ChatRequest {
            model: &self.descriptor.model,
            messages: api_messages,
            stream: false,
            options: Options {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let response = client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
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

        Ok(CompletionResponse {
            content: body.message.content,
            usage: TokenUsage {
                prompt_tokens: body.prompt_eval_count.unwrap_or(0),
                completion_tokens: body.eval_count.unwrap_or(0),
            },
            model: body.model.unwrap_or_else(|| self.descriptor.model.clone()),
            stop_reason: body.done_reason,
        })
    }

    fn is_available(&self) -> bool {
        self.client.is_some() && !self.descriptor.model.is_empty()
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }
}

/// Factory for Ollama providers.
pub struct OllamaProviderFactory;

impl ProviderFactory for OllamaProviderFactory {
    fn backend(&self) -> BackendKind {
        BackendKind::Ollama
    }

    fn create(&self, config: &ProviderConfig) -> Arc<dyn LlmProvider> {
        Arc::new(OllamaProvider::new(config))
    }

    fn description(&self) -> &'static str {
        "Ollama native chat API"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(model: &str, endpoint: &str) -> ProviderConfig {
        let mut config = ProviderConfig::new(BackendKind::Ollama);
        config.model = model.into();
        config.endpoint = Some(endpoint.into());
        config
    }

    #[test]
    fn test_requires_model() {
        assert!(!OllamaProvider::new(&config("", "http://localhost:11434")).is_available());
        assert!(OllamaProvider::new(&config("llama3", "http://localhost:11434")).is_available());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let p = OllamaProvider::new(&config("llama3", "http://192.168.1.100:11434/"));
        assert_eq!(p.base_url, "http://192.168.1.100:11434");
    }

    #[tokio::test]
    async fn test_chat_against_mock() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"model": "llama3", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3",
                "message": {"role": "assistant", "content": "converted"},
                "prompt_eval_count": 33,
                "eval_count": 4,
                "done_reason": "stop"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(&config("llama3", &server.uri()));
        let response = provider
            .complete("sys", &[ChatMessage::user("x")])
            .await
            .unwrap();
        assert_eq!(response.content, "converted");
        assert_eq!(response.usage.total(), 37);
    }

    #[tokio::test]
    async fn test_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": "model 'llama3' not found"
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(&config("llama3", &server.uri()));
        let err = provider.complete("", &[ChatMessage::user("x")]).await.unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { status: 404, ref message } if message.contains("not found")));
    }
}
