//! LLM Provider abstractions for ferry-runtime.
//!
//! This module defines the trait every generation backend implements and the
//! closed set of backends ferry knows how to build. Availability is decided
//! once, when an adapter is constructed, and never re-probed.
//!
//! ## Security
//!
//! All providers use the [`secrets`] module for credential handling.
//! See [`ApiCredential`] for the recommended patterns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub mod config;
mod factory;
mod llamacpp;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

#[cfg(feature = "openai")]
mod openai;

#[cfg(feature = "local")]
mod ollama;

pub use config::{
    resolve_fallback_config, resolve_provider_config, ConfigError, ProviderConfig,
    ProviderOverrides,
};
pub use factory::{ProviderFactory, ProviderRegistry};
pub use llamacpp::{LlamaCppProvider, LlamaCppProviderFactory};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};

#[cfg(feature = "openai")]
pub use openai::{OpenAiCompatProviderFactory, OpenAiProvider, OpenAiProviderFactory};

#[cfg(feature = "local")]
pub use ollama::{OllamaProvider, OllamaProviderFactory};

/// Errors from LLM providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Local model process failed: {0}")]
    ProcessError(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// The backends ferry can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Anthropic Messages API
    Anthropic,

    /// api.openai.com
    #[serde(rename = "openai")]
    OpenAi,

    /// Any OpenAI-compatible endpoint, including Azure OpenAI
    #[serde(rename = "openai_compat")]
    OpenAiCompat,

    /// Ollama native REST API
    Ollama,

    /// Local GGUF model run through the llama.cpp CLI
    #[serde(rename = "llamacpp")]
    LlamaCpp,
}

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        BackendKind::Anthropic,
        BackendKind::OpenAi,
        BackendKind::OpenAiCompat,
        BackendKind::Ollama,
        BackendKind::LlamaCpp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Anthropic => "anthropic",
            BackendKind::OpenAi => "openai",
            BackendKind::OpenAiCompat => "openai_compat",
            BackendKind::Ollama => "ollama",
            BackendKind::LlamaCpp => "llamacpp",
        }
    }

    /// Cargo feature that compiles this backend's adapter, if any.
    pub fn feature(&self) -> Option<&'static str> {
        match self {
            BackendKind::Anthropic => Some("anthropic"),
            BackendKind::OpenAi | BackendKind::OpenAiCompat => Some("openai"),
            BackendKind::Ollama => Some("local"),
            BackendKind::LlamaCpp => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "anthropic" => Ok(BackendKind::Anthropic),
            "openai" => Ok(BackendKind::OpenAi),
            "openai_compat" => Ok(BackendKind::OpenAiCompat),
            "ollama" => Ok(BackendKind::Ollama),
            "llamacpp" | "llama_cpp" => Ok(BackendKind::LlamaCpp),
            _ => Err(format!(
                "Unknown provider '{}'. Valid options: {}",
                s,
                BackendKind::ALL
                    .iter()
                    .map(BackendKind::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

/// Identity of a configured backend: which API, which model, where.
///
/// Two adapters with equal descriptors would make the same call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProviderDescriptor {
    pub backend: BackendKind,
    pub model: String,
    pub endpoint: Option<String>,
}

impl fmt::Display for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.endpoint {
            Some(endpoint) => write!(f, "{}/{} @ {}", self.backend, self.model, endpoint),
            None => write!(f, "{}/{}", self.backend, self.model),
        }
    }
}

/// A chat message for LLM completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Role: "user" or "assistant"
    pub role: String,

    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Response from an LLM completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,

    /// Token usage
    pub usage: TokenUsage,

    /// Model used
    pub model: String,

    /// Stop reason
    pub stop_reason: Option<String>,
}

/// Token usage from a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Provider abstraction allows swapping LLM backends.
///
/// The router is the only caller; the engine never talks to an adapter directly.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a chat completion with a separate system prompt.
    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<CompletionResponse, ProviderError>;

    /// Whether the adapter was fully configured at construction.
    fn is_available(&self) -> bool;

    /// Backend, model and endpoint this adapter calls.
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Get provider name for logs.
    fn name(&self) -> &str {
        self.descriptor().backend.as_str()
    }

    /// Estimate tokens for a prompt.
    fn estimate_tokens(&self, text: &str) -> u32 {
        // Simple estimate: ~4 chars per token
        (text.len() / 4) as u32
    }
}

/// Stand-in for a backend that cannot be used in this build or configuration.
#[derive(Debug, Clone)]
pub struct UnavailableProvider {
    descriptor: ProviderDescriptor,
    reason: String,
}

impl UnavailableProvider {
    pub fn new(descriptor: ProviderDescriptor, reason: impl Into<String>) -> Self {
        Self {
            descriptor,
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[async_trait]
impl LlmProvider for UnavailableProvider {
    async fn complete(
        &self,
        _system: &str,
        _messages: &[ChatMessage],
    ) -> Result<CompletionResponse, ProviderError> {
        Err(ProviderError::NotConfigured(self.reason.clone()))
    }

    fn is_available(&self) -> bool {
        false
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }
}

/// Build the shared HTTP client for an adapter. `None` leaves the adapter unavailable.
#[cfg(any(feature = "anthropic", feature = "openai", feature = "local"))]
pub(crate) fn http_client(timeout: Duration) -> Option<reqwest::Client> {
    match reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
    {
        Ok(client) => Some(client),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to build HTTP client; provider disabled");
            None
        }
    }
}

#[cfg(any(feature = "anthropic", feature = "openai", feature = "local"))]
pub(crate) fn map_send_error(e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::HttpError(e.to_string())
    }
}

/// Turn a non-success response into a provider error.
#[cfg(any(feature = "anthropic", feature = "openai", feature = "local"))]
pub(crate) async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        return ProviderError::RateLimited { retry_after };
    }

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return ProviderError::AuthError;
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str().map(str::to_string))
        })
        .unwrap_or(body);

    ProviderError::ApiError {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_creation() {
        let user = ChatMessage::user("Hello!");
        assert_eq!(user.role, "user");

        let assistant = ChatMessage::assistant("Hi there!");
        assert_eq!(assistant.role, "assistant");
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
        };
        assert_eq!(usage.total(), 150);

        let huge = TokenUsage {
            prompt_tokens: u32::MAX,
            completion_tokens: 1,
        };
        assert_eq!(huge.total(), u32::MAX);
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("openai-compat".parse::<BackendKind>().unwrap(), BackendKind::OpenAiCompat);
        assert_eq!(" Ollama ".parse::<BackendKind>().unwrap(), BackendKind::Ollama);
        assert_eq!("llama-cpp".parse::<BackendKind>().unwrap(), BackendKind::LlamaCpp);

        let err = "gemini".parse::<BackendKind>().unwrap_err();
        assert!(err.contains("anthropic, openai, openai_compat, ollama, llamacpp"));
    }

    #[test]
    fn test_backend_kind_serde_names() {
        for kind in BackendKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[tokio::test]
    async fn test_unavailable_provider() {
        let provider = UnavailableProvider::new(
            ProviderDescriptor {
                backend: BackendKind::Anthropic,
                model: "claude".into(),
                endpoint: None,
            },
            "not compiled in",
        );
        assert!(!provider.is_available());
        assert_eq!(provider.name(), "anthropic");
        assert!(matches!(
            provider.complete("sys", &[ChatMessage::user("x")]).await,
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
