//! Provider router with single-hop failover.
//!
//! The router owns an ordered chain: the primary adapter, then any fallbacks.
//! Only adapters that reported themselves available at construction join the
//! chain, and a fallback identical to the primary is dropped. A failed call is
//! retried on the next adapter in the chain at most `max_failover_hops` times;
//! when every attempt fails the caller sees the first (primary's) error.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::providers::{
    ChatMessage, LlmProvider, ProviderConfig, ProviderDescriptor, ProviderError, ProviderRegistry,
    TokenUsage,
};

/// Errors surfaced to the engine.
#[derive(Error, Debug)]
pub enum RouterError {
    /// No adapter in the chain is available
    #[error("No LLM provider is available")]
    NotConfigured,

    /// Every attempted adapter failed; carries the first failure
    #[error("LLM call via {provider} failed: {source}")]
    CallFailed {
        provider: ProviderDescriptor,
        #[source]
        source: ProviderError,
    },
}

/// How far a failed call may travel down the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverPolicy {
    /// Extra adapters tried after the first failure (0 disables failover)
    pub max_failover_hops: usize,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            max_failover_hops: 1,
        }
    }
}

impl FailoverPolicy {
    /// Never retry on another adapter.
    pub fn no_retry() -> Self {
        Self {
            max_failover_hops: 0,
        }
    }
}

/// A successful completion and where it came from.
#[derive(Debug, Clone)]
pub struct CompletionResult {
    /// Generated text
    pub text: String,

    /// Adapter that produced the text
    pub backend: ProviderDescriptor,

    /// Model reported by the backend
    pub model: String,

    /// Token usage
    pub usage: TokenUsage,

    /// Size of `text` in bytes
    pub output_bytes: usize,

    /// Whether an adapter other than the primary served the call
    pub served_by_fallback: bool,
}

/// Cumulative usage across a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    /// Adapter calls attempted
    pub calls: u64,

    /// Successful calls served by a fallback
    pub fallback_calls: u64,

    /// Adapter calls that returned an error
    pub failures: u64,

    /// Prompt/input tokens
    pub prompt_tokens: u64,

    /// Completion/output tokens
    pub completion_tokens: u64,
}

impl RouterStats {
    /// Total tokens used.
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Routes completions to the primary adapter with fallback.
pub struct ProviderRouter {
    primary: Arc<dyn LlmProvider>,
    fallbacks: Vec<Arc<dyn LlmProvider>>,
    policy: FailoverPolicy,
    stats: RwLock<RouterStats>,
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("primary", self.primary.descriptor())
            .field(
                "fallbacks",
                &self.fallbacks.iter().map(|p| p.descriptor()).collect::<Vec<_>>(),
            )
            .field("policy", &self.policy)
            .finish()
    }
}

impl ProviderRouter {
    /// Router over a single primary adapter.
    pub fn new(primary: Arc<dyn LlmProvider>) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            policy: FailoverPolicy::default(),
            stats: RwLock::new(RouterStats::default()),
        }
    }

    /// Build adapters for the resolved configs through `registry`.
    pub fn from_configs(
        registry: &ProviderRegistry,
        primary: &ProviderConfig,
        fallback: Option<&ProviderConfig>,
    ) -> Self {
        let router = Self::new(registry.build(primary));
        match fallback {
            Some(config) => router.with_fallback(registry.build(config)),
            None => router,
        }
    }

    /// Append a fallback adapter.
    pub fn with_fallback(mut self, fallback: Arc<dyn LlmProvider>) -> Self {
        self.fallbacks.push(fallback);
        self
    }

    /// Set the failover policy.
    pub fn with_policy(mut self, policy: FailoverPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn primary(&self) -> &ProviderDescriptor {
        self.primary.descriptor()
    }

    pub fn policy(&self) -> FailoverPolicy {
        self.policy
    }

    /// True if the primary or any fallback is available.
    pub fn is_available(&self) -> bool {
        !self.chain().is_empty()
    }

    /// Snapshot of cumulative usage.
    pub fn stats(&self) -> RouterStats {
        self.stats.read().clone()
    }

    /// Available adapters in call order, each flagged when it is not the primary.
    fn chain(&self) -> Vec<(&Arc<dyn LlmProvider>, bool)> {
        let mut chain: Vec<(&Arc<dyn LlmProvider>, bool)> = Vec::new();
        if self.primary.is_available() {
            chain.push((&self.primary, false));
        }

        let primary = self.primary.descriptor();
        for fallback in &self.fallbacks {
            let descriptor = fallback.descriptor();
            if !fallback.is_available() || descriptor == primary {
                continue;
            }
            if chain.iter().any(|(p, _)| p.descriptor() == descriptor) {
                continue;
            }
            chain.push((fallback, true));
        }
        chain
    }

    /// Complete via the chain.
    pub async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<CompletionResult, RouterError> {
        let chain = self.chain();
        if chain.is_empty() {
            return Err(RouterError::NotConfigured);
        }

        if !self.primary.is_available() {
            tracing::warn!(
                primary = %self.primary.descriptor(),
                fallback = %chain[0].0.descriptor(),
                "Primary provider unavailable; using fallback"
            );
        }

        let mut first_failure: Option<(ProviderDescriptor, ProviderError)> = None;

        for (provider, is_fallback) in chain.into_iter().take(1 + self.policy.max_failover_hops) {
            self.stats.write().calls += 1;

            match provider.complete(system, messages).await {
                Ok(response) => {
                    {
                        let mut stats = self.stats.write();
                        stats.prompt_tokens += u64::from(response.usage.prompt_tokens);
                        stats.completion_tokens += u64::from(response.usage.completion_tokens);
                        if is_fallback {
                            stats.fallback_calls += 1;
                        }
                    }

                    if is_fallback && first_failure.is_some() {
                        tracing::warn!(provider = %provider.descriptor(), "Served by fallback after primary failure");
                    }

                    return Ok(CompletionResult {
                        output_bytes: response.content.len(),
                        text: response.content,
                        backend: provider.descriptor().clone(),
                        model: response.model,
                        usage: response.usage,
                        served_by_fallback: is_fallback,
                    });
                }
                Err(e) => {
                    self.stats.write().failures += 1;
                    tracing::warn!(provider = %provider.descriptor(), error = %e, "Provider call failed");
                    if first_failure.is_none() {
                        first_failure = Some((provider.descriptor().clone(), e));
                    }
                }
            }
        }

        match first_failure {
            Some((provider, source)) => Err(RouterError::CallFailed { provider, source }),
            None => Err(RouterError::NotConfigured),
        }
    }
}
