//! Provider factory pattern for building adapters from resolved configuration.
//!
//! ## Usage
//!
//! ```ignore
//! let registry = ProviderRegistry::with_defaults();
//! let config = resolve_provider_config(&env, &overrides)?;
//! let provider = registry.build(&config);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use super::config::ProviderConfig;
use super::{BackendKind, LlmProvider, UnavailableProvider};

/// Factory for creating LLM providers from configuration.
///
/// Construction never fails: an adapter that lacks what it needs is built
/// anyway and reports itself unavailable.
pub trait ProviderFactory: Send + Sync {
    /// Backend this factory builds.
    fn backend(&self) -> BackendKind;

    /// Create a provider instance.
    fn create(&self, config: &ProviderConfig) -> Arc<dyn LlmProvider>;

    /// Human-readable description of this provider.
    fn description(&self) -> &'static str {
        "LLM Provider"
    }
}

/// Registry of available provider factories.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<BackendKind, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every adapter compiled into this build.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::AnthropicProviderFactory));

        #[cfg(feature = "openai")]
        {
            registry.register(Arc::new(super::OpenAiProviderFactory));
            registry.register(Arc::new(super::OpenAiCompatProviderFactory));
        }

        #[cfg(feature = "local")]
        registry.register(Arc::new(super::OllamaProviderFactory));

        registry.register(Arc::new(super::LlamaCppProviderFactory));
        registry
    }

    /// Register a provider factory.
    ///
    /// If a factory for the same backend already exists, it will be replaced.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.backend(), factory);
    }

    /// Build the adapter for `config`.
    ///
    /// A backend with no registered factory yields an unavailable adapter.
    pub fn build(&self, config: &ProviderConfig) -> Arc<dyn LlmProvider> {
        match self.factories.get(&config.backend) {
            Some(factory) => {
                let provider = factory.create(config);
                tracing::debug!(
                    provider = %provider.descriptor(),
                    available = provider.is_available(),
                    "Provider built"
                );
                provider
            }
            None => {
                let reason = match config.backend.feature() {
                    Some(feature) => format!(
                        "provider '{}' is not compiled in (enable the '{}' feature)",
                        config.backend, feature
                    ),
                    None => format!("provider '{}' is not registered", config.backend),
                };
                tracing::warn!(provider = %config.backend, "{}", reason);
                Arc::new(UnavailableProvider::new(config.descriptor(), reason))
            }
        }
    }

    /// List registered backends.
    pub fn available_backends(&self) -> Vec<BackendKind> {
        self.factories.keys().copied().collect()
    }

    /// Check if a backend is registered.
    pub fn has_backend(&self, backend: BackendKind) -> bool {
        self.factories.contains_key(&backend)
    }

    /// Get the factory for a backend.
    pub fn get_factory(&self, backend: BackendKind) -> Option<&Arc<dyn ProviderFactory>> {
        self.factories.get(&backend)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("backends", &self.available_backends())
            .finish()
    }
}
