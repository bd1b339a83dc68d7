//! # ferry-runtime
//!
//! Generation backends and the conversion engine for ferry.
//!
//! `ferry-core` decides what may happen; this crate does the work that
//! touches the outside world: calling a model, falling over to another one,
//! and writing converted files under the output root.
//!
//! ## Pieces
//!
//! - [`providers`]: one adapter per backend behind the [`LlmProvider`] trait,
//!   built from an environment snapshot by [`resolve_provider_config`]
//! - [`ProviderRouter`]: primary plus fallback, single failover hop by default
//! - [`ConversionEngine`]: the resumable per-step executor
//!
//! ## Example
//!
//! ```rust,ignore
//! use ferry_core::EnvSnapshot;
//! use ferry_runtime::{
//!     resolve_provider_config, ConversionEngine, ProviderOverrides, ProviderRegistry,
//!     ProviderRouter,
//! };
//!
//! let env = EnvSnapshot::capture();
//! let config = resolve_provider_config(&env, &ProviderOverrides::default())?;
//! let router = ProviderRouter::from_configs(&ProviderRegistry::with_defaults(), &config, None);
//!
//! let engine = ConversionEngine::builder().guardrails(rules).context(context).build();
//! let summary = engine.execute(&approved, &mut checkpoint, Some(&router), &mut journal).await?;
//! println!("{summary}");
//! ```

pub mod engine;
pub mod prompts;
pub mod providers;
pub mod router;

#[cfg(test)]
mod test_support;

pub use engine::{ConversionEngine, ConversionEngineBuilder, EngineError};
pub use providers::{
    resolve_fallback_config, resolve_provider_config, ApiCredential, BackendKind, ChatMessage,
    CompletionResponse, ConfigError, LlmProvider, ProviderConfig, ProviderDescriptor,
    ProviderError, ProviderFactory, ProviderOverrides, ProviderRegistry, TokenUsage,
    UnavailableProvider,
};
pub use router::{CompletionResult, FailoverPolicy, ProviderRouter, RouterError, RouterStats};
