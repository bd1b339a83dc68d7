//! Subcommand implementations.

pub mod providers;
pub mod run;
pub mod status;

use clap::Args;
use ferry_runtime::providers::config::parse_timeout;
use ferry_runtime::{BackendKind, ProviderOverrides};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// How a command ended, mapped onto the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Rejected,
    Pending,
}

impl Outcome {
    pub fn code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::Failure => 1,
            Outcome::Rejected => 2,
            Outcome::Pending => 3,
        }
    }
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        ExitCode::from(outcome.code())
    }
}

/// Provider selection flags. Each one wins over its environment variable.
#[derive(Args, Debug, Clone, Default)]
pub struct ProviderArgs {
    /// Backend: anthropic, openai, openai_compat, ollama, llamacpp
    #[arg(long)]
    pub provider: Option<BackendKind>,

    /// Model id (overrides LLM_MODEL)
    #[arg(long)]
    pub model: Option<String>,

    /// API base URL or local server host
    #[arg(long)]
    pub base_url: Option<String>,

    /// GGUF model file for llamacpp
    #[arg(long)]
    pub model_path: Option<PathBuf>,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    #[arg(long)]
    pub temperature: Option<f32>,

    /// Per-call timeout, e.g. 90s or 2m
    #[arg(long, value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    /// Backend tried when the primary fails (overrides LLM_FALLBACK_PROVIDER)
    #[arg(long)]
    pub fallback_provider: Option<BackendKind>,

    /// Adapters tried after a failed call; 0 disables failover
    #[arg(long, env = "FERRY_MAX_FAILOVER_HOPS")]
    pub max_failover_hops: Option<usize>,
}

impl ProviderArgs {
    pub fn overrides(&self) -> ProviderOverrides {
        ProviderOverrides {
            provider: self.provider,
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            model_path: self.model_path.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: self.timeout,
            fallback_provider: self.fallback_provider,
        }
    }
}
