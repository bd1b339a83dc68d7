//! Provider configuration resolved from an environment snapshot.
//!
//! Selection order for the primary backend:
//! 1. explicit override (`--provider`) or `LLM_PROVIDER`
//! 2. `LLAMACPP_MODEL_PATH` => local llama.cpp
//! 3. `OLLAMA_MODEL` => local Ollama
//! 4. `LLM_BASE_URL` without `OPENAI_API_KEY` => OpenAI-compatible endpoint
//! 5. `OPENAI_API_KEY` => OpenAI
//! 6. Anthropic, using `ANTHROPIC_API_KEY` if set
//!
//! Then the universal overrides (`LLM_MODEL`, `LLM_MAX_TOKENS`,
//! `LLM_TEMPERATURE`, `LLM_API_VERSION`, `LLM_TIMEOUT`) and finally any
//! explicit CLI overrides are applied.

use super::secrets::{ApiCredential, CredentialSource};
use super::{BackendKind, ProviderDescriptor};
use ferry_core::EnvSnapshot;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_TOKENS: u32 = 8192;
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_N_CTX: u32 = 4096;
pub const DEFAULT_N_GPU_LAYERS: i32 = -1;

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OLLAMA_DEFAULT_HOST: &str = "http://localhost:11434";
pub const LLAMACPP_DEFAULT_BIN: &str = "llama-cli";

/// Errors resolving provider configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    UnknownProvider(String),
}

/// Explicit overrides from the command line. These win over the environment.
#[derive(Debug, Clone, Default)]
pub struct ProviderOverrides {
    pub provider: Option<BackendKind>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub model_path: Option<PathBuf>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout: Option<Duration>,
    pub fallback_provider: Option<BackendKind>,
}

/// Everything needed to construct one adapter. Immutable once built.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Which backend to build
    pub backend: BackendKind,

    /// Model id, or the GGUF file name for llama.cpp
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// API base URL or local server host
    pub endpoint: Option<String>,

    /// API key, when the backend takes one
    pub credential: Option<ApiCredential>,

    /// Azure OpenAI api-version; switches openai_compat into Azure mode
    pub api_version: Option<String>,

    /// Path to the GGUF model (llama.cpp)
    pub model_path: Option<PathBuf>,

    /// llama.cpp executable
    pub llamacpp_bin: String,

    /// Context window (llama.cpp)
    pub n_ctx: u32,

    /// GPU layers to offload, -1 for all (llama.cpp)
    pub n_gpu_layers: i32,

    /// Per-call timeout
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Defaults for `backend` with nothing configured.
    pub fn new(backend: BackendKind) -> Self {
        let (model, endpoint) = match backend {
            BackendKind::Anthropic => ("claude-opus-4-5", Some(ANTHROPIC_BASE_URL)),
            BackendKind::OpenAi => ("gpt-4o", Some(OPENAI_BASE_URL)),
            BackendKind::OpenAiCompat => ("local-model", None),
            BackendKind::Ollama => ("", Some(OLLAMA_DEFAULT_HOST)),
            BackendKind::LlamaCpp => ("", None),
        };

        Self {
            backend,
            model: model.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            endpoint: endpoint.map(str::to_string),
            credential: None,
            api_version: None,
            model_path: None,
            llamacpp_bin: LLAMACPP_DEFAULT_BIN.to_string(),
            n_ctx: DEFAULT_N_CTX,
            n_gpu_layers: DEFAULT_N_GPU_LAYERS,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Identity used to tell adapters apart.
    pub fn descriptor(&self) -> ProviderDescriptor {
        let endpoint = match self.backend {
            BackendKind::LlamaCpp => self.model_path.as_ref().map(|p| p.display().to_string()),
            _ => self.endpoint.clone(),
        };
        ProviderDescriptor {
            backend: self.backend,
            model: self.model.clone(),
            endpoint,
        }
    }

    /// Fill backend-specific fields from the environment.
    fn with_backend_env(mut self, env: &EnvSnapshot) -> Self {
        match self.backend {
            BackendKind::Anthropic => {
                self.credential = ApiCredential::from_env(env, "ANTHROPIC_API_KEY", "Anthropic API key");
            }
            BackendKind::OpenAi => {
                self.credential = ApiCredential::from_env(env, "OPENAI_API_KEY", "OpenAI API key");
                if let Some(url) = env.get("LLM_BASE_URL") {
                    self.endpoint = Some(url.to_string());
                }
            }
            BackendKind::OpenAiCompat => {
                self.endpoint = env.get("LLM_BASE_URL").map(str::to_string);
                // Many local servers accept any key.
                self.credential = ApiCredential::from_env(env, "LLM_API_KEY", "LLM API key")
                    .or_else(|| {
                        Some(ApiCredential::new(
                            "not-needed",
                            CredentialSource::Placeholder,
                            "LLM API key",
                        ))
                    });
            }
            BackendKind::Ollama => {
                if let Some(model) = env.get("OLLAMA_MODEL") {
                    self.model = model.to_string();
                }
                if let Some(host) = env.get("OLLAMA_HOST") {
                    self.endpoint = Some(host.to_string());
                }
            }
            BackendKind::LlamaCpp => {
                if let Some(path) = env.get("LLAMACPP_MODEL_PATH") {
                    self.set_model_path(PathBuf::from(path));
                }
                if let Some(bin) = env.get("LLAMACPP_BIN") {
                    self.llamacpp_bin = bin.to_string();
                }
            }
        }
        self
    }

    fn set_model_path(&mut self, path: PathBuf) {
        self.model = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.model_path = Some(path);
    }

    /// Apply generation parameters shared by every backend.
    fn with_generation_env(mut self, env: &EnvSnapshot) -> Result<Self, ConfigError> {
        if let Some(v) = parse_env::<u32>(env, "LLM_MAX_TOKENS")? {
            self.max_tokens = v;
        }
        if let Some(v) = parse_env::<f32>(env, "LLM_TEMPERATURE")? {
            self.temperature = v;
        }
        if let Some(raw) = env.get("LLM_TIMEOUT") {
            self.timeout = parse_timeout(raw).map_err(|reason| ConfigError::InvalidValue {
                key: "LLM_TIMEOUT",
                value: raw.to_string(),
                reason,
            })?;
        }
        if self.backend == BackendKind::LlamaCpp {
            if let Some(v) = parse_env::<u32>(env, "LLAMACPP_N_CTX")? {
                self.n_ctx = v;
            }
            if let Some(v) = parse_env::<i32>(env, "LLAMACPP_N_GPU_LAYERS")? {
                self.n_gpu_layers = v;
            }
        }
        if let Some(v) = env.get("LLM_API_VERSION") {
            self.api_version = Some(v.to_string());
        }
        Ok(self)
    }

    fn with_generation_overrides(mut self, overrides: &ProviderOverrides) -> Self {
        if let Some(v) = overrides.max_tokens {
            self.max_tokens = v;
        }
        if let Some(v) = overrides.temperature {
            self.temperature = v;
        }
        if let Some(v) = overrides.timeout {
            self.timeout = v;
        }
        self
    }
}

/// Resolve the primary provider configuration.
pub fn resolve_provider_config(
    env: &EnvSnapshot,
    overrides: &ProviderOverrides,
) -> Result<ProviderConfig, ConfigError> {
    let backend = match overrides.provider {
        Some(kind) => kind,
        None => match env.get("LLM_PROVIDER") {
            Some(raw) => raw.parse().map_err(ConfigError::UnknownProvider)?,
            None => detect_backend(env),
        },
    };

    let mut config = ProviderConfig::new(backend)
        .with_backend_env(env)
        .with_generation_env(env)?;

    if let Some(model) = env.get("LLM_MODEL") {
        config.model = model.to_string();
    }

    if let Some(model) = &overrides.model {
        config.model = model.clone();
    }
    if let Some(url) = &overrides.base_url {
        config.endpoint = Some(url.clone());
    }
    if let Some(path) = &overrides.model_path {
        config.set_model_path(path.clone());
    }
    let config = config.with_generation_overrides(overrides);

    tracing::info!(
        provider = %config.backend,
        model = %config.model,
        endpoint = config.endpoint.as_deref().unwrap_or("(default)"),
        "LLM provider configured"
    );
    Ok(config)
}

/// Resolve the fallback provider, if one is requested.
///
/// The backend is forced to `--fallback-provider` / `LLM_FALLBACK_PROVIDER`.
/// Model and endpoint overrides aimed at the primary are not applied.
pub fn resolve_fallback_config(
    env: &EnvSnapshot,
    overrides: &ProviderOverrides,
) -> Result<Option<ProviderConfig>, ConfigError> {
    let backend = match overrides.fallback_provider {
        Some(kind) => kind,
        None => match env.get("LLM_FALLBACK_PROVIDER") {
            Some(raw) => raw.parse().map_err(ConfigError::UnknownProvider)?,
            None => return Ok(None),
        },
    };

    let config = ProviderConfig::new(backend)
        .with_backend_env(env)
        .with_generation_env(env)?
        .with_generation_overrides(overrides);

    tracing::info!(provider = %config.backend, model = %config.model, "Fallback provider configured");
    Ok(Some(config))
}

fn detect_backend(env: &EnvSnapshot) -> BackendKind {
    if env.contains("LLAMACPP_MODEL_PATH") {
        BackendKind::LlamaCpp
    } else if env.contains("OLLAMA_MODEL") {
        BackendKind::Ollama
    } else if env.contains("LLM_BASE_URL") && !env.contains("OPENAI_API_KEY") {
        BackendKind::OpenAiCompat
    } else if env.contains("OPENAI_API_KEY") {
        BackendKind::OpenAi
    } else {
        BackendKind::Anthropic
    }
}

fn parse_env<T>(env: &EnvSnapshot, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env.get(key) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// `90s`, `2m`, `1m 30s`, or a bare number of seconds.
pub fn parse_timeout(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).map_err(|e| e.to_string())
}
