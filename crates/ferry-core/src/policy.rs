//! Failure policy resolution.
//!
//! When a backend is missing or a call fails, a person at a terminal should
//! be told to fix their configuration, while an agent-driven run should keep
//! going with deterministic scaffold output.

use crate::context::ExecutionContext;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of backend failure being escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFailure {
    /// No backend is configured or available
    NotConfigured,

    /// A backend was called and failed
    CallFailed,

    /// Generation was explicitly turned off for this run
    Disabled,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendFailure::NotConfigured => write!(f, "not_configured"),
            BackendFailure::CallFailed => write!(f, "call_failed"),
            BackendFailure::Disabled => write!(f, "disabled"),
        }
    }
}

/// What to do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the run with a configuration error
    RaiseFatal,

    /// Substitute scaffold output and continue
    UseFallback,
}

/// Decide the policy for `failure` in `context`. Undetermined counts as human.
pub fn resolve(context: &ExecutionContext, failure: BackendFailure) -> FailurePolicy {
    match (failure, context) {
        (BackendFailure::Disabled, _) => FailurePolicy::UseFallback,
        (_, ExecutionContext::AgentAttended { .. }) => FailurePolicy::UseFallback,
        (_, ExecutionContext::HumanAttended | ExecutionContext::Undetermined) => {
            FailurePolicy::RaiseFatal
        }
    }
}

/// Actionable guidance shown when the policy is fatal.
pub fn configuration_help(failure: BackendFailure) -> String {
    let headline = match failure {
        BackendFailure::CallFailed => "The generation backend failed and no fallback succeeded.",
        _ => "No generation backend is configured.",
    };
    format!(
        "{headline}\n\
         Configure one of:\n  \
         ANTHROPIC_API_KEY=...            (Anthropic)\n  \
         OPENAI_API_KEY=...               (OpenAI)\n  \
         LLM_BASE_URL=http://host/v1      (OpenAI-compatible endpoint)\n  \
         OLLAMA_MODEL=llama3              (local Ollama server)\n  \
         LLAMACPP_MODEL_PATH=/path.gguf   (local GGUF model)\n\
         Or run with --no-llm for scaffold output, or set FERRY_CONTEXT=agent."
    )
}
