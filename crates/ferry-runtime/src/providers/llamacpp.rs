//! Local GGUF models through the llama.cpp command-line tool.
//!
//! No network access. The model file must exist when the adapter is built;
//! each call spawns `llama-cli` (or `LLAMACPP_BIN`) with a ChatML prompt and
//! reads the completion from stdout.

use super::{
    config::ProviderConfig, factory::ProviderFactory, BackendKind, ChatMessage,
    CompletionResponse, LlmProvider, ProviderDescriptor, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// llama.cpp CLI adapter.
#[derive(Debug)]
pub struct LlamaCppProvider {
    descriptor: ProviderDescriptor,
    binary: String,
    model_path: Option<PathBuf>,
    max_tokens: u32,
    temperature: f32,
    n_ctx: u32,
    n_gpu_layers: i32,
    timeout: Duration,
}

impl LlamaCppProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        let model_path = match &config.model_path {
            None => {
                tracing::warn!("LlamaCppProvider: LLAMACPP_MODEL_PATH not set; provider unavailable");
                None
            }
            Some(path) if !path.is_file() => {
                tracing::warn!(path = %path.display(), "LlamaCppProvider: model file not found; provider unavailable");
                None
            }
            Some(path) => Some(path.clone()),
        };

        Self {
            descriptor: config.descriptor(),
            binary: config.llamacpp_bin.clone(),
            model_path,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            n_ctx: config.n_ctx,
            n_gpu_layers: config.n_gpu_layers,
            timeout: config.timeout,
        }
    }

    fn command(&self, model_path: &std::path::Path, prompt_file: &std::path::Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-m")
            .arg(model_path)
            .arg("-n")
            .arg(self.max_tokens.to_string())
            .arg("--temp")
            .arg(self.temperature.to_string())
            .arg("-c")
            .arg(self.n_ctx.to_string())
            .arg("-ngl")
            .arg(self.n_gpu_layers.to_string())
            .arg("--no-display-prompt")
            .arg("-no-cnv")
            .arg("-f")
            .arg(prompt_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Render a system prompt and messages in ChatML, ending with an open assistant turn.
pub(crate) fn chatml_prompt(system: &str, messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    if !system.is_empty() {
        prompt.push_str(&format!("<|im_start|>system\n{}<|im_end|>\n", system));
    }
    for message in messages {
        prompt.push_str(&format!(
            "<|im_start|>{}\n{}<|im_end|>\n",
            message.role, message.content
        ));
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

#[async_trait]
impl LlmProvider for LlamaCppProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<CompletionResponse, ProviderError> {
        let Some(model_path) = &self.model_path else {
            return Err(ProviderError::NotConfigured(
                "LlamaCpp provider needs LLAMACPP_MODEL_PATH pointing at a .gguf file".to_string(),
            ));
        };

        let prompt = chatml_prompt(system, messages);
        let mut prompt_file = tempfile::NamedTempFile::new()
            .map_err(|e| ProviderError::ProcessError(format!("prompt file: {}", e)))?;
        prompt_file
            .write_all(prompt.as_bytes())
            .and_then(|_| prompt_file.flush())
            .map_err(|e| ProviderError::ProcessError(format!("prompt file: {}", e)))?;

        let child = self
            .command(model_path, prompt_file.path())
            .spawn()
            .map_err(|e| ProviderError::ProcessError(format!("failed to start '{}': {}", self.binary, e)))?;

        // Dropping the future on timeout kills the child.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))?
            .map_err(|e| ProviderError::ProcessError(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(5)..].join("\n");
            return Err(ProviderError::ProcessError(format!(
                "'{}' exited with {}: {}",
                self.binary, output.status, tail
            )));
        }

        let content = clean_completion(&String::from_utf8_lossy(&output.stdout));

        // The CLI reports no usage; estimate it.
        Ok(CompletionResponse {
            usage: TokenUsage {
                prompt_tokens: self.estimate_tokens(&prompt),
                completion_tokens: self.estimate_tokens(&content),
            },
            content,
            model: self.descriptor.model.clone(),
            stop_reason: None,
        })
    }

    fn is_available(&self) -> bool {
        self.model_path.is_some()
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }
}

/// Factory for llama.cpp providers. Always compiled in.
pub struct LlamaCppProviderFactory;

impl ProviderFactory for LlamaCppProviderFactory {
    fn backend(&self) -> BackendKind {
        BackendKind::LlamaCpp
    }

    fn create(&self, config: &ProviderConfig) -> Arc<dyn LlmProvider> {
        Arc::new(LlamaCppProvider::new(config))
    }

    fn description(&self) -> &'static str {
        "Local GGUF model via the llama.cpp CLI"
    }
}

/// Strip surrounding whitespace and a trailing ChatML end marker.
fn clean_completion(stdout: &str) -> String {
    stdout
        .trim()
        .trim_end_matches("<|im_end|>")
        .trim()
        .to_string()
}
