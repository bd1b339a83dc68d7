//! Scripted providers shared by router and engine tests.

use crate::providers::{
    BackendKind, ChatMessage, CompletionResponse, LlmProvider, ProviderDescriptor, ProviderError,
    TokenUsage,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) enum Reply {
    Text(String),
    Fail(String),
}

pub(crate) struct MockProvider {
    descriptor: ProviderDescriptor,
    available: bool,
    reply: Reply,
    calls: AtomicUsize,
    last_user_message: Mutex<Option<String>>,
}

impl MockProvider {
    fn build(model: &str, available: bool, reply: Reply) -> Self {
        Self {
            descriptor: ProviderDescriptor {
                backend: BackendKind::OpenAiCompat,
                model: model.to_string(),
                endpoint: Some(format!("http://mock/{}", model)),
            },
            available,
            reply,
            calls: AtomicUsize::new(0),
            last_user_message: Mutex::new(None),
        }
    }

    pub(crate) fn ok(model: &str, text: &str) -> Self {
        Self::build(model, true, Reply::Text(text.to_string()))
    }

    pub(crate) fn failing(model: &str, message: &str) -> Self {
        Self::build(model, true, Reply::Fail(message.to_string()))
    }

    pub(crate) fn unavailable(model: &str) -> Self {
        Self::build(model, false, Reply::Fail("unavailable".to_string()))
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_user_message(&self) -> Option<String> {
        self.last_user_message.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(
        &self,
        _system: &str,
        messages: &[ChatMessage],
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_user_message.lock() = messages.last().map(|m| m.content.clone());

        match &self.reply {
            Reply::Text(text) => Ok(CompletionResponse {
                content: text.clone(),
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                },
                model: self.descriptor.model.clone(),
                stop_reason: Some("stop".to_string()),
            }),
            Reply::Fail(message) => Err(ProviderError::ApiError {
                status: 500,
                message: message.clone(),
            }),
        }
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }
}
