//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for all LLM providers (Ollama, OpenAI,
//! OpenRouter, ...) allowing the agent to work with any backend without code
//! changes. The reasoning loop only ever sees a [`ModelHandle`]; which
//! backend sits behind it is decided once, at startup.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::providers::{resolve, ProviderOptions};
//!
//! let model = resolve("ollama", &ProviderOptions::default())?;
//! let action = model.complete(conversation.messages()).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::action::Action;
use crate::error::Result;
use crate::message::Message;

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "llama3.2", "gpt-4o-mini")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Top-p nucleus sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> u32 { 2048 }
fn default_top_p() -> f32 { 0.9 }

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "llama3.2".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            stop_sequences: Vec::new(),
        }
    }
}

/// Response from an LLM completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text
    pub content: String,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Whether the response was truncated
    pub truncated: bool,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

/// Token usage statistics
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
}

/// Information about a model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub context_length: Option<u32>,
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// The agent works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g. "Ollama")
    fn name(&self) -> &str;

    /// Check if the provider is available and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Generate a completion from messages
    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion>;

    /// List available models
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;
}

/// A configured backend plus the generation settings to use with it
#[derive(Clone)]
pub struct ModelHandle {
    provider: Arc<dyn LlmProvider>,
    options: GenerationOptions,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("provider", &self.provider.name())
            .field("model", &self.options.model)
            .finish()
    }
}

impl ModelHandle {
    pub fn new(provider: Arc<dyn LlmProvider>, options: GenerationOptions) -> Self {
        Self { provider, options }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.options.model
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    pub async fn health_check(&self) -> bool {
        match self.provider.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                tracing::warn!(provider = self.provider.name(), error = %e, "Health check failed");
                false
            }
        }
    }

    /// Ask the backend for the next step of the conversation
    pub async fn complete(&self, conversation: &[Message]) -> Result<Action> {
        let completion = self.provider.complete(conversation, &self.options).await?;
        tracing::debug!(
            model = %completion.model,
            chars = completion.content.len(),
            "Completion received"
        );
        Action::parse(&completion.content)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Provider that replays a fixed script of completions.

    use super::*;
    use crate::error::AgentError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<String>>>,
        pub seen: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedProvider {
        pub fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn ok(replies: &[&str]) -> Self {
            Self::new(replies.iter().map(|r| Ok((*r).to_string())).collect())
        }

        pub fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AgentError::ProviderUnavailable("script exhausted".into())))?;
            Ok(Completion {
                content: reply,
                model: options.model.clone(),
                usage: None,
                truncated: false,
                finish_reason: Some(FinishReason::Stop),
            })
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }
    }
}
