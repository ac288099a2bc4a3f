//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for local Ollama inference.

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{Completion, FinishReason, GenerationOptions, LlmProvider, ModelInfo},
};
use async_trait::async_trait;
use ollama_rs::{
    Ollama,
    generation::{
        chat::{ChatMessage, ChatMessageResponse, MessageRole, request::ChatMessageRequest},
    },
    models::ModelOptions as OllamaOptions,
};
use reqwest::Url;

/// Default Ollama endpoint
pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Ollama provider configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OllamaConfig {
    /// Ollama host URL, without port
    pub host: String,

    /// Ollama port
    pub port: u16,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
        }
    }
}

impl OllamaConfig {
    /// Split an endpoint such as `http://gpu-box:11434` into host and port
    pub fn from_endpoint(endpoint: &str) -> Result<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| AgentError::Config(format!("invalid Ollama endpoint '{endpoint}': {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| AgentError::Config(format!("Ollama endpoint '{endpoint}' has no host")))?;

        Ok(Self {
            host: format!("{}://{host}", url.scheme()),
            port: url.port().unwrap_or(11434),
        })
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Self {
        Self {
            client: Ollama::new(&config.host, config.port),
            config,
        }
    }

    /// Create with default localhost settings
    pub fn localhost() -> Self {
        Self::from_config(OllamaConfig::default())
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Convert agent messages to Ollama format
    fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => MessageRole::System,
                    Role::User => MessageRole::User,
                    Role::Assistant => MessageRole::Assistant,
                    Role::Tool => MessageRole::User, // Tools appear as user context
                };
                ChatMessage::new(role, m.content.clone())
            })
            .collect()
    }

    /// Convert Ollama response to agent completion
    fn convert_completion(response: ChatMessageResponse, model: &str) -> Completion {
        Completion {
            content: response.message.content,
            model: model.to_string(),
            usage: None,
            truncated: false,
            finish_reason: Some(FinishReason::Stop),
        }
    }

    /// Build Ollama generation options
    fn build_options(opts: &GenerationOptions) -> OllamaOptions {
        OllamaOptions::default()
            .temperature(opts.temperature)
            .top_p(opts.top_p)
            .num_predict(i32::try_from(opts.max_tokens).unwrap_or(i32::MAX))
    }

    fn request(messages: &[Message], options: &GenerationOptions) -> ChatMessageRequest {
        ChatMessageRequest::new(options.model.clone(), Self::convert_messages(messages))
            .options(Self::build_options(options))
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
        let response = self
            .client
            .send_chat_messages(Self::request(messages, options))
            .await
            .map_err(|e| AgentError::ProviderUnavailable(format!("ollama: {e}")))?;

        Ok(Self::convert_completion(response, &options.model))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))?;

        Ok(models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.clone(),
                name: m.name,
                context_length: None, // Not exposed by Ollama API
            })
            .collect())
    }
}
