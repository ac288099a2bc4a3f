//! OpenAI-compatible chat completions provider.
//!
//! Serves both OpenAI and OpenRouter: they share the `/chat/completions`
//! and `/models` shapes and differ only in base URL and key.

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{Completion, FinishReason, GenerationOptions, LlmProvider, ModelInfo, TokenUsage},
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chat request body
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<Usage> for TokenUsage {
    fn from(u: Usage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    context_length: Option<u32>,
}

/// Provider for any OpenAI-compatible endpoint
pub struct OpenAiCompatible {
    name: String,
    base_url: String,
    api_key: String,
    http: Client,
}

impl OpenAiCompatible {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
        })
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
    }

    fn convert_messages(messages: &[Message]) -> Vec<ChatMessage<'_>> {
        messages
            .iter()
            .map(|m| ChatMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::Assistant => "assistant",
                    // Results are fed back as user context
                    Role::User | Role::Tool => "user",
                },
                content: &m.content,
            })
            .collect()
    }

    fn chat_request<'a>(messages: &'a [Message], options: &'a GenerationOptions) -> ChatRequest<'a> {
        ChatRequest {
            model: &options.model,
            messages: Self::convert_messages(messages),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            top_p: options.top_p,
            stop: (!options.stop_sequences.is_empty()).then_some(options.stop_sequences.as_slice()),
        }
    }

    /// Map transport and HTTP failures; overload and outages are retryable
    async fn check(&self, sent: reqwest::Result<Response>) -> Result<Response> {
        let response = sent.map_err(|e| AgentError::ProviderUnavailable(format!("{}: {e}", self.name)))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let detail = format!("{} returned {status}: {text}", self.name);
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(AgentError::ProviderUnavailable(detail))
        } else {
            Err(AgentError::Provider(detail))
        }
    }
}

fn finish_reason(raw: Option<&str>) -> Option<FinishReason> {
    raw.map(|r| match r {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolUse,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Error,
    })
}

#[async_trait]
impl LlmProvider for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> Result<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(provider = %self.name, error = %e, "Health check failed");
                Ok(false)
            }
        }
    }

    async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
        let request = Self::chat_request(messages, options);
        let response = self.check(self.post("/chat/completions").json(&request).send().await).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("{}: unreadable completion: {e}", self.name)))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Provider(format!("{}: completion has no choices", self.name)))?;
        let finish = finish_reason(choice.finish_reason.as_deref());

        Ok(Completion {
            content: choice.message.and_then(|m| m.content).unwrap_or_default(),
            model: body.model.unwrap_or_else(|| options.model.clone()),
            usage: body.usage.map(Into::into),
            truncated: finish == Some(FinishReason::Length),
            finish_reason: finish,
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let sent = self
            .http
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await;
        let list: ModelList = self
            .check(sent)
            .await?
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("{}: unreadable model list: {e}", self.name)))?;

        Ok(list
            .data
            .into_iter()
            .map(|m| ModelInfo {
                name: m.name.unwrap_or_else(|| m.id.clone()),
                id: m.id,
                context_length: m.context_length,
            })
            .collect())
    }
}
