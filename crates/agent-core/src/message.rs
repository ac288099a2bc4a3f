//! Conversation Messages
//!
//! Standard message format used across the agent system. A streamed answer
//! is a sequence of `partial` messages closed by exactly one non-partial
//! message (or an error message).

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::error::{AgentError, ErrorPayload};

/// Role of a message sender
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool or delegation result (injected as context)
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content
    pub content: String,

    /// More content follows for the same response
    #[serde(default)]
    pub partial: bool,

    /// Optional name (for multi-agent scenarios)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Optional metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

/// Additional message metadata
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Tool call ID (for tool messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Model that generated this (for assistant messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Set on terminal failure messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,

    /// Custom key-value pairs
    #[serde(flatten)]
    pub extra: std::collections::HashMap<String, serde_json::Value>,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            partial: false,
            name: None,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant fragment; the caller concatenates fragments
    pub fn partial(content: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Assistant, content);
        msg.partial = true;
        msg
    }

    /// Create a tool result message
    pub fn tool(content: impl Into<String>, tool_call_id: Option<String>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        if tool_call_id.is_some() {
            msg.metadata = Some(MessageMetadata {
                tool_call_id,
                ..Default::default()
            });
        }
        msg
    }

    /// Terminal failure message carrying a stable error kind
    pub fn failure(error: &AgentError) -> Self {
        Self::from_payload(error.payload())
    }

    pub fn from_payload(payload: ErrorPayload) -> Self {
        let mut msg = Self::new(Role::Assistant, payload.detail.clone());
        msg.metadata = Some(MessageMetadata {
            error: Some(payload),
            ..Default::default()
        });
        msg
    }

    /// Add a name to the message
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Error payload, if this is a failure message
    pub fn error(&self) -> Option<&ErrorPayload> {
        self.metadata.as_ref().and_then(|m| m.error.as_ref())
    }

    pub fn is_final(&self) -> bool {
        !self.partial
    }

    /// Estimate token count (rough approximation)
    pub fn estimate_tokens(&self) -> u32 {
        // ~4 characters per token is a rough estimate
        (self.content.len() / 4) as u32 + 4 // +4 for role overhead
    }
}

/// Conversation history with utility methods
///
/// Append-only from the reasoning loop's point of view; only
/// `truncate_to_fit` drops old turns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,

    /// Maximum context length (in estimated tokens)
    #[serde(default = "default_max_context")]
    max_context_tokens: u32,
}

fn default_max_context() -> u32 {
    8192
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self::with_budget(default_max_context())
    }

    /// Conversation bounded to `max_context_tokens` estimated tokens
    pub fn with_budget(max_context_tokens: u32) -> Self {
        Self {
            messages: Vec::new(),
            max_context_tokens,
        }
    }

    /// Add a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Install or replace the leading system prompt
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => first.content = prompt.into(),
            _ => self.messages.insert(0, Message::system(prompt)),
        }
    }

    /// Estimate total tokens in conversation
    pub fn estimate_tokens(&self) -> u32 {
        self.messages.iter().map(Message::estimate_tokens).sum()
    }

    /// Truncate to fit within token limit, preserving system and recent messages
    pub fn truncate_to_fit(&mut self) {
        while self.estimate_tokens() > self.max_context_tokens && self.messages.len() > 2 {
            // Find first non-system message and remove it
            if let Some(pos) = self.messages.iter().position(|m| m.role != Role::System) {
                // Don't remove the very last message
                if pos < self.messages.len() - 1 {
                    self.messages.remove(pos);
                } else {
                    break;
                }
            } else {
                break;
            }
        }
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
