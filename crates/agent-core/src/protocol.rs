//! Agent protocol wire types
//!
//! Shared by the agent server (producer) and the delegation client
//! (consumer) so both ends agree on paths and payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorPayload;
use crate::message::Message;

/// Discovery document path
pub const AGENT_CARD_PATH: &str = "/.well-known/agent-card.json";

/// Request/response invocation
pub const INVOKE_PATH: &str = "/a2a";

/// Streamed invocation (server-sent events)
pub const STREAM_PATH: &str = "/a2a/stream";

/// Response header carrying the server-side task id of a streamed invocation
pub const TASK_ID_HEADER: &str = "x-task-id";

/// Inbound task request
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_id: Option<String>,

    #[serde(default)]
    pub arguments: Value,

    pub correlation_id: String,

    /// Conversation grouping chosen by the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

impl InvocationRequest {
    pub fn new(skill_id: Option<String>, arguments: Value) -> Self {
        Self {
            skill_id,
            arguments,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            context_id: None,
        }
    }

    /// Text handed to the reasoning loop as the user's turn
    pub fn task_text(&self) -> String {
        if let Some(text) = self.arguments.as_str() {
            return text.to_string();
        }
        for key in ["message", "text", "query"] {
            if let Some(text) = self.arguments.get(key).and_then(Value::as_str) {
                return text.to_string();
            }
        }
        match &self.skill_id {
            Some(skill) => format!("Use the `{skill}` skill with these arguments: {}", self.arguments),
            None => self.arguments.to_string(),
        }
    }
}

/// One event of a streamed invocation
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    Message { correlation_id: String, message: Message },
    #[serde(rename_all = "camelCase")]
    Error { correlation_id: String, error: ErrorPayload },
}

impl StreamEvent {
    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Message { correlation_id, .. } | Self::Error { correlation_id, .. } => correlation_id,
        }
    }

    /// Wrap an outgoing message; failure messages become error events
    pub fn from_message(correlation_id: &str, message: Message) -> Self {
        match message.error() {
            Some(error) => Self::Error {
                correlation_id: correlation_id.to_string(),
                error: error.clone(),
            },
            None => Self::Message {
                correlation_id: correlation_id.to_string(),
                message,
            },
        }
    }

    /// Whether the stream ends with this event
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Message { message, .. } => message.is_final(),
            Self::Error { .. } => true,
        }
    }
}

/// Non-streaming invocation result
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    pub correlation_id: String,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}
