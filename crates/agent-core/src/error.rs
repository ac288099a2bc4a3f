//! Error Types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Failures raised by a tool bridge session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Tool name is not in the session's cached catalog
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Backend rejected or failed the call
    #[error("Tool '{tool}' failed: {detail}")]
    InvocationFailed { tool: String, detail: String },
}

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Tool backend refused or timed out at connect time
    #[error("Connection error: {0}")]
    Connection(String),

    /// Tool invocation failure
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Peer agent could not be reached
    #[error("Peer unreachable at {endpoint}: {detail}")]
    PeerUnreachable { endpoint: String, detail: String },

    /// Peer card is missing required fields
    #[error("Malformed agent card: {0}")]
    MalformedCard(String),

    /// Peer failed after the delegation stream was opened
    #[error("Delegation error: {0}")]
    Delegation(String),

    /// Hosted provider selected without its credential
    #[error("Missing credential for {provider}: set {key}")]
    MissingCredential { provider: String, key: String },

    /// Model requested something outside the current capability snapshot
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Caller cancelled the task
    #[error("Task cancelled")]
    Cancelled,

    /// Maximum iterations reached in reasoning loop
    #[error("Maximum iterations ({0}) reached")]
    MaxIterations(usize),

    /// Session error
    #[error("Session error: {0}")]
    Session(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

/// Wire form of a failure: stable `kind` plus human-readable `detail`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub detail: String,
}

impl ErrorPayload {
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.into(),
        }
    }
}

impl AgentError {
    pub fn peer_unreachable(endpoint: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::PeerUnreachable {
            endpoint: endpoint.into(),
            detail: detail.to_string(),
        }
    }

    pub fn invocation_failed(tool: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::Tool(ToolError::InvocationFailed {
            tool: tool.into(),
            detail: detail.to_string(),
        })
    }

    /// Stable identifier used in error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(_) => "ProviderError",
            Self::ProviderUnavailable(_) => "ProviderUnavailable",
            Self::Connection(_) => "ConnectionError",
            Self::Tool(ToolError::UnknownTool(_)) => "UnknownTool",
            Self::Tool(ToolError::InvocationFailed { .. }) => "InvocationFailed",
            Self::PeerUnreachable { .. } => "PeerUnreachable",
            Self::MalformedCard(_) => "MalformedCard",
            Self::Delegation(_) => "DelegationError",
            Self::MissingCredential { .. } => "MissingCredential",
            Self::InvalidAction(_) => "InvalidAction",
            Self::Cancelled => "Cancelled",
            Self::MaxIterations(_) => "MaxIterations",
            Self::Session(_) => "SessionError",
            Self::Config(_) => "ConfigError",
            Self::Io(_) | Self::Json(_) | Self::Other(_) => "InternalError",
        }
    }

    /// Check if error is retryable
    ///
    /// Only connect- and discovery-time failures qualify; anything raised
    /// after a remote action started is surfaced instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::ProviderUnavailable(_)
                | AgentError::Connection(_)
                | AgentError::PeerUnreachable { .. }
        )
    }

    /// Whether the reasoning loop may re-plan around this failure
    pub fn is_replannable(&self) -> bool {
        matches!(
            self,
            AgentError::Tool(_)
                | AgentError::InvalidAction(_)
                | AgentError::Delegation(_)
                | AgentError::PeerUnreachable { .. }
                | AgentError::MalformedCard(_)
        )
    }

    /// Error payload for streamed responses
    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload::new(self.kind(), self.to_string())
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Other(err.to_string())
    }
}
