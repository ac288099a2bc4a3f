//! Session Management
//!
//! A [`Session`] is the isolated execution context of one inbound task. It
//! owns the task's conversation, its private tool bridge connection and the
//! set of peers it currently has open delegation calls with. Sessions are
//! never shared between tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::bridge::BridgeHandle;
use crate::error::{AgentError, ErrorPayload, Result};
use crate::message::Conversation;

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one inbound task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Received,
    Planning,
    ToolCall,
    Delegating,
    Responding,
    Done,
    Failed { reason: ErrorPayload },
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Failed { reason } if reason.kind == "Cancelled")
    }

    /// Allowed edges of the task state machine
    pub fn can_transition_to(&self, next: &Self) -> bool {
        use TaskState::*;
        match (self, next) {
            (from, Failed { .. }) => !from.is_terminal(),
            (Received, Planning)
            | (Planning, ToolCall | Delegating | Responding)
            | (ToolCall | Delegating, Planning)
            | (Responding, Done) => true,
            _ => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Planning => "planning",
            Self::ToolCall => "tool_call",
            Self::Delegating => "delegating",
            Self::Responding => "responding",
            Self::Done => "done",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Execution context of one task
#[derive(Debug)]
pub struct Session {
    /// Unique identifier
    pub id: SessionId,

    /// Conversation history
    pub conversation: Conversation,

    /// Caller-chosen conversation grouping
    pub context_id: Option<String>,

    bridge: Option<BridgeHandle>,
    delegations: BTreeSet<String>,
    state: TaskState,
    history: Vec<TaskState>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last activity timestamp
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            conversation: Conversation::new(),
            context_id: None,
            bridge: None,
            delegations: BTreeSet::new(),
            state: TaskState::Received,
            history: vec![TaskState::Received],
            created_at: now,
            updated_at: now,
        }
    }

    /// Give the session its private tool bridge connection
    pub fn attach_bridge(&mut self, bridge: BridgeHandle) {
        self.bridge = Some(bridge);
        self.touch();
    }

    pub fn bridge(&self) -> Option<&BridgeHandle> {
        self.bridge.as_ref()
    }

    pub fn open_delegation(&mut self, endpoint: &str) {
        self.delegations.insert(endpoint.to_string());
    }

    pub fn close_delegation(&mut self, endpoint: &str) {
        self.delegations.remove(endpoint);
    }

    /// Peers with a delegation call in flight
    pub fn delegations(&self) -> &BTreeSet<String> {
        &self.delegations
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[TaskState] {
        &self.history
    }

    /// Move along the state machine; illegal edges are a `Session` error
    pub fn transition(&mut self, next: TaskState) -> Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(AgentError::Session(format!(
                "illegal transition {} -> {}",
                self.state.label(),
                next.label()
            )));
        }
        tracing::debug!(session = %self.id, from = self.state.label(), to = next.label(), "Task transition");
        self.state = next.clone();
        self.history.push(next);
        self.touch();
        Ok(())
    }

    /// Enter `Failed`; no-op once terminal
    pub fn fail(&mut self, error: &AgentError) {
        if self.state.is_terminal() {
            return;
        }
        let next = TaskState::Failed { reason: error.payload() };
        self.state = next.clone();
        self.history.push(next);
        self.touch();
    }

    /// Release every resource the session acquired
    ///
    /// Closes the bridge (at most once, since the handle is moved out) and
    /// forgets open delegations. Safe to call repeatedly.
    pub async fn release(&mut self) {
        self.delegations.clear();
        if let Some(bridge) = self.bridge.take() {
            let id = bridge.id().clone();
            if let Err(e) = bridge.close().await {
                tracing::warn!(session = %self.id, bridge = %id, error = %e, "Bridge close failed");
            }
        }
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Message count
    pub fn message_count(&self) -> usize {
        self.conversation.len()
    }

    /// Duration since creation
    pub fn duration(&self) -> chrono::Duration {
        self.updated_at - self.created_at
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
