//! # agent-core
//!
//! Provider-agnostic core of a home-automation agent: the reasoning loop,
//! the tool bridge contract, capability cards and the delegation contract.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             Agent                                │
//! │  ┌─────────────┐   ┌──────────────────┐   ┌──────────────────┐   │
//! │  │  Reasoning  │───│ CapabilityRegistry│───│   ModelHandle    │   │
//! │  │    Loop     │   │   (AgentCard)     │   │ (LlmProvider)    │   │
//! │  └──────┬──────┘   └──────────────────┘   └──────────────────┘   │
//! │         │                                                        │
//! │  ┌──────┴──────┐   ┌──────────────────┐                          │
//! │  │BridgeHandle │   │    Delegator     │                          │
//! │  │ (per task)  │   │  (peer agents)   │                          │
//! │  └─────────────┘   └──────────────────┘                          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Concrete transports (MCP over HTTP, the agent protocol client, model
//! backends) live in `agent-runtime`.

pub mod action;
pub mod bridge;
pub mod card;
pub mod delegation;
pub mod error;
pub mod message;
pub mod protocol;
pub mod provider;
pub mod reasoning;
pub mod retry;
pub mod session;
pub mod tool;

pub use action::Action;
pub use bridge::{BridgeHandle, BridgeTimeouts, RemoteTool, ToolConnector, ToolOutput, ToolTransport};
pub use card::{AgentCard, CapabilityRegistry, CardIdentity, PeerRef, PeerStatus, SkillDescriptor, SkillSource};
pub use delegation::{DelegationCall, Delegator, MessageStream};
pub use error::{AgentError, ErrorPayload, Result, ToolError};
pub use message::{Conversation, Message, Role};
pub use provider::{LlmProvider, ModelHandle};
pub use reasoning::{Agent, AgentConfig, InvalidActionPolicy};
pub use retry::RetryPolicy;
pub use session::{Session, SessionId, TaskState};
pub use tool::{InputSchema, ToolCall, ToolDescriptor, ToolResult};
