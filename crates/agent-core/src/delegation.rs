//! Delegation contract
//!
//! A [`Delegator`] turns a remote agent into a local callable skill:
//! `discover` fetches the peer's card, `delegate` opens one call and yields
//! the peer's messages in emission order. The stream is finite and cannot
//! be restarted; retrying means a new [`DelegationCall`] with a new
//! correlation id.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;

use crate::card::{AgentCard, PeerRef};
use crate::error::Result;
use crate::message::Message;
use crate::retry::RetryPolicy;

/// Delegation as requested by the model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DelegationRequest {
    /// Skill id from the current card
    pub skill: String,

    #[serde(default)]
    pub arguments: HashMap<String, Value>,
}

impl DelegationRequest {
    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone().into_iter().collect())
    }
}

/// One outbound delegation
#[derive(Clone, Debug)]
pub struct DelegationCall {
    pub target: PeerRef,
    pub skill_id: String,
    pub arguments: Value,
    pub correlation_id: String,
}

impl DelegationCall {
    /// New call with a fresh correlation id
    pub fn new(target: PeerRef, skill_id: impl Into<String>, arguments: Value) -> Self {
        Self {
            target,
            skill_id: skill_id.into(),
            arguments,
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Peer output in emission order; ends after a final message or an error
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message>> + Send>>;

/// Client side of the agent protocol
#[async_trait]
pub trait Delegator: Send + Sync {
    /// Fetch a peer's published card
    async fn discover(&self, endpoint: &str) -> Result<AgentCard>;

    /// Open a call to a peer skill
    async fn delegate(&self, call: DelegationCall) -> Result<MessageStream>;

    /// Discovery with bounded backoff on `PeerUnreachable`
    async fn discover_with_retry(&self, endpoint: &str, policy: &RetryPolicy) -> Result<AgentCard> {
        policy.run("peer discovery", || self.discover(endpoint)).await
    }
}
