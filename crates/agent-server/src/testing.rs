//! Fakes for server tests: a scripted model, an in-memory tool backend and
//! a fixed set of peers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use agent_core::bridge::{RemoteTool, ToolConnector, ToolOutput, ToolTransport};
use agent_core::card::{AgentCard, Capabilities, CardIdentity, SkillDescriptor, SkillSource};
use agent_core::delegation::{DelegationCall, Delegator, MessageStream};
use agent_core::error::{AgentError, Result};
use agent_core::message::Message;
use agent_core::provider::{
    Completion, FinishReason, GenerationOptions, LlmProvider, ModelInfo,
};
use agent_core::tool::InputSchema;

pub fn identity(name: &str) -> CardIdentity {
    CardIdentity {
        name: name.into(),
        description: format!("{name} for tests"),
        url: "http://127.0.0.1:0".into(),
        version: "0.1.0".into(),
    }
}

pub fn peer_card() -> AgentCard {
    AgentCard {
        name: "Hubitat Agent".into(),
        description: "Controls devices".into(),
        url: "http://hub:9002".into(),
        version: "0.1.0".into(),
        capabilities: Capabilities { streaming: true },
        skills: vec![SkillDescriptor {
            id: "hubitat".into(),
            name: "hubitat".into(),
            description: "Anything about the house".into(),
            input_schema: InputSchema::default(),
            source: SkillSource::Local,
        }],
    }
}

/// Model that replays canned completions; `hang` blocks forever instead
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    hang: bool,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| (*r).to_string()).collect()),
            hang: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            hang: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(&self, _messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            futures::future::pending::<()>().await;
        }
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::ProviderUnavailable("script exhausted".into()))?;
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

#[derive(Default)]
struct ToolCounters {
    connects: AtomicUsize,
    calls: AtomicUsize,
    closes: AtomicUsize,
}

/// In-memory hub with `listDevices` and `setDevice`
#[derive(Clone)]
pub struct FakeTools {
    refuse: Arc<AtomicBool>,
    counters: Arc<ToolCounters>,
}

impl FakeTools {
    pub fn new() -> Self {
        Self {
            refuse: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(ToolCounters::default()),
        }
    }

    pub fn refusing() -> Self {
        let tools = Self::new();
        tools.take_down();
        tools
    }

    /// Refuse every connection from now on
    pub fn take_down(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }
}

fn hub_tools() -> Vec<RemoteTool> {
    vec![
        RemoteTool {
            name: "listDevices".into(),
            description: Some("List all devices".into()),
            input_schema: InputSchema::default(),
        },
        RemoteTool {
            name: "setDevice".into(),
            description: Some("Switch a device on or off".into()),
            input_schema: InputSchema::from_json_schema(&json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer"},
                    "state": {"type": "string", "enum": ["on", "off"]}
                },
                "required": ["id", "state"]
            }))
            .unwrap(),
        },
    ]
}

struct FakeSession {
    counters: Arc<ToolCounters>,
}

#[async_trait]
impl ToolConnector for FakeTools {
    fn endpoint(&self) -> &str {
        "fake://hub"
    }

    async fn connect(&self) -> Result<Box<dyn ToolTransport>> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(AgentError::Connection("fake://hub refused".into()));
        }
        Ok(Box::new(FakeSession {
            counters: self.counters.clone(),
        }))
    }
}

#[async_trait]
impl ToolTransport for FakeSession {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>> {
        Ok(hub_tools())
    }

    async fn call_tool(&self, name: &str, _arguments: Value) -> Result<ToolOutput> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        let text = match name {
            "listDevices" => r#"[{"id": 42, "label": "Hallway Light"}]"#,
            _ => r#"{"status": "ok"}"#,
        };
        Ok(ToolOutput {
            text: text.into(),
            ..Default::default()
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Peers known by endpoint; anything else is unreachable
pub struct StaticPeers {
    cards: Mutex<HashMap<String, AgentCard>>,
}

impl StaticPeers {
    pub fn new(cards: Vec<(&str, AgentCard)>) -> Self {
        Self {
            cards: Mutex::new(cards.into_iter().map(|(k, v)| (k.to_string(), v)).collect()),
        }
    }

    /// Make `endpoint` unreachable from now on
    pub fn take_down(&self, endpoint: &str) {
        self.cards.lock().unwrap().remove(endpoint);
    }
}

#[async_trait]
impl Delegator for StaticPeers {
    async fn discover(&self, endpoint: &str) -> Result<AgentCard> {
        self.cards
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| AgentError::peer_unreachable(endpoint, "connection refused"))
    }

    async fn delegate(&self, call: DelegationCall) -> Result<MessageStream> {
        Err(AgentError::peer_unreachable(call.target.endpoint, "not scripted"))
    }
}
