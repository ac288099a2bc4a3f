//! Capability Registry
//!
//! An [`AgentCard`] is the published description of an agent: who it is and
//! which skills a peer may invoke. Skills come from two places: tools listed
//! by a live bridge session, and skills of peers that answered discovery.
//! Anything whose backing connection is down is left out of the card
//! entirely; there is no "unavailable" flag.
//!
//! The [`CapabilityRegistry`] holds the current card behind an `ArcSwap`, so
//! a refresh replaces it in one step and readers keep whatever snapshot they
//! already loaded.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::tool::{InputSchema, ToolDescriptor};

/// Reference to the peer agent behind a delegated skill
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRef {
    pub name: String,
    pub endpoint: String,
}

/// Where a skill is executed
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SkillSource {
    /// Backed by this agent's tool bridge
    #[default]
    Local,
    /// Forwarded to a peer agent
    Delegated { peer: PeerRef },
}

/// One invocable capability
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillDescriptor {
    /// Unique within one card
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Summary shown to models and peers
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub input_schema: InputSchema,

    #[serde(default)]
    pub source: SkillSource,
}

impl SkillDescriptor {
    pub fn local(tool: &ToolDescriptor) -> Self {
        Self {
            id: tool.name.clone(),
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.schema.clone(),
            source: SkillSource::Local,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.source, SkillSource::Local)
    }

    /// Peer that executes this skill, if delegated
    pub fn peer(&self) -> Option<&PeerRef> {
        match &self.source {
            SkillSource::Delegated { peer } => Some(peer),
            SkillSource::Local => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub streaming: bool,
}

/// Published description of an agent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    /// Endpoint peers should call
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    pub skills: Vec<SkillDescriptor>,
}

const REQUIRED_CARD_FIELDS: [&str; 3] = ["name", "description", "skills"];

impl AgentCard {
    /// Parse a card received from a peer
    ///
    /// Missing required fields, duplicate skill ids and type mismatches are
    /// all `MalformedCard`.
    pub fn from_value(value: Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| AgentError::MalformedCard("card is not a JSON object".into()))?;
        for field in REQUIRED_CARD_FIELDS {
            if obj.get(field).is_none_or(Value::is_null) {
                return Err(AgentError::MalformedCard(format!("missing required field '{field}'")));
            }
        }

        let card: Self =
            serde_json::from_value(value).map_err(|e| AgentError::MalformedCard(e.to_string()))?;

        let mut ids = HashSet::new();
        for skill in &card.skills {
            if skill.id.trim().is_empty() {
                return Err(AgentError::MalformedCard("skill with empty id".into()));
            }
            if !ids.insert(skill.id.as_str()) {
                return Err(AgentError::MalformedCard(format!("duplicate skill id '{}'", skill.id)));
            }
        }
        Ok(card)
    }

    pub fn skill(&self, id: &str) -> Option<&SkillDescriptor> {
        self.skills.iter().find(|s| s.id == id)
    }

    pub fn local_skills(&self) -> impl Iterator<Item = &SkillDescriptor> {
        self.skills.iter().filter(|s| s.is_local())
    }

    pub fn delegated_skills(&self) -> impl Iterator<Item = &SkillDescriptor> {
        self.skills.iter().filter(|s| !s.is_local())
    }

    /// System prompt section describing the current capabilities
    pub fn prompt_section(&self) -> String {
        let mut prompt = String::new();

        let local: Vec<_> = self.local_skills().collect();
        if !local.is_empty() {
            prompt.push_str("## Available Tools\n\n");
            prompt.push_str("You can use the following tools by responding with a JSON block:\n\n");
            prompt.push_str("```tool\n{\"tool\": \"tool_name\", \"arguments\": {\"arg\": \"value\"}}\n```\n\n");
            for skill in local {
                push_skill(&mut prompt, skill);
            }
        }

        let delegated: Vec<_> = self.delegated_skills().collect();
        if !delegated.is_empty() {
            prompt.push_str("## Other Agents\n\n");
            prompt.push_str("You can hand work to another agent by responding with a JSON block:\n\n");
            prompt.push_str("```delegate\n{\"skill\": \"skill_id\", \"arguments\": {\"message\": \"what to do\"}}\n```\n\n");
            for skill in delegated {
                push_skill(&mut prompt, skill);
            }
        }

        prompt
    }
}

fn push_skill(prompt: &mut String, skill: &SkillDescriptor) {
    prompt.push_str(&format!("### {}\n", skill.id));
    if let Some(peer) = skill.peer() {
        prompt.push_str(&format!("(handled by {})\n", peer.name));
    }
    prompt.push_str(&format!("{}\n", skill.description));

    if !skill.input_schema.is_empty() {
        prompt.push_str("**Parameters:**\n");
        for param in &skill.input_schema.parameters {
            let required = if param.required { " (required)" } else { "" };
            prompt.push_str(&format!(
                "- `{}` ({}){}: {}\n",
                param.name, param.param_type, required, param.description
            ));
        }
    }
    prompt.push('\n');
}

/// Static identity of the agent publishing a card
#[derive(Clone, Debug)]
pub struct CardIdentity {
    pub name: String,
    pub description: String,
    pub url: String,
    pub version: String,
}

/// Outcome of the last discovery attempt against one peer
#[derive(Clone, Debug)]
pub enum PeerStatus {
    Reachable { endpoint: String, card: AgentCard },
    Unreachable { endpoint: String, reason: String },
}

impl PeerStatus {
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Reachable { endpoint, .. } | Self::Unreachable { endpoint, .. } => endpoint,
        }
    }
}

/// Merge live local tools and reachable peers' skills into one card
///
/// Unreachable peers contribute nothing. On id collisions the first skill
/// wins (local tools come first).
pub fn build_card(identity: &CardIdentity, local: &[ToolDescriptor], peers: &[PeerStatus]) -> AgentCard {
    let mut seen = HashSet::new();
    let mut skills = Vec::new();

    for tool in local {
        if seen.insert(tool.name.clone()) {
            skills.push(SkillDescriptor::local(tool));
        }
    }

    for status in peers {
        let (endpoint, card) = match status {
            PeerStatus::Reachable { endpoint, card } => (endpoint, card),
            PeerStatus::Unreachable { endpoint, reason } => {
                tracing::debug!(peer = %endpoint, reason = %reason, "Peer excluded from card");
                continue;
            }
        };
        let peer = PeerRef {
            name: card.name.clone(),
            endpoint: endpoint.clone(),
        };
        for skill in &card.skills {
            if !seen.insert(skill.id.clone()) {
                tracing::warn!(peer = %endpoint, skill = %skill.id, "Skill id already advertised; skipped");
                continue;
            }
            skills.push(SkillDescriptor {
                source: SkillSource::Delegated { peer: peer.clone() },
                ..skill.clone()
            });
        }
    }

    AgentCard {
        name: identity.name.clone(),
        description: identity.description.clone(),
        url: identity.url.clone(),
        version: identity.version.clone(),
        capabilities: Capabilities { streaming: true },
        skills,
    }
}

/// Holder of the currently published card
pub struct CapabilityRegistry {
    identity: CardIdentity,
    current: ArcSwap<AgentCard>,
}

impl CapabilityRegistry {
    /// Start with a card that advertises no skills
    pub fn new(identity: CardIdentity) -> Self {
        let empty = build_card(&identity, &[], &[]);
        Self {
            identity,
            current: ArcSwap::from_pointee(empty),
        }
    }

    pub fn identity(&self) -> &CardIdentity {
        &self.identity
    }

    /// Current snapshot; never observed half-updated
    pub fn snapshot(&self) -> Arc<AgentCard> {
        self.current.load_full()
    }

    pub fn publish(&self, card: AgentCard) -> Arc<AgentCard> {
        let card = Arc::new(card);
        self.current.store(card.clone());
        card
    }

    /// Build from live capabilities and publish
    pub fn rebuild(&self, local: &[ToolDescriptor], peers: &[PeerStatus]) -> Arc<AgentCard> {
        let card = build_card(&self.identity, local, peers);
        tracing::info!(
            skills = card.skills.len(),
            local = card.local_skills().count(),
            delegated = card.delegated_skills().count(),
            "Publishing agent card"
        );
        self.publish(card)
    }

    /// Republish without the skills delegated to `endpoint`
    pub fn exclude_peer(&self, endpoint: &str) -> Arc<AgentCard> {
        self.exclude(endpoint, |skill| skill.peer().is_some_and(|p| p.endpoint == endpoint))
    }

    /// Republish without local tools
    pub fn exclude_local(&self) -> Arc<AgentCard> {
        self.exclude("local tools", SkillDescriptor::is_local)
    }

    fn exclude(&self, what: &str, drop: impl Fn(&SkillDescriptor) -> bool) -> Arc<AgentCard> {
        let previous = self.current.rcu(|card| {
            if !card.skills.iter().any(&drop) {
                return Arc::clone(card);
            }
            let mut next = AgentCard::clone(card);
            next.skills.retain(|s| !drop(s));
            Arc::new(next)
        });
        let current = self.snapshot();
        let removed = previous.skills.len().saturating_sub(current.skills.len());
        if removed > 0 {
            tracing::warn!(source = what, removed, skills = current.skills.len(), "Unreachable source excluded from card");
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::BridgeSessionId;
    use serde_json::json;

    fn identity() -> CardIdentity {
        CardIdentity {
            name: "Home Agent".into(),
            description: "Routes requests around the home".into(),
            url: "http://127.0.0.1:9001".into(),
            version: "0.1.0".into(),
        }
    }

    fn tool(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            description: format!("{name} tool"),
            schema: InputSchema::default(),
            origin: BridgeSessionId::new(),
        }
    }

    fn peer_card(skills: &[&str]) -> AgentCard {
        AgentCard {
            name: "Hubitat Agent".into(),
            description: "Controls devices".into(),
            url: "http://0.0.0.0:9002".into(),
            version: "0.1.0".into(),
            capabilities: Capabilities { streaming: true },
            skills: skills
                .iter()
                .map(|id| SkillDescriptor {
                    id: (*id).into(),
                    name: (*id).into(),
                    description: String::new(),
                    input_schema: InputSchema::default(),
                    source: SkillSource::Local,
                })
                .collect(),
        }
    }

    #[test]
    fn test_build_card_merges_sources() {
        let peers = vec![PeerStatus::Reachable {
            endpoint: "http://127.0.0.1:9002".into(),
            card: peer_card(&["setDevice", "readSensor"]),
        }];
        let card = build_card(&identity(), &[tool("datetime")], &peers);

        assert_eq!(card.skills.len(), 3);
        assert!(card.skill("datetime").unwrap().is_local());
        let delegated = card.skill("setDevice").unwrap();
        assert_eq!(delegated.peer().unwrap().endpoint, "http://127.0.0.1:9002");
    }

    #[test]
    fn test_unreachable_peer_excluded() {
        let registry = CapabilityRegistry::new(identity());
        let endpoint = "http://127.0.0.1:9002".to_string();

        let before = registry.rebuild(
            &[],
            &[PeerStatus::Reachable { endpoint: endpoint.clone(), card: peer_card(&["setDevice"]) }],
        );
        assert!(before.skill("setDevice").is_some());

        let after = registry.rebuild(
            &[],
            &[PeerStatus::Unreachable { endpoint, reason: "connection refused".into() }],
        );
        assert!(after.skill("setDevice").is_none());
        // earlier snapshot is untouched
        assert!(before.skill("setDevice").is_some());
    }

    #[test]
    fn test_exclude_peer_and_local() {
        let registry = CapabilityRegistry::new(identity());
        let before = registry.rebuild(
            &[tool("datetime")],
            &[
                PeerStatus::Reachable { endpoint: "http://hub".into(), card: peer_card(&["setDevice"]) },
                PeerStatus::Reachable { endpoint: "http://garage".into(), card: peer_card(&["openDoor"]) },
            ],
        );
        assert_eq!(before.skills.len(), 3);

        let card = registry.exclude_peer("http://hub");
        assert!(card.skill("setDevice").is_none());
        assert!(card.skill("openDoor").is_some());
        assert!(card.skill("datetime").is_some());

        // nothing left to drop for that peer: same snapshot stays published
        let again = registry.exclude_peer("http://hub");
        assert!(Arc::ptr_eq(&card, &again));

        let card = registry.exclude_local();
        let ids: Vec<&str> = card.skills.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["openDoor"]);
        assert_eq!(before.skills.len(), 3);
    }

    #[test]
    fn test_local_tool_wins_id_collision() {
        let peers = vec![PeerStatus::Reachable {
            endpoint: "http://peer".into(),
            card: peer_card(&["setDevice"]),
        }];
        let card = build_card(&identity(), &[tool("setDevice")], &peers);
        assert_eq!(card.skills.len(), 1);
        assert!(card.skills[0].is_local());
    }

    #[test]
    fn test_card_missing_skills_is_malformed() {
        let err = AgentCard::from_value(json!({"name": "x", "description": "y"})).unwrap_err();
        assert!(matches!(err, AgentError::MalformedCard(ref m) if m.contains("skills")));
    }

    #[test]
    fn test_card_duplicate_skill_is_malformed() {
        let err = AgentCard::from_value(json!({
            "name": "x",
            "description": "y",
            "skills": [{"id": "a"}, {"id": "a"}]
        }))
        .unwrap_err();
        assert_eq!(err.kind(), "MalformedCard");
    }

    #[test]
    fn test_card_wire_round_trip() {
        let card = build_card(
            &identity(),
            &[tool("datetime")],
            &[PeerStatus::Reachable { endpoint: "http://peer".into(), card: peer_card(&["setDevice"]) }],
        );
        let value = serde_json::to_value(&card).unwrap();
        assert_eq!(value["skills"][1]["source"]["kind"], "delegated");

        let back = AgentCard::from_value(value).unwrap();
        assert_eq!(back, card);
    }

    #[test]
    fn test_prompt_section_lists_both_shapes() {
        let card = build_card(
            &identity(),
            &[tool("datetime")],
            &[PeerStatus::Reachable { endpoint: "http://peer".into(), card: peer_card(&["setDevice"]) }],
        );
        let prompt = card.prompt_section();
        assert!(prompt.contains("```tool"));
        assert!(prompt.contains("```delegate"));
        assert!(prompt.contains("(handled by Hubitat Agent)"));
    }
}
