//! Reasoning Loop
//!
//! Drives one task through `Received → Planning → {ToolCall | Delegating →
//! Planning}* → Responding → Done`, or into `Failed` from any non-terminal
//! state. Each step waits on the previous one; nothing inside a session runs
//! concurrently.
//!
//! Failed tool calls and delegations are written back into the conversation
//! so the model can pick another route. The same action may trigger at most
//! `max_replans` re-plans before the task fails.

use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::action::Action;
use crate::card::{AgentCard, CapabilityRegistry};
use crate::delegation::{DelegationCall, DelegationRequest, Delegator};
use crate::error::{AgentError, Result, ToolError};
use crate::message::Message;
use crate::provider::ModelHandle;
use crate::session::{Session, TaskState};
use crate::tool::{ToolCall, ToolResult};

/// What to do when the model asks for something outside the card
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InvalidActionPolicy {
    /// Append an error message and plan again (bounded)
    #[default]
    RePlan,
    /// Fail the task immediately
    Abort,
}

impl std::str::FromStr for InvalidActionPolicy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replan" | "re-plan" => Ok(Self::RePlan),
            "abort" => Ok(Self::Abort),
            other => Err(AgentError::Config(format!("unknown invalid-action policy '{other}'"))),
        }
    }
}

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// System prompt template
    pub system_prompt: String,

    /// Maximum planning steps before giving up
    pub max_iterations: usize,

    /// Re-plans allowed per failing action
    pub max_replans: usize,

    pub invalid_action_policy: InvalidActionPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_iterations: 10,
            max_replans: 2,
            invalid_action_policy: InvalidActionPolicy::RePlan,
        }
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a home assistant agent.

Use a tool or hand the request to another agent when you need to act on
the home. Use exactly one JSON block per reply when you do.

After receiving results, synthesize them into a short answer.
If you can answer directly, do so. Be concise and accurate."#;

/// The main Agent struct
pub struct Agent {
    model: ModelHandle,
    registry: Arc<CapabilityRegistry>,
    delegator: Option<Arc<dyn Delegator>>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        model: ModelHandle,
        registry: Arc<CapabilityRegistry>,
        delegator: Option<Arc<dyn Delegator>>,
        config: AgentConfig,
    ) -> Self {
        Self {
            model,
            registry,
            delegator,
            config,
        }
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Build the full system prompt including the capability snapshot
    fn build_system_prompt(&self, card: &AgentCard) -> String {
        let mut prompt = self.config.system_prompt.clone();
        let section = card.prompt_section();
        if !section.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&section);
        }
        prompt
    }

    /// Run one task to a terminal state
    ///
    /// Messages for the caller go to `events`: relayed peer partials, then
    /// one final message, or one failure message. The caller remains
    /// responsible for `session.release()`.
    pub async fn run(
        &self,
        session: &mut Session,
        events: &mpsc::Sender<Message>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let outcome = self.drive(session, events, cancel).await;
        if let Err(e) = &outcome {
            if matches!(e, AgentError::Cancelled) {
                tracing::info!(session = %session.id, "Task cancelled");
            } else {
                tracing::error!(session = %session.id, error = %e, "Task failed");
            }
            session.fail(e);
            // caller may already be gone; the failure is recorded on the session
            let _ = events.send(Message::failure(e)).await;
        }
        outcome
    }

    async fn drive(
        &self,
        session: &mut Session,
        events: &mpsc::Sender<Message>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        session.transition(TaskState::Planning)?;

        let mut failures: HashMap<String, usize> = HashMap::new();
        let mut prompted: Option<Arc<AgentCard>> = None;

        for iteration in 1..=self.config.max_iterations {
            let card = self.registry.snapshot();
            if prompted.as_deref() != Some(&*card) {
                session.conversation.set_system_prompt(self.build_system_prompt(&card));
                prompted = Some(Arc::clone(&card));
            }
            tracing::debug!(session = %session.id, iteration, "Planning");
            session.conversation.truncate_to_fit();

            let action = match guard(cancel, self.model.complete(session.conversation.messages())).await {
                Ok(action) => action,
                Err(e @ AgentError::InvalidAction(_)) => {
                    let note = self.absorb(&mut failures, "malformed", e)?;
                    session.conversation.push(note);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let signature = action.signature();
            let step = match action {
                Action::Final(text) => return self.respond(session, events, text).await,
                Action::ToolCall(call) => {
                    session.conversation.push(Message::assistant(Action::ToolCall(call.clone()).transcript()));
                    session.transition(TaskState::ToolCall)?;
                    self.call_tool(session, &card, &call, cancel)
                        .await
                        .map(|result| Message::tool(format_tool_result(&result), call.id.clone()))
                }
                Action::Delegate(request) => {
                    session.conversation.push(Message::assistant(Action::Delegate(request.clone()).transcript()));
                    session.transition(TaskState::Delegating)?;
                    self.delegate(session, &card, &request, events, cancel)
                        .await
                        .map(|(peer, text)| Message::tool(format!("[Agent '{peer}' replied]\n{text}"), None))
                }
            };

            let message = match step {
                Ok(message) => message,
                Err(e) => self.absorb(&mut failures, &signature, e)?,
            };
            session.transition(TaskState::Planning)?;
            session.conversation.push(message);
        }

        Err(AgentError::MaxIterations(self.config.max_iterations))
    }

    /// Turn a recoverable failure into a conversation note, or give up
    fn absorb(&self, failures: &mut HashMap<String, usize>, signature: &str, error: AgentError) -> Result<Message> {
        if !error.is_replannable() {
            return Err(error);
        }
        if matches!(error, AgentError::InvalidAction(_))
            && self.config.invalid_action_policy == InvalidActionPolicy::Abort
        {
            return Err(error);
        }

        let count = failures.entry(signature.to_string()).or_insert(0);
        *count += 1;
        if *count > self.config.max_replans {
            tracing::warn!(action = signature, attempts = *count, "Re-plan budget exhausted");
            return Err(error);
        }

        tracing::warn!(action = signature, replan = *count, error = %error, "Action failed; re-planning");
        Ok(Message::tool(
            format!(
                "[{signature} failed: {}]\n{error}\nChoose a different action or answer directly.",
                error.kind()
            ),
            None,
        ))
    }

    async fn respond(&self, session: &mut Session, events: &mpsc::Sender<Message>, text: String) -> Result<String> {
        session.transition(TaskState::Responding)?;
        session.conversation.push(Message::assistant(text.clone()));
        emit(events, Message::assistant(text.clone())).await?;
        session.transition(TaskState::Done)?;
        tracing::info!(session = %session.id, messages = session.message_count(), "Task done");
        Ok(text)
    }

    async fn call_tool(
        &self,
        session: &Session,
        card: &AgentCard,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> Result<ToolResult> {
        let skill = card
            .skill(&call.name)
            .ok_or_else(|| AgentError::InvalidAction(format!("'{}' is not an available tool", call.name)))?;
        if !skill.is_local() {
            return Err(AgentError::InvalidAction(format!(
                "'{}' is handled by another agent; use a delegate block",
                call.name
            )));
        }
        skill.input_schema.validate(&call.name, &call.arguments)?;

        let bridge = session
            .bridge()
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
        tracing::debug!(session = %session.id, tool = %call.name, "Executing tool");
        guard(cancel, bridge.invoke(call)).await
    }

    async fn delegate(
        &self,
        session: &mut Session,
        card: &AgentCard,
        request: &DelegationRequest,
        events: &mpsc::Sender<Message>,
        cancel: &CancellationToken,
    ) -> Result<(String, String)> {
        let delegator = self
            .delegator
            .as_ref()
            .ok_or_else(|| AgentError::InvalidAction("delegation is not configured".into()))?;
        let skill = card
            .skill(&request.skill)
            .ok_or_else(|| AgentError::InvalidAction(format!("'{}' is not an available skill", request.skill)))?;
        let peer = skill
            .peer()
            .ok_or_else(|| {
                AgentError::InvalidAction(format!("'{}' is a local tool; use a tool block", request.skill))
            })?
            .clone();
        skill.input_schema.validate(&request.skill, &request.arguments)?;

        let call = DelegationCall::new(peer.clone(), &request.skill, request.arguments_value());
        tracing::info!(
            session = %session.id,
            peer = %peer.endpoint,
            skill = %request.skill,
            correlation_id = %call.correlation_id,
            "Delegating"
        );

        session.open_delegation(&peer.endpoint);
        let outcome = relay(delegator.as_ref(), call, &peer.name, events, cancel).await;
        session.close_delegation(&peer.endpoint);
        if matches!(outcome, Err(AgentError::PeerUnreachable { .. })) {
            self.registry.exclude_peer(&peer.endpoint);
        }
        outcome.map(|text| (peer.name, text))
    }
}

/// Forward a peer's stream to the caller, in order, and collect its text
async fn relay(
    delegator: &dyn Delegator,
    call: DelegationCall,
    peer_name: &str,
    events: &mpsc::Sender<Message>,
    cancel: &CancellationToken,
) -> Result<String> {
    let mut stream = guard(cancel, delegator.delegate(call)).await?;
    let mut collected = String::new();

    loop {
        let next = guard(cancel, async { Ok(stream.next().await) }).await?;
        match next {
            None => {
                return Err(AgentError::Delegation(
                    "peer stream ended without a final message".into(),
                ));
            }
            Some(Err(e @ (AgentError::Delegation(_) | AgentError::Cancelled))) => return Err(e),
            Some(Err(e)) => return Err(AgentError::Delegation(e.to_string())),
            Some(Ok(message)) => {
                collected.push_str(&message.content);
                emit(events, Message::partial(message.content.clone()).with_name(peer_name)).await?;
                if message.is_final() {
                    return Ok(collected);
                }
            }
        }
    }
}

/// Await `fut` unless the task is cancelled first
async fn guard<T>(cancel: &CancellationToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AgentError::Cancelled),
        result = fut => result,
    }
}

/// Send to the caller; a dropped receiver means nobody is listening anymore
async fn emit(events: &mpsc::Sender<Message>, message: Message) -> Result<()> {
    events.send(message).await.map_err(|_| AgentError::Cancelled)
}

/// Format tool result for conversation
fn format_tool_result(result: &ToolResult) -> String {
    if result.success {
        format!("[Tool '{}' returned]\n{}", result.name, result.output)
    } else {
        format!("[Tool '{}' failed]\n{}", result.name, result.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::{Behaviour, FakeConnector, set_device_tool};
    use crate::bridge::{BridgeHandle, BridgeTimeouts};
    use crate::card::{AgentCard, CardIdentity, Capabilities, PeerStatus, SkillDescriptor, SkillSource};
    use crate::delegation::MessageStream;
    use crate::provider::GenerationOptions;
    use crate::provider::testing::ScriptedProvider;
    use crate::tool::InputSchema;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const SET_DEVICE: &str =
        "```tool\n{\"tool\": \"setDevice\", \"arguments\": {\"id\": 42, \"state\": \"on\"}}\n```";
    const DELEGATE: &str =
        "```delegate\n{\"skill\": \"hubitat\", \"arguments\": {\"message\": \"turn on the hallway light\"}}\n```";
    const PEER: &str = "http://127.0.0.1:9002";

    fn identity() -> CardIdentity {
        CardIdentity {
            name: "Hubitat Agent".into(),
            description: "Controls devices".into(),
            url: "http://127.0.0.1:9002".into(),
            version: "0.1.0".into(),
        }
    }

    fn peer_card() -> AgentCard {
        AgentCard {
            name: "Hubitat Agent".into(),
            description: "Controls devices".into(),
            url: PEER.into(),
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

    struct Fixture {
        agent: Agent,
        provider: Arc<ScriptedProvider>,
        connector: FakeConnector,
        session: Session,
    }

    async fn fixture(replies: &[&str], behaviour: Behaviour, delegator: Option<Arc<dyn Delegator>>, config: AgentConfig) -> Fixture {
        let connector = FakeConnector::new(vec![set_device_tool()], behaviour);
        let mut bridge = BridgeHandle::connect(&connector, BridgeTimeouts::default()).await.unwrap();
        let tools = bridge.list_tools().await.unwrap();

        let peers = if delegator.is_some() {
            vec![PeerStatus::Reachable { endpoint: PEER.into(), card: peer_card() }]
        } else {
            Vec::new()
        };
        let registry = Arc::new(CapabilityRegistry::new(identity()));
        registry.rebuild(&tools, &peers);

        let provider = Arc::new(ScriptedProvider::ok(replies));
        let model = ModelHandle::new(provider.clone(), GenerationOptions::default());

        let mut session = Session::new();
        session.attach_bridge(bridge);
        session.conversation.push(Message::user("turn on the hallway light"));

        Fixture {
            agent: Agent::new(model, registry, delegator, config),
            provider,
            connector,
            session,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(msg) = rx.recv().await {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_hallway_light_scenario() {
        let mut fx = fixture(
            &[SET_DEVICE, "Done — hallway light is on"],
            Behaviour::Reply(r#"{"status": "ok"}"#.into()),
            None,
            AgentConfig::default(),
        )
        .await;
        let (tx, rx) = mpsc::channel(16);

        let answer = fx.agent.run(&mut fx.session, &tx, &CancellationToken::new()).await.unwrap();
        drop(tx);
        let events = drain(rx).await;

        assert_eq!(answer, "Done — hallway light is on");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_final());
        assert_eq!(events[0].content, "Done — hallway light is on");
        assert_eq!(
            fx.session.history(),
            &[
                TaskState::Received,
                TaskState::Planning,
                TaskState::ToolCall,
                TaskState::Planning,
                TaskState::Responding,
                TaskState::Done,
            ]
        );
        assert_eq!(fx.connector.counters.calls(), 1);

        // the model saw the tool result before answering
        let seen = fx.provider.seen.lock().unwrap();
        assert!(seen[1].iter().any(|m| m.content.contains(r#"{"status": "ok"}"#)));
        drop(seen);

        fx.session.release().await;
        assert_eq!(fx.connector.counters.closes(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_replans() {
        let fly = "```tool\n{\"tool\": \"fly\", \"arguments\": {}}\n```";
        let mut fx = fixture(&[fly, "I cannot fly."], Behaviour::Reply("ok".into()), None, AgentConfig::default()).await;
        let (tx, rx) = mpsc::channel(16);

        let answer = fx.agent.run(&mut fx.session, &tx, &CancellationToken::new()).await.unwrap();
        drop(tx);

        assert_eq!(answer, "I cannot fly.");
        assert_eq!(drain(rx).await.len(), 1);
        assert!(
            fx.session
                .conversation
                .messages()
                .iter()
                .any(|m| m.content.contains("InvalidAction"))
        );
        assert_eq!(fx.connector.counters.calls(), 0);
    }

    #[tokio::test]
    async fn test_abort_policy_fails_on_invalid_action() {
        let bad_args = "```tool\n{\"tool\": \"setDevice\", \"arguments\": {\"id\": 42}}\n```";
        let config = AgentConfig {
            invalid_action_policy: InvalidActionPolicy::Abort,
            ..Default::default()
        };
        let mut fx = fixture(&[bad_args, "unused"], Behaviour::Reply("ok".into()), None, config).await;
        let (tx, rx) = mpsc::channel(16);

        let err = fx.agent.run(&mut fx.session, &tx, &CancellationToken::new()).await.unwrap_err();
        drop(tx);
        let events = drain(rx).await;

        assert_eq!(err.kind(), "InvalidAction");
        assert_eq!(fx.provider.calls(), 1);
        assert!(matches!(fx.session.state(), TaskState::Failed { reason } if reason.kind == "InvalidAction"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].error().unwrap().kind, "InvalidAction");
    }

    #[tokio::test]
    async fn test_malformed_block_replans() {
        let mut fx = fixture(
            &["```tool\n{oops}\n```", "Sorry, here is the answer."],
            Behaviour::Reply("ok".into()),
            None,
            AgentConfig::default(),
        )
        .await;
        let (tx, _rx) = mpsc::channel(16);

        let answer = fx.agent.run(&mut fx.session, &tx, &CancellationToken::new()).await.unwrap();
        assert_eq!(answer, "Sorry, here is the answer.");
        assert_eq!(fx.provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_same_failing_action_replans_twice_then_fails() {
        let mut fx = fixture(
            &[SET_DEVICE, SET_DEVICE, SET_DEVICE, "never reached"],
            Behaviour::Fail("hub offline".into()),
            None,
            AgentConfig::default(),
        )
        .await;
        let (tx, _rx) = mpsc::channel(16);

        let err = fx.agent.run(&mut fx.session, &tx, &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.kind(), "InvocationFailed");
        assert_eq!(fx.connector.counters.calls(), 3);
        assert_eq!(fx.provider.calls(), 3);
        assert!(matches!(fx.session.state(), TaskState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_cancel_during_tool_call() {
        let mut fx = fixture(&[SET_DEVICE], Behaviour::Hang, None, AgentConfig::default()).await;
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = fx.agent.run(&mut fx.session, &tx, &cancel).await.unwrap_err();
        fx.session.release().await;
        drop(tx);

        assert!(matches!(err, AgentError::Cancelled));
        assert!(fx.session.state().is_cancelled());
        assert_eq!(fx.connector.counters.closes(), 1);
        let events = drain(rx).await;
        assert_eq!(events.last().unwrap().error().unwrap().kind, "Cancelled");

        drop(fx.session);
        tokio::task::yield_now().await;
        assert_eq!(fx.connector.counters.closes(), 1);
    }

    #[tokio::test]
    async fn test_provider_unavailable_fails_task() {
        let mut fx = fixture(&[], Behaviour::Reply("ok".into()), None, AgentConfig::default()).await;
        let (tx, _rx) = mpsc::channel(16);

        let err = fx.agent.run(&mut fx.session, &tx, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), "ProviderUnavailable");
        assert!(matches!(fx.session.state(), TaskState::Failed { .. }));
    }

    /// Peer that replays a fixed stream for every call
    struct FakeDelegator {
        script: Vec<Result<Message>>,
        calls: AtomicUsize,
        correlation_ids: Mutex<Vec<String>>,
    }

    impl FakeDelegator {
        fn new(script: Vec<Result<Message>>) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: AtomicUsize::new(0),
                correlation_ids: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Delegator for FakeDelegator {
        async fn discover(&self, _endpoint: &str) -> Result<AgentCard> {
            Ok(peer_card())
        }

        async fn delegate(&self, call: DelegationCall) -> Result<MessageStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.correlation_ids.lock().unwrap().push(call.correlation_id);
            let items: Vec<Result<Message>> = self
                .script
                .iter()
                .map(|item| match item {
                    Ok(m) => Ok(m.clone()),
                    Err(e) => Err(AgentError::Delegation(e.to_string())),
                })
                .collect();
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn final_message(text: &str) -> Message {
        Message::assistant(text)
    }

    #[tokio::test]
    async fn test_delegation_relays_partials_in_order() {
        let delegator = FakeDelegator::new(vec![
            Ok(Message::partial("Turning ")),
            Ok(Message::partial("on ")),
            Ok(final_message("the light.")),
        ]);
        let mut fx = fixture(
            &[DELEGATE, "The hallway light is on."],
            Behaviour::Reply("ok".into()),
            Some(delegator.clone()),
            AgentConfig::default(),
        )
        .await;
        let (tx, rx) = mpsc::channel(16);

        fx.agent.run(&mut fx.session, &tx, &CancellationToken::new()).await.unwrap();
        drop(tx);
        let events = drain(rx).await;

        let texts: Vec<&str> = events.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, ["Turning ", "on ", "the light.", "The hallway light is on."]);
        assert!(events[..3].iter().all(|m| m.partial));
        assert!(events[3].is_final());
        assert!(fx.session.delegations().is_empty());
        assert!(fx.session.history().contains(&TaskState::Delegating));
        assert!(
            fx.session
                .conversation
                .messages()
                .iter()
                .any(|m| m.content.contains("Turning on the light."))
        );
    }

    #[tokio::test]
    async fn test_mid_stream_failure_is_not_retried() {
        let delegator = FakeDelegator::new(vec![
            Ok(Message::partial("Working")),
            Err(AgentError::Delegation("connection reset".into())),
        ]);
        let mut fx = fixture(
            &[DELEGATE, "The house agent failed; please try again."],
            Behaviour::Reply("ok".into()),
            Some(delegator.clone()),
            AgentConfig::default(),
        )
        .await;
        let (tx, _rx) = mpsc::channel(16);

        let answer = fx.agent.run(&mut fx.session, &tx, &CancellationToken::new()).await.unwrap();

        assert_eq!(answer, "The house agent failed; please try again.");
        assert_eq!(delegator.calls.load(Ordering::SeqCst), 1);
        assert!(
            fx.session
                .conversation
                .messages()
                .iter()
                .any(|m| m.content.contains("DelegationError"))
        );
    }

    #[tokio::test]
    async fn test_tool_block_for_delegated_skill_is_invalid() {
        let delegator = FakeDelegator::new(vec![Ok(final_message("x"))]);
        let misuse = "```tool\n{\"tool\": \"hubitat\", \"arguments\": {}}\n```";
        let mut fx = fixture(
            &[misuse, "ok"],
            Behaviour::Reply("ok".into()),
            Some(delegator.clone()),
            AgentConfig::default(),
        )
        .await;
        let (tx, _rx) = mpsc::channel(16);

        fx.agent.run(&mut fx.session, &tx, &CancellationToken::new()).await.unwrap();
        assert_eq!(delegator.calls.load(Ordering::SeqCst), 0);
    }

    /// Peer that refuses every connection
    struct DeadPeer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Delegator for DeadPeer {
        async fn discover(&self, endpoint: &str) -> Result<AgentCard> {
            Err(AgentError::peer_unreachable(endpoint, "connection refused"))
        }

        async fn delegate(&self, call: DelegationCall) -> Result<MessageStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AgentError::peer_unreachable(call.target.endpoint, "connection refused"))
        }
    }

    #[tokio::test]
    async fn test_unreachable_peer_leaves_card_and_prompt() {
        let dead = Arc::new(DeadPeer { calls: AtomicUsize::new(0) });
        let mut fx = fixture(
            &[DELEGATE, DELEGATE, "The house agent is offline."],
            Behaviour::Reply("ok".into()),
            Some(dead.clone()),
            AgentConfig::default(),
        )
        .await;
        assert!(fx.agent.registry().snapshot().skill("hubitat").is_some());
        let (tx, _rx) = mpsc::channel(16);

        let answer = fx.agent.run(&mut fx.session, &tx, &CancellationToken::new()).await.unwrap();

        assert_eq!(answer, "The house agent is offline.");
        assert_eq!(dead.calls.load(Ordering::SeqCst), 1);
        let card = fx.agent.registry().snapshot();
        assert!(card.skill("hubitat").is_none());
        assert!(card.skill("setDevice").is_some());

        let seen = fx.provider.seen.lock().unwrap();
        assert!(seen[0][0].content.contains("```delegate"));
        assert!(!seen[1][0].content.contains("```delegate"));
        assert!(seen[1][0].content.contains("setDevice"));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("replan".parse::<InvalidActionPolicy>().unwrap(), InvalidActionPolicy::RePlan);
        assert_eq!("ABORT".parse::<InvalidActionPolicy>().unwrap(), InvalidActionPolicy::Abort);
        assert!("maybe".parse::<InvalidActionPolicy>().is_err());
    }
}
