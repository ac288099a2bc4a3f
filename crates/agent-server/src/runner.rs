//! Task runner
//!
//! Turns one inbound invocation into one isolated session running on its
//! own tokio task. The caller gets the task id and a channel of outgoing
//! messages; the channel closes once the session is released.

use tokio::sync::mpsc;
use tracing::{info, warn};

use agent_core::bridge::BridgeHandle;
use agent_core::error::{AgentError, Result};
use agent_core::message::Message;
use agent_core::protocol::InvocationRequest;
use agent_core::session::Session;

use crate::state::AppState;

const EVENT_BUFFER: usize = 32;

/// A started task
pub struct TaskHandle {
    pub task_id: String,
    pub correlation_id: String,
    pub context_id: Option<String>,
    pub events: mpsc::Receiver<Message>,
}

/// Validate and start one task
///
/// A `skillId` missing from the current card is refused here, before any
/// session exists.
pub fn start(state: &AppState, request: InvocationRequest) -> Result<TaskHandle> {
    if let Some(skill) = &request.skill_id {
        if state.registry.snapshot().skill(skill).is_none() {
            return Err(AgentError::InvalidAction(format!("unknown skill '{skill}'")));
        }
    }

    let guard = state.tasks.register();
    let task_id = guard.id().to_string();
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    let mut session = Session::new();
    session.context_id.clone_from(&request.context_id);
    session.conversation.push(Message::user(request.task_text()));

    info!(
        task = %task_id,
        session = %session.id,
        correlation_id = %request.correlation_id,
        skill = request.skill_id.as_deref().unwrap_or("-"),
        "Task received"
    );

    let state = state.clone();
    tokio::spawn(async move {
        let cancel = guard.token().clone();

        let bridge = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            bridge = open_bridge(&state) => bridge,
        };
        if let Some(bridge) = bridge {
            session.attach_bridge(bridge);
        }

        let outcome = tokio::select! {
            outcome = state.agent.run(&mut session, &tx, &cancel) => Some(outcome),
            () = tx.closed() => None,
        };
        if outcome.is_none() {
            info!(session = %session.id, "Caller went away; cancelling");
            session.fail(&AgentError::Cancelled);
        }

        session.release().await;
        info!(
            session = %session.id,
            state = session.state().label(),
            elapsed_ms = session.duration().num_milliseconds(),
            "Task finished"
        );
        drop(guard);
    });

    Ok(TaskHandle {
        task_id,
        correlation_id: request.correlation_id,
        context_id: request.context_id,
        events: rx,
    })
}

/// Private bridge for one session
///
/// A backend that is down leaves the task without local tools rather than
/// failing it, and takes those tools off the published card until the next
/// successful refresh.
async fn open_bridge(state: &AppState) -> Option<BridgeHandle> {
    let connector = state.connector.as_deref()?;

    let mut bridge =
        match BridgeHandle::connect_with_retry(connector, state.bridge_timeouts.clone(), &state.retry).await {
            Ok(bridge) => bridge,
            Err(e) => {
                warn!(endpoint = %connector.endpoint(), error = %e, "Tool bridge unavailable for this task");
                state.registry.exclude_local();
                return None;
            }
        };

    match bridge.list_tools().await {
        Ok(_) => Some(bridge),
        Err(e) => {
            warn!(endpoint = %connector.endpoint(), error = %e, "Tool listing failed; closing bridge");
            state.registry.exclude_local();
            if let Err(e) = bridge.close().await {
                warn!(error = %e, "Bridge close failed");
            }
            None
        }
    }
}
