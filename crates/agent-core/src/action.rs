//! Planning actions
//!
//! The reasoning loop recognizes exactly three shapes in model output: a
//! fenced ```` ```tool ```` block, a fenced ```` ```delegate ```` block, or
//! plain text (the final answer). A fence that is present but unparsable is
//! reported as `InvalidAction` so the loop can ask the model again.

use crate::delegation::DelegationRequest;
use crate::error::{AgentError, Result};
use crate::tool::ToolCall;

/// Next step chosen by the model
#[derive(Clone, Debug)]
pub enum Action {
    Final(String),
    ToolCall(ToolCall),
    Delegate(DelegationRequest),
}

const TOOL_FENCE: &str = "```tool";
const DELEGATE_FENCE: &str = "```delegate";
const FENCE_END: &str = "```";

impl Action {
    /// Interpret raw completion text
    pub fn parse(content: &str) -> Result<Self> {
        if let Some(body) = fenced(content, TOOL_FENCE)? {
            let mut call: ToolCall = serde_json::from_str(body)
                .map_err(|e| AgentError::InvalidAction(format!("unreadable tool block: {e}")))?;
            if call.id.is_none() {
                call.id = Some(uuid::Uuid::new_v4().to_string());
            }
            return Ok(Self::ToolCall(call));
        }

        if let Some(body) = fenced(content, DELEGATE_FENCE)? {
            let request: DelegationRequest = serde_json::from_str(body)
                .map_err(|e| AgentError::InvalidAction(format!("unreadable delegate block: {e}")))?;
            return Ok(Self::Delegate(request));
        }

        if let Some(call) = parse_inline_tool_call(content) {
            return Ok(Self::ToolCall(call));
        }

        Ok(Self::Final(content.trim().to_string()))
    }

    /// Short label used to count repeated failures of the same action
    pub fn signature(&self) -> String {
        match self {
            Self::Final(_) => "final".into(),
            Self::ToolCall(call) => format!("tool:{}", call.name),
            Self::Delegate(req) => format!("delegate:{}", req.skill),
        }
    }

    /// Transcript line stored as the assistant turn
    pub fn transcript(&self) -> String {
        match self {
            Self::Final(text) => text.clone(),
            Self::ToolCall(call) => format!(
                "{TOOL_FENCE}\n{}\n{FENCE_END}",
                serde_json::json!({"tool": call.name, "arguments": call.arguments})
            ),
            Self::Delegate(req) => format!(
                "{DELEGATE_FENCE}\n{}\n{FENCE_END}",
                serde_json::json!({"skill": req.skill, "arguments": req.arguments})
            ),
        }
    }
}

fn fenced<'a>(content: &'a str, marker: &str) -> Result<Option<&'a str>> {
    let Some(start_idx) = content.find(marker) else {
        return Ok(None);
    };
    let after_marker = &content[start_idx + marker.len()..];
    match after_marker.find(FENCE_END) {
        Some(end_idx) => Ok(Some(after_marker[..end_idx].trim())),
        None => Err(AgentError::InvalidAction(format!("unterminated {marker} block"))),
    }
}

/// Bare JSON object with a "tool" key, as some local models emit
fn parse_inline_tool_call(content: &str) -> Option<ToolCall> {
    if !content.contains(r#""tool""#) {
        return None;
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }

    let mut call = serde_json::from_str::<ToolCall>(&content[start..=end]).ok()?;
    call.id.get_or_insert_with(|| uuid::Uuid::new_v4().to_string());
    Some(call)
}
