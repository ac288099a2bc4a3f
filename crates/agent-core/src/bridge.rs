//! Tool Bridge
//!
//! A [`BridgeHandle`] owns one connection to one tool-invocation endpoint.
//! The catalog is fetched once per connection and cached; invocations are
//! checked against that cache and the tool's schema before they leave the
//! process. The transport is released exactly once: through
//! [`BridgeHandle::close`] on the normal path, or from `Drop` when the
//! owning future is abandoned (cancellation, panic unwinding).
//!
//! The wire protocol lives behind [`ToolConnector`] / [`ToolTransport`];
//! `agent-runtime` provides the HTTP implementation.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{AgentError, Result, ToolError};
use crate::retry::RetryPolicy;
use crate::tool::{BridgeSessionId, InputSchema, ToolCall, ToolDescriptor, ToolResult};

/// Tool as reported by the backend, before it is bound to a session
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: InputSchema,
}

/// Raw outcome of one backend call
#[derive(Clone, Debug, Default)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
    pub structured: Option<Value>,
}

/// Opens transports to one configured endpoint
#[async_trait]
pub trait ToolConnector: Send + Sync {
    /// Endpoint URL, for logs and errors
    fn endpoint(&self) -> &str;

    /// Establish a transport; refusal is `AgentError::Connection`
    async fn connect(&self) -> Result<Box<dyn ToolTransport>>;
}

/// One established connection to a tool backend
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput>;

    /// End the session; consumes the transport
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Wait bounds for a bridge session
#[derive(Clone, Debug)]
pub struct BridgeTimeouts {
    pub connect: Duration,
    /// Default bound for listing and invoking
    pub invoke: Duration,
    /// Per-tool invocation overrides
    pub per_tool: HashMap<String, Duration>,
}

impl Default for BridgeTimeouts {
    fn default() -> Self {
        Self::uniform(Duration::from_secs(10))
    }
}

impl BridgeTimeouts {
    /// Same bound for connecting and invoking
    pub fn uniform(bound: Duration) -> Self {
        Self {
            connect: bound,
            invoke: bound,
            per_tool: HashMap::new(),
        }
    }

    pub fn for_tool(&self, name: &str) -> Duration {
        self.per_tool.get(name).copied().unwrap_or(self.invoke)
    }
}

/// Handle to one live tool bridge session
pub struct BridgeHandle {
    id: BridgeSessionId,
    endpoint: String,
    transport: Option<Box<dyn ToolTransport>>,
    catalog: Option<Vec<ToolDescriptor>>,
    timeouts: BridgeTimeouts,
}

impl std::fmt::Debug for BridgeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHandle")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("open", &self.transport.is_some())
            .field("tools", &self.catalog.as_ref().map(Vec::len))
            .finish()
    }
}

impl BridgeHandle {
    /// Connect within `timeouts.connect`
    pub async fn connect(connector: &dyn ToolConnector, timeouts: BridgeTimeouts) -> Result<Self> {
        let endpoint = connector.endpoint().to_string();
        let transport = tokio::time::timeout(timeouts.connect, connector.connect())
            .await
            .map_err(|_| {
                AgentError::Connection(format!(
                    "{endpoint} did not answer within {:?}",
                    timeouts.connect
                ))
            })??;

        let id = BridgeSessionId::new();
        tracing::debug!(bridge = %id, endpoint = %endpoint, "Tool bridge connected");

        Ok(Self {
            id,
            endpoint,
            transport: Some(transport),
            catalog: None,
            timeouts,
        })
    }

    /// Connect with bounded backoff on `ConnectionError`
    pub async fn connect_with_retry(
        connector: &dyn ToolConnector,
        timeouts: BridgeTimeouts,
        policy: &RetryPolicy,
    ) -> Result<Self> {
        policy
            .run("tool bridge connect", || Self::connect(connector, timeouts.clone()))
            .await
    }

    pub fn id(&self) -> &BridgeSessionId {
        &self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn transport(&self) -> Result<&dyn ToolTransport> {
        self.transport
            .as_deref()
            .ok_or_else(|| AgentError::Connection(format!("bridge {} is closed", self.id)))
    }

    /// Fetch the catalog on first call; later calls return the cached copy
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        if let Some(catalog) = &self.catalog {
            return Ok(catalog.clone());
        }

        let bound = self.timeouts.invoke;
        let remote = tokio::time::timeout(bound, self.transport()?.list_tools())
            .await
            .map_err(|_| AgentError::Connection(format!("{} tool listing timed out", self.endpoint)))??;

        let mut seen = std::collections::HashSet::new();
        let catalog: Vec<ToolDescriptor> = remote
            .into_iter()
            .filter(|tool| {
                let fresh = seen.insert(tool.name.clone());
                if !fresh {
                    tracing::warn!(bridge = %self.id, tool = %tool.name, "Duplicate tool name ignored");
                }
                fresh
            })
            .map(|tool| ToolDescriptor {
                name: tool.name,
                description: tool.description.unwrap_or_default(),
                schema: tool.input_schema,
                origin: self.id.clone(),
            })
            .collect();

        tracing::info!(bridge = %self.id, tools = catalog.len(), "Tool catalog cached");
        self.catalog = Some(catalog.clone());
        Ok(catalog)
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.catalog.as_ref()?.iter().find(|t| t.name == name)
    }

    /// Dispatch one call
    ///
    /// Unknown names and invalid arguments are rejected locally; backend
    /// failures and timeouts become `ToolError::InvocationFailed`.
    pub async fn invoke(&self, call: &ToolCall) -> Result<ToolResult> {
        let descriptor = self
            .descriptor(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
        descriptor.schema.validate(&call.name, &call.arguments)?;

        let bound = self.timeouts.for_tool(&call.name);
        let transport = self.transport()?;
        tracing::debug!(bridge = %self.id, tool = %call.name, "Invoking tool");

        let output = match tokio::time::timeout(bound, transport.call_tool(&call.name, call.arguments_value())).await {
            Err(_) => return Err(AgentError::invocation_failed(&call.name, format!("timed out after {bound:?}"))),
            Ok(Err(AgentError::Tool(e))) => return Err(e.into()),
            Ok(Err(e)) => return Err(AgentError::invocation_failed(&call.name, e)),
            Ok(Ok(output)) => output,
        };

        if output.is_error {
            return Err(AgentError::invocation_failed(&call.name, output.text));
        }

        let mut result = ToolResult::success(&call.name, output.text).with_id(call.id.clone());
        if let Some(data) = output.structured {
            result = result.with_data(data);
        }
        Ok(result)
    }

    /// Release the transport; the only sanctioned way to end a session
    pub async fn close(mut self) -> Result<()> {
        let Some(transport) = self.transport.take() else {
            return Ok(());
        };
        tracing::debug!(bridge = %self.id, "Closing tool bridge");
        match tokio::time::timeout(self.timeouts.connect, transport.close()).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Connection(format!("{} close timed out", self.endpoint))),
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        let Some(transport) = self.transport.take() else {
            return;
        };
        let id = self.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(bridge = %id, "Bridge dropped while open; closing in background");
                handle.spawn(async move {
                    if let Err(e) = transport.close().await {
                        tracing::warn!(bridge = %id, error = %e, "Background bridge close failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(bridge = %id, "Bridge dropped outside a runtime; transport leaked");
            }
        }
    }
}
