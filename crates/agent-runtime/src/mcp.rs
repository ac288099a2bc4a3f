//! MCP Tool Bridge Transport
//!
//! One [`McpTransport`] is one initialized rmcp client session over
//! streamable HTTP. The SDK owns framing, the session header and reply
//! matching; this module maps its model types onto the bridge's
//! [`RemoteTool`] / [`ToolOutput`] and its failures onto [`AgentError`].

use std::collections::HashSet;

use agent_core::bridge::{RemoteTool, ToolConnector, ToolOutput, ToolTransport};
use agent_core::error::{AgentError, Result};
use agent_core::tool::InputSchema;
use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, ClientCapabilities, ClientInfo, Implementation, PaginatedRequestParam};
use rmcp::service::RunningService;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// Tool entry as listed by the server
#[derive(Debug, Deserialize)]
struct McpTool {
    name: String,
    description: Option<String>,
    #[serde(rename = "inputSchema")]
    input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Option<Vec<ContentItem>>,
    #[serde(rename = "isError", default)]
    is_error: Option<bool>,
    #[serde(rename = "structuredContent")]
    structured_content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

/// Opens MCP sessions against one endpoint
pub struct McpConnector {
    endpoint: String,
}

impl McpConnector {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(AgentError::Config(format!("tool endpoint must be an http(s) URL, got '{endpoint}'")));
        }
        Ok(Self { endpoint })
    }

    fn client_info() -> ClientInfo {
        ClientInfo {
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "home-agents".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                website_url: None,
                icons: None,
            },
        }
    }
}

#[async_trait]
impl ToolConnector for McpConnector {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> Result<Box<dyn ToolTransport>> {
        let transport = StreamableHttpClientTransport::from_uri(self.endpoint.clone());
        let service = Self::client_info()
            .serve(transport)
            .await
            .map_err(|e| AgentError::Connection(format!("{}: {e}", self.endpoint)))?;

        let server = service
            .peer_info()
            .map_or("unknown", |info| info.server_info.name.as_str())
            .to_string();
        info!(endpoint = %self.endpoint, server = %server, "MCP session initialized");

        Ok(Box::new(McpTransport {
            endpoint: self.endpoint.clone(),
            service,
        }))
    }
}

/// One initialized MCP session
struct McpTransport {
    endpoint: String,
    service: RunningService<RoleClient, ClientInfo>,
}

impl McpTransport {
    fn unreachable(&self, detail: impl std::fmt::Display) -> AgentError {
        AgentError::Connection(format!("{}: {detail}", self.endpoint))
    }

    fn page_request(&self, cursor: Option<&str>) -> Result<Option<PaginatedRequestParam>> {
        cursor
            .map(|c| serde_json::from_value(json!({ "cursor": c })))
            .transpose()
            .map_err(|e| self.unreachable(format!("bad cursor: {e}")))
    }
}

fn remote_tool(tool: McpTool) -> RemoteTool {
    let input_schema = match tool.input_schema.as_ref().map(InputSchema::from_json_schema) {
        Some(Ok(schema)) => schema,
        Some(Err(e)) => {
            warn!(tool = %tool.name, error = %e, "Unsupported input schema; arguments unchecked");
            InputSchema::default()
        }
        None => InputSchema::default(),
    };
    RemoteTool {
        name: tool.name,
        description: tool.description,
        input_schema,
    }
}

fn tool_output(call: CallToolResult) -> ToolOutput {
    let text = call
        .content
        .unwrap_or_default()
        .into_iter()
        .filter(|item| item.content_type == "text")
        .filter_map(|item| item.text)
        .collect::<Vec<_>>()
        .join("\n");

    ToolOutput {
        text,
        is_error: call.is_error.unwrap_or(false),
        structured: call.structured_content,
    }
}

#[async_trait]
impl ToolTransport for McpTransport {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>> {
        let mut tools = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .service
                .list_tools(self.page_request(cursor.as_deref())?)
                .await
                .map_err(|e| self.unreachable(format!("tools/list failed: {e}")))?;

            for tool in page.tools {
                let listed: McpTool = serde_json::to_value(&tool)
                    .and_then(serde_json::from_value)
                    .map_err(|e| self.unreachable(format!("unreadable tool entry: {e}")))?;
                tools.push(remote_tool(listed));
            }

            match page.next_cursor {
                Some(next) if !next.is_empty() => {
                    if !seen.insert(next.clone()) {
                        warn!(endpoint = %self.endpoint, cursor = %next, "Tool list cursor repeated; stopping");
                        break;
                    }
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        debug!(endpoint = %self.endpoint, tools = tools.len(), "Tools listed");
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => return Err(AgentError::invocation_failed(name, format!("arguments must be an object, got {other}"))),
        };
        let result = self
            .service
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
            .map_err(|e| AgentError::invocation_failed(name, e))?;

        let call: CallToolResult = serde_json::to_value(&result)
            .and_then(serde_json::from_value)
            .map_err(|e| AgentError::invocation_failed(name, format!("unreadable reply: {e}")))?;
        Ok(tool_output(call))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let Self { endpoint, service } = *self;
        match service.cancel().await {
            Ok(reason) => {
                debug!(endpoint = %endpoint, ?reason, "MCP session ended");
                Ok(())
            }
            Err(e) => Err(AgentError::Connection(format!("{endpoint}: session close failed: {e}"))),
        }
    }
}
