//! MCP client implementation.

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use super::protocol::{
    CallToolParams, ClientCapabilities, GetPromptParams, Implementation, InitializeParams,
    InitializeResult, JsonRpcNotification, JsonRpcRequest, ListPromptsResult, ListToolsResult,
    PaginatedParams, RpcFailure, MCP_PROTOCOL_VERSION,
};
use super::transport::McpTransport;
use crate::errors::{AgentError, AgentResult};
use crate::models::content::ToolResult;
use crate::models::prompt::{PromptInfo, RenderedPrompt};
use crate::models::tool::Tool;
use crate::tracking::{track, TrackKind, Tracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Uninitialized,
    Connected,
    Closed,
}

/// Why a single round trip failed
#[derive(Error, Debug)]
enum RequestError {
    #[error("{0:#}")]
    Transport(anyhow::Error),

    #[error("{0}")]
    Response(RpcFailure),
}

/// Client for a tool registry speaking MCP.
///
/// The client moves through `Uninitialized -> Connected -> Closed`. Every operation
/// other than [`McpClient::connect`] and [`McpClient::close`] requires the connected
/// state.
pub struct McpClient {
    transport: Box<dyn McpTransport>,
    state: ClientState,
    server_info: Option<InitializeResult>,
    tools: Vec<Tool>,
    prompts: Vec<PromptInfo>,
    tracker: Arc<dyn Tracker>,
}

impl McpClient {
    pub fn new(transport: Box<dyn McpTransport>, tracker: Arc<dyn Tracker>) -> Self {
        Self {
            transport,
            state: ClientState::Uninitialized,
            server_info: None,
            tools: Vec::new(),
            prompts: Vec::new(),
            tracker,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.as_ref()
    }

    /// The cached tool catalog from the last discovery
    pub fn tools(&self) -> AgentResult<&[Tool]> {
        self.ensure_connected("tools")?;
        Ok(&self.tools)
    }

    fn ensure_connected(&self, operation: &str) -> AgentResult<()> {
        match self.state {
            ClientState::Connected => Ok(()),
            ClientState::Uninitialized => Err(AgentError::NotInitialized(format!(
                "{} requires a connected client, call connect() first",
                operation
            ))),
            ClientState::Closed => Err(AgentError::NotInitialized(format!(
                "{} called on a closed client",
                operation
            ))),
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, RequestError> {
        let response = self
            .transport
            .send(JsonRpcRequest::new(method, params))
            .await
            .map_err(RequestError::Transport)?;
        response.into_result().map_err(RequestError::Response)
    }

    /// Perform the MCP handshake.
    pub async fn connect(&mut self) -> AgentResult<()> {
        match self.state {
            ClientState::Connected => {
                tracing::warn!("MCP client already connected");
                return Ok(());
            }
            ClientState::Closed => {
                return Err(AgentError::Connection(
                    "client has been closed and cannot reconnect".to_string(),
                ));
            }
            ClientState::Uninitialized => {}
        }

        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "analyst".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let params = serde_json::to_value(&params)
            .map_err(|e| AgentError::Connection(e.to_string()))?;

        let info: InitializeResult = self
            .request("initialize", Some(params))
            .await
            .map_err(|e| AgentError::Connection(format!("initialize failed: {}", e)))?;

        self.transport
            .notify(JsonRpcNotification::new("notifications/initialized"))
            .await
            .map_err(|e| AgentError::Connection(format!("initialized notification failed: {:#}", e)))?;

        tracing::info!(
            "MCP session initialized with {} {} (protocol {})",
            info.server_info.name,
            info.server_info.version,
            info.protocol_version
        );
        self.server_info = Some(info);
        self.state = ClientState::Connected;
        Ok(())
    }

    /// List every tool the registry exposes and cache the catalog.
    pub async fn discover_tools(&mut self) -> AgentResult<&[Tool]> {
        self.ensure_connected("discover_tools")?;

        let mut tools = Vec::new();
        let mut cursor = None;
        let mut seen_cursors = HashSet::new();
        loop {
            let params = serde_json::to_value(PaginatedParams { cursor })
                .map_err(|e| AgentError::Discovery(e.to_string()))?;
            let page: ListToolsResult = self
                .request("tools/list", Some(params))
                .await
                .map_err(|e| AgentError::Discovery(format!("tools/list failed: {}", e)))?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !seen_cursors.insert(next.clone()) => {
                    return Err(AgentError::Discovery(format!(
                        "tools/list repeated cursor {}",
                        next
                    )));
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::info!("Discovered {} tools", tools.len());
        for tool in &tools {
            tracing::debug!(
                "  - {}: {}",
                tool.name,
                tool.description.as_deref().unwrap_or("No description")
            );
        }

        self.tools = tools;
        Ok(&self.tools)
    }

    /// List the registry's prompt templates.
    ///
    /// Protocol failures are logged and produce an empty list.
    pub async fn discover_prompts(&mut self) -> AgentResult<&[PromptInfo]> {
        self.ensure_connected("discover_prompts")?;

        let params = json!({});
        match self
            .request::<ListPromptsResult>("prompts/list", Some(params))
            .await
        {
            Ok(result) => {
                tracing::info!("Discovered {} prompts:", result.prompts.len());
                for prompt in &result.prompts {
                    tracing::info!(
                        "  - {}: {}",
                        prompt.name,
                        prompt.description.as_deref().unwrap_or("No description")
                    );
                }
                self.prompts = result.prompts;
            }
            Err(e) => {
                tracing::warn!("Failed to discover prompts: {}", e);
                self.prompts.clear();
            }
        }

        Ok(&self.prompts)
    }

    /// Render a named prompt with the given arguments.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> AgentResult<RenderedPrompt> {
        self.ensure_connected("get_prompt")?;
        tracing::info!("Fetching prompt: {}", name);

        let params = serde_json::to_value(GetPromptParams {
            name: name.to_string(),
            arguments,
        })
        .map_err(|e| AgentError::PromptNotFound(format!("{}: {}", name, e)))?;

        let prompt: RenderedPrompt = self
            .request("prompts/get", Some(params))
            .await
            .map_err(|e| match e {
                RequestError::Transport(e) => {
                    AgentError::Connection(format!("prompts/get failed: {:#}", e))
                }
                RequestError::Response(failure) => {
                    AgentError::PromptNotFound(format!("{}: {}", name, failure))
                }
            })?;

        tracing::info!("Prompt {} fetched successfully", name);
        Ok(prompt)
    }

    /// Invoke a tool from the cached catalog.
    ///
    /// Unknown tools and arguments that violate the tool's input schema are rejected
    /// before the registry is contacted.
    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> AgentResult<ToolResult> {
        self.ensure_connected("call_tool")?;

        let tool = self
            .tools
            .iter()
            .find(|tool| tool.name == name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;
        tool.validate_arguments(&arguments)?;

        let input = json!({"name": name, "arguments": arguments});
        track(self.tracker.as_ref(), "call-tool", TrackKind::Tool, input, async {
            let args = Value::Object(arguments.clone());
            tracing::info!("Calling tool: {} with args: {}", name, args);

            let params = serde_json::to_value(CallToolParams {
                name: name.to_string(),
                arguments,
            })
            .map_err(|e| AgentError::ToolExecution(format!("{}: {}", name, e)))?;

            let result: ToolResult = self
                .request("tools/call", Some(params))
                .await
                .map_err(|e| {
                    tracing::error!("Failed to call tool {}: {}", name, e);
                    AgentError::ToolExecution(format!("{}: {}", name, e))
                })?;

            if result.is_error {
                tracing::error!("Tool {} reported an error", name);
                return Err(AgentError::ToolExecution(format!("{}: {}", name, result.to_text())));
            }

            tracing::info!("Tool {} executed successfully", name);
            Ok(result)
        })
        .await
    }

    /// Release the connection. Later calls are no-ops.
    pub async fn close(&mut self) -> AgentResult<()> {
        if self.state == ClientState::Closed {
            tracing::debug!("MCP client already closed");
            return Ok(());
        }

        tracing::info!("Closing MCP connection");
        self.state = ClientState::Closed;
        self.tools.clear();
        self.prompts.clear();

        self.transport
            .close()
            .await
            .map_err(|e| AgentError::Connection(format!("close failed: {:#}", e)))?;

        tracing::info!("MCP connection closed");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{repo_info_tool, StubTransport};
    use super::*;
    use crate::tracking::testing::MemoryTracker;
    use crate::tracking::NoopTracker;

    fn client(stub: &StubTransport) -> McpClient {
        McpClient::new(Box::new(stub.clone()), Arc::new(NoopTracker))
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    async fn connected(stub: &StubTransport) -> McpClient {
        let mut client = client(stub);
        client.connect().await.unwrap();
        client.discover_tools().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let stub = StubTransport::new();
        let mut client = client(&stub);

        assert!(matches!(client.discover_tools().await, Err(AgentError::NotInitialized(_))));
        assert!(matches!(client.discover_prompts().await, Err(AgentError::NotInitialized(_))));
        assert!(matches!(
            client.get_prompt("p", HashMap::new()).await,
            Err(AgentError::NotInitialized(_))
        ));
        assert!(matches!(
            client.call_tool("repo_get_repo_info", Map::new()).await,
            Err(AgentError::NotInitialized(_))
        ));
        assert!(stub.methods().is_empty());
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let stub = StubTransport::new();
        let mut client = client(&stub);

        client.connect().await.unwrap();
        client.connect().await.unwrap();

        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(stub.methods(), vec!["initialize"]);
        assert_eq!(client.server_info().unwrap().server_info.name, "github_analytics_registry");
    }

    #[tokio::test]
    async fn test_connect_failure_is_surfaced() {
        let stub = StubTransport::default();
        let mut client = client(&stub);

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, AgentError::Connection(msg) if msg.contains("connection refused")));
        assert_eq!(client.state(), ClientState::Uninitialized);
        assert_eq!(stub.methods().len(), 1);
    }

    #[tokio::test]
    async fn test_discover_tools_follows_pagination() {
        let stub = StubTransport::new()
            .respond("tools/list", json!({"tools": [repo_info_tool()], "nextCursor": "2"}))
            .respond(
                "tools/list",
                json!({"tools": [{"name": "issue_count_open_issues", "inputSchema": {"type": "object"}}]}),
            );
        let mut client = client(&stub);
        client.connect().await.unwrap();

        let names: Vec<_> = client
            .discover_tools()
            .await
            .unwrap()
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(names, vec!["repo_get_repo_info", "issue_count_open_issues"]);

        let sent = stub.sent.lock().unwrap();
        assert_eq!(sent[2].params, Some(json!({"cursor": "2"})));
    }

    #[tokio::test]
    async fn test_discover_tools_rejects_repeated_cursor() {
        let stub = StubTransport::new()
            .respond("tools/list", json!({"tools": [repo_info_tool()], "nextCursor": "again"}));
        let mut client = client(&stub);
        client.connect().await.unwrap();

        let err = client.discover_tools().await.unwrap_err();
        assert!(matches!(&err, AgentError::Discovery(msg) if msg.contains("again")));
        assert!(client.tools().unwrap().is_empty());

        let pages = stub
            .methods()
            .iter()
            .filter(|method| method.as_str() == "tools/list")
            .count();
        assert_eq!(pages, 2);
    }

    #[tokio::test]
    async fn test_discover_tools_failure() {
        let stub = StubTransport::new().fail("tools/list", -32603, "registry not ready");
        let mut client = client(&stub);
        client.connect().await.unwrap();

        assert!(matches!(client.discover_tools().await, Err(AgentError::Discovery(_))));
    }

    #[tokio::test]
    async fn test_discover_prompts_is_best_effort() {
        let stub = StubTransport::new().fail("prompts/list", -32601, "Method not found");
        let mut client = client(&stub);
        client.connect().await.unwrap();

        assert!(client.discover_prompts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_prompt_unknown_name() {
        let stub = StubTransport::new().fail("prompts/get", -32602, "Unknown prompt: nope");
        let mut client = client(&stub);
        client.connect().await.unwrap();

        let err = client.get_prompt("nope", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::PromptNotFound(msg) if msg.starts_with("nope")));
    }

    #[tokio::test]
    async fn test_call_unknown_tool_does_not_contact_registry() {
        let stub = StubTransport::new().respond("tools/list", json!({"tools": [repo_info_tool()]}));
        let client = connected(&stub).await;

        let err = client.call_tool("repo_delete_everything", Map::new()).await.unwrap_err();
        assert_eq!(err, AgentError::UnknownTool("repo_delete_everything".to_string()));
        assert!(!stub.methods().contains(&"tools/call".to_string()));
    }

    #[tokio::test]
    async fn test_call_with_invalid_arguments_does_not_contact_registry() {
        let stub = StubTransport::new().respond("tools/list", json!({"tools": [repo_info_tool()]}));
        let client = connected(&stub).await;

        let err = client
            .call_tool("repo_get_repo_info", args(json!({"owner": "facebook"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidArguments(_)));
        assert!(!stub.methods().contains(&"tools/call".to_string()));
    }

    #[tokio::test]
    async fn test_call_tool_success() {
        let stub = StubTransport::new()
            .respond("tools/list", json!({"tools": [repo_info_tool()]}))
            .respond(
                "tools/call",
                json!({"content": [{"type": "text", "text": "{\"stargazers_count\": 230000}"}], "isError": false}),
            );
        let client = connected(&stub).await;

        let result = client
            .call_tool("repo_get_repo_info", args(json!({"owner": "facebook", "repo": "react"})))
            .await
            .unwrap();
        assert_eq!(result.to_text(), "{\"stargazers_count\": 230000}");

        let sent = stub.sent.lock().unwrap();
        let call = sent.iter().find(|r| r.method == "tools/call").unwrap();
        assert_eq!(
            call.params,
            Some(json!({"name": "repo_get_repo_info", "arguments": {"owner": "facebook", "repo": "react"}}))
        );
    }

    #[tokio::test]
    async fn test_call_tool_error_result() {
        let stub = StubTransport::new()
            .respond("tools/list", json!({"tools": [repo_info_tool()]}))
            .respond(
                "tools/call",
                json!({"content": [{"type": "text", "text": "404 Not Found"}], "isError": true}),
            );
        let client = connected(&stub).await;

        let err = client
            .call_tool("repo_get_repo_info", args(json!({"owner": "nobody", "repo": "nothing"})))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AgentError::ToolExecution("repo_get_repo_info: 404 Not Found".to_string())
        );
    }

    #[tokio::test]
    async fn test_call_tool_is_tracked() {
        let stub = StubTransport::new()
            .respond("tools/list", json!({"tools": [repo_info_tool()]}))
            .respond("tools/call", json!({"content": [{"type": "text", "text": "ok"}]}));
        let tracker = Arc::new(MemoryTracker::default());
        let mut client = McpClient::new(Box::new(stub.clone()), tracker.clone());
        client.connect().await.unwrap();
        client.discover_tools().await.unwrap();

        client
            .call_tool("repo_get_repo_info", args(json!({"owner": "a", "repo": "b"})))
            .await
            .unwrap();
        assert_eq!(tracker.names(), vec!["call-tool"]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_terminal() {
        let stub = StubTransport::new();
        let mut client = client(&stub);
        client.connect().await.unwrap();

        client.close().await.unwrap();
        client.close().await.unwrap();
        assert_eq!(*stub.closes.lock().unwrap(), 1);
        assert_eq!(client.state(), ClientState::Closed);

        assert!(matches!(client.connect().await, Err(AgentError::Connection(_))));
        assert!(matches!(client.tools(), Err(AgentError::NotInitialized(_))));
    }
}
