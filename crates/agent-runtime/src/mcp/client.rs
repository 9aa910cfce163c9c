//! MCP client
//!
//! Launches the tool server as a child process and talks to it through
//! `rmcp`. The handshake, request ids and response routing live in the
//! `rmcp` service; this type adapts it to [`ToolProvider`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use agent_core::error::{AgentError, Result};
use agent_core::tool::{ToolDescriptor, ToolOutput, ToolProvider};
use async_trait::async_trait;
use rmcp::ServiceExt;
use rmcp::model::{
    CallToolRequestParams, ClientCapabilities, ClientInfo, Implementation, ProtocolVersion,
};
use rmcp::service::{Peer, RoleClient, RunningService, ServiceError};
use rmcp::transport::{IntoTransport, TokioChildProcess};
use serde_json::{Map, Value};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::types::{CallToolResult, McpServerConfig, McpTool};

/// MCP client errors
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("Request '{0}' timed out")]
    Timeout(String),

    #[error("Connection closed")]
    Closed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ServiceError> for McpError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::McpError(data) => McpError::Server {
                code: i64::from(data.code.0),
                message: data.message.to_string(),
            },
            ServiceError::TransportClosed | ServiceError::TransportSend(_) => McpError::Closed,
            other => McpError::Protocol(other.to_string()),
        }
    }
}

impl From<McpError> for AgentError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::Transport(_) | McpError::Closed => AgentError::ProviderUnavailable(err.to_string()),
            other => AgentError::Other(other.to_string()),
        }
    }
}

fn client_info() -> ClientInfo {
    ClientInfo {
        meta: None,
        protocol_version: ProtocolVersion::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "agent-cli".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
            description: None,
            icons: None,
            website_url: None,
        },
    }
}

/// Client for one MCP server
pub struct McpClient {
    name: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ClientInfo>>>,
    request_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl McpClient {
    /// Spawn the server process and run the initialize handshake
    pub async fn spawn(config: McpServerConfig) -> std::result::Result<Self, McpError> {
        info!(
            server = %config.name,
            command = %config.command,
            args = ?config.args,
            "Connecting to MCP server"
        );

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args).envs(&config.env);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let transport = TokioChildProcess::new(cmd)
            .map_err(|e| McpError::Transport(format!("Failed to spawn '{}': {e}", config.command)))?;

        Self::serve(
            config.name,
            transport,
            config.request_timeout_secs.map(Duration::from_secs),
        )
        .await
    }

    /// Run the handshake over an already established transport
    pub async fn serve<T, E, A>(
        name: impl Into<String>,
        transport: T,
        request_timeout: Option<Duration>,
    ) -> std::result::Result<Self, McpError>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let name = name.into();
        let service = client_info()
            .serve(transport)
            .await
            .map_err(|e| McpError::Transport(format!("Failed to initialize MCP session with '{name}': {e}")))?;

        let peer = service.peer().clone();
        info!(
            server = %name,
            server_name = peer.peer_info().map_or("unknown", |i| i.server_info.name.as_str()),
            "MCP server initialized"
        );

        Ok(Self {
            name,
            peer,
            service: Mutex::new(Some(service)),
            request_timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// Stop the service and the server process
    pub async fn disconnect(&self) {
        info!(server = %self.name, "Disconnecting from MCP server");
        self.closed.store(true, Ordering::SeqCst);

        if let Some(service) = self.service.lock().await.take() {
            if let Err(e) = service.cancel().await {
                warn!(server = %self.name, error = %e, "MCP service did not shut down cleanly");
            }
        }
    }

    /// Await one request, applying the timeout and recording a lost connection
    async fn request<T, F>(&self, method: &str, request: F) -> std::result::Result<T, McpError>
    where
        F: Future<Output = std::result::Result<T, ServiceError>>,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::Closed);
        }

        debug!(server = %self.name, method, "Sending request");
        let outcome = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, request).await.map_err(|_| {
                warn!(server = %self.name, method, "Request timed out");
                McpError::Timeout(method.to_string())
            })?,
            None => request.await,
        };

        outcome.map_err(|e| {
            let err = McpError::from(e);
            if matches!(err, McpError::Closed) {
                warn!(server = %self.name, method, "MCP server connection closed");
                self.closed.store(true, Ordering::SeqCst);
            }
            err
        })
    }
}

#[async_trait]
impl ToolProvider for McpClient {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let listed = self.request("tools/list", self.peer.list_all_tools()).await?;

        let tools = listed
            .into_iter()
            .map(|tool| {
                let tool: McpTool = serde_json::from_value(serde_json::to_value(tool)?)?;
                Ok(ToolDescriptor::from(tool))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(server = %self.name, count = tools.len(), "Listed tools");
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: &Map<String, Value>) -> Result<ToolOutput> {
        debug!(server = %self.name, tool = %name, "Calling tool");

        let params = CallToolRequestParams {
            name: name.to_string().into(),
            arguments: Some(arguments.clone()),
            meta: None,
            task: None,
        };
        let result = self.request("tools/call", self.peer.call_tool(params)).await?;
        let result: CallToolResult = serde_json::from_value(serde_json::to_value(result)?)?;

        if result.is_error {
            debug!(server = %self.name, tool = %name, "Tool returned error");
        }
        Ok(result.into())
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::{ErrorCode, ErrorData};
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    /// Minimal line-based MCP server: two pages of tools, one working tool,
    /// and a `crash` tool that drops the connection without replying.
    async fn games_server(stream: DuplexStream) {
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let message: Value = serde_json::from_str(&line).unwrap();
            let Some(id) = message.get("id").cloned() else {
                continue;
            };
            let params = &message["params"];
            let result = match message["method"].as_str().unwrap_or_default() {
                "initialize" => json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "games", "version": "1.0.0"}
                }),
                "tools/list" if params["cursor"] == "page-2" => json!({
                    "tools": [{"name": "filter-games", "inputSchema": {"type": "object"}}]
                }),
                "tools/list" => json!({
                    "tools": [{
                        "name": "get-games",
                        "description": "Get all games",
                        "inputSchema": {"type": "object", "properties": {}}
                    }],
                    "nextCursor": "page-2"
                }),
                "tools/call" if params["name"] == "crash" => break,
                "tools/call" => json!({
                    "content": [{"type": "text", "text": format!("called {}", params["name"])}],
                    "isError": false
                }),
                _ => json!({}),
            };
            let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
            write.write_all(format!("{reply}\n").as_bytes()).await.unwrap();
            write.flush().await.unwrap();
        }
    }

    async fn connected() -> McpClient {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        tokio::spawn(games_server(server_side));
        McpClient::serve("games", client_side, None).await.unwrap()
    }

    #[test]
    fn test_error_mapping() {
        let err: AgentError = McpError::from(ServiceError::TransportClosed).into();
        assert!(matches!(err, AgentError::ProviderUnavailable(_)));

        let err = McpError::from(ServiceError::McpError(ErrorData::new(
            ErrorCode::INVALID_PARAMS,
            "Unknown tool",
            None,
        )));
        assert!(matches!(err, McpError::Server { code: -32602, .. }));
        assert!(AgentError::from(err).to_string().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_transport_error() {
        let mut config = McpServerConfig::for_script("server.js").unwrap();
        config.command = "/nonexistent/mcp-server-binary".into();
        let err = McpClient::spawn(config).await.err().unwrap();
        assert!(matches!(err, McpError::Transport(_)));
    }

    #[tokio::test]
    async fn test_lists_every_page_and_calls_tools() {
        let client = connected().await;

        let tools = client.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["get-games", "filter-games"]);
        assert_eq!(tools[0].description, "Get all games");

        let mut arguments = Map::new();
        arguments.insert("keyword".into(), json!("arena"));
        let output = client.call_tool("filter-games", &arguments).await.unwrap();
        assert!(!output.is_error);
        assert_eq!(output.joined_text(), "called \"filter-games\"");
        assert!(client.is_connected());

        client.disconnect().await;
        assert!(!client.is_connected());
        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(err, AgentError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_server_exit_fails_pending_and_later_requests() {
        let client = connected().await;

        let err = client.call_tool("crash", &Map::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::ProviderUnavailable(_)));
        assert!(!client.is_connected());

        let err = client.call_tool("get-games", &Map::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::ProviderUnavailable(_)));
    }
}
