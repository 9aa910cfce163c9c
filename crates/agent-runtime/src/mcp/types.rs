//! MCP payloads as seen by the agent, and the server launcher

use std::collections::HashMap;
use std::path::Path;

use agent_core::tool::{ContentBlock, ToolDescriptor, ToolOutput};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition as sent by the server
#[derive(Debug, Clone, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl From<McpTool> for ToolDescriptor {
    fn from(tool: McpTool) -> Self {
        ToolDescriptor::new(tool.name, tool.description.unwrap_or_default(), tool.input_schema)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<McpContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

/// Content item of a `tools/call` result
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: ResourceContents,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl From<McpContent> for ContentBlock {
    fn from(content: McpContent) -> Self {
        match content {
            McpContent::Text { text } => ContentBlock::Text { text },
            McpContent::Image { data, mime_type } => ContentBlock::Image { mime_type, data },
            McpContent::Resource { resource } => ContentBlock::Text {
                text: resource
                    .text
                    .unwrap_or_else(|| format!("[resource: {}]", resource.uri)),
            },
            McpContent::Unsupported => ContentBlock::text("[unsupported content]"),
        }
    }
}

impl From<CallToolResult> for ToolOutput {
    fn from(result: CallToolResult) -> Self {
        ToolOutput {
            content: result.content.into_iter().map(ContentBlock::from).collect(),
            is_error: result.is_error,
        }
    }
}

/// How to launch an MCP server subprocess
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Server name used in logs
    pub name: String,
    /// Command to execute (e.g., "node", "python3")
    pub command: String,
    /// Arguments to pass to command
    pub args: Vec<String>,
    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory
    #[serde(default)]
    pub cwd: Option<String>,
    /// Per-request timeout; `None` waits indefinitely
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl McpServerConfig {
    /// Launch a server script: `.py` through Python, `.js` through Node.
    pub fn for_script(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let command = match path.extension().and_then(|e| e.to_str()) {
            Some("py") if cfg!(windows) => "python",
            Some("py") => "python3",
            Some("js") => "node",
            _ => return Err(format!("Server script must be a .js or .py file: {}", path.display())),
        };
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("mcp-server")
            .to_string();

        Ok(Self {
            name,
            command: command.into(),
            args: vec![path.display().to_string()],
            env: HashMap::new(),
            cwd: None,
            request_timeout_secs: None,
        })
    }

    pub fn with_request_timeout(mut self, secs: Option<u64>) -> Self {
        self.request_timeout_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_conversion() {
        let tools: Vec<McpTool> = serde_json::from_value(json!([
            {"name": "get-games", "description": "Get all games", "inputSchema": {"type": "object"}},
            {"name": "filter-games", "annotations": {"readOnlyHint": true}}
        ]))
        .unwrap();
        let descriptors: Vec<ToolDescriptor> = tools.into_iter().map(Into::into).collect();
        assert_eq!(descriptors[0].description, "Get all games");
        assert_eq!(descriptors[1].description, "");
        assert_eq!(descriptors[1].input_schema["type"], "object");
    }

    #[test]
    fn test_call_result_conversion() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "[\"Arena\"]"},
                {"type": "resource", "resource": {"uri": "file:///games.json"}},
                {"type": "audio", "data": "AAAA", "mimeType": "audio/wav"}
            ],
            "isError": true
        }))
        .unwrap();
        let output = ToolOutput::from(result);
        assert!(output.is_error);
        assert_eq!(output.content.len(), 3);
        assert_eq!(output.content[1].as_text(), "[resource: file:///games.json]");
        assert_eq!(output.content[2].as_text(), "[unsupported content]");
    }

    #[test]
    fn test_server_config_for_script() {
        let js = McpServerConfig::for_script("build/games.js").unwrap();
        assert_eq!(js.command, "node");
        assert_eq!(js.name, "games");
        assert_eq!(js.args, vec!["build/games.js".to_string()]);

        assert!(McpServerConfig::for_script("server.py").unwrap().command.starts_with("python"));
        assert!(McpServerConfig::for_script("server.rb").is_err());
    }
}
