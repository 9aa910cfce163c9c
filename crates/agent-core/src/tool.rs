//! Tool System
//!
//! Tools live in an external tool-provider process. The agent only sees them
//! through [`ToolProvider`]: a catalog is fetched once per session and calls
//! are forwarded by [`ToolInvoker`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{AgentError, Result};

/// Tool definition as listed by the tool provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to the model)
    #[serde(default)]
    pub description: String,

    /// JSON Schema for the tool's arguments
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Decoded (or undecodable) arguments of a tool call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolArguments {
    /// Arguments as key-value pairs
    Decoded(Map<String, Value>),

    /// The backend's raw encoding could not be turned into a mapping
    Malformed { raw: String, reason: String },
}

impl ToolArguments {
    /// Decode a backend-native string encoding. An empty string means no arguments.
    pub fn from_json_str(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::Decoded(Map::new());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value(value),
            Err(e) => Self::Malformed {
                raw: raw.to_string(),
                reason: e.to_string(),
            },
        }
    }

    /// Accept an already-structured value. `null` means no arguments;
    /// a string is decoded once more since some backends double-encode.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Decoded(map),
            Value::Null => Self::Decoded(Map::new()),
            Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => Self::Decoded(map),
                _ => Self::Malformed {
                    reason: "arguments string is not a JSON object".into(),
                    raw,
                },
            },
            other => Self::Malformed {
                raw: other.to_string(),
                reason: "arguments are not a JSON object".into(),
            },
        }
    }

    pub fn decoded(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Decoded(map) => Some(map),
            Self::Malformed { .. } => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }

    /// The arguments as the JSON text a backend would send back on replay
    pub fn to_json_string(&self) -> String {
        match self {
            Self::Decoded(map) => Value::Object(map.clone()).to_string(),
            Self::Malformed { raw, .. } => raw.clone(),
        }
    }
}

impl Default for ToolArguments {
    fn default() -> Self {
        Self::Decoded(Map::new())
    }
}

impl fmt::Display for ToolArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_string())
    }
}

/// Tool call request parsed from a model response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlates the request with its result
    pub id: String,

    /// Tool identifier
    pub name: String,

    pub arguments: ToolArguments,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: ToolArguments) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Error describing why this call's arguments were rejected, if they were
    pub fn argument_error(&self) -> Option<AgentError> {
        match &self.arguments {
            ToolArguments::Decoded(_) => None,
            ToolArguments::Malformed { raw, reason } => Some(AgentError::MalformedToolArguments {
                tool: self.name.clone(),
                raw: raw.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

/// One block of tool output
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },

    /// Structured payload, either sent as such or decoded from a text block
    Json { value: Value },

    Image { mime_type: String, data: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Turn a text block holding a JSON object or array into a structured block.
    /// Anything that does not parse is passed through unchanged.
    pub fn decode_nested(self) -> Self {
        match self {
            Self::Text { text } => {
                let trimmed = text.trim_start();
                if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
                    return Self::Text { text };
                }
                match serde_json::from_str::<Value>(&text) {
                    Ok(value) => Self::Json { value },
                    Err(_) => Self::Text { text },
                }
            }
            other => other,
        }
    }

    /// Plain-text rendering used when a backend only accepts strings
    pub fn as_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Json { value } => value.to_string(),
            Self::Image { mime_type, .. } => format!("[image: {mime_type}]"),
        }
    }
}

/// Raw output of one `call_tool` against the tool provider
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Vec<ContentBlock>,

    /// Set when the provider reports the call itself failed
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(message)],
            is_error: true,
        }
    }

    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result re-attached to the history for a given [`ToolCall`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the call this answers
    pub call_id: String,

    /// Tool that was called
    pub name: String,

    pub content: Vec<ContentBlock>,

    /// Whether this result reports a failure to the model
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call: &ToolCall, content: Vec<ContentBlock>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content,
            is_error: false,
        }
    }

    /// Error block fed back to the model so it can correct itself
    pub fn failure(call: &ToolCall, error: &AgentError) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content: vec![ContentBlock::text(format!("Error: {error}"))],
            is_error: true,
        }
    }

    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Capability interface of the external tool-provider process
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// List every tool the provider exposes
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Execute a tool by name
    async fn call_tool(&self, name: &str, arguments: &Map<String, Value>) -> Result<ToolOutput>;

    /// Whether the connection to the provider is still usable
    fn is_connected(&self) -> bool {
        true
    }
}

/// Read-only snapshot of the provider's tools, fetched once per session
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
}

impl ToolCatalog {
    /// Query the provider once. Any failure means the session cannot start.
    pub async fn fetch(provider: &dyn ToolProvider) -> Result<Self> {
        let listed = provider.list_tools().await.map_err(|e| match e {
            AgentError::ProviderUnavailable(msg) => AgentError::ProviderUnavailable(msg),
            other => AgentError::ProviderUnavailable(other.to_string()),
        })?;

        let catalog = Self::from_descriptors(listed);
        tracing::info!(count = catalog.len(), tools = ?catalog.names(), "Fetched tool catalog");
        Ok(catalog)
    }

    /// Build from descriptors; a repeated name keeps its first descriptor.
    pub fn from_descriptors(descriptors: Vec<ToolDescriptor>) -> Self {
        let mut seen = HashSet::new();
        let mut tools = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if seen.insert(descriptor.name.clone()) {
                tools.push(descriptor);
            } else {
                tracing::warn!(tool = %descriptor.name, "Duplicate tool name in listing, keeping first");
            }
        }
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Forwards tool calls to the provider and shapes the outcome into a [`ToolResult`]
#[derive(Clone)]
pub struct ToolInvoker {
    provider: Arc<dyn ToolProvider>,
    lost: Arc<AtomicBool>,
}

impl ToolInvoker {
    pub fn new(provider: Arc<dyn ToolProvider>) -> Self {
        Self {
            provider,
            lost: Arc::new(AtomicBool::new(false)),
        }
    }

    /// False once the provider has reported itself unavailable during a call
    pub fn is_connected(&self) -> bool {
        !self.lost.load(Ordering::SeqCst) && self.provider.is_connected()
    }

    /// Execute a tool call.
    ///
    /// Malformed arguments are rejected without contacting the provider.
    /// A provider-reported failure or a dropped connection becomes
    /// [`AgentError::ToolExecution`].
    pub async fn invoke(&self, call: &ToolCall) -> Result<ToolResult> {
        if let Some(err) = call.argument_error() {
            return Err(err);
        }
        let arguments = call.arguments.decoded().cloned().unwrap_or_default();

        tracing::debug!(tool = %call.name, id = %call.id, "Invoking tool");

        let output = self
            .provider
            .call_tool(&call.name, &arguments)
            .await
            .map_err(|e| {
                if matches!(e, AgentError::ProviderUnavailable(_)) {
                    self.lost.store(true, Ordering::SeqCst);
                }
                AgentError::ToolExecution {
                    tool: call.name.clone(),
                    arguments: call.arguments.to_json_string(),
                    message: e.to_string(),
                }
            })?;

        if output.is_error {
            return Err(AgentError::ToolExecution {
                tool: call.name.clone(),
                arguments: call.arguments.to_json_string(),
                message: output.joined_text(),
            });
        }

        let content = output
            .content
            .into_iter()
            .map(ContentBlock::decode_nested)
            .collect();
        Ok(ToolResult::success(call, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::Mutex;

    struct StaticProvider {
        tools: Vec<ToolDescriptor>,
        output: ToolOutput,
        calls: Mutex<Vec<String>>,
    }

    impl StaticProvider {
        fn new(output: ToolOutput) -> Self {
            Self {
                tools: vec![
                    ToolDescriptor::new("get-games", "Get all games", json!({"type": "object"})),
                    ToolDescriptor::new("filter-games", "Filter games", json!({"type": "object"})),
                ],
                output,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ToolProvider for StaticProvider {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Ok(self.tools.clone())
        }

        async fn call_tool(&self, name: &str, _arguments: &Map<String, Value>) -> Result<ToolOutput> {
            self.calls.lock().await.push(name.to_string());
            Ok(self.output.clone())
        }
    }

    struct DownProvider;

    #[async_trait]
    impl ToolProvider for DownProvider {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Err(AgentError::Other("broken pipe".into()))
        }

        async fn call_tool(&self, _name: &str, _arguments: &Map<String, Value>) -> Result<ToolOutput> {
            Err(AgentError::Other("broken pipe".into()))
        }
    }

    struct ClosedProvider;

    #[async_trait]
    impl ToolProvider for ClosedProvider {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Ok(Vec::new())
        }

        async fn call_tool(&self, _name: &str, _arguments: &Map<String, Value>) -> Result<ToolOutput> {
            Err(AgentError::ProviderUnavailable("Connection closed".into()))
        }
    }

    fn call(name: &str, arguments: ToolArguments) -> ToolCall {
        ToolCall::new("call_1", name, arguments)
    }

    #[test]
    fn test_argument_decoding() {
        assert_eq!(ToolArguments::from_json_str(""), ToolArguments::Decoded(Map::new()));
        assert_eq!(
            ToolArguments::from_json_str(r#"{"keyword":"arena"}"#)
                .decoded()
                .and_then(|m| m.get("keyword").cloned()),
            Some(json!("arena"))
        );
        assert!(ToolArguments::from_json_str("{not json").is_malformed());
        assert!(ToolArguments::from_json_str("[1,2]").is_malformed());
        assert!(ToolArguments::from_value(json!("{\"a\":1}")).decoded().is_some());
        assert!(ToolArguments::from_value(json!(42)).is_malformed());
    }

    #[test]
    fn test_nested_json_decoding() {
        let block = ContentBlock::text(r#"[{"Name":"Arena"}]"#).decode_nested();
        assert_eq!(block, ContentBlock::Json { value: json!([{"Name": "Arena"}]) });

        let broken = ContentBlock::text("[not json").decode_nested();
        assert_eq!(broken, ContentBlock::text("[not json"));

        let plain = ContentBlock::text("hello").decode_nested();
        assert_eq!(plain, ContentBlock::text("hello"));
    }

    #[test]
    fn test_catalog_keeps_first_duplicate() {
        let catalog = ToolCatalog::from_descriptors(vec![
            ToolDescriptor::new("a", "first", json!({})),
            ToolDescriptor::new("b", "", json!({})),
            ToolDescriptor::new("a", "second", json!({})),
        ]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("a").map(|t| t.description.as_str()), Some("first"));
        assert!(catalog.get("missing").is_none());
    }

    #[tokio::test]
    async fn test_catalog_fetch_is_idempotent() {
        let provider = StaticProvider::new(ToolOutput::text("ok"));
        let first = ToolCatalog::fetch(&provider).await.unwrap();
        let second = ToolCatalog::fetch(&provider).await.unwrap();

        let a: HashSet<_> = first.names().into_iter().collect();
        let b: HashSet<_> = second.names().into_iter().collect();
        assert_eq!(a, b);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn test_catalog_fetch_failure_is_provider_unavailable() {
        let err = ToolCatalog::fetch(&DownProvider).await.unwrap_err();
        assert!(matches!(err, AgentError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_invoker_decodes_nested_json() {
        let provider = Arc::new(StaticProvider::new(ToolOutput::text(r#"[{"Name":"A"},{"Name":"B"}]"#)));
        let invoker = ToolInvoker::new(provider.clone());

        let result = invoker
            .invoke(&call("get-games", ToolArguments::default()))
            .await
            .unwrap();
        assert_eq!(result.call_id, "call_1");
        assert!(!result.is_error);
        assert!(matches!(result.content[0], ContentBlock::Json { .. }));
        assert_eq!(provider.calls.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invoker_reports_provider_failure() {
        let invoker = ToolInvoker::new(Arc::new(StaticProvider::new(ToolOutput::error("upstream 500"))));
        let err = invoker
            .invoke(&call("filter-games", ToolArguments::from_json_str(r#"{"keyword":"arena"}"#)))
            .await
            .unwrap_err();
        match err {
            AgentError::ToolExecution { tool, arguments, message } => {
                assert_eq!(tool, "filter-games");
                assert!(arguments.contains("arena"));
                assert!(message.contains("upstream 500"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let dropped = ToolInvoker::new(Arc::new(DownProvider))
            .invoke(&call("get-games", ToolArguments::default()))
            .await
            .unwrap_err();
        assert!(matches!(dropped, AgentError::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn test_invoker_notices_lost_provider() {
        let invoker = ToolInvoker::new(Arc::new(ClosedProvider));
        assert!(invoker.is_connected());

        let err = invoker
            .invoke(&call("get-games", ToolArguments::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolExecution { .. }));
        assert!(!invoker.is_connected());

        let healthy = ToolInvoker::new(Arc::new(DownProvider));
        let _ = healthy.invoke(&call("get-games", ToolArguments::default())).await;
        assert!(healthy.is_connected());
    }

    #[tokio::test]
    async fn test_invoker_rejects_malformed_arguments_without_calling() {
        let provider = Arc::new(StaticProvider::new(ToolOutput::text("ok")));
        let invoker = ToolInvoker::new(provider.clone());
        let err = invoker
            .invoke(&call("filter-games", ToolArguments::from_json_str("{oops")))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MalformedToolArguments { .. }));
        assert!(provider.calls.lock().await.is_empty());
    }
}
