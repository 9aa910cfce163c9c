//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for local Ollama inference using native
//! function calling on `/api/chat`. Ollama does not assign tool-call ids,
//! so ids are synthesized per call.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{Content, Message, Role},
    provider::{GenerationOptions, LlmProvider, ModelTurn},
    tool::{ContentBlock, ToolArguments, ToolCall, ToolCatalog, ToolResult},
};
use async_trait::async_trait;
use ollama_rs::Ollama;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const BACKEND: &str = "ollama";

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    pub generation: GenerationOptions,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            timeout_secs: 120,
            generation: GenerationOptions::default(),
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST")
            .unwrap_or_else(|_| "http://localhost".into());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);
        let mut generation = GenerationOptions::default();
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            generation.model = model;
        }

        Self {
            host,
            port,
            generation,
            ..Default::default()
        }
    }

    fn chat_url(&self) -> String {
        format!("{}:{}/api/chat", self.host.trim_end_matches('/'), self.port)
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
    http: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client: Ollama::new(&config.host, config.port),
            http,
            config,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(OllamaConfig::from_env())
    }

    /// Create with default localhost settings
    pub fn localhost() -> Result<Self> {
        Self::from_config(OllamaConfig::default())
    }

    fn build_request<'a>(&'a self, history: &[Message], catalog: &'a ToolCatalog) -> ChatRequest<'a> {
        let opts = &self.config.generation;
        ChatRequest {
            model: &opts.model,
            messages: convert_messages(history),
            tools: catalog
                .descriptors()
                .iter()
                .map(|t| ToolSpec {
                    kind: "function",
                    function: FunctionSpec {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.input_schema,
                    },
                })
                .collect(),
            stream: false,
            options: ChatOptions {
                temperature: opts.temperature,
                top_p: opts.top_p,
                num_predict: i64::from(opts.max_tokens),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    top_p: f32,
    num_predict: i64,
}

#[derive(Debug, Serialize)]
struct ToolSpec<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionSpec<'a>,
}

#[derive(Debug, Serialize)]
struct FunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// Convert agent messages to Ollama format
fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| match &m.content {
            Content::Text { text } => ChatMessage::text(m.role, text.clone()),
            Content::ToolCall { call } => ChatMessage {
                tool_calls: vec![WireToolCall {
                    function: WireFunction {
                        name: call.name.clone(),
                        arguments: Value::Object(call.arguments.decoded().cloned().unwrap_or_default()),
                    },
                }],
                ..ChatMessage::text(Role::Assistant, "")
            },
            Content::ToolResult { result } => ChatMessage {
                tool_name: Some(result.name.clone()),
                ..ChatMessage::text(Role::Tool, render_result(result))
            },
        })
        .collect()
}

/// Flatten a tool result into the plain text Ollama expects. Arrays of
/// records are re-encoded one record per line.
fn render_result(result: &ToolResult) -> String {
    result
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Json { value: Value::Array(items) } => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            other => other.as_text(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Convert an Ollama response into a model turn
fn parse_response(response: ChatResponse) -> ModelTurn {
    let message = response.message;
    let mut turn = ModelTurn::default();
    if !message.content.is_empty() {
        turn.text_segments.push(message.content);
    }
    turn.tool_calls = message
        .tool_calls
        .into_iter()
        .map(|tc| {
            ToolCall::new(
                format!("call_{}", uuid::Uuid::new_v4().simple()),
                tc.function.name,
                ToolArguments::from_value(tc.function.arguments),
            )
        })
        .collect();
    turn
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    /// Names of the locally installed models
    async fn list_models(&self) -> Result<Vec<String>> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| AgentError::backend(BACKEND, e.to_string()))?;
        Ok(models.into_iter().map(|m| m.name).collect())
    }

    async fn complete(&self, history: &[Message], catalog: &ToolCatalog) -> Result<ModelTurn> {
        agent_core::message::validate_history(history)?;
        let request = self.build_request(history, catalog);

        let response = self
            .http
            .post(self.config.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::backend(BACKEND, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AgentError::backend(BACKEND, e.to_string()))?;
        if !status.is_success() {
            return Err(AgentError::Backend {
                backend: BACKEND.into(),
                status: Some(status.as_u16()),
                payload: body,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| AgentError::Backend {
            backend: BACKEND.into(),
            status: Some(status.as_u16()),
            payload: format!("unreadable response ({e}): {body}"),
        })?;
        let turn = parse_response(parsed);
        tracing::debug!(model = %self.config.generation.model, tool_calls = turn.tool_calls.len(), "Ollama replied");
        Ok(turn)
    }
}
