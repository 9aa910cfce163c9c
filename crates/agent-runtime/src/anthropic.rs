//! Anthropic Messages Provider
//!
//! Tool use is expressed as `tool_use` / `tool_result` content blocks.
//! Tool schemas accompany only the opening request of a turn; follow-up
//! requests that carry tool results are sent without them, so the model
//! answers from the result instead of chaining further calls on its own.
//! The API refuses tool blocks in a request that defines no tools, so
//! follow-ups replay earlier exchanges as plain text.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{Content, Message, Role},
    provider::{ContinuationPolicy, GenerationOptions, LlmProvider, ModelTurn},
    tool::{ToolArguments, ToolCall, ToolCatalog},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const BACKEND: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

/// Anthropic provider configuration
#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    pub api_key: String,

    /// API root, e.g. `https://api.anthropic.com`
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    pub generation: GenerationOptions,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".into(),
            timeout_secs: 120,
            generation: GenerationOptions::for_model("claude-3-5-sonnet-20241022").with_max_tokens(1000),
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| AgentError::Config("ANTHROPIC_API_KEY is not set".into()))?;
        let mut config = Self::new(api_key);
        if let Ok(url) = std::env::var("ANTHROPIC_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var("ANTHROPIC_MODEL") {
            config.generation.model = model;
        }
        Ok(config)
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

/// Anthropic messages provider
pub struct AnthropicProvider {
    http: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn from_config(config: AnthropicConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_config(AnthropicConfig::from_env()?)
    }

    fn build_request<'a>(&'a self, history: &[Message], catalog: &'a ToolCatalog) -> MessagesRequest<'a> {
        let opts = &self.config.generation;
        let system: Vec<&str> = history
            .iter()
            .filter(|m| m.role == Role::System)
            .filter_map(Message::text)
            .collect();

        let opening = is_turn_opening(history);
        let tools = if opening {
            catalog
                .descriptors()
                .iter()
                .map(|t| ToolSpec {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.input_schema,
                })
                .collect()
        } else {
            Vec::new()
        };

        MessagesRequest {
            model: &opts.model,
            max_tokens: opts.max_tokens,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages: convert_messages(history, opening),
            tools,
            temperature: opts.temperature,
        }
    }
}

/// True while no tool result has been recorded since the latest user text
fn is_turn_opening(history: &[Message]) -> bool {
    let start = history
        .iter()
        .rposition(|m| m.role == Role::User && m.text().is_some())
        .map_or(0, |i| i + 1);
    !history[start..].iter().any(|m| m.as_tool_result().is_some())
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ToolSpec<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<Block>,
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Convert agent messages to Anthropic messages. Consecutive messages that
/// map to the same role share one message; system text is sent separately.
/// Without `tool_blocks`, calls and results are rendered as text.
fn convert_messages(messages: &[Message], tool_blocks: bool) -> Vec<WireMessage> {
    let mut out: Vec<WireMessage> = Vec::new();
    for m in messages {
        let (role, block) = match (&m.content, m.role) {
            (_, Role::System) => continue,
            (Content::Text { text }, _) if text.trim().is_empty() => continue,
            (Content::Text { text }, Role::Assistant) => ("assistant", Block::Text { text: text.clone() }),
            (Content::Text { text }, _) => ("user", Block::Text { text: text.clone() }),
            (Content::ToolCall { call }, _) if !tool_blocks => (
                "assistant",
                Block::Text {
                    text: format!("[Calling tool {} with args {}]", call.name, call.arguments),
                },
            ),
            (Content::ToolResult { result }, _) if !tool_blocks => (
                "user",
                Block::Text {
                    text: Some(result.joined_text())
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| format!("[Tool {} returned no content]", result.name)),
                },
            ),
            (Content::ToolCall { call }, _) => (
                "assistant",
                Block::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: Value::Object(call.arguments.decoded().cloned().unwrap_or_else(Map::new)),
                },
            ),
            (Content::ToolResult { result }, _) => (
                "user",
                Block::ToolResult {
                    tool_use_id: result.call_id.clone(),
                    content: result.joined_text(),
                    is_error: result.is_error,
                },
            ),
        };

        match out.last_mut() {
            Some(last) if last.role == role => last.content.push(block),
            _ => out.push(WireMessage {
                role,
                content: vec![block],
            }),
        }
    }
    out
}

fn parse_response(response: MessagesResponse) -> ModelTurn {
    let mut turn = ModelTurn::default();
    for block in response.content {
        match block {
            Block::Text { text } if !text.is_empty() => turn.text_segments.push(text),
            Block::ToolUse { id, name, input } => {
                turn.tool_calls.push(ToolCall::new(id, name, ToolArguments::from_value(input)));
            }
            _ => {}
        }
    }
    turn
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        BACKEND
    }

    fn continuation(&self) -> ContinuationPolicy {
        ContinuationPolicy::AfterEachCall
    }

    async fn complete(&self, history: &[Message], catalog: &ToolCatalog) -> Result<ModelTurn> {
        agent_core::message::validate_history(history)?;
        let request = self.build_request(history, catalog);

        let response = self
            .http
            .post(self.config.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
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

        let parsed: MessagesResponse = serde_json::from_str(&body).map_err(|e| AgentError::Backend {
            backend: BACKEND.into(),
            status: Some(status.as_u16()),
            payload: format!("unreadable response ({e}): {body}"),
        })?;
        tracing::debug!(
            model = %self.config.generation.model,
            stop_reason = parsed.stop_reason.as_deref().unwrap_or("unknown"),
            "Anthropic replied"
        );
        Ok(parse_response(parsed))
    }
}
