//! OpenAI Chat Completions Provider
//!
//! Function tools with string-encoded arguments. Each tool result is sent
//! back as a `tool` message keyed by the provider-assigned call id.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{Content, Message, Role},
    provider::{GenerationOptions, LlmProvider, ModelTurn},
    tool::{ToolArguments, ToolCall, ToolCatalog},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const BACKEND: &str = "openai";

/// OpenAI provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,

    /// API root, e.g. `https://api.openai.com/v1`
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    pub generation: GenerationOptions,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".into(),
            timeout_secs: 120,
            generation: GenerationOptions::for_model("gpt-4o"),
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AgentError::Config("OPENAI_API_KEY is not set".into()))?;
        let mut config = Self::new(api_key);
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            config.generation.model = model;
        }
        Ok(config)
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// OpenAI chat-completions provider
pub struct OpenAiProvider {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn from_config(config: OpenAiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_config(OpenAiConfig::from_env()?)
    }

    fn build_request<'a>(&'a self, history: &[Message], catalog: &'a ToolCatalog) -> CompletionRequest<'a> {
        let opts = &self.config.generation;
        let tools: Vec<_> = catalog
            .descriptors()
            .iter()
            .map(|t| FunctionTool {
                kind: "function",
                function: FunctionSpec {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.input_schema,
                },
            })
            .collect();

        CompletionRequest {
            model: &opts.model,
            messages: convert_messages(history),
            tool_choice: (!tools.is_empty()).then_some("auto"),
            tools,
            temperature: opts.temperature,
            top_p: opts.top_p,
            max_tokens: opts.max_tokens,
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<FunctionTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct FunctionTool<'a> {
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
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

fn function_kind() -> String {
    "function".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Convert agent messages to chat-completions messages. A tool call directly
/// after assistant text joins that assistant message.
fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
    let mut out: Vec<ChatMessage> = Vec::with_capacity(messages.len());
    for m in messages {
        match &m.content {
            Content::Text { text } => out.push(ChatMessage {
                role: m.role.to_string(),
                content: Some(text.clone()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            }),
            Content::ToolCall { call } => {
                let wire = WireToolCall {
                    id: call.id.clone(),
                    kind: function_kind(),
                    function: WireFunction {
                        name: call.name.clone(),
                        arguments: call.arguments.to_json_string(),
                    },
                };
                match out.last_mut() {
                    Some(last) if last.role == Role::Assistant.to_string() => last.tool_calls.push(wire),
                    _ => out.push(ChatMessage {
                        role: Role::Assistant.to_string(),
                        content: None,
                        tool_calls: vec![wire],
                        tool_call_id: None,
                    }),
                }
            }
            Content::ToolResult { result } => out.push(ChatMessage {
                role: Role::Tool.to_string(),
                content: Some(result.joined_text()),
                tool_calls: Vec::new(),
                tool_call_id: Some(result.call_id.clone()),
            }),
        }
    }
    out
}

/// Collect text and tool calls from every returned choice
fn parse_response(response: CompletionResponse) -> ModelTurn {
    let mut turn = ModelTurn::default();
    for choice in response.choices {
        let message = choice.message;
        if let Some(content) = message.content.filter(|c| !c.is_empty()) {
            turn.text_segments.push(content);
        }
        turn.tool_calls.extend(message.tool_calls.into_iter().map(|tc| {
            ToolCall::new(
                tc.id,
                tc.function.name,
                ToolArguments::from_json_str(&tc.function.arguments),
            )
        }));
    }
    turn
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn complete(&self, history: &[Message], catalog: &ToolCatalog) -> Result<ModelTurn> {
        agent_core::message::validate_history(history)?;
        let request = self.build_request(history, catalog);

        let response = self
            .http
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
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

        let parsed: CompletionResponse = serde_json::from_str(&body).map_err(|e| AgentError::Backend {
            backend: BACKEND.into(),
            status: Some(status.as_u16()),
            payload: format!("unreadable response ({e}): {body}"),
        })?;
        let turn = parse_response(parsed);
        tracing::debug!(model = %self.config.generation.model, tool_calls = turn.tool_calls.len(), "OpenAI replied");
        Ok(turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::tool::{ContentBlock, ToolDescriptor, ToolResult};
    use serde_json::json;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::from_config(OpenAiConfig::new("sk-test")).unwrap()
    }

    #[test]
    fn test_history_encoding() {
        let call = ToolCall::new(
            "call_abc",
            "filter-games",
            ToolArguments::from_json_str(r#"{"keyword":"arena"}"#),
        );
        let result = ToolResult::success(&call, vec![ContentBlock::text("[\"Arena\"]")]);
        let history = vec![
            Message::user("filter games by 'arena'"),
            Message::assistant("Filtering now."),
            Message::tool_call(call),
            Message::tool_result(result),
        ];

        let messages = serde_json::to_value(convert_messages(&history)).unwrap();
        assert_eq!(messages.as_array().map(Vec::len), Some(3));
        assert_eq!(messages[1]["content"], "Filtering now.");
        assert_eq!(messages[1]["tool_calls"][0]["id"], "call_abc");
        assert_eq!(messages[1]["tool_calls"][0]["function"]["arguments"], r#"{"keyword":"arena"}"#);
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call_abc");
    }

    #[test]
    fn test_tool_choice_only_with_tools() {
        let p = provider();
        let empty = ToolCatalog::default();
        let body = serde_json::to_value(p.build_request(&[Message::user("hi")], &empty)).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());

        let catalog = ToolCatalog::from_descriptors(vec![ToolDescriptor::new("get-games", "", json!({}))]);
        let body = serde_json::to_value(p.build_request(&[Message::user("hi")], &catalog)).unwrap();
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["model"], "gpt-4o");
    }

    #[test]
    fn test_response_parsing() {
        let response: CompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "call_1", "type": "function", "function": {"name": "get-games", "arguments": "{}"}},
                        {"id": "call_2", "type": "function", "function": {"name": "filter-games", "arguments": "{\"keyword\": "}}
                    ]
                }
            }]
        }))
        .unwrap();

        let turn = parse_response(response);
        assert!(turn.text_segments.is_empty());
        assert_eq!(turn.tool_calls[0].id, "call_1");
        assert!(turn.tool_calls[0].arguments.decoded().is_some());
        assert!(turn.tool_calls[1].arguments.is_malformed());
    }

    #[test]
    fn test_text_response() {
        let response: CompletionResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "3 games are available."}}]
        }))
        .unwrap();
        let turn = parse_response(response);
        assert_eq!(turn.joined_text(), "3 games are available.");
        assert!(turn.is_terminal());
    }
}
