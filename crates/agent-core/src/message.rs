//! Conversation Messages
//!
//! Generic history replayed to every model backend. Adapters translate it
//! into their own wire shape; nothing here is backend-specific.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{AgentError, Result};
use crate::tool::{ToolCall, ToolResult};

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Message body
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Content {
    Text { text: String },
    ToolCall { call: ToolCall },
    ToolResult { result: ToolResult },
}

/// A single message in a conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    pub content: Content,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: Content) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Create a system message
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, Content::Text { text: text.into() })
    }

    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, Content::Text { text: text.into() })
    }

    /// Create an assistant text message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Content::Text { text: text.into() })
    }

    /// Assistant message requesting a tool call
    pub fn tool_call(call: ToolCall) -> Self {
        Self::new(Role::Assistant, Content::ToolCall { call })
    }

    /// Tool result message
    pub fn tool_result(result: ToolResult) -> Self {
        Self::new(Role::Tool, Content::ToolResult { result })
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Content::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match &self.content {
            Content::ToolCall { call } => Some(call),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        match &self.content {
            Content::ToolResult { result } => Some(result),
            _ => None,
        }
    }
}

/// Append-only conversation history
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        let mut conv = Self::new();
        conv.push(Message::system(prompt));
        conv
    }

    /// Add a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append a request immediately followed by its result
    pub fn push_tool_exchange(&mut self, call: ToolCall, result: ToolResult) {
        debug_assert_eq!(call.id, result.call_id);
        self.push(Message::tool_call(call));
        self.push(Message::tool_result(result));
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Tool calls in order of appearance
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.messages.iter().filter_map(Message::as_tool_call)
    }

    /// Tool results in order of appearance
    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.messages.iter().filter_map(Message::as_tool_result)
    }

    /// Check the history can be sent to a model: non-empty, and every tool
    /// call answered by exactly one later result with the same id.
    pub fn validate(&self) -> Result<()> {
        validate_history(&self.messages)
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Pairing check shared by the loop and the adapters
pub fn validate_history(messages: &[Message]) -> Result<()> {
    if messages.is_empty() {
        return Err(AgentError::InvalidHistory("history is empty".into()));
    }

    // id -> answered?
    let mut calls: HashMap<&str, bool> = HashMap::new();
    for message in messages {
        match &message.content {
            Content::ToolCall { call } => {
                if calls.insert(call.id.as_str(), false).is_some() {
                    return Err(AgentError::InvalidHistory(format!(
                        "tool call id '{}' appears twice",
                        call.id
                    )));
                }
            }
            Content::ToolResult { result } => match calls.get_mut(result.call_id.as_str()) {
                Some(answered) if !*answered => *answered = true,
                Some(_) => {
                    return Err(AgentError::InvalidHistory(format!(
                        "tool call '{}' answered twice",
                        result.call_id
                    )));
                }
                None => {
                    return Err(AgentError::InvalidHistory(format!(
                        "tool result '{}' has no preceding call",
                        result.call_id
                    )));
                }
            },
            Content::Text { .. } => {}
        }
    }

    if let Some((id, _)) = calls.iter().find(|(_, answered)| !**answered) {
        return Err(AgentError::InvalidHistory(format!("tool call '{id}' has no result")));
    }
    Ok(())
}
