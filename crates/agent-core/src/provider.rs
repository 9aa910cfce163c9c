//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for all model backends (Ollama, OpenAI, Anthropic)
//! so the conversation loop works with any of them without conditionals.
//! Each backend owns its wire encoding, its response parsing and its
//! turn-continuation policy.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::LlmProvider;
//!
//! let provider = OllamaProvider::from_env();
//! let turn = provider.complete(conversation.messages(), &catalog).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Message;
use crate::tool::{ToolCall, ToolCatalog};

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "llama3.2:1b", "gpt-4o", "claude-3-5-sonnet-20241022")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Top-p nucleus sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

const fn default_temperature() -> f32 { 0.7 }
const fn default_max_tokens() -> u32 { 2048 }
const fn default_top_p() -> f32 { 0.9 }

impl GenerationOptions {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "llama3.2:1b".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
        }
    }
}

/// When the loop asks the model again after tool requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationPolicy {
    /// Satisfy every tool call of a model turn, then call the model once
    AfterAllCalls,

    /// Call the model again right after each individual tool result
    AfterEachCall,
}

/// Parsed output of one completion call
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    /// Text blocks in emission order
    pub text_segments: Vec<String>,

    /// Tool invocation requests in emission order
    pub tool_calls: Vec<ToolCall>,
}

impl ModelTurn {
    /// Text-only turn
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text_segments: vec![text.into()],
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }

    /// Text segments joined in emission order, empty ones skipped
    pub fn joined_text(&self) -> String {
        self.text_segments
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// A turn with no tool calls ends the conversation loop
    pub fn is_terminal(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// Strategy trait for model backends
///
/// Implement this trait to add support for new LLM backends.
/// The conversation loop works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short backend name used in logs and errors
    fn name(&self) -> &str;

    /// How the loop continues after this backend requests tools
    fn continuation(&self) -> ContinuationPolicy {
        ContinuationPolicy::AfterAllCalls
    }

    /// Check if the backend is reachable and configured correctly
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Models the backend can serve; empty when it cannot enumerate them
    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Run one completion over the full history.
    ///
    /// `history` must be non-empty and satisfy the call/result pairing.
    /// Backend or network failures return [`crate::AgentError::Backend`];
    /// undecodable tool arguments are reported per call, not as an error.
    async fn complete(&self, history: &[Message], catalog: &ToolCatalog) -> Result<ModelTurn>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolArguments;

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert_eq!(opts.temperature, 0.7);
        assert_eq!(opts.max_tokens, 2048);
        assert_eq!(opts.model, "llama3.2:1b");
        assert_eq!(GenerationOptions::for_model("gpt-4o").with_max_tokens(1000).max_tokens, 1000);
    }

    #[test]
    fn test_model_turn_text_and_terminality() {
        let turn = ModelTurn {
            text_segments: vec!["Let me check.".into(), String::new(), "One moment.".into()],
            tool_calls: Vec::new(),
        };
        assert_eq!(turn.joined_text(), "Let me check.\nOne moment.");
        assert!(turn.is_terminal());

        let turn = turn.with_tool_call(ToolCall::new("c1", "get-games", ToolArguments::default()));
        assert!(!turn.is_terminal());
    }
}
