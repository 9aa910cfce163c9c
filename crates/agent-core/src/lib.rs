//! # agent-core
//!
//! Tool-augmented conversation loop with provider-agnostic model access and
//! an external tool provider.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Session                             │
//! │  ┌──────────────┐  ┌─────────────────┐  ┌─────────────────┐  │
//! │  │ Conversation │  │  ToolCatalog /  │  │   LlmProvider   │  │
//! │  │ Loop (Agent) │──│  ToolInvoker    │──│   (Strategy)    │  │
//! │  └──────────────┘  └─────────────────┘  └─────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait enables swapping between Ollama, OpenAI and
//! Anthropic without changing loop logic. Tools are reached only through
//! the `ToolProvider` trait, implemented by the MCP client in
//! `agent-runtime`.

pub mod provider;
pub mod tool;
pub mod reasoning;
pub mod message;
pub mod error;
pub mod session;

pub use error::{AgentError, Result};
pub use message::{Content, Conversation, Message, Role};
pub use provider::{ContinuationPolicy, GenerationOptions, LlmProvider, ModelTurn};
pub use reasoning::{Agent, AgentBuilder, AgentConfig, TurnEntry, TurnOutput};
pub use session::{Session, SessionId};
pub use tool::{
    ContentBlock, ToolArguments, ToolCall, ToolCatalog, ToolDescriptor, ToolInvoker, ToolOutput,
    ToolProvider, ToolResult,
};
