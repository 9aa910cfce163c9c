//! # agent-runtime
//!
//! Model backends and the tool-provider client for the conversation loop.
//!
//! ## Providers
//!
//! - **Ollama** (default): local inference via `/api/chat`
//! - **OpenAI**: chat completions with function tools
//! - **Anthropic**: messages API with `tool_use` blocks, one call answered per request
//!
//! ## Tools
//!
//! [`McpClient`] launches an MCP server script over stdio and implements
//! [`agent_core::ToolProvider`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{McpClient, McpServerConfig, OllamaProvider};
//!
//! let tools = McpClient::spawn(McpServerConfig::for_script("build/index.js")?).await?;
//! let mut session = Session::connect(
//!     Arc::new(OllamaProvider::from_env()?),
//!     Arc::new(tools),
//!     AgentConfig::default(),
//! )
//! .await?;
//! println!("{}", session.ask("list available games").await?);
//! ```

pub mod mcp;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "anthropic")]
pub mod anthropic;

pub use mcp::{McpClient, McpError, McpServerConfig};

#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};

#[cfg(feature = "openai")]
pub use openai::{OpenAiConfig, OpenAiProvider};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicConfig, AnthropicProvider};

// Re-export core types for convenience
pub use agent_core::{
    Agent, AgentConfig, AgentError, LlmProvider, Message, Result, Role, Session, ToolProvider,
};
