//! Model Context Protocol tool provider
//!
//! Implements [`agent_core::ToolProvider`] over a subprocess speaking MCP on stdio.

mod client;
pub mod types;

pub use client::{McpClient, McpError};
pub use types::McpServerConfig;
