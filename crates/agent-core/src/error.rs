//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Tool provider could not be reached. Fatal to the session.
    #[error("Tool provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Model backend call failed. Fatal to the current turn only.
    #[error("Backend error from {backend} (status {}): {payload}", status_label(.status))]
    Backend {
        backend: String,
        status: Option<u16>,
        payload: String,
    },

    /// Tool call arguments could not be decoded into a mapping
    #[error("Malformed arguments for tool '{tool}': {reason} (raw: {raw})")]
    MalformedToolArguments {
        tool: String,
        raw: String,
        reason: String,
    },

    /// Tool provider reported a failure executing a call
    #[error("Tool '{tool}' failed with arguments {arguments}: {message}")]
    ToolExecution {
        tool: String,
        arguments: String,
        message: String,
    },

    /// Too many tool-call cycles within one user turn
    #[error("Tool-call cycle limit ({0}) exceeded")]
    TurnLimitExceeded(usize),

    /// History is empty or breaks the request/result pairing
    #[error("Invalid conversation history: {0}")]
    InvalidHistory(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

fn status_label(status: &Option<u16>) -> String {
    status.map_or_else(|| "n/a".to_string(), |s| s.to_string())
}

impl AgentError {
    /// Build a backend error from a transport-level failure (no HTTP status)
    pub fn backend(backend: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            status: None,
            payload: payload.into(),
        }
    }

    /// Whether the error ends the whole session rather than a single turn
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, AgentError::ProviderUnavailable(_))
    }

    /// Whether the error is reported to the model in-band instead of failing the turn
    pub fn is_in_band(&self) -> bool {
        matches!(
            self,
            AgentError::MalformedToolArguments { .. } | AgentError::ToolExecution { .. }
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::ProviderUnavailable(_) => {
                "The tool server is unavailable. Restart the session.".into()
            }
            AgentError::Backend { backend, .. } => {
                format!("The {backend} model service returned an error. Please try again.")
            }
            AgentError::MalformedToolArguments { tool, .. } => {
                format!("The model sent invalid arguments to '{tool}'.")
            }
            AgentError::ToolExecution { tool, message, .. } => {
                format!("Tool '{tool}' failed: {message}")
            }
            AgentError::TurnLimitExceeded(_) => {
                "The request needed too many tool calls. Please try a simpler query.".into()
            }
            AgentError::Config(msg) => format!("Configuration problem: {msg}"),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_carries_payload() {
        let err = AgentError::Backend {
            backend: "openai".into(),
            status: Some(429),
            payload: r#"{"error":"rate limited"}"#.into(),
        };
        let text = err.to_string();
        assert!(text.contains("openai"));
        assert!(text.contains("429"));
        assert!(text.contains("rate limited"));
        assert!(!err.is_fatal_to_session());
    }

    #[test]
    fn test_error_classification() {
        assert!(AgentError::ProviderUnavailable("gone".into()).is_fatal_to_session());
        assert!(
            AgentError::ToolExecution {
                tool: "t".into(),
                arguments: "{}".into(),
                message: "boom".into(),
            }
            .is_in_band()
        );
        assert!(!AgentError::TurnLimitExceeded(3).is_in_band());
        assert!(AgentError::backend("ollama", "refused").to_string().contains("n/a"));
    }
}
