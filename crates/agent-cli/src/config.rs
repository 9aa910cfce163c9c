//! Binary configuration, read from the environment after `.env` is loaded

use std::str::FromStr;
use std::sync::Arc;

use agent_core::reasoning::DEFAULT_MAX_TOOL_CYCLES;
use agent_core::{AgentConfig, LlmProvider};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown LLM_PROVIDER '{0}' (expected ollama, openai or anthropic)")]
    UnknownProvider(String),

    #[error("Provider '{0}' is not compiled into this binary")]
    ProviderDisabled(ProviderKind),

    #[error("Invalid value for {var}: {value}")]
    InvalidNumber { var: &'static str, value: String },

    #[error(transparent)]
    Agent(#[from] agent_core::AgentError),
}

/// Which model backend to talk to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProviderKind {
    #[default]
    Ollama,
    OpenAi,
    Anthropic,
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CliConfig {
    pub provider: ProviderKind,
    pub agent: AgentConfig,
    /// `None` waits on the tool server indefinitely
    pub mcp_timeout_secs: Option<u64>,
}

impl CliConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let provider = lookup("LLM_PROVIDER")
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.parse::<ProviderKind>())
            .transpose()?
            .unwrap_or_default();

        let max_tool_cycles = parse_number(&lookup, "AGENT_MAX_TOOL_CYCLES")?
            .unwrap_or(DEFAULT_MAX_TOOL_CYCLES);
        let system_prompt = lookup("AGENT_SYSTEM_PROMPT").filter(|p| !p.trim().is_empty());
        let mcp_timeout_secs = parse_number(&lookup, "MCP_REQUEST_TIMEOUT_SECS")?;

        Ok(Self {
            provider,
            agent: AgentConfig {
                system_prompt,
                max_tool_cycles,
            },
            mcp_timeout_secs,
        })
    }

    /// Construct the selected backend from its own environment variables
    pub fn build_provider(&self) -> Result<Arc<dyn LlmProvider>, ConfigError> {
        match self.provider {
            #[cfg(feature = "ollama")]
            ProviderKind::Ollama => Ok(Arc::new(agent_runtime::OllamaProvider::from_env()?)),
            #[cfg(feature = "openai")]
            ProviderKind::OpenAi => Ok(Arc::new(agent_runtime::OpenAiProvider::from_env()?)),
            #[cfg(feature = "anthropic")]
            ProviderKind::Anthropic => Ok(Arc::new(agent_runtime::AnthropicProvider::from_env()?)),
            #[allow(unreachable_patterns)]
            other => Err(ConfigError::ProviderDisabled(other)),
        }
    }
}

fn parse_number<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(var)
        .filter(|v| !v.trim().is_empty())
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber { var, value })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<CliConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        CliConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.provider, ProviderKind::Ollama);
        assert_eq!(config.agent.max_tool_cycles, DEFAULT_MAX_TOOL_CYCLES);
        assert!(config.agent.system_prompt.is_none());
        assert!(config.mcp_timeout_secs.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("LLM_PROVIDER", "Anthropic"),
            ("AGENT_MAX_TOOL_CYCLES", "4"),
            ("AGENT_SYSTEM_PROMPT", "Answer in one sentence."),
            ("MCP_REQUEST_TIMEOUT_SECS", "30"),
        ])
        .unwrap();
        assert_eq!(config.provider, ProviderKind::Anthropic);
        assert_eq!(config.agent.max_tool_cycles, 4);
        assert_eq!(config.agent.system_prompt.as_deref(), Some("Answer in one sentence."));
        assert_eq!(config.mcp_timeout_secs, Some(30));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config(&[("LLM_PROVIDER", "gemini")]),
            Err(ConfigError::UnknownProvider(_))
        ));
        assert!(matches!(
            config(&[("AGENT_MAX_TOOL_CYCLES", "many")]),
            Err(ConfigError::InvalidNumber { var: "AGENT_MAX_TOOL_CYCLES", .. })
        ));
    }
}
