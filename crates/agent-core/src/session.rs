//! Session Management
//!
//! A session owns the state established once per connection: the tool
//! catalog, the chosen model backend and the tool-provider connection.
//! User turns run against it one at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::provider::LlmProvider;
use crate::reasoning::{Agent, AgentBuilder, AgentConfig, TurnOutput};
use crate::tool::{ToolCatalog, ToolProvider};

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected agent session
pub struct Session {
    /// Unique identifier
    pub id: SessionId,

    agent: Agent,

    tools: Arc<dyn ToolProvider>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last activity timestamp
    pub updated_at: DateTime<Utc>,

    turns: usize,
}

impl Session {
    /// Fetch the tool catalog and bind it to a provider.
    ///
    /// Fails with [`crate::AgentError::ProviderUnavailable`] when the tool
    /// provider cannot be listed; the session cannot proceed without tools.
    pub async fn connect(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<dyn ToolProvider>,
        config: AgentConfig,
    ) -> Result<Self> {
        let agent = AgentBuilder::new()
            .provider(provider)
            .tool_provider(Arc::clone(&tools))
            .config(config)
            .build()
            .await?;

        let now = Utc::now();
        let session = Self {
            id: SessionId::new(),
            agent,
            tools,
            created_at: now,
            updated_at: now,
            turns: 0,
        };

        tracing::info!(
            session = %session.id,
            provider = session.agent.provider().name(),
            tools = session.catalog().len(),
            "Session started"
        );
        Ok(session)
    }

    /// Run one user query. `&mut self` keeps turns strictly sequential.
    ///
    /// A failed turn leaves the session usable for the next query.
    pub async fn run_turn(&mut self, query: &str) -> Result<TurnOutput> {
        self.turns += 1;
        self.touch();
        tracing::info!(session = %self.id, turn = self.turns, "Processing query");

        let result = self.agent.run_turn(query).await;
        if let Err(e) = &result {
            tracing::warn!(session = %self.id, turn = self.turns, error = %e, "Turn failed");
        }
        result
    }

    /// Run one user query and return the joined output buffer
    pub async fn ask(&mut self, query: &str) -> Result<String> {
        self.run_turn(query).await.map(|output| output.render())
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn catalog(&self) -> &ToolCatalog {
        self.agent.catalog()
    }

    /// The tool-provider connection this session was built on
    pub fn tool_provider(&self) -> &Arc<dyn ToolProvider> {
        &self.tools
    }

    /// Number of queries run so far
    pub fn turn_count(&self) -> usize {
        self.turns
    }

    /// Duration since creation
    pub fn duration(&self) -> chrono::Duration {
        self.updated_at - self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::message::Message;
    use crate::provider::ModelTurn;
    use crate::tool::{ToolArguments, ToolCall, ToolDescriptor, ToolOutput};
    use async_trait::async_trait;
    use serde_json::{Map, Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, history: &[Message], _catalog: &ToolCatalog) -> Result<ModelTurn> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(AgentError::backend("echo", "connection reset"));
            }
            let last = history.last().and_then(Message::text).unwrap_or_default();
            Ok(ModelTurn::text(format!("echo: {last}")))
        }
    }

    struct OneTool;

    #[async_trait]
    impl ToolProvider for OneTool {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Ok(vec![ToolDescriptor::new("get-games", "Get all games", json!({}))])
        }

        async fn call_tool(&self, _name: &str, _arguments: &Map<String, Value>) -> Result<ToolOutput> {
            Ok(ToolOutput::text("[]"))
        }
    }

    struct NoTools;

    #[async_trait]
    impl ToolProvider for NoTools {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Err(AgentError::ProviderUnavailable("spawn failed".into()))
        }

        async fn call_tool(&self, _name: &str, _arguments: &Map<String, Value>) -> Result<ToolOutput> {
            Err(AgentError::ProviderUnavailable("spawn failed".into()))
        }
    }

    struct ClosedTools;

    #[async_trait]
    impl ToolProvider for ClosedTools {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Ok(vec![ToolDescriptor::new("get-games", "Get all games", json!({}))])
        }

        async fn call_tool(&self, _name: &str, _arguments: &Map<String, Value>) -> Result<ToolOutput> {
            Ok(ToolOutput::text("[]"))
        }

        fn is_connected(&self) -> bool {
            false
        }
    }

    /// Requests `get-games` on every reply
    struct ToolHungry;

    #[async_trait]
    impl LlmProvider for ToolHungry {
        fn name(&self) -> &str {
            "hungry"
        }

        async fn complete(&self, history: &[Message], _catalog: &ToolCatalog) -> Result<ModelTurn> {
            Ok(ModelTurn::default().with_tool_call(ToolCall::new(
                format!("c{}", history.len()),
                "get-games",
                ToolArguments::default(),
            )))
        }
    }

    fn echo() -> Arc<dyn LlmProvider> {
        Arc::new(EchoProvider {
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_session_survives_failed_turn() {
        let mut session = Session::connect(echo(), Arc::new(OneTool), AgentConfig::default())
            .await
            .unwrap();
        assert_eq!(session.catalog().names(), vec!["get-games"]);

        let first = session.ask("hello").await;
        assert!(matches!(first, Err(AgentError::Backend { .. })));

        let second = session.ask("hello again").await.unwrap();
        assert_eq!(second, "echo: hello again");
        assert_eq!(session.turn_count(), 2);
    }

    #[tokio::test]
    async fn test_connect_fails_without_tool_provider() {
        let result = Session::connect(echo(), Arc::new(NoTools), AgentConfig::default()).await;
        assert!(matches!(result, Err(AgentError::ProviderUnavailable(_))));
    }

    #[tokio::test]
    async fn test_disconnected_provider_is_fatal_to_session() {
        let mut session = Session::connect(Arc::new(ToolHungry), Arc::new(ClosedTools), AgentConfig::default())
            .await
            .unwrap();
        assert!(!session.tool_provider().is_connected());

        let err = session.ask("list available games").await.unwrap_err();
        assert!(err.is_fatal_to_session());
        assert!(session.duration() >= chrono::Duration::zero());
    }

    #[tokio::test]
    async fn test_default_provider_lists_no_models() {
        assert!(echo().list_models().await.unwrap().is_empty());
    }
}
