//! Conversation Loop
//!
//! Drives one user turn to completion: ask the model, satisfy any tool
//! requests it made, splice the results into the history, and repeat until
//! the model answers without requesting tools.
//!
//! ```text
//! AwaitingModel ──tool calls──▶ HasToolCalls ──results appended──▶ AwaitingModel
//!       │
//!       └──no tool calls──▶ Done
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{AgentError, Result};
use crate::message::{Conversation, Message};
use crate::provider::{ContinuationPolicy, LlmProvider, ModelTurn};
use crate::tool::{ToolCall, ToolCatalog, ToolInvoker, ToolProvider, ToolResult};

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Optional system prompt placed ahead of every user query
    pub system_prompt: Option<String>,

    /// Maximum model replies carrying tool calls per user query
    pub max_tool_cycles: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_tool_cycles: DEFAULT_MAX_TOOL_CYCLES,
        }
    }
}

pub const DEFAULT_MAX_TOOL_CYCLES: usize = 10;

/// One line of the turn's output buffer
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnEntry {
    /// Text produced by the model
    Text { text: String },

    /// A tool was invoked
    ToolCall { name: String, arguments: String },

    /// A tool call could not be satisfied; the model was told in-band
    ToolError { name: String, message: String },
}

impl fmt::Display for TurnEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnEntry::Text { text } => f.write_str(text),
            TurnEntry::ToolCall { name, arguments } => {
                write!(f, "[Calling tool {name} with args {arguments}]")
            }
            TurnEntry::ToolError { name, message } => write!(f, "[Tool {name} failed: {message}]"),
        }
    }
}

/// Everything a completed turn produced
#[derive(Clone, Debug, Default)]
pub struct TurnOutput {
    /// Output buffer in the order it was written
    pub entries: Vec<TurnEntry>,

    /// Text of the model's final reply
    pub answer: String,

    /// Full history of the turn, as last sent to the model
    pub conversation: Conversation,

    /// Number of completion calls made
    pub model_calls: usize,
}

impl TurnOutput {
    fn push(&mut self, entry: TurnEntry) {
        self.entries.push(entry);
    }

    /// Tool-call trace lines only
    pub fn tool_calls(&self) -> impl Iterator<Item = &TurnEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e, TurnEntry::ToolCall { .. }))
    }

    /// Error lines only
    pub fn tool_errors(&self) -> impl Iterator<Item = &TurnEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e, TurnEntry::ToolError { .. }))
    }

    /// Output buffer joined with newlines
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for TurnOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

enum LoopState {
    AwaitingModel,
    HasToolCalls(VecDeque<ToolCall>),
    Done,
}

/// The conversation loop
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    catalog: Arc<ToolCatalog>,
    invoker: ToolInvoker,
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        catalog: Arc<ToolCatalog>,
        invoker: ToolInvoker,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            catalog,
            invoker,
            config,
        }
    }

    /// Run one user query to completion
    pub async fn run_turn(&self, query: &str) -> Result<TurnOutput> {
        let mut conversation = match &self.config.system_prompt {
            Some(prompt) => Conversation::with_system_prompt(prompt.clone()),
            None => Conversation::new(),
        };
        conversation.push(Message::user(query));
        self.run(conversation).await
    }

    /// Drive an existing history (ending in a user message) to completion
    pub async fn run(&self, conversation: Conversation) -> Result<TurnOutput> {
        let policy = self.provider.continuation();
        let mut output = TurnOutput {
            conversation,
            ..TurnOutput::default()
        };
        let mut deferred: VecDeque<ToolCall> = VecDeque::new();
        let mut cycles = 0;
        let mut state = LoopState::AwaitingModel;

        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    let turn = self.ask_model(&mut output).await?;

                    if turn.is_terminal() {
                        if deferred.is_empty() {
                            LoopState::Done
                        } else {
                            LoopState::HasToolCalls(std::mem::take(&mut deferred))
                        }
                    } else {
                        if !deferred.is_empty() {
                            tracing::warn!(
                                superseded = deferred.len(),
                                "Model issued new tool calls; dropping unsatisfied ones from the previous reply"
                            );
                            deferred.clear();
                        }
                        cycles += 1;
                        if cycles > self.config.max_tool_cycles {
                            tracing::warn!(limit = self.config.max_tool_cycles, "Tool-call cycle limit reached");
                            return Err(AgentError::TurnLimitExceeded(self.config.max_tool_cycles));
                        }
                        LoopState::HasToolCalls(turn.tool_calls.into())
                    }
                }

                LoopState::HasToolCalls(mut calls) => {
                    match policy {
                        ContinuationPolicy::AfterAllCalls => {
                            while let Some(call) = calls.pop_front() {
                                self.satisfy(call, &mut output).await?;
                            }
                        }
                        ContinuationPolicy::AfterEachCall => {
                            if let Some(call) = calls.pop_front() {
                                self.satisfy(call, &mut output).await?;
                            }
                            deferred = calls;
                        }
                    }
                    LoopState::AwaitingModel
                }

                LoopState::Done => return Ok(output),
            };
        }
    }

    /// AwaitingModel step: one completion call, text recorded in buffer and history
    async fn ask_model(&self, output: &mut TurnOutput) -> Result<ModelTurn> {
        output.conversation.validate()?;

        let turn = self
            .provider
            .complete(output.conversation.messages(), &self.catalog)
            .await?;
        output.model_calls += 1;

        tracing::debug!(
            provider = self.provider.name(),
            text_segments = turn.text_segments.len(),
            tool_calls = turn.tool_calls.len(),
            "Model replied"
        );

        let text = turn.joined_text();
        if !text.is_empty() {
            output.push(TurnEntry::Text { text: text.clone() });
            output.conversation.push(Message::assistant(text.clone()));
        }
        output.answer = text;
        Ok(turn)
    }

    /// Execute one tool call and append the request and its result to history.
    /// Failures become an error result for the model. Only a lost tool
    /// provider ends the turn, with [`AgentError::ProviderUnavailable`].
    async fn satisfy(&self, call: ToolCall, output: &mut TurnOutput) -> Result<()> {
        let result = if let Some(err) = call.argument_error() {
            tracing::warn!(tool = %call.name, error = %err, "Skipping tool call with malformed arguments");
            output.push(TurnEntry::ToolError {
                name: call.name.clone(),
                message: err.to_string(),
            });
            ToolResult::failure(&call, &err)
        } else {
            output.push(TurnEntry::ToolCall {
                name: call.name.clone(),
                arguments: call.arguments.to_json_string(),
            });
            match self.invoker.invoke(&call).await {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(tool = %call.name, error = %err, "Tool call failed");
                    output.push(TurnEntry::ToolError {
                        name: call.name.clone(),
                        message: err.to_string(),
                    });
                    ToolResult::failure(&call, &err)
                }
            }
        };

        let name = call.name.clone();
        output.conversation.push_tool_exchange(call, result);

        if self.invoker.is_connected() {
            Ok(())
        } else {
            tracing::error!(tool = %name, "Tool provider connection lost");
            Err(AgentError::ProviderUnavailable(format!(
                "connection lost while calling '{name}'"
            )))
        }
    }

    /// Get the tool catalog
    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Get the provider
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Get configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: Option<Arc<dyn ToolProvider>>,
    catalog: Option<ToolCatalog>,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: None,
            catalog: None,
            config: AgentConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tool_provider(mut self, tools: Arc<dyn ToolProvider>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Use an already-fetched catalog instead of querying the provider
    pub fn catalog(mut self, catalog: ToolCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_tool_cycles(mut self, max: usize) -> Self {
        self.config.max_tool_cycles = max;
        self
    }

    /// Build the agent, fetching the catalog if none was supplied
    pub async fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        let tools = self
            .tools
            .ok_or_else(|| AgentError::Config("Tool provider is required".into()))?;

        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => ToolCatalog::fetch(tools.as_ref()).await?,
        };

        Ok(Agent::new(
            provider,
            Arc::new(catalog),
            ToolInvoker::new(tools),
            self.config,
        ))
    }
}
