//! agent-cli
//!
//! Interactive shell: connects to an MCP server script, then answers
//! queries with the configured model backend until `quit`.

mod config;

use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{Session, ToolProvider};
use agent_runtime::{McpClient, McpServerConfig};

use crate::config::CliConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries answers only
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Some(script) = std::env::args().nth(1) else {
        bail!("Usage: agent-cli <path_to_server_script>");
    };

    let config = CliConfig::from_env().context("Invalid configuration")?;
    let provider = config.build_provider().context("Failed to set up model backend")?;

    match provider.health_check().await {
        Ok(true) => {
            tracing::info!(provider = provider.name(), "Model backend reachable");
            if let Ok(models) = provider.list_models().await {
                for model in models {
                    tracing::info!("  Model: {}", model);
                }
            }
        }
        Ok(false) | Err(_) => {
            tracing::warn!(provider = provider.name(), "Model backend not reachable; queries will fail");
        }
    }

    let server = McpServerConfig::for_script(&script)
        .map_err(anyhow::Error::msg)?
        .with_request_timeout(config.mcp_timeout_secs);
    let client = Arc::new(
        McpClient::spawn(server)
            .await
            .context("Failed to connect to MCP server")?,
    );
    let tools: Arc<dyn ToolProvider> = client.clone();

    let session = match Session::connect(provider, tools, config.agent.clone()).await {
        Ok(session) => session,
        Err(e) => {
            client.disconnect().await;
            return Err(e).context("Failed to start session");
        }
    };

    let names = session.catalog().names().join(", ");
    println!("\nConnected to server with tools: {names}");

    let result = chat_loop(session).await;
    client.disconnect().await;
    result
}

/// Read queries until `quit` or end of input
async fn chat_loop(mut session: Session) -> anyhow::Result<()> {
    println!("\nMCP Client Started!");
    println!("Type your queries or 'quit' to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"\nQuery: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("quit") {
            break;
        }

        match session.ask(query).await {
            Ok(answer) => println!("\n{answer}"),
            Err(e) if e.is_fatal_to_session() => {
                eprintln!("\nError: {}", e.user_message());
                return Err(e).context("Tool server connection lost");
            }
            Err(e) => {
                tracing::debug!(error = %e, "Turn failed");
                eprintln!("\nError: {}", e.user_message());
            }
        }
    }

    tracing::info!(
        session = %session.id,
        turns = session.turn_count(),
        active_secs = session.duration().num_seconds(),
        "Session ended"
    );
    Ok(())
}
