//! Interactive terminal chat.
//!
//! Reads one line per turn from stdin. `quit`/`exit` (any case), end of
//! input, or Ctrl-C end the session; tool servers are always cleaned up.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::agent_core::conversation::{ConversationManager, DEFAULT_MAX_KEEP};
use crate::agent_core::turn::TurnRunner;
use crate::config::{inject_api_keys, load_servers_config, AppConfig};
use crate::inference::client::LlmClient;
use crate::mcp_client::registry::ServerRegistry;
use crate::mcp_client::types::ToolDescriptor;
use crate::LogFormat;

pub const DEFAULT_SERVERS_PATH: &str = "config/servers.json";

#[derive(Parser, Debug)]
#[command(
    name = "toolchat",
    version,
    about = "Chat with an LLM that calls MCP tool servers"
)]
pub struct Cli {
    /// Tool server configuration file (`mcpServers` JSON)
    #[arg(short, long, default_value = DEFAULT_SERVERS_PATH)]
    pub config: PathBuf,

    /// Model name, overriding TOOLCHAT_MODEL
    #[arg(long)]
    pub model: Option<String>,

    /// Replace the default system prompt
    #[arg(long)]
    pub system: Option<String>,

    /// Messages kept when history is pruned
    #[arg(long, default_value_t = DEFAULT_MAX_KEEP)]
    pub max_keep: usize,

    /// Print the tools every connected server offers, then exit
    #[arg(long)]
    pub list_tools: bool,

    /// Log file format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Mirror logs to stderr
    #[arg(long)]
    pub log_stderr: bool,
}

/// Whether `input` ends the session.
pub fn is_exit_command(input: &str) -> bool {
    let input = input.trim();
    input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit")
}

/// Start every server, chat until the user leaves, then clean up.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let app = AppConfig::load();
    let mut llm_config = app.llm_config()?;
    if let Some(model) = &cli.model {
        llm_config.model = model.clone();
    }
    let client = LlmClient::new(llm_config)?;

    let mut servers = load_servers_config(&cli.config)?;
    inject_api_keys(&mut servers, &app);

    let mut registry = ServerRegistry::new();
    let status = registry.initialize_all(&servers).await;
    for (name, connected) in &status {
        let mark = if *connected { "ok" } else { "failed" };
        println!("  {name}: {mark}");
    }
    if !registry.any_connected() {
        registry.cleanup_all().await;
        anyhow::bail!("no tool servers connected ({} configured)", status.len());
    }

    let result = chat(&cli, &client, &registry).await;
    registry.cleanup_all().await;
    tracing::info!("session ended");
    result
}

async fn chat(cli: &Cli, client: &LlmClient, registry: &ServerRegistry) -> anyhow::Result<()> {
    let tools = registry.list_all_tools().await;

    if cli.list_tools {
        for tool in &tools {
            println!("{}\n", tool.format_for_llm());
        }
        return Ok(());
    }

    let definitions = tools.iter().map(ToolDescriptor::to_wire).collect();
    let mut runner = TurnRunner::new(
        ConversationManager::new(cli.max_keep),
        client,
        registry,
        definitions,
    );
    if let Some(system) = &cli.system {
        runner = runner.with_system_prompt(system);
    }

    let mut state = ConversationManager::initialize_conversation(Some(registry)).await;
    tracing::info!(
        session_id = %state.session_id,
        model = %client.model(),
        tools = tools.len(),
        "chat session started"
    );

    println!(
        "\nConnected to {} with {} tools. Type 'quit' or 'exit' to leave.",
        registry.connected_servers().join(", "),
        tools.len()
    );
    if !state.conversation_summary.is_empty() {
        println!("(Continuing from a previous conversation.)");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nYou: ");
        std::io::stdout().flush().context("failed to flush stdout")?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if is_exit_command(input) {
            break;
        }

        let logged_before = state.tool_log.len();
        let turn = tokio::select! {
            turn = runner.run_turn(&mut state, input) => turn,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };

        for entry in &state.tool_log[logged_before..] {
            println!("  [tool] {}", entry.tool);
        }
        match turn {
            Ok(outcome) => {
                for reply in outcome.replies {
                    println!("\nAssistant: {reply}");
                }
            }
            Err(e) => {
                tracing::error!(session_id = %state.session_id, error = %e, "turn failed");
                eprintln!("\nError: {e}");
            }
        }
    }

    println!("Goodbye.");
    Ok(())
}
