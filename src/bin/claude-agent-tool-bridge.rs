//! Stdio MCP server started by the Claude CLI for in-process SDK tools.
//!
//! Usage: `claude-agent-tool-bridge <SOCKET_PATH> <SERVER_NAME> [VERSION] [TOOLS_JSON]`

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use claude_agent_bridge::bridge::{RunnerConfig, ToolBridgeRunner, BRIDGE_TIMEOUT_ENV};

#[derive(Parser, Debug)]
#[command(
    name = "claude-agent-tool-bridge",
    about = "Forward MCP tool calls from the Claude CLI to an SDK host socket"
)]
struct Cli {
    /// Absolute path of the host's Unix socket.
    socket_path: String,

    /// MCP server name reported to the CLI.
    server_name: String,

    /// Server version (defaults to 1.0.0).
    #[arg(value_name = "VERSION")]
    server_version: Option<String>,

    /// JSON array of `{name, description, inputSchema}` tool entries.
    #[arg(value_name = "TOOLS_JSON")]
    tools_json: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // stdout carries the protocol; diagnostics go to stderr only.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = match RunnerConfig::from_args(
        &cli.socket_path,
        &cli.server_name,
        cli.server_version.as_deref(),
        cli.tools_json.as_deref(),
    ) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("claude-agent-tool-bridge: {err}");
            return ExitCode::from(2);
        }
    };
    let timeout = RunnerConfig::timeout_from_env(std::env::var(BRIDGE_TIMEOUT_ENV).ok().as_deref());
    let config = config.with_timeout(timeout);

    let runner = match ToolBridgeRunner::connect(config).await {
        Ok(runner) => runner,
        Err(err) => {
            eprintln!("claude-agent-tool-bridge: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runner
        .run(tokio::io::stdin(), tokio::io::stdout(), shutdown_signal())
        .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("claude-agent-tool-bridge: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                log::warn!("[runner::main] failed to register SIGTERM handler: {err}");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
