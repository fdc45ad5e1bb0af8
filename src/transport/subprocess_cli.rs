//! Argument construction and process start-up for the Claude CLI.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde_json::{json, Map, Value};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::{timeout, Duration};

#[cfg(unix)]
use users::get_user_by_name;

use crate::config::{
    AgentDefinition, ClaudeAgentOptions, McpServerConfig, McpServers, SettingSource, SystemPrompt,
};
use crate::env::SKIP_VERSION_CHECK_ENV;
use crate::error::{CliConnectionError, CliNotFoundError, SdkError};
use crate::internal::sanitize::sanitize_argument;

const MINIMUM_CLAUDE_CODE_VERSION: &str = "2.0.0";
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// How the prompt reaches the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptMode {
    /// One-shot prompt passed on the command line; stdin is closed.
    Text(String),
    /// Conversation driven over stdin with stream-json frames.
    Streaming,
}

impl PromptMode {
    pub fn is_streaming(&self) -> bool {
        matches!(self, PromptMode::Streaming)
    }
}

impl From<&str> for PromptMode {
    fn from(prompt: &str) -> Self {
        PromptMode::Text(prompt.to_string())
    }
}

impl From<String> for PromptMode {
    fn from(prompt: String) -> Self {
        PromptMode::Text(prompt)
    }
}

/// Pipes of a started CLI process.
#[derive(Debug)]
pub struct CliProcess {
    pub child: Child,
    /// `None` in text mode.
    pub stdin: Option<ChildStdin>,
    pub stdout: ChildStdout,
    pub stderr: Option<ChildStderr>,
}

/// Resolves the CLI executable and starts it with arguments built from options.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    prompt: PromptMode,
    options: ClaudeAgentOptions,
    cli_path: PathBuf,
}

impl ProcessLauncher {
    /// Resolve the executable. Fails with `CliNotFound` when the CLI is absent.
    pub fn new(prompt: PromptMode, options: &ClaudeAgentOptions) -> Result<Self, SdkError> {
        let cli_path = match &options.cli_path {
            Some(path) if path.is_file() => path.clone(),
            Some(path) => {
                return Err(SdkError::from(CliNotFoundError::new(
                    "Claude Code not found at configured path",
                    Some(path.clone()),
                )))
            }
            None => find_cli()?,
        };

        Ok(Self {
            prompt,
            options: options.clone(),
            cli_path,
        })
    }

    pub fn cli_path(&self) -> &Path {
        &self.cli_path
    }

    pub fn prompt(&self) -> &PromptMode {
        &self.prompt
    }

    /// Build the argument vector. `mcp_servers` is the final server map, with
    /// in-process entries already replaced by stdio descriptors.
    pub fn build_args(&self, mcp_servers: &McpServers) -> Result<Vec<OsString>, SdkError> {
        let options = &self.options;
        let mut args: Vec<OsString> = Vec::new();
        args.push(OsString::from("--output-format"));
        args.push(OsString::from("stream-json"));
        args.push(OsString::from("--verbose"));

        match &options.system_prompt {
            None => {
                args.push(OsString::from("--system-prompt"));
                args.push(OsString::from(""));
            }
            Some(SystemPrompt::Text(text)) => {
                args.push(OsString::from("--system-prompt"));
                args.push(sanitize_argument(text).into());
            }
            Some(SystemPrompt::Preset(preset)) => {
                if let Some(append) = &preset.append {
                    args.push(OsString::from("--append-system-prompt"));
                    args.push(sanitize_argument(append).into());
                }
            }
        }

        if !options.allowed_tools.is_empty() {
            args.push(OsString::from("--allowedTools"));
            args.push(options.allowed_tools.join(",").into());
        }

        if let Some(max_turns) = options.max_turns {
            args.push(OsString::from("--max-turns"));
            args.push(max_turns.to_string().into());
        }

        if let Some(max_budget) = options.max_budget_usd {
            args.push(OsString::from("--max-budget-usd"));
            args.push(max_budget.to_string().into());
        }

        if !options.disallowed_tools.is_empty() {
            args.push(OsString::from("--disallowedTools"));
            args.push(options.disallowed_tools.join(",").into());
        }

        if let Some(model) = &options.model {
            args.push(OsString::from("--model"));
            args.push(model.clone().into());
        }

        if let Some(mode) = &options.permission_mode {
            args.push(OsString::from("--permission-mode"));
            args.push(mode.as_str().into());
        }

        if options.continue_conversation {
            args.push(OsString::from("--continue"));
        }

        if let Some(resume) = &options.resume {
            args.push(OsString::from("--resume"));
            args.push(resume.clone().into());
        }

        if let Some(settings) = &options.settings {
            args.push(OsString::from("--settings"));
            args.push(settings.clone().into());
        }

        for directory in &options.add_dirs {
            args.push(OsString::from("--add-dir"));
            args.push(directory.as_os_str().to_owned());
        }

        if !mcp_servers.is_empty() {
            args.push(OsString::from("--mcp-config"));
            args.push(build_mcp_argument(mcp_servers)?.into());
        }

        if options.include_partial_messages {
            args.push(OsString::from("--include-partial-messages"));
        }

        if options.fork_session {
            args.push(OsString::from("--fork-session"));
        }

        if let Some(agents) = &options.agents {
            if !agents.is_empty() {
                args.push(OsString::from("--agents"));
                args.push(build_agents_json(agents)?.into());
            }
        }

        let sources_value = options
            .setting_sources
            .as_ref()
            .map(|sources| {
                sources
                    .iter()
                    .map(SettingSource::as_str)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default();
        args.push(OsString::from("--setting-sources"));
        args.push(sources_value.into());

        if let Some(schema) = &options.output_schema {
            args.push(OsString::from("--json-schema"));
            args.push(serde_json::to_string(schema)?.into());
        }

        let mut extra: Vec<_> = options.extra_args.iter().collect();
        extra.sort_by(|a, b| a.0.cmp(b.0));
        for (flag, value) in extra {
            args.push(format!("--{flag}").into());
            if let Some(value) = value {
                args.push(value.clone().into());
            }
        }

        match &self.prompt {
            PromptMode::Streaming => {
                args.push(OsString::from("--input-format"));
                args.push(OsString::from("stream-json"));
            }
            PromptMode::Text(prompt) => {
                args.push(OsString::from("--print"));
                args.push(OsString::from("--"));
                args.push(sanitize_argument(prompt).into());
            }
        }

        Ok(args)
    }

    /// Start the CLI with piped stdout/stderr. Must run inside a tokio runtime.
    ///
    /// Stdin is piped in streaming mode and `/dev/null` in text mode.
    pub fn spawn(&self, args: &[OsString]) -> Result<CliProcess, SdkError> {
        let mut command = Command::new(&self.cli_path);
        command.args(args);

        if let Some(cwd) = &self.options.cwd {
            command.current_dir(cwd);
            command.env("PWD", cwd);
        }

        command.envs(&self.options.env);
        command.env("CLAUDE_CODE_ENTRYPOINT", "sdk-rs");
        command.env("CLAUDE_AGENT_SDK_VERSION", env!("CARGO_PKG_VERSION"));

        #[cfg(unix)]
        if let Some(user) = &self.options.user {
            match get_user_by_name(user) {
                Some(info) => {
                    command.uid(info.uid());
                    command.gid(info.primary_group_id());
                }
                None => log::warn!("[launcher::spawn] unknown user {user:?}; running as current user"),
            }
        }

        let streaming = self.prompt.is_streaming();
        command
            .stdin(if streaming { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::debug!(
            "[launcher::spawn] starting {} with {} args (streaming: {streaming})",
            self.cli_path.display(),
            args.len()
        );

        let mut child = command
            .spawn()
            .map_err(|err| CliConnectionError::new(format!("Failed to start Claude CLI: {err}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CliConnectionError::new("Missing stdout handle from CLI process"))?;
        let stdin = child.stdin.take();
        let stderr = child.stderr.take();

        Ok(CliProcess {
            child,
            stdin,
            stdout,
            stderr,
        })
    }

    /// Whether the background version check should run.
    pub fn version_check_enabled() -> bool {
        std::env::var_os(SKIP_VERSION_CHECK_ENV).is_none()
    }
}

/// Run `<cli> -v` and warn when the installed CLI is older than supported.
pub async fn check_version(cli_path: PathBuf) {
    let output = match timeout(
        VERSION_CHECK_TIMEOUT,
        Command::new(&cli_path)
            .arg("-v")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    {
        Ok(Ok(output)) => output,
        _ => return,
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    if let (Some(current), Some(minimum)) = (
        parse_version_components(&stdout),
        parse_version_components(MINIMUM_CLAUDE_CODE_VERSION),
    ) {
        if current < minimum {
            log::warn!(
                "[launcher::check_version] Claude Code version {} is unsupported; minimum is {MINIMUM_CLAUDE_CODE_VERSION}",
                stdout.trim()
            );
        }
    }
}

fn find_cli() -> Result<PathBuf, SdkError> {
    if let Ok(path) = which::which("claude") {
        return Ok(path);
    }

    let mut locations: Vec<PathBuf> = Vec::new();
    if let Some(home_dir) = dirs::home_dir() {
        locations.push(home_dir.join(".npm-global/bin/claude"));
        locations.push(home_dir.join(".local/bin/claude"));
        locations.push(home_dir.join("node_modules/.bin/claude"));
        locations.push(home_dir.join(".yarn/bin/claude"));
        locations.push(home_dir.join(".claude/local/claude"));
    }
    locations.push(PathBuf::from("/usr/local/bin/claude"));

    locations
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| {
            SdkError::from(CliNotFoundError::new(
                "Claude Code not found. Install with:\n  npm install -g @anthropic-ai/claude-code\n\nOr set ClaudeAgentOptions::cli_path",
                None,
            ))
        })
}

/// Single-line `{"mcpServers": {...}}` document, or the path/inline value as given.
fn build_mcp_argument(servers: &McpServers) -> Result<String, SdkError> {
    match servers {
        McpServers::Inline(inline) => Ok(inline.clone()),
        McpServers::Path(path) => Ok(path.display().to_string()),
        McpServers::Map(map) => {
            let mut mcp_servers = Map::new();
            for (name, config) in map {
                if matches!(config, McpServerConfig::Sdk(_)) {
                    log::warn!("[launcher::mcp] in-process server {name:?} has no bridge; skipping");
                    continue;
                }
                mcp_servers.insert(name.clone(), serde_json::to_value(config)?);
            }
            Ok(serde_json::to_string(&json!({ "mcpServers": mcp_servers }))?)
        }
    }
}

fn build_agents_json(agents: &HashMap<String, AgentDefinition>) -> Result<String, SdkError> {
    let mut root = Map::new();
    for (name, agent) in agents {
        let mut value = match serde_json::to_value(agent)? {
            Value::Object(object) => object,
            _ => Map::new(),
        };
        value.retain(|_, v| !v.is_null());
        root.insert(name.clone(), Value::Object(value));
    }
    Ok(serde_json::to_string(&Value::Object(root))?)
}

fn parse_version_components(input: &str) -> Option<[u32; 3]> {
    let token = input
        .split_whitespace()
        .find(|segment| segment.chars().all(|ch| ch.is_ascii_digit() || ch == '.'))?;

    let mut parts = token.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    Some([major, minor, patch])
}
