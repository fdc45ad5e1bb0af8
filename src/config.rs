//! Options consumed by [`Query`](crate::internal::query::Query) and the CLI launcher.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::internal::line_codec::{DecodeDiagnostic, DEFAULT_MAX_BUFFER_SIZE, MAX_BUFFER_SIZE_LIMIT};
use crate::mcp::SdkMcpServer;
use crate::permission::PermissionMode;

/// Pull timeout used when none is configured.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(600);
/// Upper bound for any pull timeout.
pub const MAX_QUERY_TIMEOUT: Duration = Duration::from_secs(3600);
/// How long the bridge runner waits for a tool result by default.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);
pub const MIN_TOOL_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_TOOL_TIMEOUT: Duration = Duration::from_secs(3600);

/// Source of configuration settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingSource {
    User,
    Project,
    Local,
}

/// Preset system prompt configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemPromptPreset {
    #[serde(rename = "type")]
    pub kind: SystemPromptPresetType,
    pub preset: SystemPromptPresetName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append: Option<String>,
}

/// Type discriminator for system prompt presets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SystemPromptPresetType {
    #[serde(rename = "preset")]
    Preset,
}

/// Supported preset names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SystemPromptPresetName {
    #[serde(rename = "claude_code")]
    ClaudeCode,
}

/// Representation of the system prompt option supplied to the SDK.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Preset(SystemPromptPreset),
}

/// Agent definition configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDefinition {
    pub description: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Stdio MCP server launched by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpStdioServerConfig {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

/// Remote MCP server reached over SSE or streamable HTTP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpRemoteServerConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// Marker for a server whose tools live in this process.
///
/// The handlers are looked up in [`ClaudeAgentOptions::sdk_servers`] by the
/// map key; this entry never reaches the CLI as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpSdkServerConfig {
    pub name: String,
}

/// Union of supported MCP server configurations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum McpServerConfig {
    #[serde(rename = "stdio")]
    Stdio(McpStdioServerConfig),
    #[serde(rename = "sse")]
    Sse(McpRemoteServerConfig),
    #[serde(rename = "http")]
    Http(McpRemoteServerConfig),
    #[serde(rename = "sdk")]
    Sdk(McpSdkServerConfig),
}

/// Representation of MCP server configuration input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum McpServers {
    Map(HashMap<String, McpServerConfig>),
    Path(PathBuf),
    Inline(String),
}

impl McpServers {
    pub fn is_empty(&self) -> bool {
        match self {
            McpServers::Map(map) => map.is_empty(),
            McpServers::Inline(value) => value.trim().is_empty(),
            McpServers::Path(_) => false,
        }
    }
}

impl Default for McpServers {
    fn default() -> Self {
        Self::Map(HashMap::new())
    }
}

/// Callback invoked when the CLI writes to stderr.
pub type StderrCallback = Arc<dyn Fn(&str) + Send + Sync + 'static>;

/// Query options for Claude SDK.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClaudeAgentOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<SystemPrompt>,
    pub mcp_servers: McpServers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
    pub continue_conversation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_budget_usd: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disallowed_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add_dirs: Vec<PathBuf>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub extra_args: HashMap<String, Option<String>>,
    /// Carry-over ceiling for the line decoder, in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_buffer_size: Option<usize>,
    #[serde(skip)]
    pub stderr: Option<StderrCallback>,
    #[serde(skip)]
    pub decode_diagnostics: Option<DecodeDiagnostic>,
    #[serde(skip)]
    pub sdk_servers: HashMap<String, Arc<dyn SdkMcpServer>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub include_partial_messages: bool,
    pub fork_session: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<HashMap<String, AgentDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setting_sources: Option<Vec<SettingSource>>,
    /// JSON schema for structured output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// How long a pull may wait for the next message.
    #[serde(skip)]
    pub timeout: Option<Duration>,
    /// How long the bridge runner waits for a tool result.
    #[serde(skip)]
    pub tool_timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge_runner_path: Option<PathBuf>,
}

impl ClaudeAgentOptions {
    /// Register an SDK MCP server instance that will be hosted in-process.
    pub fn add_sdk_server(&mut self, name: impl Into<String>, server: Arc<dyn SdkMcpServer>) {
        let name = name.into();
        self.sdk_servers.insert(name.clone(), server);

        let mut map = match std::mem::take(&mut self.mcp_servers) {
            McpServers::Map(map) => map,
            McpServers::Path(_) | McpServers::Inline(_) => HashMap::new(),
        };

        map.insert(
            name.clone(),
            McpServerConfig::Sdk(McpSdkServerConfig { name }),
        );

        self.mcp_servers = McpServers::Map(map);
    }

    /// Pull timeout after defaults and the upper bound are applied.
    ///
    /// Zero counts as unset.
    pub fn query_timeout(&self) -> Duration {
        effective_query_timeout(self.timeout)
    }

    /// Timeout handed to bridge runners: the shorter of the tool and query
    /// timeouts, clamped to `MIN_TOOL_TIMEOUT..=MAX_TOOL_TIMEOUT`.
    pub fn bridge_timeout(&self) -> Duration {
        let tool = self
            .tool_timeout
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(DEFAULT_TOOL_TIMEOUT);
        tool.min(self.query_timeout())
            .clamp(MIN_TOOL_TIMEOUT, MAX_TOOL_TIMEOUT)
    }

    /// Line decoder ceiling after defaults and the upper bound are applied.
    pub fn buffer_limit(&self) -> usize {
        self.max_buffer_size
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_MAX_BUFFER_SIZE)
            .min(MAX_BUFFER_SIZE_LIMIT)
    }
}

/// Apply the default and upper bound to a requested pull timeout.
pub fn effective_query_timeout(requested: Option<Duration>) -> Duration {
    requested
        .filter(|timeout| !timeout.is_zero())
        .unwrap_or(DEFAULT_QUERY_TIMEOUT)
        .min(MAX_QUERY_TIMEOUT)
}

impl std::fmt::Debug for ClaudeAgentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeAgentOptions")
            .field("allowed_tools", &self.allowed_tools)
            .field("system_prompt", &self.system_prompt)
            .field("mcp_servers", &self.mcp_servers)
            .field("permission_mode", &self.permission_mode)
            .field("continue_conversation", &self.continue_conversation)
            .field("resume", &self.resume)
            .field("max_turns", &self.max_turns)
            .field("max_budget_usd", &self.max_budget_usd)
            .field("disallowed_tools", &self.disallowed_tools)
            .field("model", &self.model)
            .field("cwd", &self.cwd)
            .field("cli_path", &self.cli_path)
            .field("settings", &self.settings)
            .field("add_dirs", &self.add_dirs)
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("extra_args", &self.extra_args)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("has_stderr", &self.stderr.is_some())
            .field("has_decode_diagnostics", &self.decode_diagnostics.is_some())
            .field("sdk_servers", &self.sdk_servers.keys().collect::<Vec<_>>())
            .field("user", &self.user)
            .field("include_partial_messages", &self.include_partial_messages)
            .field("fork_session", &self.fork_session)
            .field("agents", &self.agents)
            .field("setting_sources", &self.setting_sources)
            .field("output_schema", &self.output_schema)
            .field("timeout", &self.timeout)
            .field("tool_timeout", &self.tool_timeout)
            .field("bridge_runner_path", &self.bridge_runner_path)
            .finish()
    }
}

impl SettingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingSource::User => "user",
            SettingSource::Project => "project",
            SettingSource::Local => "local",
        }
    }
}
