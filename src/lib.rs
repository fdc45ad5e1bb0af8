//! Rust client for the Claude Code CLI.
//!
//! [`query`] runs one prompt; [`ClaudeSdkClient`] keeps a streaming session
//! open. Both hand back a [`Query`], an ordered stream of typed [`Message`]s
//! read from the CLI's stdout. Tools implemented in this process are exposed
//! to the CLI through the [`bridge`] module and its runner binary,
//! `claude-agent-tool-bridge`.

pub mod bridge;
pub mod client;
pub mod config;
pub mod env;
pub mod error;
pub mod internal;
pub mod mcp;
pub mod message;
pub mod permission;
pub mod query;
pub mod transport;

pub use client::{ClaudeSdkClient, ClientPrompt};
pub use config::{
    AgentDefinition, ClaudeAgentOptions, McpServerConfig, McpServers, SettingSource,
    SystemPrompt, SystemPromptPreset,
};
pub use error::{
    BridgeError, CliConnectionError, CliJsonDecodeError, CliNotFoundError, MessageParseError,
    ProcessError, SdkError, StreamError,
};
pub use internal::query::{PendingMessage, Query};
pub use mcp::{
    create_sdk_mcp_server, simple_input_schema, tool, McpToolCallResult, McpToolContent,
    McpToolInfo, SdkMcpServer, SdkMcpTool,
};
pub use message::{
    AssistantMessage, ContentBlock, Message, ResultMessage, StreamEvent, SystemMessage,
    UserMessage,
};
pub use permission::{
    PermissionMode, PermissionResult, PermissionRule, PermissionScope, PermissionUpdate, RuleBehavior,
};
pub use query::query;
pub use transport::subprocess_cli::PromptMode;
