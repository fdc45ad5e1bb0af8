//! Process management for the Claude Code CLI.

pub mod subprocess_cli;

pub use subprocess_cli::{CliProcess, ProcessLauncher, PromptMode};
