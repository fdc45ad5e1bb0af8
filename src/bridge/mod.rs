//! Tool bridge between the Claude CLI and tools that run in this process.
//!
//! The CLI starts the runner binary (`claude-agent-tool-bridge`) as a stdio
//! MCP server. The runner answers MCP introspection itself and forwards every
//! `tools/call` over a Unix socket to a [`ToolBridgeServer`] owned by the
//! query, which invokes the registered handler.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::env::BRIDGE_RUNNER_ENV;
use crate::error::BridgeError;
use crate::internal::sanitize::{sanitize_for_display, MAX_DISPLAY_CHARS};

pub mod protocol;
pub mod runner;
pub mod server;

pub use runner::{RunnerConfig, ToolBridgeRunner};
pub use server::ToolBridgeServer;

/// File name of the runner executable.
pub const RUNNER_BIN_NAME: &str = "claude-agent-tool-bridge";
/// Env var in the stdio descriptor carrying the runner's forward timeout.
pub const BRIDGE_TIMEOUT_ENV: &str = "CLAUDE_AGENT_BRIDGE_TIMEOUT_SECS";
/// Most `PATH` entries forwarded to the runner.
pub const MAX_SEARCH_PATH_ENTRIES: usize = 32;
/// Version reported when a tool server does not declare one.
pub const DEFAULT_SERVER_VERSION: &str = "1.0.0";

fn server_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$").expect("valid regex")
    })
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^v?[0-9]{1,9}(\.[0-9]{1,9}){0,3}([-+][0-9A-Za-z.-]{1,64})?$")
            .expect("valid regex")
    })
}

/// Server names travel as a runner argument; both ends accept the same set.
pub(crate) fn validate_server_name(name: &str) -> Result<(), BridgeError> {
    if server_name_pattern().is_match(name) {
        return Ok(());
    }
    Err(BridgeError::InvalidArgument(format!(
        "invalid server name: {}",
        sanitize_for_display(name, MAX_DISPLAY_CHARS)
    )))
}

pub(crate) fn validate_server_version(version: &str) -> Result<(), BridgeError> {
    if version_pattern().is_match(version) {
        return Ok(());
    }
    Err(BridgeError::InvalidArgument(format!(
        "invalid version: {}",
        sanitize_for_display(version, MAX_DISPLAY_CHARS)
    )))
}

/// Locate the runner executable.
///
/// Order: explicit path, `CLAUDE_AGENT_BRIDGE_RUNNER`, next to the current
/// executable (or one directory up, for test binaries under `deps/`), `PATH`.
pub fn resolve_runner_path(explicit: Option<&Path>) -> Result<PathBuf, BridgeError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        log::warn!(
            "[bridge::resolve_runner] configured runner {} does not exist",
            path.display()
        );
    }

    if let Some(path) = std::env::var_os(BRIDGE_RUNNER_ENV).map(PathBuf::from) {
        if path.is_file() {
            return Ok(path);
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        let siblings = exe
            .parent()
            .into_iter()
            .flat_map(|dir| [Some(dir), dir.parent()])
            .flatten()
            .map(|dir| dir.join(RUNNER_BIN_NAME));
        for candidate in siblings {
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    which::which(RUNNER_BIN_NAME).map_err(|_| BridgeError::RunnerNotFound)
}

/// `PATH` entries safe to hand to the runner: absolute, existing, without
/// `..` components, deduplicated, at most [`MAX_SEARCH_PATH_ENTRIES`].
pub fn filter_search_path(raw: &OsStr) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    std::env::split_paths(raw)
        .filter(|path| path.is_absolute())
        .filter(|path| !path.components().any(|part| part == Component::ParentDir))
        .filter(|path| path.is_dir())
        .filter(|path| seen.insert(path.clone()))
        .take(MAX_SEARCH_PATH_ENTRIES)
        .collect()
}

/// The filtered host `PATH`, joined back into one value.
pub fn runner_search_path() -> Option<String> {
    let raw = std::env::var_os("PATH")?;
    let entries = filter_search_path(&raw);
    if entries.is_empty() {
        return None;
    }
    std::env::join_paths(entries)
        .ok()
        .and_then(|joined| joined.into_string().ok())
}
