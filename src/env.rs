//! Environment configuration: `.env` loading and `CLAUDE_AGENT_*` overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::config::ClaudeAgentOptions;

pub const TIMEOUT_ENV: &str = "CLAUDE_AGENT_TIMEOUT_SECS";
pub const TOOL_TIMEOUT_ENV: &str = "CLAUDE_AGENT_TOOL_TIMEOUT_SECS";
pub const MAX_BUFFER_SIZE_ENV: &str = "CLAUDE_AGENT_MAX_BUFFER_SIZE";
pub const CLI_PATH_ENV: &str = "CLAUDE_AGENT_CLI_PATH";
pub const BRIDGE_RUNNER_ENV: &str = "CLAUDE_AGENT_BRIDGE_RUNNER";
pub const SKIP_VERSION_CHECK_ENV: &str = "CLAUDE_AGENT_SDK_SKIP_VERSION_CHECK";

const ANTHROPIC_PASSTHROUGH: &[&str] = &["ANTHROPIC_API_KEY", "ANTHROPIC_BASE_URL", "ANTHROPIC_MODEL"];

/// Errors that can occur when loading environment configuration.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Loads variables from `.env` in `dir` (or the current directory) into the
/// process environment and returns the `ANTHROPIC_*` subset, ready for
/// [`ClaudeAgentOptions::env`].
///
/// A missing file is not an error.
///
/// # Example
/// ```no_run
/// use claude_agent_bridge::env::load_env;
///
/// let env_vars = load_env(None).unwrap();
/// ```
pub fn load_env(dir: Option<&Path>) -> Result<HashMap<String, String>, EnvError> {
    let env_path = match dir {
        Some(d) => d.join(".env"),
        None => std::env::current_dir()?.join(".env"),
    };

    if env_path.exists() {
        dotenvy::from_path(&env_path).map_err(|e| EnvError::Parse(e.to_string()))?;
    }

    Ok(get_anthropic_env())
}

/// Returns a HashMap with the `ANTHROPIC_*` variables set in this process.
pub fn get_anthropic_env() -> HashMap<String, String> {
    ANTHROPIC_PASSTHROUGH
        .iter()
        .filter_map(|name| std::env::var(name).ok().map(|value| (name.to_string(), value)))
        .collect()
}

/// Build options from `.env` plus the `CLAUDE_AGENT_*` overrides.
///
/// # Example
/// ```no_run
/// use claude_agent_bridge::env::options_from_env;
///
/// let options = options_from_env(None).unwrap();
/// ```
pub fn options_from_env(dir: Option<&Path>) -> Result<ClaudeAgentOptions, EnvError> {
    let env_vars = load_env(dir)?;
    let mut options = ClaudeAgentOptions {
        env: env_vars,
        ..Default::default()
    };
    apply_overrides(&mut options, |name| std::env::var(name).ok())?;
    Ok(options)
}

/// Apply overrides read through `lookup`. Blank values are ignored.
pub fn apply_overrides<F>(options: &mut ClaudeAgentOptions, lookup: F) -> Result<(), EnvError>
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

    if let Some(value) = read(TIMEOUT_ENV) {
        options.timeout = Some(parse_seconds(TIMEOUT_ENV, &value)?);
    }
    if let Some(value) = read(TOOL_TIMEOUT_ENV) {
        options.tool_timeout = Some(parse_seconds(TOOL_TIMEOUT_ENV, &value)?);
    }
    if let Some(value) = read(MAX_BUFFER_SIZE_ENV) {
        let size = value
            .trim()
            .parse::<usize>()
            .map_err(|_| EnvError::InvalidValue {
                name: MAX_BUFFER_SIZE_ENV,
                value: value.clone(),
            })?;
        options.max_buffer_size = Some(size);
    }
    if let Some(value) = read(CLI_PATH_ENV) {
        options.cli_path = Some(PathBuf::from(value));
    }
    if let Some(value) = read(BRIDGE_RUNNER_ENV) {
        options.bridge_runner_path = Some(PathBuf::from(value));
    }
    if let Some(model) = read("ANTHROPIC_MODEL") {
        options.model = Some(model);
    }
    Ok(())
}

/// Parse a non-negative number of seconds, fractions allowed.
pub fn parse_seconds(name: &'static str, value: &str) -> Result<Duration, EnvError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| EnvError::InvalidValue {
            name,
            value: value.to_string(),
        })
}
