//! Error types exposed by the SDK and the tool bridge.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Top-level error type for all SDK operations.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Generic error message.
    #[error("{0}")]
    Message(String),

    /// Raised when unable to connect to the Claude Code CLI.
    #[error(transparent)]
    CliConnection(#[from] CliConnectionError),

    /// Raised when the Claude Code CLI binary cannot be located.
    #[error(transparent)]
    CliNotFound(#[from] CliNotFoundError),

    /// Raised when the CLI process exits with an error.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Raised when JSON output from the CLI cannot be decoded.
    #[error(transparent)]
    CliJsonDecode(#[from] CliJsonDecodeError),

    /// Raised when a CLI message cannot be parsed into a typed structure.
    #[error(transparent)]
    MessageParse(#[from] MessageParseError),

    /// Terminal condition recorded by a message stream.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Failure in the in-process tool bridge.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// IO error wrapper.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error wrapper.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Timeout while awaiting a CLI response.
    #[error(transparent)]
    Timeout(#[from] tokio::time::error::Elapsed),
}

/// Raised when unable to connect to the Claude Code CLI.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct CliConnectionError {
    message: String,
}

impl CliConnectionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Raised when Claude Code is not found or not installed.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct CliNotFoundError {
    message: String,
    cli_path: Option<PathBuf>,
}

impl CliNotFoundError {
    pub fn new(message: impl Into<String>, cli_path: Option<PathBuf>) -> Self {
        let message = match cli_path.as_ref() {
            Some(path) => format!("{}: {}", message.into(), path.display()),
            None => message.into(),
        };
        Self { message, cli_path }
    }

    pub fn cli_path(&self) -> Option<&PathBuf> {
        self.cli_path.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Raised when the CLI process fails.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct ProcessError {
    message: String,
    exit_code: Option<i32>,
    stderr: Option<String>,
}

impl ProcessError {
    pub fn new(message: impl Into<String>, exit_code: Option<i32>, stderr: Option<String>) -> Self {
        let mut message = message.into();

        if let Some(code) = exit_code {
            message = format!("{} (exit code: {})", message, code);
        }

        if let Some(ref stderr) = stderr {
            if !stderr.is_empty() {
                message = format!("{message}\nError output: {stderr}");
            }
        }

        Self {
            message,
            exit_code,
            stderr,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn stderr(&self) -> Option<&str> {
        self.stderr.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Raised when JSON output from the CLI cannot be decoded.
#[derive(Debug, Error)]
#[error("Failed to decode JSON: {snippet}...")]
pub struct CliJsonDecodeError {
    line: String,
    #[source]
    source: serde_json::Error,
    snippet: String,
}

impl CliJsonDecodeError {
    pub fn new(line: impl Into<String>, source: serde_json::Error) -> Self {
        let line = line.into();
        let snippet = line.chars().take(100).collect::<String>();
        Self {
            line,
            source,
            snippet,
        }
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    /// Underlying serde error; `is_eof()` means the input was merely incomplete.
    pub fn json_error(&self) -> &serde_json::Error {
        &self.source
    }
}

/// Raised when a CLI message cannot be parsed into a typed structure.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct MessageParseError {
    message: String,
    data: Option<Value>,
}

impl MessageParseError {
    pub fn new(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Why a message stream stopped producing messages.
///
/// Recorded at most once per stream; the first cause wins.
#[derive(Debug, Error, Clone)]
pub enum StreamError {
    /// The CLI exited with a non-zero status.
    #[error(transparent)]
    ProcessExit(#[from] ProcessError),

    /// The CLI could not be started or its output could not be read.
    #[error("Claude CLI process failed: {0}")]
    ProcessException(String),

    /// No terminal message arrived before the iteration deadline.
    #[error("no message received within {0:?}")]
    Timeout(Duration),

    /// A control frame could not be written to the CLI's stdin.
    #[error("failed to write to CLI stdin: {0}")]
    WriteFailure(String),
}

impl StreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StreamError::Timeout(_))
    }
}

/// Errors raised by the tool bridge server and runner.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A runner argument failed validation.
    #[error("invalid bridge argument: {0}")]
    InvalidArgument(String),

    /// The runner executable could not be located.
    #[error("tool bridge runner executable not found; set bridge_runner_path or CLAUDE_AGENT_BRIDGE_RUNNER")]
    RunnerNotFound,

    /// The runner could not reach the host socket.
    #[error("failed to connect to bridge socket {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error on the bridge socket or its directory.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
