//! Fake Claude CLI executables for integration tests.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use claude_agent_bridge::config::ClaudeAgentOptions;
use tempfile::TempDir;

/// Answers the SDK's `-v` version check so it never runs the scenario body.
const VERSION_CHECK: &str = r#"if [ "$1" = "-v" ]; then echo "2.1.0 (Claude Code)"; exit 0; fi"#;

/// A shell script standing in for the `claude` executable.
pub struct FakeCli {
    dir: TempDir,
    path: PathBuf,
}

impl FakeCli {
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("claude");
        let script = format!("#!/bin/sh\n{VERSION_CHECK}\n{body}\n");
        fs::write(&path, script).expect("write fake cli");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake cli");
        Self { dir, path }
    }

    /// Script that prints each given JSON line and exits 0.
    pub fn printing(lines: &[serde_json::Value]) -> Self {
        let body = lines
            .iter()
            .map(|line| format!("printf '%s\\n' '{line}'"))
            .collect::<Vec<_>>()
            .join("\n");
        Self::new(&body)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A file path inside the script's private directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn options(&self) -> ClaudeAgentOptions {
        ClaudeAgentOptions {
            cli_path: Some(self.path.clone()),
            timeout: Some(Duration::from_secs(10)),
            ..Default::default()
        }
    }
}

pub fn system_init(session_id: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "system",
        "subtype": "init",
        "sessionId": session_id,
        "model": "claude-sonnet",
        "tools": ["Read"],
    })
}

pub fn assistant(text: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "assistant",
        "message": {"model": "claude-sonnet", "content": [{"type": "text", "text": text}]},
    })
}

pub fn result(text: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "result",
        "subtype": "success",
        "durationMs": 12,
        "durationApiMs": 10,
        "isError": false,
        "numTurns": 1,
        "sessionId": "abc",
        "totalCostUsd": 0.001,
        "result": text,
    })
}
