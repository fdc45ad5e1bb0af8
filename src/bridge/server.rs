//! Host side of the tool bridge: a Unix socket that executes forwarded tool calls.

use std::any::Any;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};

use super::protocol::{BridgeRequest, BridgeResponse};
use super::{
    runner_search_path, validate_server_name, validate_server_version, BRIDGE_TIMEOUT_ENV,
    DEFAULT_SERVER_VERSION,
};
use crate::config::{McpServerConfig, McpStdioServerConfig};
use crate::error::{BridgeError, SdkError};
use crate::internal::line_codec::{read_line_bounded, LineCodec, LineRead};
use crate::internal::sanitize::{sanitize_for_display, MAX_DISPLAY_CHARS};
use crate::mcp::SdkMcpServer;

pub const SOCKET_FILE_NAME: &str = "bridge.sock";
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Unix socket endpoint serving one in-process tool group.
///
/// The socket lives in a private temporary directory owned by this value.
/// [`stop`](Self::stop) (also run on drop) removes both.
pub struct ToolBridgeServer {
    server: Arc<dyn SdkMcpServer>,
    socket_path: PathBuf,
    dir: Option<TempDir>,
    accept_task: Option<JoinHandle<()>>,
}

impl ToolBridgeServer {
    /// Bind the socket and start accepting connections on `handle`.
    ///
    /// The server's name and version become runner arguments, so values the
    /// runner would reject fail here instead.
    pub fn start(
        server: Arc<dyn SdkMcpServer>,
        handle: &Handle,
        max_line: usize,
    ) -> Result<Self, BridgeError> {
        validate_server_name(server.name())?;
        if let Some(version) = server.version().filter(|version| !version.is_empty()) {
            validate_server_version(version)?;
        }

        let dir = tempfile::Builder::new()
            .prefix("claude-bridge-")
            .tempdir()?;
        let socket_path = dir.path().join(SOCKET_FILE_NAME);

        let listener = {
            let _guard = handle.enter();
            UnixListener::bind(&socket_path)?
        };

        log::debug!(
            "[bridge::start] serving {:?} on {}",
            server.name(),
            socket_path.display()
        );
        let accept_task = handle.spawn(accept_loop(listener, Arc::clone(&server), max_line));

        Ok(Self {
            server,
            socket_path,
            dir: Some(dir),
            accept_task: Some(accept_task),
        })
    }

    pub fn name(&self) -> &str {
        self.server.name()
    }

    pub fn version(&self) -> &str {
        self.server
            .version()
            .filter(|version| !version.is_empty())
            .unwrap_or(DEFAULT_SERVER_VERSION)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn is_running(&self) -> bool {
        self.accept_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Single-line JSON array of `{name, description, inputSchema}`.
    pub fn tools_manifest(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.server.list_tools())
    }

    /// Stdio server entry telling the CLI how to start the runner for this socket.
    pub fn to_descriptor(
        &self,
        runner_path: &Path,
        timeout: Duration,
    ) -> Result<McpServerConfig, SdkError> {
        let mut env = HashMap::new();
        if let Some(path) = runner_search_path() {
            env.insert("PATH".to_string(), path);
        }
        env.insert(
            BRIDGE_TIMEOUT_ENV.to_string(),
            timeout.as_secs().max(1).to_string(),
        );

        Ok(McpServerConfig::Stdio(McpStdioServerConfig {
            command: runner_path.display().to_string(),
            args: vec![
                self.socket_path.display().to_string(),
                self.name().to_string(),
                self.version().to_string(),
                self.tools_manifest()?,
            ],
            env,
        }))
    }

    /// Stop accepting, drop live connections and remove the socket directory.
    /// Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }

        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => log::warn!(
                "[bridge::stop] failed to remove {}: {err}",
                self.socket_path.display()
            ),
        }

        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                if err.kind() != ErrorKind::NotFound {
                    log::warn!("[bridge::stop] failed to remove {}: {err}", path.display());
                }
            }
        }
    }
}

impl Drop for ToolBridgeServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ToolBridgeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBridgeServer")
            .field("name", &self.name())
            .field("socket_path", &self.socket_path)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn accept_loop(listener: UnixListener, server: Arc<dyn SdkMcpServer>, max_line: usize) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    log::debug!("[bridge::accept] runner connected to {:?}", server.name());
                    connections.spawn(serve_connection(stream, Arc::clone(&server), max_line));
                }
                Err(err) => {
                    log::warn!("[bridge::accept] {err}");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_connection(stream: UnixStream, server: Arc<dyn SdkMcpServer>, max_line: usize) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut codec = LineCodec::new(max_line);
    let mut line = Vec::new();

    loop {
        line.clear();
        match read_line_bounded(&mut reader, &mut line, max_line).await {
            Ok(LineRead::Eof) => break,
            Ok(LineRead::Overflow(size)) => {
                codec.reject_oversized(size);
                continue;
            }
            Ok(LineRead::Line) => {}
            Err(err) => {
                log::debug!("[bridge::connection] read failed: {err}");
                break;
            }
        }

        for frame in codec.decode_line(&String::from_utf8_lossy(&line)) {
            let Some(response) = handle_frame(server.as_ref(), Value::Object(frame)).await else {
                continue;
            };
            let encoded = match LineCodec::encode(&response) {
                Ok(encoded) => encoded,
                Err(err) => {
                    log::warn!("[bridge::connection] failed to encode response: {err}");
                    continue;
                }
            };
            if let Err(err) = write_half.write_all(encoded.as_bytes()).await {
                log::debug!("[bridge::connection] write failed: {err}");
                return;
            }
        }
    }
    log::debug!("[bridge::connection] runner disconnected from {:?}", server.name());
}

async fn handle_frame(server: &dyn SdkMcpServer, frame: Value) -> Option<BridgeResponse> {
    match serde_json::from_value::<BridgeRequest>(frame.clone()) {
        Ok(request) => Some(dispatch(server, request).await),
        Err(err) => {
            log::debug!("[bridge::connection] malformed request: {err}");
            frame
                .get("id")
                .cloned()
                .map(|id| BridgeResponse::error(id, format!("Malformed tool request: {err}")))
        }
    }
}

/// Run one request against `server`, converting every failure into an
/// error response.
pub async fn dispatch(server: &dyn SdkMcpServer, request: BridgeRequest) -> BridgeResponse {
    let BridgeRequest { id, tool, args } = request;

    if !server.has_tool(&tool) {
        return BridgeResponse::error(
            id,
            format!(
                "Tool '{}' not found",
                sanitize_for_display(&tool, MAX_DISPLAY_CHARS)
            ),
        );
    }

    match AssertUnwindSafe(server.call_tool(&tool, args))
        .catch_unwind()
        .await
    {
        Ok(Ok(result)) => BridgeResponse::from_result(id, &result),
        Ok(Err(err)) => {
            log::debug!("[bridge::dispatch] tool {tool:?} failed: {err}");
            BridgeResponse::error(id, format!("Tool '{tool}' failed: {err}"))
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            log::warn!("[bridge::dispatch] tool {tool:?} panicked: {message}");
            BridgeResponse::error(id, format!("Tool '{tool}' panicked: {message}"))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{create_sdk_mcp_server, simple_input_schema, tool, McpToolCallResult};
    use serde_json::{json, Map};

    fn server() -> Arc<dyn SdkMcpServer> {
        let echo = tool(
            "echo",
            "Echo the text argument",
            simple_input_schema(&[("text", "string")]),
            |args| async move {
                let text = args.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
                Ok(McpToolCallResult::text(text))
            },
        );
        let calc = tool("calc", "Always fails", json!({"type": "object"}), |_args| async move {
            Err(SdkError::Message("division by zero".into()))
        });
        let explode = tool("explode", "Panics", json!({"type": "object"}), |_args| async move {
            if true {
                panic!("kaboom");
            }
            Ok(McpToolCallResult::text("unreachable"))
        });
        create_sdk_mcp_server("tools", "0.3.0", vec![echo, calc, explode])
    }

    fn request(tool: &str, args: Value) -> BridgeRequest {
        BridgeRequest {
            id: json!("req-1"),
            tool: tool.to_string(),
            args: args.as_object().cloned().unwrap_or_else(Map::new),
        }
    }

    fn text_of(response: &BridgeResponse) -> &str {
        response.content[0]["text"].as_str().unwrap()
    }

    #[tokio::test]
    async fn dispatch_returns_handler_content() {
        let server = server();
        let response = dispatch(server.as_ref(), request("echo", json!({"text": "hi"}))).await;
        assert_eq!(response.id, json!("req-1"));
        assert!(!response.is_error);
        assert_eq!(response.content, vec![json!({"type": "text", "text": "hi"})]);
    }

    #[tokio::test]
    async fn handler_error_becomes_error_content() {
        let server = server();
        let response = dispatch(server.as_ref(), request("calc", json!({}))).await;
        assert!(response.is_error);
        assert!(text_of(&response).contains("division by zero"));
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        let server = server();
        let response = dispatch(server.as_ref(), request("explode", json!({}))).await;
        assert!(response.is_error);
        assert!(text_of(&response).contains("kaboom"));
    }

    #[tokio::test]
    async fn unknown_tool_name_is_sanitized() {
        let server = server();
        let name = format!("missing\u{1b}[31m{}", "x".repeat(500));
        let response = dispatch(server.as_ref(), request(&name, json!({}))).await;
        assert!(response.is_error);
        let text = text_of(&response);
        assert!(text.starts_with("Tool 'missing"));
        assert!(!text.contains('\u{1b}'));
        assert!(text.len() < 300);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn descriptor_and_stop_lifecycle() {
        let mut bridge =
            ToolBridgeServer::start(server(), &Handle::current(), 100_000).unwrap();
        let socket = bridge.socket_path().to_path_buf();
        assert!(socket.exists());
        assert!(bridge.is_running());

        let descriptor = bridge
            .to_descriptor(Path::new("/opt/bin/claude-agent-tool-bridge"), Duration::from_secs(42))
            .unwrap();
        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["type"], "stdio");
        assert_eq!(value["command"], "/opt/bin/claude-agent-tool-bridge");
        assert_eq!(value["args"][0], socket.display().to_string());
        assert_eq!(value["args"][1], "tools");
        assert_eq!(value["args"][2], "0.3.0");
        let manifest: Value = serde_json::from_str(value["args"][3].as_str().unwrap()).unwrap();
        assert_eq!(manifest.as_array().unwrap().len(), 3);
        assert_eq!(manifest[0]["name"], "echo");
        assert!(manifest[0].get("handler").is_none());
        assert_eq!(value["env"][BRIDGE_TIMEOUT_ENV], "42");

        bridge.stop();
        assert!(!socket.exists());
        assert!(!socket.parent().unwrap().exists());
        bridge.stop();
        assert!(!bridge.is_running());
    }

    #[tokio::test]
    async fn arguments_the_runner_rejects_fail_start() {
        let spaced = create_sdk_mcp_server("my tools", "1.0.0", vec![]);
        match ToolBridgeServer::start(spaced, &Handle::current(), 100_000) {
            Err(BridgeError::InvalidArgument(message)) => {
                assert!(message.contains("server name"), "{message}")
            }
            other => panic!("expected invalid argument, got {other:?}"),
        }

        let bad_version = create_sdk_mcp_server("tools", "one point oh", vec![]);
        assert!(matches!(
            ToolBridgeServer::start(bad_version, &Handle::current(), 100_000),
            Err(BridgeError::InvalidArgument(_))
        ));

        let unversioned = create_sdk_mcp_server("tools", "", vec![]);
        let bridge = ToolBridgeServer::start(unversioned, &Handle::current(), 100_000).unwrap();
        assert_eq!(bridge.version(), DEFAULT_SERVER_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn socket_round_trip() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

        let bridge = ToolBridgeServer::start(server(), &Handle::current(), 100_000).unwrap();
        let stream = UnixStream::connect(bridge.socket_path()).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half
            .write_all(b"{\"id\":\"x\",\"tool\":\"echo\",\"args\":{\"text\":\"round\"}}\n")
            .await
            .unwrap();
        let response: BridgeResponse =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(response.id, json!("x"));
        assert!(!response.is_error);
        assert_eq!(response.content, vec![json!({"type": "text", "text": "round"})]);

        write_half
            .write_all(b"garbage\n{\"id\":\"y\",\"tool\":\"calc\",\"args\":{}}\n")
            .await
            .unwrap();
        let response: BridgeResponse =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(response.id, json!("y"));
        assert!(response.is_error);
    }
}
