//! Runner side of the tool bridge: a stdio MCP server that forwards tool calls
//! over the host socket.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::Instant;
use uuid::Uuid;

use super::{validate_server_name, validate_server_version, DEFAULT_SERVER_VERSION};
use super::protocol::{
    failure_result, BridgeRequest, BridgeResponse, JsonRpcRequest, JsonRpcResponse,
    INVALID_PARAMS, INVALID_REQUEST, MCP_PROTOCOL_VERSION, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::config::{DEFAULT_TOOL_TIMEOUT, MAX_TOOL_TIMEOUT, MIN_TOOL_TIMEOUT};
use crate::error::BridgeError;
use crate::internal::line_codec::{read_line_bounded, LineRead, MAX_BUFFER_SIZE_LIMIT};
use crate::internal::sanitize::{sanitize_for_display, MAX_DISPLAY_CHARS};
use crate::mcp::McpToolInfo;

/// Largest tool manifest accepted on the command line.
pub const MAX_TOOLS_JSON_BYTES: usize = 1024 * 1024;

const INITIAL_POLL: Duration = Duration::from_millis(10);
const MAX_POLL: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 8 * 1024;

/// Validated runner arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub socket_path: PathBuf,
    pub server_name: String,
    pub version: String,
    pub tools: Vec<McpToolInfo>,
    pub timeout: Duration,
}

impl RunnerConfig {
    /// Validate the positional arguments. Empty optional values count as absent.
    pub fn from_args(
        socket_path: &str,
        server_name: &str,
        version: Option<&str>,
        tools_json: Option<&str>,
    ) -> Result<Self, BridgeError> {
        let socket_path = PathBuf::from(socket_path);
        if !socket_path.is_absolute() {
            return Err(BridgeError::InvalidArgument(format!(
                "socket path must be absolute: {}",
                sanitize_for_display(&socket_path.display().to_string(), MAX_DISPLAY_CHARS)
            )));
        }

        validate_server_name(server_name)?;
        let version = match version.filter(|value| !value.is_empty()) {
            None => DEFAULT_SERVER_VERSION.to_string(),
            Some(value) => {
                validate_server_version(value)?;
                value.to_string()
            }
        };

        let tools = match tools_json.filter(|value| !value.trim().is_empty()) {
            None => Vec::new(),
            Some(raw) => parse_tools(raw)?,
        };

        Ok(Self {
            socket_path,
            server_name: server_name.to_string(),
            version,
            tools,
            timeout: DEFAULT_TOOL_TIMEOUT,
        })
    }

    /// Set the forward timeout, clamped to 1..=3600 seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.clamp(MIN_TOOL_TIMEOUT, MAX_TOOL_TIMEOUT);
        self
    }

    /// Forward timeout from the descriptor env value; invalid or missing means default.
    pub fn timeout_from_env(value: Option<&str>) -> Duration {
        value
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOOL_TIMEOUT)
            .clamp(MIN_TOOL_TIMEOUT, MAX_TOOL_TIMEOUT)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|tool| tool.name == name)
    }
}

fn parse_tools(raw: &str) -> Result<Vec<McpToolInfo>, BridgeError> {
    if raw.len() > MAX_TOOLS_JSON_BYTES {
        return Err(BridgeError::InvalidArgument(format!(
            "tools JSON is {} bytes; limit is {MAX_TOOLS_JSON_BYTES}",
            raw.len()
        )));
    }

    let value: Value = serde_json::from_str(raw)
        .map_err(|err| BridgeError::InvalidArgument(format!("tools JSON is not valid JSON: {err}")))?;
    let Value::Array(entries) = value else {
        return Err(BridgeError::InvalidArgument(
            "tools JSON must be an array".to_string(),
        ));
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let has_name = entry.get("name").and_then(Value::as_str).is_some();
            if !entry.is_object() || !has_name {
                return Err(BridgeError::InvalidArgument(format!(
                    "tool #{index} must be an object with a string name"
                )));
            }
            serde_json::from_value(entry).map_err(|err| {
                BridgeError::InvalidArgument(format!("tool #{index} is malformed: {err}"))
            })
        })
        .collect()
}

/// Stdio MCP server that relays `tools/call` to the host over a Unix socket.
///
/// All state lives in this value; nothing is shared between runs.
pub struct ToolBridgeRunner {
    config: RunnerConfig,
    socket: UnixStream,
    responses: Vec<u8>,
    socket_closed: bool,
    line_limit: usize,
}

impl ToolBridgeRunner {
    /// Connect to the host socket. Failure is fatal for the runner.
    pub async fn connect(config: RunnerConfig) -> Result<Self, BridgeError> {
        let socket = UnixStream::connect(&config.socket_path)
            .await
            .map_err(|source| BridgeError::Connect {
                path: config.socket_path.clone(),
                source,
            })?;
        Ok(Self::from_stream(config, socket))
    }

    pub fn from_stream(config: RunnerConfig, socket: UnixStream) -> Self {
        Self {
            config,
            socket,
            responses: Vec::new(),
            socket_closed: false,
            line_limit: MAX_BUFFER_SIZE_LIMIT,
        }
    }

    /// Serve JSON-RPC on `input`/`output` until stdin EOF, socket EOF or `shutdown`.
    pub async fn run<R, W, S>(mut self, input: R, mut output: W, shutdown: S) -> Result<(), BridgeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        S: Future<Output = ()>,
    {
        let mut input = BufReader::new(input);
        let mut line = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        tokio::pin!(shutdown);

        log::debug!(
            "[runner::run] serving {} tools for {:?}",
            self.config.tools.len(),
            self.config.server_name
        );

        loop {
            line.clear();
            // The pending read survives socket wakeups so a partial line is never lost.
            let read = {
                let read = read_line_bounded(&mut input, &mut line, self.line_limit);
                tokio::pin!(read);
                loop {
                    tokio::select! {
                        _ = &mut shutdown => {
                            log::debug!("[runner::run] shutdown signal received");
                            break None;
                        }
                        outcome = &mut read => break Some(outcome),
                        read = self.socket.read(&mut chunk), if !self.socket_closed => match read {
                            Ok(0) | Err(_) => {
                                log::debug!("[runner::run] bridge socket closed");
                                self.socket_closed = true;
                                break None;
                            }
                            Ok(n) => self.buffer_response_bytes(&chunk[..n]),
                        },
                    }
                }
            };

            let response = match read {
                None => break,
                Some(Ok(LineRead::Eof)) => {
                    log::debug!("[runner::run] stdin closed");
                    break;
                }
                Some(Ok(LineRead::Line)) => {
                    let text = String::from_utf8_lossy(&line).into_owned();
                    self.handle_line(&text).await
                }
                Some(Ok(LineRead::Overflow(size))) => {
                    log::warn!(
                        "[runner::run] dropped {size}-byte stdin line (limit {})",
                        self.line_limit
                    );
                    Some(JsonRpcResponse::error(Value::Null, PARSE_ERROR, "Parse error"))
                }
                Some(Err(err)) => {
                    log::warn!("[runner::run] stdin read failed: {err}");
                    break;
                }
            };

            if let Some(response) = response {
                let mut encoded = serde_json::to_string(&response)
                    .map_err(|err| BridgeError::Io(err.into()))?;
                encoded.push('\n');
                output.write_all(encoded.as_bytes()).await?;
                output.flush().await?;
            }
        }

        let _ = self.socket.shutdown().await;
        Ok(())
    }

    /// Handle one stdin line, returning the JSON-RPC reply if one is due.
    pub async fn handle_line(&mut self, line: &str) -> Option<JsonRpcResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(err) => {
                log::debug!("[runner::handle_line] parse error: {err}");
                return Some(JsonRpcResponse::error(Value::Null, PARSE_ERROR, "Parse error"));
            }
        };
        let id = raw.get("id").cloned();
        match serde_json::from_value::<JsonRpcRequest>(raw) {
            Ok(request) => self.handle_request(request).await,
            Err(_) => id.map(|id| JsonRpcResponse::error(id, INVALID_REQUEST, "Invalid request")),
        }
    }

    async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;

        match method.as_str() {
            "notifications/initialized" => None,
            "initialize" => id.map(|id| JsonRpcResponse::result(id, self.initialize_result())),
            "tools/list" => id.map(|id| JsonRpcResponse::result(id, self.tools_list_result())),
            "ping" => id.map(|id| JsonRpcResponse::result(id, json!({}))),
            "tools/call" => {
                let id = id?;
                let params = params.unwrap_or(Value::Null);
                let Some(name) = params.get("name").and_then(Value::as_str) else {
                    return Some(JsonRpcResponse::error(id, INVALID_PARAMS, "Missing tool name"));
                };
                if !self.config.has_tool(name) {
                    return Some(JsonRpcResponse::error(
                        id,
                        METHOD_NOT_FOUND,
                        format!(
                            "Tool '{}' not found",
                            sanitize_for_display(name, MAX_DISPLAY_CHARS)
                        ),
                    ));
                }
                let arguments = match params.get("arguments") {
                    Some(Value::Object(arguments)) => arguments.clone(),
                    _ => Map::new(),
                };
                let result = self.forward_call(name.to_string(), arguments).await;
                Some(JsonRpcResponse::result(id, result))
            }
            other => id.map(|id| {
                JsonRpcResponse::error(
                    id,
                    METHOD_NOT_FOUND,
                    format!(
                        "Method not found: {}",
                        sanitize_for_display(other, MAX_DISPLAY_CHARS)
                    ),
                )
            }),
        }
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": self.config.server_name,
                "version": self.config.version,
            },
        })
    }

    fn tools_list_result(&self) -> Value {
        let tools: Vec<Value> = self
            .config
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description.clone().unwrap_or_default(),
                    "inputSchema": tool
                        .input_schema
                        .clone()
                        .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    /// Send `{id, tool, args}` to the host and wait for the matching reply.
    async fn forward_call(&mut self, tool: String, args: Map<String, Value>) -> Value {
        if self.socket_closed {
            return failure_result("Tool bridge connection is closed");
        }

        let correlation = Uuid::new_v4().to_string();
        let request = BridgeRequest {
            id: Value::String(correlation.clone()),
            tool,
            args,
        };
        let mut frame = match serde_json::to_string(&request) {
            Ok(frame) => frame,
            Err(err) => return failure_result(format!("Failed to encode tool call: {err}")),
        };
        frame.push('\n');

        if let Err(err) = self.socket.write_all(frame.as_bytes()).await {
            log::warn!("[runner::forward] write to bridge failed: {err}");
            self.socket_closed = true;
            return failure_result(format!("Tool bridge write failed: {err}"));
        }

        let deadline = Instant::now() + self.config.timeout;
        let mut poll = INITIAL_POLL;
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some(response) = self.take_response(&correlation) {
                return response.into_call_result();
            }
            if self.socket_closed {
                return failure_result("Tool bridge closed before the tool returned");
            }

            let now = Instant::now();
            if now >= deadline {
                log::warn!(
                    "[runner::forward] {:?} timed out after {:?}",
                    request.tool,
                    self.config.timeout
                );
                return failure_result(format!(
                    "Tool '{}' timed out after {} seconds",
                    request.tool,
                    self.config.timeout.as_secs()
                ));
            }

            let wait = poll.min(deadline - now);
            match tokio::time::timeout(wait, self.socket.read(&mut chunk)).await {
                Ok(Ok(0)) => self.socket_closed = true,
                Ok(Ok(n)) => self.buffer_response_bytes(&chunk[..n]),
                Ok(Err(err)) => {
                    log::warn!("[runner::forward] read from bridge failed: {err}");
                    self.socket_closed = true;
                }
                Err(_) => poll = (poll * 2).min(MAX_POLL),
            }
        }
    }

    fn buffer_response_bytes(&mut self, bytes: &[u8]) {
        self.responses.extend_from_slice(bytes);
        if self.responses.len() > MAX_BUFFER_SIZE_LIMIT {
            log::warn!(
                "[runner::forward] response buffer exceeded {MAX_BUFFER_SIZE_LIMIT} bytes; discarding"
            );
            self.responses.clear();
        }
    }

    /// Pop complete lines until the one answering `correlation`.
    /// Lines for other ids are stale and dropped.
    fn take_response(&mut self, correlation: &str) -> Option<BridgeResponse> {
        while let Some(end) = self.responses.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.responses.drain(..=end).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<BridgeResponse>(text) {
                Ok(response) if response.id.as_str() == Some(correlation) => return Some(response),
                Ok(response) => {
                    log::debug!("[runner::forward] discarding stale response {}", response.id);
                }
                Err(err) => log::debug!("[runner::forward] discarding malformed response: {err}"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::UnixListener;

    const TOOLS: &str = r#"[{"name":"add","description":"Add","inputSchema":{"type":"object"}}]"#;

    fn config(socket: &str) -> RunnerConfig {
        RunnerConfig::from_args(socket, "calc", Some("1.2.0"), Some(TOOLS)).unwrap()
    }

    #[test]
    fn from_args_accepts_valid_input() {
        let config = config("/tmp/bridge.sock");
        assert_eq!(config.server_name, "calc");
        assert_eq!(config.version, "1.2.0");
        assert_eq!(config.tools.len(), 1);
        assert_eq!(config.tools[0].description.as_deref(), Some("Add"));
        assert_eq!(config.timeout, DEFAULT_TOOL_TIMEOUT);

        let defaults = RunnerConfig::from_args("/tmp/b.sock", "calc", Some(""), None).unwrap();
        assert_eq!(defaults.version, DEFAULT_SERVER_VERSION);
        assert!(defaults.tools.is_empty());
    }

    #[test]
    fn from_args_rejects_bad_input() {
        let cases: Vec<(&str, &str, Option<&str>, Option<&str>)> = vec![
            ("relative.sock", "calc", None, None),
            ("/tmp/b.sock", "bad name!", None, None),
            ("/tmp/b.sock", "", None, None),
            ("/tmp/b.sock", "calc", Some("1.0; rm -rf /"), None),
            ("/tmp/b.sock", "calc", None, Some("{\"name\":\"add\"}")),
            ("/tmp/b.sock", "calc", None, Some("[{\"description\":\"no name\"}]")),
            ("/tmp/b.sock", "calc", None, Some("[1]")),
            ("/tmp/b.sock", "calc", None, Some("not json")),
        ];
        for (socket, name, version, tools) in cases {
            let result = RunnerConfig::from_args(socket, name, version, tools);
            assert!(
                matches!(result, Err(BridgeError::InvalidArgument(_))),
                "expected rejection for {socket} {name} {version:?} {tools:?}"
            );
        }
    }

    #[test]
    fn oversized_tools_json_is_rejected_before_parsing() {
        let huge = format!("[{}]", " ".repeat(MAX_TOOLS_JSON_BYTES));
        let err = RunnerConfig::from_args("/tmp/b.sock", "calc", None, Some(&huge)).unwrap_err();
        assert!(err.to_string().contains("limit"));
    }

    #[test]
    fn timeout_is_clamped() {
        assert_eq!(RunnerConfig::timeout_from_env(None), DEFAULT_TOOL_TIMEOUT);
        assert_eq!(RunnerConfig::timeout_from_env(Some("junk")), DEFAULT_TOOL_TIMEOUT);
        assert_eq!(RunnerConfig::timeout_from_env(Some("0")), MIN_TOOL_TIMEOUT);
        assert_eq!(RunnerConfig::timeout_from_env(Some("99999")), MAX_TOOL_TIMEOUT);
        assert_eq!(
            config("/tmp/b.sock").with_timeout(Duration::from_secs(5)).timeout,
            Duration::from_secs(5)
        );
    }

    async fn runner_pair() -> (ToolBridgeRunner, UnixStream, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let runner = ToolBridgeRunner::connect(
            config(path.to_str().unwrap()).with_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap();
        let (host, _) = listener.accept().await.unwrap();
        (runner, host, dir)
    }

    #[tokio::test]
    async fn answers_introspection_locally() {
        let (mut runner, _host, _dir) = runner_pair().await;

        let init = runner
            .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
            .await
            .unwrap();
        let init = serde_json::to_value(init).unwrap();
        assert_eq!(init["result"]["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(init["result"]["serverInfo"]["name"], "calc");
        assert_eq!(init["result"]["serverInfo"]["version"], "1.2.0");

        assert!(runner
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await
            .is_none());

        let list = serde_json::to_value(
            runner
                .handle_line(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(list["result"]["tools"][0]["name"], "add");
        assert_eq!(list["result"]["tools"][0]["inputSchema"]["type"], "object");

        let ping = serde_json::to_value(
            runner
                .handle_line(r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#)
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(ping["result"], json!({}));
    }

    #[tokio::test]
    async fn unknown_tool_and_method_are_method_not_found() {
        let (mut runner, _host, _dir) = runner_pair().await;

        let missing = serde_json::to_value(
            runner
                .handle_line(r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"missing"}}"#)
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(missing["error"]["code"], METHOD_NOT_FOUND);
        assert!(missing["error"]["message"].as_str().unwrap().contains("missing"));

        let method = serde_json::to_value(
            runner
                .handle_line(r#"{"jsonrpc":"2.0","id":5,"method":"resources/list"}"#)
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(method["error"]["code"], METHOD_NOT_FOUND);

        let parse = serde_json::to_value(runner.handle_line("{oops").await.unwrap()).unwrap();
        assert_eq!(parse["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn tools_call_is_forwarded_and_correlated() {
        let (mut runner, host, _dir) = runner_pair().await;

        let host_task = tokio::spawn(async move {
            let (read_half, mut write_half) = host.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let request: BridgeRequest = serde_json::from_str(&line).unwrap();
            assert_eq!(request.tool, "add");
            assert_eq!(request.args.get("a"), Some(&json!(2)));

            let stale = json!({"id": "stale", "content": [], "isError": false});
            let reply = json!({
                "id": request.id,
                "content": [{"type": "text", "text": "5"}],
                "isError": false,
            });
            let payload = format!("{stale}\n{reply}\n");
            write_half.write_all(payload.as_bytes()).await.unwrap();
            (lines, write_half)
        });

        let response = runner
            .handle_line(
                r#"{"jsonrpc":"2.0","id":6,"method":"tools/call","params":{"name":"add","arguments":{"a":2,"b":3}}}"#,
            )
            .await
            .unwrap();
        let response = serde_json::to_value(response).unwrap();
        assert_eq!(response["id"], 6);
        assert_eq!(response["result"]["isError"], false);
        assert_eq!(response["result"]["content"][0]["text"], "5");
        let _ = host_task.await.unwrap();
    }

    #[tokio::test]
    async fn tools_call_times_out_with_error_content() {
        let (mut runner, _host, _dir) = runner_pair().await;
        let started = std::time::Instant::now();
        let response = runner
            .handle_line(r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"add"}}"#)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
        let response = serde_json::to_value(response).unwrap();
        assert_eq!(response["result"]["isError"], true);
        assert!(response["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn run_stops_on_stdin_eof() {
        let (runner, _host, _dir) = runner_pair().await;
        let input: &[u8] = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n";
        let mut output = Vec::new();
        runner
            .run(input, &mut output, std::future::pending::<()>())
            .await
            .unwrap();
        let reply: Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"], json!({}));
    }

    #[tokio::test]
    async fn oversized_stdin_line_is_rejected_and_reading_continues() {
        let (mut runner, _host, _dir) = runner_pair().await;
        runner.line_limit = 64;
        let input = format!(
            "{{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"{}\"}}\n{{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}}\n",
            "x".repeat(200)
        );
        let mut output = Vec::new();
        runner
            .run(input.as_bytes(), &mut output, std::future::pending::<()>())
            .await
            .unwrap();

        let replies: Vec<Value> = output
            .split(|byte| *byte == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], Value::Null);
        assert_eq!(replies[0]["error"]["code"], PARSE_ERROR);
        assert_eq!(replies[1]["id"], 2);
        assert_eq!(replies[1]["result"], json!({}));
    }
}
