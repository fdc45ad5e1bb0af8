//! Message stream over one Claude CLI process.
//!
//! A driver task owns the child's stdout, feeds it through the line codec and
//! routes every parsed message either to the oldest pending waiter or onto the
//! queue. A writer task owns stdin and sends control frames in order.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::Stream;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tokio::sync::{mpsc, oneshot, Notify};

use crate::bridge::{resolve_runner_path, ToolBridgeServer};
use crate::config::{
    ClaudeAgentOptions, McpServerConfig, McpServers, StderrCallback, MAX_QUERY_TIMEOUT,
};
use crate::error::{ProcessError, SdkError, StreamError};
use crate::internal::control;
use crate::internal::line_codec::{read_line_bounded, LineCodec, LineRead};
use crate::internal::message_parser::parse_message;
use crate::message::Message;
use crate::permission::{PermissionMode, PermissionResult};
use crate::transport::subprocess_cli::{check_version, CliProcess, ProcessLauncher, PromptMode};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const TIMEOUT_EPSILON: Duration = Duration::from_millis(10);
const STDERR_TAIL_LINES: usize = 20;
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Default)]
struct StreamState {
    queue: VecDeque<Message>,
    waiters: VecDeque<oneshot::Sender<Option<Message>>>,
    session_id: Option<String>,
    finished: bool,
    error: Option<StreamError>,
}

/// State shared between the consumer-facing [`Query`] and its tasks.
#[derive(Default)]
struct Shared {
    state: Mutex<StreamState>,
    ready: Condvar,
    outbound: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    bridges: Mutex<Vec<ToolBridgeServer>>,
    shutdown: Notify,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Value>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_bridges(&self) -> MutexGuard<'_, Vec<ToolBridgeServer>> {
        self.bridges.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand `message` to the oldest live waiter, or queue it.
    fn route(&self, message: Message) {
        let mut state = self.lock_state();
        if state.finished {
            log::debug!(
                "[query::route] dropping {} message after finish",
                message.message_type()
            );
            return;
        }

        if state.session_id.is_none() {
            if let Message::System(system) = &message {
                if system.is_init() {
                    state.session_id = system.session_id.clone();
                }
            }
        }

        let mut message = message;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(Some(message)) {
                Ok(()) => return,
                // receiver dropped; try the next one
                Err(returned) => match returned {
                    Some(returned) => message = returned,
                    None => return,
                },
            }
        }

        state.queue.push_back(message);
        drop(state);
        self.ready.notify_all();
    }

    /// Keep `error` unless an earlier cause is already recorded.
    fn record_error(&self, error: StreamError) {
        let mut state = self.lock_state();
        if state.error.is_none() {
            state.error = Some(error);
        }
    }

    fn finish(&self, error: Option<StreamError>) -> bool {
        let state = self.lock_state();
        self.finish_locked(state, error)
    }

    /// Transition to finished. Returns `false` when already finished.
    ///
    /// Every pending waiter is resolved with `None`, stdin is closed, bridges
    /// are stopped and the driver is told to kill the child.
    fn finish_locked(&self, mut state: MutexGuard<'_, StreamState>, error: Option<StreamError>) -> bool {
        if state.finished {
            return false;
        }
        state.finished = true;
        if state.error.is_none() {
            state.error = error;
        }
        let waiters = std::mem::take(&mut state.waiters);

        // Released before any consumer can observe the finished state.
        self.lock_outbound().take();
        let bridges = std::mem::take(&mut *self.lock_bridges());
        for mut bridge in bridges {
            bridge.stop();
        }
        drop(state);

        for waiter in waiters {
            let _ = waiter.send(None);
        }
        self.ready.notify_all();
        self.shutdown.notify_one();
        true
    }
}

/// A running conversation with the Claude CLI.
///
/// Messages come out in the order the CLI printed them, through either the
/// blocking [`pull`](Self::pull) or the future-returning
/// [`pull_async`](Self::pull_async). When the stream cannot produce anything
/// more every pull yields `None`; check [`error`](Self::error) to tell a clean
/// finish from a failure.
pub struct Query {
    shared: Arc<Shared>,
    handle: Handle,
    runtime: Option<Runtime>,
    streaming: bool,
    timeout: Duration,
}

impl Query {
    /// Start the CLI on the ambient multi-thread runtime, or on a private one.
    ///
    /// Fails only when the CLI or the bridge runner cannot be found, or an
    /// in-process tool server cannot bind its socket. A process that fails to
    /// start yields a finished stream whose [`error`](Self::error) says why.
    pub fn new(prompt: impl Into<PromptMode>, options: ClaudeAgentOptions) -> Result<Self, SdkError> {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                Self::start(prompt.into(), options, handle, None)
            }
            _ => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .thread_name("claude-agent-query")
                    .enable_all()
                    .build()?;
                let handle = runtime.handle().clone();
                Self::start(prompt.into(), options, handle, Some(runtime))
            }
        }
    }

    /// Start the CLI with its tasks on `handle`.
    ///
    /// The blocking pulls must not be called from a current-thread runtime
    /// that is also `handle`; use [`pull_async`](Self::pull_async) there.
    pub fn with_handle(
        prompt: impl Into<PromptMode>,
        options: ClaudeAgentOptions,
        handle: Handle,
    ) -> Result<Self, SdkError> {
        Self::start(prompt.into(), options, handle, None)
    }

    fn start(
        prompt: PromptMode,
        options: ClaudeAgentOptions,
        handle: Handle,
        runtime: Option<Runtime>,
    ) -> Result<Self, SdkError> {
        let launcher = ProcessLauncher::new(prompt, &options)?;
        let query = Self {
            shared: Arc::new(Shared::default()),
            handle,
            runtime,
            streaming: launcher.prompt().is_streaming(),
            timeout: options.query_timeout(),
        };

        let mcp_servers = query.start_bridges(&options)?;
        let args = launcher.build_args(&mcp_servers)?;

        if ProcessLauncher::version_check_enabled() {
            query
                .handle
                .spawn(check_version(launcher.cli_path().to_path_buf()));
        }

        let spawned = {
            let _guard = query.handle.enter();
            launcher.spawn(&args)
        };
        match spawned {
            Ok(process) => query.run(process, &options),
            Err(err) => {
                log::error!("[query::start] {err}");
                query
                    .shared
                    .finish(Some(StreamError::ProcessException(err.to_string())));
            }
        }

        Ok(query)
    }

    /// Replace every in-process server entry with a stdio descriptor for the
    /// runner, starting one bridge per entry.
    fn start_bridges(&self, options: &ClaudeAgentOptions) -> Result<McpServers, SdkError> {
        let McpServers::Map(servers) = &options.mcp_servers else {
            return Ok(options.mcp_servers.clone());
        };
        if !servers
            .values()
            .any(|config| matches!(config, McpServerConfig::Sdk(_)))
        {
            return Ok(options.mcp_servers.clone());
        }

        let mut runner_path: Option<PathBuf> = None;
        let mut resolved = HashMap::with_capacity(servers.len());
        for (name, config) in servers {
            let McpServerConfig::Sdk(sdk) = config else {
                resolved.insert(name.clone(), config.clone());
                continue;
            };
            let Some(server) = options
                .sdk_servers
                .get(name)
                .or_else(|| options.sdk_servers.get(&sdk.name))
            else {
                log::warn!("[query::start_bridges] no in-process server registered for {name:?}; skipping");
                continue;
            };

            let runner = match &runner_path {
                Some(path) => path.clone(),
                None => {
                    let path = resolve_runner_path(options.bridge_runner_path.as_deref())?;
                    runner_path = Some(path.clone());
                    path
                }
            };

            let bridge =
                ToolBridgeServer::start(Arc::clone(server), &self.handle, options.buffer_limit())?;
            let descriptor = bridge.to_descriptor(&runner, options.bridge_timeout())?;
            self.shared.lock_bridges().push(bridge);
            resolved.insert(name.clone(), descriptor);
        }

        Ok(McpServers::Map(resolved))
    }

    fn run(&self, process: CliProcess, options: &ClaudeAgentOptions) {
        let CliProcess {
            child,
            stdin,
            stdout,
            stderr,
        } = process;

        if let Some(stdin) = stdin {
            let (sender, receiver) = mpsc::unbounded_channel();
            *self.shared.lock_outbound() = Some(sender);
            self.handle
                .spawn(write_frames(Arc::clone(&self.shared), stdin, receiver));
        }

        let codec = LineCodec::new(options.buffer_limit())
            .with_diagnostics(options.decode_diagnostics.clone());
        self.handle.spawn(drive(
            Arc::clone(&self.shared),
            child,
            stdout,
            stderr,
            codec,
            options.stderr.clone(),
        ));
    }

    /// Next message, waiting up to the query timeout.
    pub fn pull(&self) -> Option<Message> {
        self.pull_timeout(self.timeout)
    }

    /// Next message, waiting up to `timeout`.
    ///
    /// Running out of time finishes the stream with [`StreamError::Timeout`].
    /// Waits longer than [`MAX_QUERY_TIMEOUT`] are capped to it.
    pub fn pull_timeout(&self, timeout: Duration) -> Option<Message> {
        let timeout = timeout.min(MAX_QUERY_TIMEOUT);
        let on_worker = Handle::try_current()
            .map(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
            .unwrap_or(false);
        if on_worker {
            tokio::task::block_in_place(|| self.wait_for_message(timeout))
        } else {
            self.wait_for_message(timeout)
        }
    }

    fn wait_for_message(&self, timeout: Duration) -> Option<Message> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock_state();
        loop {
            if let Some(message) = state.queue.pop_front() {
                return Some(message);
            }
            if state.finished {
                return None;
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = (deadline - now + TIMEOUT_EPSILON).min(POLL_INTERVAL);
            state = match self.shared.ready.wait_timeout(state, wait) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }

        log::warn!("[query::pull] no message within {timeout:?}; finishing stream");
        self.shared
            .finish_locked(state, Some(StreamError::Timeout(timeout)));
        None
    }

    /// Future for the next message. Never blocks.
    ///
    /// Resolves immediately when a message is queued or the stream is
    /// finished. Otherwise it joins the waiter queue: waiters are served in
    /// registration order, one per arriving message, and all get `None` when
    /// the stream finishes.
    pub fn pull_async(&self) -> PendingMessage {
        let mut state = self.shared.lock_state();
        if let Some(message) = state.queue.pop_front() {
            return PendingMessage::ready(Some(message));
        }
        if state.finished {
            return PendingMessage::ready(None);
        }

        let (sender, receiver) = oneshot::channel();
        state.waiters.push_back(sender);
        PendingMessage::waiting(receiver)
    }

    /// [`pull_async`](Self::pull_async) bounded by the query timeout.
    pub async fn next_message(&self) -> Option<Message> {
        match tokio::time::timeout(self.timeout, self.pull_async()).await {
            Ok(message) => message,
            Err(_) => {
                if self
                    .shared
                    .finish(Some(StreamError::Timeout(self.timeout)))
                {
                    log::warn!(
                        "[query::next_message] no message within {:?}; finishing stream",
                        self.timeout
                    );
                }
                None
            }
        }
    }

    /// Borrowing stream of the remaining messages.
    pub fn messages(&self) -> impl Stream<Item = Message> + '_ {
        futures::stream::unfold(self, |query| async move {
            let message = query.next_message().await?;
            Some((message, query))
        })
    }

    /// Owning stream of the remaining messages.
    pub fn into_stream(self) -> impl Stream<Item = Message> + Send + 'static {
        futures::stream::unfold(self, |query| async move {
            let message = query.next_message().await?;
            Some((message, query))
        })
    }

    fn send_frame(&self, frame: Value) -> bool {
        if self.is_finished() {
            return false;
        }
        match self.shared.lock_outbound().as_ref() {
            Some(sender) => sender.send(frame).is_ok(),
            None => false,
        }
    }

    /// Ask the CLI to stop the current turn. Best effort.
    pub fn interrupt(&self) -> bool {
        self.send_frame(control::interrupt())
    }

    pub fn send_user_message(&self, content: impl Into<Value>) -> bool {
        self.send_frame(control::user_message(content.into()))
    }

    pub fn set_permission_mode(&self, mode: PermissionMode) -> bool {
        self.send_frame(control::set_permission_mode(mode))
    }

    pub fn respond_to_permission(&self, tool_use_id: &str, decision: &PermissionResult) -> bool {
        match decision.to_response() {
            Ok(response) => self.respond_to_permission_raw(tool_use_id, response),
            Err(err) => {
                log::warn!("[query::respond_to_permission] cannot encode decision: {err}");
                false
            }
        }
    }

    pub fn respond_to_permission_raw(&self, tool_use_id: &str, response: Value) -> bool {
        self.send_frame(control::permission_response(tool_use_id, response))
    }

    pub fn rewind_files(&self) -> bool {
        self.send_frame(control::rewind_files())
    }

    /// Close stdin once queued frames are written. The CLI sees EOF.
    pub fn end_input(&self) {
        self.shared.lock_outbound().take();
    }

    /// Finish the stream and terminate the CLI. Idempotent.
    pub fn close(&self) {
        if self.shared.finish(None) {
            log::debug!("[query::close] stream closed");
        }
    }

    /// Session identifier from the first `system/init` message.
    pub fn session_id(&self) -> Option<String> {
        self.shared.lock_state().session_id.clone()
    }

    pub fn error(&self) -> Option<StreamError> {
        self.shared.lock_state().error.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.lock_state().finished
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Socket paths of the live in-process tool bridges.
    pub fn bridge_socket_paths(&self) -> Vec<PathBuf> {
        self.shared
            .lock_bridges()
            .iter()
            .map(|bridge| bridge.socket_path().to_path_buf())
            .collect()
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        self.close();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock_state();
        f.debug_struct("Query")
            .field("streaming", &self.streaming)
            .field("timeout", &self.timeout)
            .field("queued", &state.queue.len())
            .field("waiters", &state.waiters.len())
            .field("session_id", &state.session_id)
            .field("finished", &state.finished)
            .field("error", &state.error)
            .finish()
    }
}

/// Future returned by [`Query::pull_async`].
#[must_use = "futures do nothing unless polled"]
pub struct PendingMessage {
    inner: Pending,
}

enum Pending {
    Ready(Option<Message>),
    Waiting(oneshot::Receiver<Option<Message>>),
}

impl PendingMessage {
    fn ready(message: Option<Message>) -> Self {
        Self {
            inner: Pending::Ready(message),
        }
    }

    fn waiting(receiver: oneshot::Receiver<Option<Message>>) -> Self {
        Self {
            inner: Pending::Waiting(receiver),
        }
    }
}

impl Future for PendingMessage {
    type Output = Option<Message>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            Pending::Ready(message) => Poll::Ready(message.take()),
            Pending::Waiting(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|received| received.ok().flatten()),
        }
    }
}

async fn drive(
    shared: Arc<Shared>,
    mut child: Child,
    stdout: ChildStdout,
    stderr: Option<ChildStderr>,
    mut codec: LineCodec,
    on_stderr: Option<StderrCallback>,
) {
    let limit = codec.max_buffer_size();
    let mut stderr_task = stderr.map(|stderr| tokio::spawn(collect_stderr(stderr, on_stderr, limit)));
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    let mut killed = false;

    loop {
        line.clear();
        tokio::select! {
            _ = shared.shutdown.notified() => {
                killed = true;
                if let Err(err) = child.start_kill() {
                    log::debug!("[query::drive] kill failed: {err}");
                }
                break;
            }
            read = read_line_bounded(&mut reader, &mut line, limit) => match read {
                Ok(LineRead::Eof) => break,
                Ok(LineRead::Line) => {
                    let text = String::from_utf8_lossy(&line);
                    for object in codec.decode_line(&text) {
                        match parse_message(&Value::Object(object)) {
                            Ok(message) => shared.route(message),
                            Err(err) => log::debug!("[query::drive] skipping message: {err}"),
                        }
                    }
                }
                Ok(LineRead::Overflow(size)) => codec.reject_oversized(size),
                Err(err) => {
                    shared.record_error(StreamError::ProcessException(format!(
                        "failed to read CLI output: {err}"
                    )));
                    break;
                }
            },
        }
    }

    let status = tokio::select! {
        status = child.wait() => status,
        _ = shared.shutdown.notified(), if !killed => {
            killed = true;
            let _ = child.start_kill();
            child.wait().await
        }
    };

    let tail = match stderr_task.as_mut() {
        Some(task) => match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut *task).await {
            Ok(Ok(tail)) => tail,
            Ok(Err(_)) => Vec::new(),
            Err(_) => {
                task.abort();
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let error = match status {
        Ok(status) if status.success() || killed => None,
        Ok(status) => {
            let stderr = (!tail.is_empty()).then(|| tail.join("\n"));
            log::debug!("[query::drive] CLI exited with {status}");
            Some(StreamError::ProcessExit(ProcessError::new(
                "Command failed",
                status.code(),
                stderr,
            )))
        }
        Err(err) => Some(StreamError::ProcessException(format!(
            "failed to wait for CLI: {err}"
        ))),
    };
    shared.finish(error);
}

/// Forward stderr lines and keep the last few for error reports.
async fn collect_stderr(
    stderr: ChildStderr,
    on_stderr: Option<StderrCallback>,
    limit: usize,
) -> Vec<String> {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    loop {
        line.clear();
        match read_line_bounded(&mut reader, &mut line, limit).await {
            Ok(LineRead::Line) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end();
                if text.is_empty() {
                    continue;
                }
                match on_stderr.as_ref() {
                    Some(callback) => callback(text),
                    None => log::debug!("[query::stderr] {text}"),
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(text.to_string());
            }
            Ok(LineRead::Overflow(size)) => {
                log::debug!("[query::stderr] dropped {size} byte stderr line");
            }
            Ok(LineRead::Eof) | Err(_) => break,
        }
    }

    tail.into()
}

async fn write_frames(
    shared: Arc<Shared>,
    mut stdin: ChildStdin,
    mut frames: mpsc::UnboundedReceiver<Value>,
) {
    while let Some(frame) = frames.recv().await {
        let encoded = match LineCodec::encode(&frame) {
            Ok(encoded) => encoded,
            Err(err) => {
                log::warn!("[query::write] cannot encode frame: {err}");
                continue;
            }
        };
        let written = async {
            stdin.write_all(encoded.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(err) = written {
            log::warn!("[query::write] {err}");
            // Senders see a closed session before the error is observable.
            shared.lock_outbound().take();
            shared.record_error(StreamError::WriteFailure(err.to_string()));
            return;
        }
    }

    let _ = stdin.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;

    fn message(raw: Value) -> Message {
        parse_message(&raw).unwrap()
    }

    fn init(session: &str) -> Message {
        message(json!({"type": "system", "subtype": "init", "sessionId": session}))
    }

    fn assistant(text: &str) -> Message {
        message(json!({
            "type": "assistant",
            "message": {"model": "m", "content": [{"type": "text", "text": text}]},
        }))
    }

    fn detached(shared: Arc<Shared>) -> Query {
        Query {
            shared,
            handle: Handle::current(),
            runtime: None,
            streaming: true,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn route_prefers_oldest_waiter_then_queues() {
        let shared = Shared::default();
        let (first_tx, mut first_rx) = oneshot::channel();
        let (second_tx, mut second_rx) = oneshot::channel();
        shared.lock_state().waiters.extend([first_tx, second_tx]);

        shared.route(assistant("one"));
        shared.route(assistant("two"));
        shared.route(assistant("three"));

        let first = first_rx.try_recv().unwrap().unwrap();
        let second = second_rx.try_recv().unwrap().unwrap();
        assert_eq!(first, assistant("one"));
        assert_eq!(second, assistant("two"));

        let state = shared.lock_state();
        assert!(state.waiters.is_empty());
        assert_eq!(state.queue.len(), 1);
    }

    #[test]
    fn route_skips_abandoned_waiters() {
        let shared = Shared::default();
        let (dropped_tx, dropped_rx) = oneshot::channel();
        let (live_tx, mut live_rx) = oneshot::channel();
        drop(dropped_rx);
        shared.lock_state().waiters.extend([dropped_tx, live_tx]);

        shared.route(assistant("hello"));
        assert_eq!(live_rx.try_recv().unwrap(), Some(assistant("hello")));
        assert!(shared.lock_state().queue.is_empty());
    }

    #[test]
    fn session_id_is_captured_once() {
        let shared = Shared::default();
        shared.route(assistant("before init"));
        shared.route(init("abc"));
        shared.route(init("other"));
        assert_eq!(shared.lock_state().session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn finish_resolves_waiters_and_keeps_first_error() {
        let shared = Shared::default();
        let (tx, mut rx) = oneshot::channel();
        shared.lock_state().waiters.push_back(tx);
        shared.record_error(StreamError::WriteFailure("broken pipe".into()));

        assert!(shared.finish(Some(StreamError::Timeout(Duration::from_secs(1)))));
        assert!(!shared.finish(None));

        assert_eq!(rx.try_recv().unwrap(), None);
        let state = shared.lock_state();
        assert!(state.finished);
        assert!(matches!(state.error, Some(StreamError::WriteFailure(_))));
    }

    #[tokio::test]
    async fn pull_async_resolves_in_registration_order() {
        let shared = Arc::new(Shared::default());
        let query = detached(Arc::clone(&shared));

        let first = query.pull_async();
        let second = query.pull_async();
        let third = query.pull_async();

        shared.route(assistant("a"));
        shared.route(assistant("b"));
        shared.finish(None);

        assert_eq!(first.await, Some(assistant("a")));
        assert_eq!(second.await, Some(assistant("b")));
        assert_eq!(third.await, None);
        assert_eq!(query.pull_async().now_or_never(), Some(None));
    }

    #[tokio::test]
    async fn pull_async_is_ready_when_queued() {
        let shared = Arc::new(Shared::default());
        let query = detached(Arc::clone(&shared));
        shared.route(assistant("queued"));
        assert_eq!(
            query.pull_async().now_or_never(),
            Some(Some(assistant("queued")))
        );
    }

    #[tokio::test]
    async fn blocking_pull_times_out_and_finishes() {
        let shared = Arc::new(Shared::default());
        let query = detached(Arc::clone(&shared));
        let started = Instant::now();
        assert_eq!(query.pull_timeout(Duration::from_millis(200)), None);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(query.is_finished());
        assert!(query.error().is_some_and(|err| err.is_timeout()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unbounded_pull_timeout_is_capped() {
        let shared = Arc::new(Shared::default());
        let query = detached(Arc::clone(&shared));
        shared.route(assistant("queued"));
        assert_eq!(query.pull_timeout(Duration::MAX), Some(assistant("queued")));

        shared.finish(None);
        assert_eq!(query.pull_timeout(Duration::MAX), None);
        assert!(query.error().is_none());
    }

    #[tokio::test]
    async fn control_frames_are_noops_without_stdin() {
        let query = detached(Arc::new(Shared::default()));
        assert!(!query.interrupt());
        assert!(!query.send_user_message(json!("hi")));
        query.close();
        assert!(!query.rewind_files());
    }
}
