//! Interactive client for multi-turn conversations with the Claude Code CLI.

use futures::stream::BoxStream;
use futures::{stream, Stream, StreamExt};
use serde_json::Value;

use crate::config::ClaudeAgentOptions;
use crate::error::{CliConnectionError, SdkError, StreamError};
use crate::internal::query::Query;
use crate::message::Message;
use crate::permission::{PermissionMode, PermissionResult};
use crate::transport::subprocess_cli::PromptMode;

/// Streaming-mode session: prompts go over stdin, replies come back as
/// messages until [`disconnect`](Self::disconnect).
pub struct ClaudeSdkClient {
    options: ClaudeAgentOptions,
    query: Option<Query>,
}

impl Default for ClaudeSdkClient {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ClaudeSdkClient {
    pub fn new(options: Option<ClaudeAgentOptions>) -> Self {
        Self {
            options: options.unwrap_or_default(),
            query: None,
        }
    }

    pub fn options(&self) -> &ClaudeAgentOptions {
        &self.options
    }

    /// Start the CLI in streaming mode. Does nothing when already connected.
    pub fn connect(&mut self) -> Result<(), SdkError> {
        if self.is_connected() {
            return Ok(());
        }
        let query = Query::new(PromptMode::Streaming, self.options.clone())?;
        log::debug!("[client::connect] connected (streaming: {})", query.is_streaming());
        self.query = Some(query);
        Ok(())
    }

    /// Whether a session exists and has not finished.
    pub fn is_connected(&self) -> bool {
        self.query.as_ref().is_some_and(|query| !query.is_finished())
    }

    fn active(&self) -> Result<&Query, SdkError> {
        self.query
            .as_ref()
            .ok_or_else(|| CliConnectionError::new("Not connected").into())
    }

    /// Send a user turn.
    pub async fn query<Q>(&self, prompt: Q) -> Result<(), SdkError>
    where
        Q: Into<ClientPrompt>,
    {
        let query = self.active()?;
        match prompt.into() {
            ClientPrompt::Text(text) => Self::deliver(query.send_user_message(Value::String(text))),
            ClientPrompt::Content(content) => Self::deliver(query.send_user_message(content)),
            ClientPrompt::Stream(mut contents) => {
                while let Some(content) = contents.next().await {
                    Self::deliver(query.send_user_message(content))?;
                }
                Ok(())
            }
        }
    }

    fn deliver(sent: bool) -> Result<(), SdkError> {
        if sent {
            Ok(())
        } else {
            Err(CliConnectionError::new("Session is closed; message not sent").into())
        }
    }

    /// Every remaining message of the session.
    pub fn receive_messages(&self) -> Result<impl Stream<Item = Message> + '_, SdkError> {
        Ok(self.active()?.messages())
    }

    /// Messages up to and including the next [`Message::Result`].
    pub fn receive_response(&self) -> Result<impl Stream<Item = Message> + '_, SdkError> {
        let query = self.active()?;
        Ok(stream::unfold((query, false), |(query, done)| async move {
            if done {
                return None;
            }
            let message = query.next_message().await?;
            let done = message.is_result();
            Some((message, (query, done)))
        }))
    }

    pub fn interrupt(&self) -> Result<(), SdkError> {
        Self::deliver(self.active()?.interrupt())
    }

    pub fn set_permission_mode(&mut self, mode: PermissionMode) -> Result<(), SdkError> {
        Self::deliver(self.active()?.set_permission_mode(mode))?;
        self.options.permission_mode = Some(mode);
        Ok(())
    }

    pub fn respond_to_permission(
        &self,
        tool_use_id: &str,
        decision: &PermissionResult,
    ) -> Result<(), SdkError> {
        Self::deliver(self.active()?.respond_to_permission(tool_use_id, decision))
    }

    pub fn rewind_files(&self) -> Result<(), SdkError> {
        Self::deliver(self.active()?.rewind_files())
    }

    pub fn session_id(&self) -> Option<String> {
        self.query.as_ref().and_then(Query::session_id)
    }

    /// Why the session ended, when it ended badly.
    pub fn error(&self) -> Option<StreamError> {
        self.query.as_ref().and_then(Query::error)
    }

    /// Close stdin, stop the CLI and release tool bridges.
    pub fn disconnect(&mut self) {
        if let Some(query) = self.query.take() {
            query.end_input();
            query.close();
        }
    }
}

impl std::fmt::Debug for ClaudeSdkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeSdkClient")
            .field("options", &self.options)
            .field("query", &self.query)
            .finish()
    }
}

/// Inputs accepted by [`ClaudeSdkClient::query`].
pub enum ClientPrompt {
    Text(String),
    /// Structured content, e.g. an array of content blocks.
    Content(Value),
    /// Several turns, sent in order.
    Stream(BoxStream<'static, Value>),
}

impl ClientPrompt {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        ClientPrompt::Stream(stream.boxed())
    }
}

impl From<&str> for ClientPrompt {
    fn from(value: &str) -> Self {
        ClientPrompt::Text(value.to_string())
    }
}

impl From<String> for ClientPrompt {
    fn from(value: String) -> Self {
        ClientPrompt::Text(value)
    }
}

impl From<Value> for ClientPrompt {
    fn from(value: Value) -> Self {
        ClientPrompt::Content(value)
    }
}

impl From<BoxStream<'static, Value>> for ClientPrompt {
    fn from(stream: BoxStream<'static, Value>) -> Self {
        ClientPrompt::Stream(stream)
    }
}
