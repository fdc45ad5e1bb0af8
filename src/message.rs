//! Typed messages exchanged with the Claude Code CLI.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Text content block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextBlock {
    pub text: String,
}

/// Thinking content block produced by Claude.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThinkingBlock {
    pub thinking: String,
    #[serde(default)]
    pub signature: String,
}

/// Tool use content block describing a requested tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: Map<String, Value>,
}

/// Tool result block returned from a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultBlock {
    #[serde(alias = "toolUseId")]
    pub tool_use_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, alias = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Union of all content blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(TextBlock),
    Thinking(ThinkingBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
    /// Block with an unrecognised or malformed `type`, kept verbatim.
    Unknown(Value),
}

impl ContentBlock {
    /// Decode a raw block, falling back to [`ContentBlock::Unknown`].
    pub fn from_value(raw: &Value) -> Self {
        let kind = raw.get("type").and_then(Value::as_str).unwrap_or_default();
        let decoded = match kind {
            "text" => serde_json::from_value(raw.clone()).map(ContentBlock::Text),
            "thinking" => serde_json::from_value(raw.clone()).map(ContentBlock::Thinking),
            "tool_use" => serde_json::from_value(raw.clone()).map(ContentBlock::ToolUse),
            "tool_result" => serde_json::from_value(raw.clone()).map(ContentBlock::ToolResult),
            _ => return ContentBlock::Unknown(raw.clone()),
        };
        decoded.unwrap_or_else(|err| {
            log::trace!("[message::content] undecodable {kind} block: {err}");
            ContentBlock::Unknown(raw.clone())
        })
    }
}

/// Content array kept in raw form and decoded into blocks on first access.
#[derive(Debug, Clone, Default)]
pub struct ContentBlocks {
    raw: Vec<Value>,
    decoded: OnceLock<Vec<ContentBlock>>,
}

impl ContentBlocks {
    pub fn new(raw: Vec<Value>) -> Self {
        Self {
            raw,
            decoded: OnceLock::new(),
        }
    }

    /// Decoded blocks. Decoding happens once; later calls reuse the cache.
    pub fn blocks(&self) -> &[ContentBlock] {
        self.decoded
            .get_or_init(|| self.raw.iter().map(ContentBlock::from_value).collect())
    }

    pub fn raw(&self) -> &[Value] {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Concatenation of every text block.
    pub fn text(&self) -> String {
        self.blocks()
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl PartialEq for ContentBlocks {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

/// Content for a user message.
#[derive(Debug, Clone, PartialEq)]
pub enum UserMessageContent {
    Text(String),
    Blocks(ContentBlocks),
}

/// User message emitted from the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct UserMessage {
    pub content: UserMessageContent,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
    pub parent_tool_use_id: Option<String>,
    pub tool_use_result: Option<Value>,
}

/// Assistant message produced by Claude.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantMessage {
    pub content: ContentBlocks,
    pub model: String,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
    pub parent_tool_use_id: Option<String>,
}

/// System message containing metadata or warnings.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMessage {
    pub subtype: String,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
    pub data: Map<String, Value>,
}

impl SystemMessage {
    pub fn is_init(&self) -> bool {
        self.subtype == "init"
    }

    pub fn model(&self) -> Option<&str> {
        self.str_field("model")
    }

    pub fn cwd(&self) -> Option<&str> {
        self.str_field("cwd")
    }

    pub fn permission_mode(&self) -> Option<&str> {
        self.str_field("permission_mode")
    }

    pub fn claude_code_version(&self) -> Option<&str> {
        self.str_field("claude_code_version")
    }

    pub fn api_key_source(&self) -> Option<&str> {
        self.str_field("api_key_source")
    }

    pub fn output_style(&self) -> Option<&str> {
        self.str_field("output_style")
    }

    pub fn tools(&self) -> Vec<&str> {
        self.str_list("tools")
    }

    pub fn slash_commands(&self) -> Vec<&str> {
        self.str_list("slash_commands")
    }

    pub fn mcp_servers(&self) -> Option<&Value> {
        self.data.get("mcp_servers")
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    fn str_list(&self, key: &str) -> Vec<&str> {
        self.data
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Result message summarising cost and usage. Always the last message of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMessage {
    pub subtype: String,
    pub duration_ms: i64,
    pub duration_api_ms: i64,
    pub is_error: bool,
    pub num_turns: i64,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
    pub total_cost_usd: Option<f64>,
    pub usage: Option<Map<String, Value>>,
    pub model_usage: Option<Map<String, Value>>,
    pub permission_denials: Vec<Value>,
    pub result: Option<String>,
    pub structured_output: Option<Value>,
}

/// Stream event for partial updates during streaming completions.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub uuid: Option<String>,
    pub session_id: Option<String>,
    pub event: Value,
    pub parent_tool_use_id: Option<String>,
}

/// Message whose `type` is not one the SDK models.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseMessage {
    pub message_type: String,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
    pub parent_tool_use_id: Option<String>,
    pub data: Map<String, Value>,
}

/// Messages emitted by the CLI.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    System(SystemMessage),
    Result(ResultMessage),
    StreamEvent(StreamEvent),
    Base(BaseMessage),
}

impl Message {
    /// The wire `type` discriminant.
    pub fn message_type(&self) -> &str {
        match self {
            Message::User(_) => "user",
            Message::Assistant(_) => "assistant",
            Message::System(_) => "system",
            Message::Result(_) => "result",
            Message::StreamEvent(_) => "stream_event",
            Message::Base(base) => &base.message_type,
        }
    }

    pub fn uuid(&self) -> Option<&str> {
        match self {
            Message::User(msg) => msg.uuid.as_deref(),
            Message::Assistant(msg) => msg.uuid.as_deref(),
            Message::System(msg) => msg.uuid.as_deref(),
            Message::Result(msg) => msg.uuid.as_deref(),
            Message::StreamEvent(msg) => msg.uuid.as_deref(),
            Message::Base(msg) => msg.uuid.as_deref(),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Message::User(msg) => msg.session_id.as_deref(),
            Message::Assistant(msg) => msg.session_id.as_deref(),
            Message::System(msg) => msg.session_id.as_deref(),
            Message::Result(msg) => msg.session_id.as_deref(),
            Message::StreamEvent(msg) => msg.session_id.as_deref(),
            Message::Base(msg) => msg.session_id.as_deref(),
        }
    }

    /// Set when the message belongs to a sub-agent.
    pub fn parent_tool_use_id(&self) -> Option<&str> {
        match self {
            Message::User(msg) => msg.parent_tool_use_id.as_deref(),
            Message::Assistant(msg) => msg.parent_tool_use_id.as_deref(),
            Message::StreamEvent(msg) => msg.parent_tool_use_id.as_deref(),
            Message::Base(msg) => msg.parent_tool_use_id.as_deref(),
            Message::System(_) | Message::Result(_) => None,
        }
    }

    pub fn is_result(&self) -> bool {
        matches!(self, Message::Result(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_blocks_decode_lazily_and_cache() {
        let blocks = ContentBlocks::new(vec![
            json!({"type": "text", "text": "Hello "}),
            json!({"type": "tool_use", "id": "t1", "name": "Read", "input": {"path": "a"}}),
            json!({"type": "text", "text": "world"}),
        ]);

        let first = blocks.blocks().as_ptr();
        assert_eq!(blocks.blocks().len(), 3);
        assert_eq!(first, blocks.blocks().as_ptr());
        assert_eq!(blocks.text(), "Hello world");
        match &blocks.blocks()[1] {
            ContentBlock::ToolUse(tool) => {
                assert_eq!(tool.name, "Read");
                assert_eq!(tool.input.get("path"), Some(&json!("a")));
            }
            other => panic!("expected tool_use block, got {other:?}"),
        }
    }

    #[test]
    fn unknown_and_malformed_blocks_are_preserved() {
        let blocks = ContentBlocks::new(vec![
            json!({"type": "image", "source": {}}),
            json!({"type": "text"}),
        ]);
        assert!(matches!(blocks.blocks()[0], ContentBlock::Unknown(_)));
        assert!(matches!(blocks.blocks()[1], ContentBlock::Unknown(_)));
        assert_eq!(blocks.text(), "");
    }

    #[test]
    fn thinking_block_signature_is_optional() {
        let block = ContentBlock::from_value(&json!({"type": "thinking", "thinking": "hmm"}));
        match block {
            ContentBlock::Thinking(thinking) => {
                assert_eq!(thinking.thinking, "hmm");
                assert!(thinking.signature.is_empty());
            }
            other => panic!("expected thinking block, got {other:?}"),
        }
    }

    #[test]
    fn system_message_exposes_init_fields() {
        let data = json!({
            "type": "system",
            "subtype": "init",
            "model": "claude-sonnet",
            "tools": ["Read", "Write"],
            "slash_commands": ["/clear"],
        });
        let message = SystemMessage {
            subtype: "init".into(),
            uuid: None,
            session_id: Some("abc".into()),
            data: data.as_object().cloned().unwrap_or_default(),
        };
        assert!(message.is_init());
        assert_eq!(message.model(), Some("claude-sonnet"));
        assert_eq!(message.tools(), vec!["Read", "Write"]);
        assert_eq!(message.slash_commands(), vec!["/clear"]);
        assert_eq!(Message::System(message).session_id(), Some("abc"));
    }
}
