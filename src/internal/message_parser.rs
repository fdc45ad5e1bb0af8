//! Parse raw CLI JSON messages into strongly typed structures.

use serde_json::{Map, Value};

use crate::error::{MessageParseError, SdkError};
use crate::message::{
    AssistantMessage, BaseMessage, ContentBlocks, Message, ResultMessage, StreamEvent,
    SystemMessage, UserMessage, UserMessageContent,
};

/// camelCase keys the CLI may emit, with the field names the SDK uses.
const FIELD_RENAMES: &[(&str, &str)] = &[
    ("sessionId", "session_id"),
    ("parentToolUseId", "parent_tool_use_id"),
    ("durationMs", "duration_ms"),
    ("durationApiMs", "duration_api_ms"),
    ("numTurns", "num_turns"),
    ("totalCostUsd", "total_cost_usd"),
    ("isError", "is_error"),
    ("slashCommands", "slash_commands"),
    ("claudeCodeVersion", "claude_code_version"),
    ("outputStyle", "output_style"),
    ("apiKeySource", "api_key_source"),
    ("permissionMode", "permission_mode"),
    ("mcpServers", "mcp_servers"),
    ("modelUsage", "model_usage"),
    ("permissionDenials", "permission_denials"),
    ("toolUseResult", "tool_use_result"),
    ("structuredOutput", "structured_output"),
];

/// Rename camelCase top-level keys to their snake_case form.
///
/// A snake_case key already present wins over its camelCase twin.
pub fn normalize_fields(mut object: Map<String, Value>) -> Map<String, Value> {
    for (camel, snake) in FIELD_RENAMES {
        if let Some(value) = object.remove(*camel) {
            if !object.contains_key(*snake) {
                object.insert((*snake).to_string(), value);
            }
        }
    }
    object
}

/// Convert a serde_json::Value into a strongly typed `Message` value.
///
/// Objects without a string `type` are rejected; unknown types become
/// [`Message::Base`].
pub fn parse_message(raw: &Value) -> Result<Message, SdkError> {
    let object = raw.as_object().ok_or_else(|| {
        MessageParseError::new(
            format!(
                "Invalid message data type (expected object, got {})",
                value_type_name(raw)
            ),
            Some(raw.clone()),
        )
    })?;

    let object = normalize_fields(object.clone());

    let message_type = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| MessageParseError::new("Message missing 'type' field", Some(raw.clone())))?
        .to_string();

    let message = match message_type.as_str() {
        "user" => parse_user_message(&object),
        "assistant" => parse_assistant_message(&object),
        "system" => parse_system_message(object),
        "result" => parse_result_message(&object),
        "stream_event" => parse_stream_event(&object),
        _ => Message::Base(BaseMessage {
            uuid: get_string(&object, "uuid"),
            session_id: get_string(&object, "session_id"),
            parent_tool_use_id: get_string(&object, "parent_tool_use_id"),
            message_type: message_type.clone(),
            data: object,
        }),
    };
    Ok(message)
}

fn parse_user_message(object: &Map<String, Value>) -> Message {
    let content_value = object
        .get("message")
        .and_then(Value::as_object)
        .and_then(|message| message.get("content"))
        .or_else(|| object.get("content"));

    let content = match content_value {
        Some(Value::String(text)) => UserMessageContent::Text(text.clone()),
        Some(Value::Array(blocks)) => UserMessageContent::Blocks(ContentBlocks::new(blocks.clone())),
        _ => UserMessageContent::Text(String::new()),
    };

    Message::User(UserMessage {
        content,
        uuid: get_string(object, "uuid"),
        session_id: get_string(object, "session_id"),
        parent_tool_use_id: get_string(object, "parent_tool_use_id"),
        tool_use_result: object.get("tool_use_result").cloned(),
    })
}

fn parse_assistant_message(object: &Map<String, Value>) -> Message {
    let message_object = object.get("message").and_then(Value::as_object);

    let content = message_object
        .and_then(|message| message.get("content"))
        .or_else(|| object.get("content"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let model = message_object
        .and_then(|message| message.get("model"))
        .or_else(|| object.get("model"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Message::Assistant(AssistantMessage {
        content: ContentBlocks::new(content),
        model,
        uuid: get_string(object, "uuid"),
        session_id: get_string(object, "session_id"),
        parent_tool_use_id: get_string(object, "parent_tool_use_id"),
    })
}

fn parse_system_message(object: Map<String, Value>) -> Message {
    Message::System(SystemMessage {
        subtype: get_string(&object, "subtype").unwrap_or_default(),
        uuid: get_string(&object, "uuid"),
        session_id: get_string(&object, "session_id"),
        data: object,
    })
}

fn parse_result_message(object: &Map<String, Value>) -> Message {
    Message::Result(ResultMessage {
        subtype: get_string(object, "subtype").unwrap_or_default(),
        duration_ms: get_i64(object, "duration_ms"),
        duration_api_ms: get_i64(object, "duration_api_ms"),
        is_error: object
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        num_turns: get_i64(object, "num_turns"),
        uuid: get_string(object, "uuid"),
        session_id: get_string(object, "session_id"),
        total_cost_usd: object.get("total_cost_usd").and_then(Value::as_f64),
        usage: object.get("usage").and_then(Value::as_object).cloned(),
        model_usage: object.get("model_usage").and_then(Value::as_object).cloned(),
        permission_denials: object
            .get("permission_denials")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        result: get_string(object, "result"),
        structured_output: object
            .get("structured_output")
            .filter(|value| !value.is_null())
            .cloned(),
    })
}

fn parse_stream_event(object: &Map<String, Value>) -> Message {
    Message::StreamEvent(StreamEvent {
        uuid: get_string(object, "uuid"),
        session_id: get_string(object, "session_id"),
        event: object.get("event").cloned().unwrap_or(Value::Null),
        parent_tool_use_id: get_string(object, "parent_tool_use_id"),
    })
}

fn get_string(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}

fn get_i64(object: &Map<String, Value>, key: &str) -> i64 {
    object.get(key).and_then(Value::as_i64).unwrap_or_default()
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
