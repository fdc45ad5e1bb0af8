//! Wire types for both bridge legs.
//!
//! Socket leg (runner to host): `{id, tool, args}` requests answered with
//! `{id, content, isError}`. Stdio leg (CLI to runner): JSON-RPC 2.0.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::mcp::{McpToolCallResult, McpToolContent};

pub const JSONRPC_VERSION: &str = "2.0";
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

/// Tool call forwarded from the runner to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: Value,
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Host reply to a [`BridgeRequest`], correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub id: Value,
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl BridgeResponse {
    pub fn from_result(id: Value, result: &McpToolCallResult) -> Self {
        match result.content_values() {
            Ok(content) => Self {
                id,
                content,
                is_error: result.is_error,
            },
            Err(err) => Self::error(id, format!("Failed to encode tool result: {err}")),
        }
    }

    /// Error response with a single text block.
    pub fn error(id: Value, message: impl Into<String>) -> Self {
        let block = McpToolContent::text(message);
        Self {
            id,
            content: serde_json::to_value(block).into_iter().collect(),
            is_error: true,
        }
    }

    /// The `{content, isError}` object used as a `tools/call` result.
    pub fn into_call_result(self) -> Value {
        json!({ "content": self.content, "isError": self.is_error })
    }
}

/// Incoming JSON-RPC message. Notifications have no `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// `tools/call` result reporting a failure that never reached a handler.
pub fn failure_result(message: impl Into<String>) -> Value {
    json!({
        "content": [{ "type": "text", "text": message.into() }],
        "isError": true,
    })
}
