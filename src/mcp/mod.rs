//! Helpers for building MCP-compatible tooling around the SDK.
//!
//! Tools registered here run inside the host process. The CLI reaches them
//! through the tool bridge (see [`crate::bridge`]).

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Future;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::SdkError;

/// Metadata describing an MCP tool exposed by an SDK server.
///
/// This is also the manifest entry handed to the bridge runner, so it never
/// carries the handler itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        rename = "inputSchema",
        alias = "input_schema",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub input_schema: Option<Value>,
}

impl McpToolInfo {
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        input_schema: Option<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            description,
            input_schema,
        }
    }
}

/// Content payloads returned from MCP tool executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
}

impl McpToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Image {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn resource(resource: Value) -> Self {
        Self::Resource { resource }
    }

    /// Pretty-printed JSON wrapped in a text block.
    pub fn json(value: &Value) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        Self::Text { text }
    }
}

/// Result of invoking an MCP tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolCallResult {
    pub content: Vec<McpToolContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl McpToolCallResult {
    pub fn new(content: Vec<McpToolContent>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// Single text block, not an error.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![McpToolContent::text(text)])
    }

    /// Single text block flagged as an error.
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(vec![McpToolContent::text(text)]).with_error(true)
    }

    pub fn with_error(mut self, is_error: bool) -> Self {
        self.is_error = is_error;
        self
    }

    /// Content blocks in wire form.
    pub fn content_values(&self) -> Result<Vec<Value>, serde_json::Error> {
        self.content.iter().map(serde_json::to_value).collect()
    }
}

/// Future type returned by SDK MCP tool handlers.
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<McpToolCallResult, SdkError>> + Send>>;

/// Definition of an SDK MCP tool that can be registered with a server.
#[derive(Clone)]
pub struct SdkMcpTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub handler: Arc<dyn Fn(Map<String, Value>) -> ToolFuture + Send + Sync>,
}

impl SdkMcpTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<McpToolCallResult, SdkError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    pub fn info(&self) -> McpToolInfo {
        McpToolInfo::new(
            self.name.clone(),
            Some(self.description.clone()),
            Some(self.input_schema.clone()),
        )
    }
}

impl std::fmt::Debug for SdkMcpTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkMcpTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

/// Shorthand for [`SdkMcpTool::new`].
pub fn tool<F, Fut>(
    name: impl Into<String>,
    description: impl Into<String>,
    input_schema: Value,
    handler: F,
) -> SdkMcpTool
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<McpToolCallResult, SdkError>> + Send + 'static,
{
    SdkMcpTool::new(name, description, input_schema, handler)
}

/// Trait implemented by MCP servers hosted inside the SDK process.
#[async_trait]
pub trait SdkMcpServer: Send + Sync {
    /// Human readable server name.
    fn name(&self) -> &str;

    /// Optional semantic version string for the server.
    fn version(&self) -> Option<&str> {
        None
    }

    /// List the tools made available by this server.
    fn list_tools(&self) -> Vec<McpToolInfo>;

    fn has_tool(&self, name: &str) -> bool {
        self.list_tools().iter().any(|tool| tool.name == name)
    }

    /// Invoke a tool exposed by this server.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<McpToolCallResult, SdkError>;
}

struct InProcessMcpServer {
    name: String,
    version: String,
    tools: Vec<SdkMcpTool>,
}

#[async_trait]
impl SdkMcpServer for InProcessMcpServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> Option<&str> {
        Some(&self.version)
    }

    fn list_tools(&self) -> Vec<McpToolInfo> {
        self.tools.iter().map(SdkMcpTool::info).collect()
    }

    fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|tool| tool.name == name)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<McpToolCallResult, SdkError> {
        let tool = self
            .tools
            .iter()
            .find(|tool| tool.name == name)
            .ok_or_else(|| SdkError::Message(format!("Tool '{name}' not found")))?;
        (tool.handler)(arguments).await
    }
}

/// Create an in-process MCP server that can be registered with
/// [`ClaudeAgentOptions::add_sdk_server`](crate::config::ClaudeAgentOptions::add_sdk_server).
pub fn create_sdk_mcp_server(
    name: impl Into<String>,
    version: impl Into<String>,
    tools: Vec<SdkMcpTool>,
) -> Arc<dyn SdkMcpServer> {
    Arc::new(InProcessMcpServer {
        name: name.into(),
        version: version.into(),
        tools,
    })
}

/// Helper to build a simple JSON schema map from parameter names to types.
pub fn simple_input_schema(params: &[(&str, &str)]) -> Value {
    let mut properties = Map::new();
    for (name, ty) in params {
        properties.insert((*name).to_string(), json!({ "type": ty }));
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": params.iter().map(|(name, _)| name.to_string()).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator() -> Arc<dyn SdkMcpServer> {
        let add = tool(
            "add",
            "Add two numbers",
            simple_input_schema(&[("a", "number"), ("b", "number")]),
            |args| async move {
                let a = args.get("a").and_then(Value::as_f64).unwrap_or_default();
                let b = args.get("b").and_then(Value::as_f64).unwrap_or_default();
                Ok(McpToolCallResult::text(format!("{}", a + b)))
            },
        );
        create_sdk_mcp_server("calc", "2.1.0", vec![add])
    }

    #[test]
    fn tool_info_serializes_as_manifest_entry() {
        let server = calculator();
        let tools = server.list_tools();
        assert_eq!(tools.len(), 1);
        let value = serde_json::to_value(&tools[0]).unwrap();
        assert_eq!(value["name"], "add");
        assert_eq!(value["description"], "Add two numbers");
        assert_eq!(value["inputSchema"]["required"], json!(["a", "b"]));

        let parsed: McpToolInfo =
            serde_json::from_value(json!({"name": "x", "input_schema": {"type": "object"}}))
                .unwrap();
        assert_eq!(parsed.input_schema, Some(json!({"type": "object"})));
        assert_eq!(parsed.description, None);
    }

    #[test]
    fn content_serializes_to_mcp_blocks() {
        let result = McpToolCallResult::new(vec![
            McpToolContent::text("hi"),
            McpToolContent::image("AAAA", "image/png"),
        ]);
        assert_eq!(
            result.content_values().unwrap(),
            vec![
                json!({"type": "text", "text": "hi"}),
                json!({"type": "image", "data": "AAAA", "mimeType": "image/png"}),
            ]
        );
        assert_eq!(
            serde_json::to_value(McpToolCallResult::error("boom")).unwrap(),
            json!({"content": [{"type": "text", "text": "boom"}], "isError": true})
        );
    }

    #[tokio::test]
    async fn in_process_server_dispatches_by_name() {
        let server = calculator();
        assert_eq!(server.name(), "calc");
        assert_eq!(server.version(), Some("2.1.0"));
        assert!(server.has_tool("add"));
        assert!(!server.has_tool("sub"));

        let mut args = Map::new();
        args.insert("a".into(), json!(2));
        args.insert("b".into(), json!(3));
        let result = server.call_tool("add", args).await.unwrap();
        assert_eq!(result, McpToolCallResult::text("5"));

        let err = server.call_tool("sub", Map::new()).await.unwrap_err();
        assert!(err.to_string().contains("sub"));
    }
}
