//! In-process tool servers exposed to the agent process over `mcp_message`
//! control requests.
//!
//! A [`ToolServer`] lives inside the caller's process; the agent reaches it
//! through the control channel instead of spawning a separate server.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::{Result, SdkError};

/// Description of one callable tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name within the server.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON Schema of the tool arguments.
    pub input_schema: Value,
}

/// One content part of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    /// Text output.
    Text {
        /// Text content.
        text: String,
    },
    /// Base64-encoded image output.
    Image {
        /// Base64 payload.
        data: String,
        /// MIME type of the payload.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    /// Content parts.
    pub content: Vec<ToolContent>,
    /// Whether the tool reports a failure.
    pub is_error: bool,
}

impl ToolOutput {
    /// A successful single-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// A failed single-text result.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// JSON-RPC `tools/call` result body.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut body = json!({ "content": self.content });
        if self.is_error {
            body["isError"] = Value::Bool(true);
        }
        body
    }
}

/// A tool server reachable through `mcp_message` control requests.
pub trait ToolServer: Send + Sync {
    /// Server name used for routing.
    fn name(&self) -> &str;

    /// Server version reported from `initialize`.
    fn version(&self) -> &str;

    /// Tools offered by this server.
    fn list_tools(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ToolDefinition>>> + Send + '_>>;

    /// Invoke `name` with `arguments`.
    ///
    /// # Errors
    ///
    /// An `Err` is reported to the process as JSON-RPC error `-32603`.
    fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput>> + Send + '_>>;
}

/// Handler invoked for one tool.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<ToolOutput>> + Send>> + Send + Sync>;

/// A tool registered on an [`SdkToolServer`].
#[derive(Clone)]
pub struct SdkTool {
    /// Tool metadata.
    pub definition: ToolDefinition,
    /// Tool implementation.
    pub handler: ToolHandler,
}

impl SdkTool {
    /// Create a tool from its metadata and an async handler.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
    {
        Self {
            definition: ToolDefinition {
                name: name.into(),
                description: description.into(),
                input_schema,
            },
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }
}

/// Registry-backed [`ToolServer`] built from closures.
#[derive(Clone)]
pub struct SdkToolServer {
    name: String,
    version: String,
    order: Vec<String>,
    tools: HashMap<String, SdkTool>,
}

impl SdkToolServer {
    /// Create an empty server.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            order: Vec::new(),
            tools: HashMap::new(),
        }
    }

    /// Register a tool; a later tool with the same name replaces it.
    #[must_use]
    pub fn tool(mut self, tool: SdkTool) -> Self {
        let name = tool.definition.name.clone();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
        self
    }
}

impl ToolServer for SdkToolServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn list_tools(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ToolDefinition>>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .order
                .iter()
                .filter_map(|name| self.tools.get(name))
                .map(|tool| tool.definition.clone())
                .collect())
        })
    }

    fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput>> + Send + '_>> {
        let tool = self.tools.get(name).cloned();
        let name = name.to_owned();
        Box::pin(async move {
            let Some(tool) = tool else {
                return Err(SdkError::Dispatch(format!("Tool '{name}' not found")));
            };
            (tool.handler)(arguments).await
        })
    }
}

impl std::fmt::Debug for SdkToolServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkToolServer")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("tools", &self.order)
            .finish()
    }
}
