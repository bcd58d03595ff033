//! Application-level messages produced by the agent process.
//!
//! [`Message`] and [`ContentBlock`] are closed sum types; construction from
//! wire JSON goes through [`crate::decode`], which validates required fields
//! and names the missing one on failure.

use serde::Serialize;
use serde_json::Value;

/// One content block inside a `user` or `assistant` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// Text content.
        text: String,
    },
    /// Extended reasoning emitted before an answer.
    Thinking {
        /// Reasoning text.
        thinking: String,
        /// Opaque signature attached by the model.
        signature: String,
    },
    /// The model requested a tool invocation.
    ToolUse {
        /// Tool-use identifier referenced by the matching result.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input arguments.
        input: Value,
    },
    /// Result of a previous tool invocation.
    ToolResult {
        /// Identifier of the tool use this result answers.
        tool_use_id: String,
        /// Result payload: a string or a list of content parts.
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        /// Whether the tool reported failure.
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Content of a `user` message: a bare string or structured blocks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UserContent {
    /// Plain prompt text.
    Text(String),
    /// Structured blocks, typically tool results.
    Blocks(Vec<ContentBlock>),
}

/// A message authored by the user (or tool results sent on their behalf).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserMessage {
    /// Message body.
    pub content: UserContent,
    /// Message identifier; used by `rewind_files`.
    pub uuid: Option<String>,
    /// Set when the message belongs to a sub-agent's tool use.
    pub parent_tool_use_id: Option<String>,
}

/// A model response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantMessage {
    /// Response blocks.
    pub content: Vec<ContentBlock>,
    /// Model that produced the response.
    pub model: String,
    /// Set when the message belongs to a sub-agent's tool use.
    pub parent_tool_use_id: Option<String>,
    /// Error classification reported by the process, if any.
    pub error: Option<String>,
}

/// A system notification such as the `init` announcement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMessage {
    /// Notification kind.
    pub subtype: String,
    /// The complete raw frame.
    pub data: Value,
}

/// Final summary of a turn, emitted once per response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultMessage {
    /// Outcome kind (`success`, `error_max_turns`, …).
    pub subtype: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Time spent in model API calls in milliseconds.
    pub duration_api_ms: u64,
    /// Whether the turn ended in error.
    pub is_error: bool,
    /// Number of conversation turns.
    pub num_turns: u64,
    /// Session identifier assigned by the process.
    pub session_id: String,
    /// Accumulated cost, when reported.
    pub total_cost_usd: Option<f64>,
    /// Token usage breakdown, when reported.
    pub usage: Option<Value>,
    /// Final result text, when reported.
    pub result: Option<String>,
    /// Structured output, when an output schema was requested.
    pub structured_output: Option<Value>,
}

/// An incremental update emitted while a response is being generated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEvent {
    /// Event identifier.
    pub uuid: String,
    /// Session identifier.
    pub session_id: String,
    /// Raw streaming event.
    pub event: Value,
    /// Set when the event belongs to a sub-agent's tool use.
    pub parent_tool_use_id: Option<String>,
}

/// Every message kind the process may emit on the application channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// See [`UserMessage`].
    User(UserMessage),
    /// See [`AssistantMessage`].
    Assistant(AssistantMessage),
    /// See [`SystemMessage`].
    System(SystemMessage),
    /// See [`ResultMessage`].
    Result(ResultMessage),
    /// See [`StreamEvent`].
    StreamEvent(StreamEvent),
}

impl Message {
    /// Wire discriminator of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Assistant(_) => "assistant",
            Self::System(_) => "system",
            Self::Result(_) => "result",
            Self::StreamEvent(_) => "stream_event",
        }
    }

    /// Whether this is the terminal `result` message of a turn.
    #[must_use]
    pub fn is_result(&self) -> bool {
        matches!(self, Self::Result(_))
    }
}
