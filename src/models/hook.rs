//! Lifecycle hook types.
//!
//! Hooks are registered per [`HookEvent`] as a list of [`HookMatcher`]s.
//! During the handshake each callback receives an opaque id; the process
//! later refers to it in `hook_callback` requests.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{Result, SdkError};

/// Lifecycle points at which the process invokes hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HookEvent {
    /// Before a tool runs.
    PreToolUse,
    /// After a tool returned.
    PostToolUse,
    /// When the user submits a prompt.
    UserPromptSubmit,
    /// When the main agent stops.
    Stop,
    /// When a sub-agent stops.
    SubagentStop,
    /// Before the conversation is compacted.
    PreCompact,
}

impl HookEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::Stop => "Stop",
            Self::SubagentStop => "SubagentStop",
            Self::PreCompact => "PreCompact",
        }
    }
}

/// Fields common to every hook input.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct BaseHookInput {
    session_id: String,
    transcript_path: String,
    cwd: String,
    #[serde(default)]
    permission_mode: Option<String>,
}

/// Event-specific part of a hook input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "hook_event_name")]
pub enum HookEventInput {
    /// A tool is about to run.
    PreToolUse {
        /// Tool name.
        tool_name: String,
        /// Tool arguments.
        tool_input: Value,
    },
    /// A tool finished.
    PostToolUse {
        /// Tool name.
        tool_name: String,
        /// Tool arguments.
        tool_input: Value,
        /// Tool output.
        tool_response: Value,
    },
    /// The user submitted a prompt.
    UserPromptSubmit {
        /// Prompt text.
        prompt: String,
    },
    /// The agent is stopping.
    Stop {
        /// Whether a stop hook is already continuing the agent.
        stop_hook_active: bool,
    },
    /// A sub-agent is stopping.
    SubagentStop {
        /// Whether a stop hook is already continuing the agent.
        stop_hook_active: bool,
    },
    /// The conversation is about to be compacted.
    PreCompact {
        /// `manual` or `auto`.
        trigger: String,
        /// Instructions supplied with a manual compaction.
        #[serde(default)]
        custom_instructions: Option<String>,
    },
}

impl HookEventInput {
    /// The event this input belongs to.
    #[must_use]
    pub fn event(&self) -> HookEvent {
        match self {
            Self::PreToolUse { .. } => HookEvent::PreToolUse,
            Self::PostToolUse { .. } => HookEvent::PostToolUse,
            Self::UserPromptSubmit { .. } => HookEvent::UserPromptSubmit,
            Self::Stop { .. } => HookEvent::Stop,
            Self::SubagentStop { .. } => HookEvent::SubagentStop,
            Self::PreCompact { .. } => HookEvent::PreCompact,
        }
    }
}

/// Typed input delivered to a hook callback.
#[derive(Debug, Clone, PartialEq)]
pub struct HookInput {
    /// Session identifier.
    pub session_id: String,
    /// Path of the conversation transcript.
    pub transcript_path: String,
    /// Working directory of the agent.
    pub cwd: String,
    /// Current permission mode, when reported.
    pub permission_mode: Option<String>,
    /// Event-specific fields.
    pub event: HookEventInput,
}

impl HookInput {
    /// Build a typed input from the generic `input` payload of a
    /// `hook_callback` request, switching on `hook_event_name`.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Decode` when the event name is unknown or a field
    /// required by that event is missing.
    pub fn from_value(value: &Value) -> Result<Self> {
        let raw = value.to_string();
        let event_name = value
            .get("hook_event_name")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SdkError::decode("hook input is missing required field 'hook_event_name'", &*raw)
            })?;

        let base: BaseHookInput = serde_json::from_value(value.clone()).map_err(|e| {
            SdkError::decode(format!("invalid {event_name} hook input: {e}"), &*raw)
        })?;
        let event: HookEventInput = serde_json::from_value(value.clone()).map_err(|e| {
            SdkError::decode(format!("invalid {event_name} hook input: {e}"), &*raw)
        })?;

        Ok(Self {
            session_id: base.session_id,
            transcript_path: base.transcript_path,
            cwd: base.cwd,
            permission_mode: base.permission_mode,
            event,
        })
    }
}

/// Structured hook result, serialized verbatim as the response payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    /// Whether the agent should continue after the hook.
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_: Option<bool>,
    /// Hide the hook's stdout from the transcript.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,
    /// Message shown when `continue` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    /// `block` to block the action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    /// Warning shown to the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    /// Explanation fed back to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Event-specific output object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<Value>,
    /// Defer the hook result.
    #[serde(rename = "async", skip_serializing_if = "Option::is_none")]
    pub async_: Option<bool>,
    /// Timeout in milliseconds for a deferred result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub async_timeout: Option<u64>,
}

/// Context passed to each hook invocation.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Fires when the session is closing.
    pub signal: CancellationToken,
}

/// Hook callback: `(input, tool_use_id, context) -> output`.
pub type HookCallback = Arc<
    dyn Fn(HookInput, Option<String>, HookContext) -> BoxFuture<'static, Result<HookOutput>>
        + Send
        + Sync,
>;

/// Wrap an async closure as a [`HookCallback`].
pub fn hook_fn<F, Fut>(f: F) -> HookCallback
where
    F: Fn(HookInput, Option<String>, HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HookOutput>> + Send + 'static,
{
    Arc::new(move |input, tool_use_id, context| Box::pin(f(input, tool_use_id, context)))
}

/// A group of callbacks for one event, selected by an optional matcher.
#[derive(Clone)]
pub struct HookMatcher {
    /// Tool-name pattern, e.g. `Bash` or `Write|Edit`; `None` matches all.
    pub matcher: Option<String>,
    /// Callbacks invoked in order.
    pub hooks: Vec<HookCallback>,
    /// Per-callback timeout in seconds.
    pub timeout: Option<f64>,
}

impl HookMatcher {
    /// Create a matcher with a single callback.
    pub fn new(matcher: Option<&str>, hook: HookCallback) -> Self {
        Self {
            matcher: matcher.map(str::to_owned),
            hooks: vec![hook],
            timeout: None,
        }
    }

    /// Set the timeout in seconds.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }
}

impl std::fmt::Debug for HookMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookMatcher")
            .field("matcher", &self.matcher)
            .field("hooks", &self.hooks.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}
