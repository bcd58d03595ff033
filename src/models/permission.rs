//! Tool permission types.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Permission mode of the agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Prompt for every sensitive tool.
    Default,
    /// Auto-accept file edits.
    AcceptEdits,
    /// Plan only; do not execute tools.
    Plan,
    /// Allow everything without prompting.
    BypassPermissions,
}

impl PermissionMode {
    /// Wire spelling of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

/// Behavior attached to a permission rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionBehavior {
    /// Allow the tool.
    Allow,
    /// Deny the tool.
    Deny,
    /// Ask the user.
    Ask,
}

/// Where a permission update is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionUpdateDestination {
    /// User-level settings.
    UserSettings,
    /// Project settings checked into the repository.
    ProjectSettings,
    /// Project-local settings.
    LocalSettings,
    /// Current session only.
    Session,
}

/// A single tool rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRuleValue {
    /// Tool the rule applies to.
    pub tool_name: String,
    /// Optional rule qualifier, such as a command prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_content: Option<String>,
}

/// Kind of permission update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionUpdateKind {
    /// Add rules.
    AddRules,
    /// Replace all rules.
    ReplaceRules,
    /// Remove rules.
    RemoveRules,
    /// Change the permission mode.
    SetMode,
    /// Add allowed directories.
    AddDirectories,
    /// Remove allowed directories.
    RemoveDirectories,
}

/// A permission change suggested by the process or returned by a callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionUpdate {
    /// Update kind.
    #[serde(rename = "type")]
    pub kind: PermissionUpdateKind,
    /// Rules for the rule-based kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<PermissionRuleValue>>,
    /// Behavior for the rule-based kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<PermissionBehavior>,
    /// New mode for `setMode`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<PermissionMode>,
    /// Directories for the directory kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directories: Option<Vec<String>>,
    /// Persistence target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PermissionUpdateDestination>,
}

/// Context handed to the permission callback alongside the tool request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolPermissionContext {
    /// Updates the process suggests applying if the tool is allowed.
    pub suggestions: Vec<PermissionUpdate>,
    /// Path that triggered the check, when the request is path-scoped.
    pub blocked_path: Option<String>,
}

/// Decision returned by a permission callback.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionResult {
    /// Let the tool run.
    Allow {
        /// Replacement input; the original input is sent when `None`.
        updated_input: Option<Value>,
        /// Permission updates to apply.
        updated_permissions: Option<Vec<PermissionUpdate>>,
    },
    /// Refuse the tool.
    Deny {
        /// Explanation shown to the model.
        message: String,
        /// Also interrupt the current turn.
        interrupt: bool,
    },
}

impl PermissionResult {
    /// Allow with the original input.
    #[must_use]
    pub fn allow() -> Self {
        Self::Allow {
            updated_input: None,
            updated_permissions: None,
        }
    }

    /// Deny with `message`, without interrupting.
    pub fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
            interrupt: false,
        }
    }
}

/// Permission callback: `(tool_name, input, context) -> decision`.
pub type CanUseTool = Arc<
    dyn Fn(String, Value, ToolPermissionContext) -> BoxFuture<'static, Result<PermissionResult>>
        + Send
        + Sync,
>;

/// Wrap an async closure as a [`CanUseTool`] callback.
pub fn can_use_tool_fn<F, Fut>(f: F) -> CanUseTool
where
    F: Fn(String, Value, ToolPermissionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PermissionResult>> + Send + 'static,
{
    Arc::new(move |tool_name, input, context| Box::pin(f(tool_name, input, context)))
}
