//! Inbound control-request handlers.
//!
//! Every request produces exactly one envelope: a success carrying the
//! handler payload, or an error carrying the failure message. Callback
//! panics are caught here and never reach the read loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::hooks::HookRegistry;
use super::mcp::{self, ToolServers};
use super::protocol::{error_envelope, success_envelope};
use crate::models::hook::{HookContext, HookInput};
use crate::models::permission::{
    CanUseTool, PermissionResult, PermissionUpdate, ToolPermissionContext,
};
use crate::{Result, SdkError};

/// Handlers for requests initiated by the agent process.
#[derive(Clone, Default)]
pub(crate) struct Dispatcher {
    hooks: HookRegistry,
    can_use_tool: Option<CanUseTool>,
    tool_servers: ToolServers,
}

impl Dispatcher {
    pub(crate) fn new(
        hooks: HookRegistry,
        can_use_tool: Option<CanUseTool>,
        tool_servers: ToolServers,
    ) -> Self {
        Self {
            hooks,
            can_use_tool,
            tool_servers,
        }
    }

    pub(crate) fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub(crate) fn has_tool_servers(&self) -> bool {
        !self.tool_servers.is_empty()
    }

    /// Handle one inbound request and return its response envelope.
    pub(crate) async fn handle(
        &self,
        request_id: &str,
        request: &Value,
        signal: CancellationToken,
    ) -> Value {
        let subtype = request
            .get("subtype")
            .and_then(Value::as_str)
            .unwrap_or_default();
        debug!(request_id, subtype, "handling inbound control request");

        match AssertUnwindSafe(self.route(subtype, request, signal))
            .catch_unwind()
            .await
        {
            Ok(Ok(payload)) => success_envelope(request_id, payload),
            Ok(Err(err)) => {
                warn!(request_id, subtype, error = %err, "inbound control request failed");
                error_envelope(request_id, &error_text(&err))
            }
            Err(panic) => {
                let message = panic_text(panic.as_ref());
                warn!(request_id, subtype, %message, "inbound control handler panicked");
                error_envelope(request_id, &message)
            }
        }
    }

    async fn route(&self, subtype: &str, request: &Value, signal: CancellationToken) -> Result<Value> {
        match subtype {
            "can_use_tool" => self.permission(request).await,
            "hook_callback" => self.hook_callback(request, signal).await,
            "mcp_message" => self.mcp_message(request).await,
            other => Err(SdkError::Dispatch(format!(
                "Unsupported control request subtype: {other}"
            ))),
        }
    }

    async fn permission(&self, request: &Value) -> Result<Value> {
        let Some(callback) = &self.can_use_tool else {
            return Err(SdkError::Dispatch(
                "canUseTool callback is not provided".to_owned(),
            ));
        };
        let tool_name = request
            .get("tool_name")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SdkError::Dispatch("can_use_tool request is missing 'tool_name'".to_owned())
            })?
            .to_owned();
        let original_input = request.get("input").cloned().unwrap_or_else(|| json!({}));
        let context = ToolPermissionContext {
            suggestions: suggestions(request),
            blocked_path: request
                .get("blocked_path")
                .and_then(Value::as_str)
                .map(str::to_owned),
        };

        match callback(tool_name, original_input.clone(), context).await? {
            PermissionResult::Allow {
                updated_input,
                updated_permissions,
            } => {
                let mut body = json!({
                    "behavior": "allow",
                    "updatedInput": updated_input.unwrap_or(original_input),
                });
                if let Some(updates) = updated_permissions {
                    body["updatedPermissions"] = serde_json::to_value(updates)?;
                }
                Ok(body)
            }
            PermissionResult::Deny { message, interrupt } => {
                let mut body = json!({ "behavior": "deny", "message": message });
                if interrupt {
                    body["interrupt"] = Value::Bool(true);
                }
                Ok(body)
            }
        }
    }

    async fn hook_callback(&self, request: &Value, signal: CancellationToken) -> Result<Value> {
        let callback_id = request
            .get("callback_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SdkError::Dispatch("hook_callback request is missing 'callback_id'".to_owned())
            })?;
        let Some(callback) = self.hooks.get(callback_id) else {
            return Err(SdkError::Dispatch(format!(
                "No hook callback found for ID: {callback_id}"
            )));
        };

        let input = HookInput::from_value(request.get("input").unwrap_or(&Value::Null))?;
        let tool_use_id = request
            .get("tool_use_id")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let output = callback(input, tool_use_id, HookContext { signal }).await?;
        Ok(serde_json::to_value(output)?)
    }

    async fn mcp_message(&self, request: &Value) -> Result<Value> {
        let server_name = request.get("server_name").and_then(Value::as_str);
        let message = request.get("message").filter(|m| !m.is_null());
        let (Some(server_name), Some(message)) = (server_name, message) else {
            return Err(SdkError::Dispatch(
                "Missing server_name or message for MCP request".to_owned(),
            ));
        };
        let response = mcp::route_message(&self.tool_servers, server_name, message).await;
        Ok(json!({ "mcp_response": response }))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut servers: Vec<_> = self.tool_servers.keys().collect();
        servers.sort();
        f.debug_struct("Dispatcher")
            .field("hooks", &self.hooks)
            .field("can_use_tool", &self.can_use_tool.is_some())
            .field("tool_servers", &servers)
            .finish()
    }
}

/// Suggested permission updates; entries that do not parse are skipped.
fn suggestions(request: &Value) -> Vec<PermissionUpdate> {
    let Some(items) = request.get("permission_suggestions").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(update) => Some(update),
            Err(e) => {
                debug!(error = %e, "skipping unrecognized permission suggestion");
                None
            }
        })
        .collect()
}

/// Message carried in an error envelope. Handler-raised errors travel
/// without the kind prefix.
fn error_text(err: &SdkError) -> String {
    match err {
        SdkError::Dispatch(msg) | SdkError::Control(msg) => msg.clone(),
        SdkError::Decode { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

fn panic_text(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("handler panicked: {msg}")
    } else {
        "handler panicked".to_owned()
    }
}
