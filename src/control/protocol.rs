//! Wire envelopes of the control protocol.
//!
//! | Direction        | Frame                                                                  |
//! |------------------|------------------------------------------------------------------------|
//! | caller → process | `{"type":"control_request","request_id":…,"request":{"subtype":…}}`   |
//! | process → caller | `{"type":"control_response","response":{"subtype":"success"\|"error","request_id":…}}` |
//! | process → caller | `{"type":"control_request","request_id":…,"request":{"subtype":"can_use_tool"\|"hook_callback"\|"mcp_message"}}` |
//! | process → caller | `{"type":"control_cancel_request",…}` (ignored)                        |

use serde::Serialize;
use serde_json::{json, Value};

use crate::models::permission::PermissionMode;
use crate::{Result, SdkError};

/// Frame discriminator of a control response.
pub const CONTROL_RESPONSE: &str = "control_response";
/// Frame discriminator of a control request (both directions).
pub const CONTROL_REQUEST: &str = "control_request";
/// Frame discriminator of a cancellation notice for an inbound request.
pub const CONTROL_CANCEL_REQUEST: &str = "control_cancel_request";

/// Caller-initiated control requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum SdkControlRequest {
    /// Handshake carrying the hook table.
    Initialize {
        /// `{event → [{matcher, hookCallbackIds, timeout}]}`, or `null`.
        hooks: Option<Value>,
    },
    /// Stop the current turn.
    Interrupt,
    /// Change the permission mode.
    SetPermissionMode {
        /// New mode.
        mode: PermissionMode,
    },
    /// Change the model; `None` restores the default.
    SetModel {
        /// Model name.
        model: Option<String>,
    },
    /// Restore tracked files to their state at a user message.
    RewindFiles {
        /// Identifier of the user message to rewind to.
        user_message_id: String,
    },
    /// Query the status of connected tool servers.
    McpStatus,
}

impl SdkControlRequest {
    /// Wire subtype of the request.
    #[must_use]
    pub fn subtype(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::Interrupt => "interrupt",
            Self::SetPermissionMode { .. } => "set_permission_mode",
            Self::SetModel { .. } => "set_model",
            Self::RewindFiles { .. } => "rewind_files",
            Self::McpStatus => "mcp_status",
        }
    }
}

/// Serialize an outbound control request envelope.
///
/// # Errors
///
/// Returns `SdkError::Decode` if the payload cannot be serialized.
pub fn request_envelope(request_id: &str, request: &SdkControlRequest) -> Result<String> {
    let envelope = json!({
        "type": CONTROL_REQUEST,
        "request_id": request_id,
        "request": serde_json::to_value(request)?,
    });
    Ok(envelope.to_string())
}

/// Build a success response to an inbound request.
#[must_use]
pub fn success_envelope(request_id: &str, payload: Value) -> Value {
    json!({
        "type": CONTROL_RESPONSE,
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": payload,
        }
    })
}

/// Build an error response to an inbound request.
#[must_use]
pub fn error_envelope(request_id: &str, message: &str) -> Value {
    json!({
        "type": CONTROL_RESPONSE,
        "response": {
            "subtype": "error",
            "request_id": request_id,
            "error": message,
        }
    })
}

/// A `control_response` frame received from the process.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundResponse {
    /// Correlation id of the answered request.
    pub request_id: String,
    /// Success payload or the translated error.
    pub outcome: Result<Value>,
}

/// Parse a `control_response` frame.
///
/// A success without a `response` field resolves to an empty object.
///
/// # Errors
///
/// Returns `SdkError::Decode` when the frame lacks `response.request_id`.
pub fn parse_response(frame: &Value) -> Result<InboundResponse> {
    let response = frame.get("response").unwrap_or(&Value::Null);
    let request_id = response
        .get("request_id")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            SdkError::decode(
                "control_response is missing required field 'response.request_id'",
                frame.to_string(),
            )
        })?
        .to_owned();

    let outcome = if response.get("subtype").and_then(Value::as_str) == Some("error") {
        let message = match response.get("error") {
            Some(Value::String(msg)) => msg.clone(),
            Some(other) => other.to_string(),
            None => "unknown error".to_owned(),
        };
        Err(SdkError::Control(message))
    } else {
        Ok(response
            .get("response")
            .cloned()
            .unwrap_or_else(|| json!({})))
    };

    Ok(InboundResponse {
        request_id,
        outcome,
    })
}
