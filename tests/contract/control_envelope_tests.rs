//! Contract tests for the control-protocol wire envelopes.

use agent_conduit::control::protocol::{
    error_envelope, parse_response, request_envelope, success_envelope, SdkControlRequest,
};
use agent_conduit::models::permission::PermissionMode;
use agent_conduit::SdkError;
use serde_json::{json, Value};

fn envelope(request: &SdkControlRequest) -> Value {
    let raw = request_envelope("req_1_0a1b2c3d", request).expect("serialize");
    assert!(!raw.contains('\n'), "envelope must be a single line");
    serde_json::from_str(&raw).expect("valid json")
}

// ── Outbound requests ───────────────────────────────────────────────────────

#[test]
fn interrupt_envelope() {
    assert_eq!(
        envelope(&SdkControlRequest::Interrupt),
        json!({
            "type": "control_request",
            "request_id": "req_1_0a1b2c3d",
            "request": {"subtype": "interrupt"},
        })
    );
}

#[test]
fn initialize_envelope_carries_hook_table() {
    let hooks = json!({"PreToolUse": [{"matcher": "Bash", "hookCallbackIds": ["hook_1"]}]});
    assert_eq!(
        envelope(&SdkControlRequest::Initialize { hooks: Some(hooks.clone()) })["request"],
        json!({"subtype": "initialize", "hooks": hooks})
    );
    assert_eq!(
        envelope(&SdkControlRequest::Initialize { hooks: None })["request"],
        json!({"subtype": "initialize", "hooks": null})
    );
}

#[test]
fn set_permission_mode_uses_camel_case_modes() {
    let cases = [
        (PermissionMode::Default, "default"),
        (PermissionMode::AcceptEdits, "acceptEdits"),
        (PermissionMode::Plan, "plan"),
        (PermissionMode::BypassPermissions, "bypassPermissions"),
    ];
    for (mode, wire) in cases {
        assert_eq!(mode.as_str(), wire);
        assert_eq!(
            envelope(&SdkControlRequest::SetPermissionMode { mode })["request"],
            json!({"subtype": "set_permission_mode", "mode": wire})
        );
    }
}

#[test]
fn set_model_sends_null_for_default() {
    assert_eq!(
        envelope(&SdkControlRequest::SetModel {
            model: Some("sonnet".into())
        })["request"],
        json!({"subtype": "set_model", "model": "sonnet"})
    );
    assert_eq!(
        envelope(&SdkControlRequest::SetModel { model: None })["request"],
        json!({"subtype": "set_model", "model": null})
    );
}

#[test]
fn rewind_and_status_envelopes() {
    assert_eq!(
        envelope(&SdkControlRequest::RewindFiles {
            user_message_id: "msg-7".into()
        })["request"],
        json!({"subtype": "rewind_files", "user_message_id": "msg-7"})
    );
    assert_eq!(
        envelope(&SdkControlRequest::McpStatus)["request"],
        json!({"subtype": "mcp_status"})
    );
}

#[test]
fn subtype_matches_serialized_discriminator() {
    let requests = [
        SdkControlRequest::Initialize { hooks: None },
        SdkControlRequest::Interrupt,
        SdkControlRequest::SetPermissionMode {
            mode: PermissionMode::Plan,
        },
        SdkControlRequest::SetModel { model: None },
        SdkControlRequest::RewindFiles {
            user_message_id: "m".into(),
        },
        SdkControlRequest::McpStatus,
    ];
    for request in &requests {
        assert_eq!(envelope(request)["request"]["subtype"], request.subtype());
    }
}

// ── Responses to inbound requests ───────────────────────────────────────────

#[test]
fn success_envelope_shape() {
    assert_eq!(
        success_envelope("inbound-1", json!({"behavior": "allow", "updatedInput": {}})),
        json!({
            "type": "control_response",
            "response": {
                "subtype": "success",
                "request_id": "inbound-1",
                "response": {"behavior": "allow", "updatedInput": {}},
            }
        })
    );
}

#[test]
fn error_envelope_shape() {
    assert_eq!(
        error_envelope("inbound-2", "canUseTool callback is not provided"),
        json!({
            "type": "control_response",
            "response": {
                "subtype": "error",
                "request_id": "inbound-2",
                "error": "canUseTool callback is not provided",
            }
        })
    );
}

// ── Parsing responses from the process ──────────────────────────────────────

#[test]
fn parse_success_without_payload_yields_empty_object() {
    let parsed = parse_response(&json!({
        "type": "control_response",
        "response": {"subtype": "success", "request_id": "req_3_ffffffff"}
    }))
    .expect("parse");
    assert_eq!(parsed.request_id, "req_3_ffffffff");
    assert_eq!(parsed.outcome, Ok(json!({})));
}

#[test]
fn parse_error_translates_message() {
    let parsed = parse_response(&json!({
        "type": "control_response",
        "response": {"subtype": "error", "request_id": "req_4_00000000", "error": "model not found"}
    }))
    .expect("parse");
    assert_eq!(parsed.outcome, Err(SdkError::Control("model not found".into())));

    let parsed = parse_response(&json!({
        "type": "control_response",
        "response": {"subtype": "error", "request_id": "req_5_00000000"}
    }))
    .expect("parse");
    assert_eq!(parsed.outcome, Err(SdkError::Control("unknown error".into())));
}

#[test]
fn parse_without_request_id_is_decode_error() {
    let err = parse_response(&json!({
        "type": "control_response",
        "response": {"subtype": "success"}
    }))
    .unwrap_err();
    assert!(matches!(err, SdkError::Decode { .. }), "got {err:?}");
}
