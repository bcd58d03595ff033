//! Inbound control requests: permission checks, hook callbacks, and the
//! error boundary around caller callbacks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_conduit::models::hook::{hook_fn, HookEvent, HookEventInput, HookMatcher, HookOutput};
use agent_conduit::models::permission::{
    PermissionMode, PermissionResult, PermissionUpdate, PermissionUpdateDestination,
    PermissionUpdateKind,
};
use agent_conduit::QueryOptions;
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::Notify;

use super::test_helpers::{assistant_frame, connected_session, pre_tool_use_input, STEP};

// ── Permission checks ───────────────────────────────────────────────────────

/// A deny with `interrupt` produces the deny payload with the flag set.
#[tokio::test]
async fn permission_deny_carries_message_and_interrupt() {
    let options = QueryOptions::new().can_use_tool(|tool_name, _input, _ctx| async move {
        Ok(PermissionResult::Deny {
            message: format!("{tool_name} is not allowed here"),
            interrupt: true,
        })
    });
    let (session, mut agent, _) = connected_session(options).await;

    agent.request(
        "inbound-1",
        json!({"subtype": "can_use_tool", "tool_name": "Write", "input": {"path": "/etc/passwd"}}),
    );
    let response = agent.next_frame().await;
    assert_eq!(response["type"], "control_response");
    assert_eq!(response["response"]["subtype"], "success");
    assert_eq!(response["response"]["request_id"], "inbound-1");
    assert_eq!(
        response["response"]["response"],
        json!({"behavior": "deny", "message": "Write is not allowed here", "interrupt": true})
    );
    session.close().await.expect("close");
}

/// A plain deny omits `interrupt`.
#[tokio::test]
async fn permission_deny_without_interrupt_omits_flag() {
    let options = QueryOptions::new()
        .can_use_tool(|_tool, _input, _ctx| async { Ok(PermissionResult::deny("no")) });
    let (session, mut agent, _) = connected_session(options).await;

    agent.request("inbound-2", json!({"subtype": "can_use_tool", "tool_name": "Bash", "input": {}}));
    let response = agent.next_frame().await;
    assert_eq!(
        response["response"]["response"],
        json!({"behavior": "deny", "message": "no"})
    );
    session.close().await.expect("close");
}

/// Allow with an updated input and permission updates sends both, and the
/// suggestions reach the callback.
#[tokio::test]
async fn permission_allow_with_updates() {
    let options = QueryOptions::new().can_use_tool(|_tool, input, ctx| async move {
        assert_eq!(ctx.suggestions.len(), 1);
        assert_eq!(ctx.suggestions[0].kind, PermissionUpdateKind::SetMode);
        let mut updated = input;
        updated["command"] = json!("ls -la");
        Ok(PermissionResult::Allow {
            updated_input: Some(updated),
            updated_permissions: Some(vec![PermissionUpdate {
                kind: PermissionUpdateKind::SetMode,
                rules: None,
                behavior: None,
                mode: Some(PermissionMode::AcceptEdits),
                directories: None,
                destination: Some(PermissionUpdateDestination::Session),
            }]),
        })
    });
    let (session, mut agent, _) = connected_session(options).await;

    agent.request(
        "inbound-3",
        json!({
            "subtype": "can_use_tool",
            "tool_name": "Bash",
            "input": {"command": "ls"},
            "permission_suggestions": [
                {"type": "setMode", "mode": "acceptEdits", "destination": "session"}
            ],
        }),
    );
    let response = agent.next_frame().await;
    assert_eq!(
        response["response"]["response"],
        json!({
            "behavior": "allow",
            "updatedInput": {"command": "ls -la"},
            "updatedPermissions": [
                {"type": "setMode", "mode": "acceptEdits", "destination": "session"}
            ],
        })
    );
    session.close().await.expect("close");
}

/// Without a permission callback the request is answered with an error.
#[tokio::test]
async fn permission_without_callback_is_an_error_response() {
    let (session, mut agent, _) = connected_session(QueryOptions::new()).await;

    agent.request("inbound-4", json!({"subtype": "can_use_tool", "tool_name": "Bash", "input": {}}));
    let response = agent.next_frame().await;
    assert_eq!(response["response"]["subtype"], "error");
    assert_eq!(response["response"]["request_id"], "inbound-4");
    assert_eq!(response["response"]["error"], "canUseTool callback is not provided");
    session.close().await.expect("close");
}

// ── Concurrency and containment ─────────────────────────────────────────────

/// A slow callback does not block a later inbound request or the read loop.
#[tokio::test]
async fn slow_callback_does_not_block_other_requests() {
    let gate = Arc::new(Notify::new());
    let callback_gate = Arc::clone(&gate);
    let options = QueryOptions::new().can_use_tool(move |tool, _input, _ctx| {
        let gate = Arc::clone(&callback_gate);
        async move {
            if tool == "Slow" {
                gate.notified().await;
            }
            Ok(PermissionResult::allow())
        }
    });
    let (session, mut agent, _) = connected_session(options).await;

    agent.request("slow", json!({"subtype": "can_use_tool", "tool_name": "Slow", "input": {}}));
    agent.request("fast", json!({"subtype": "can_use_tool", "tool_name": "Fast", "input": {}}));

    let first = agent.next_frame().await;
    assert_eq!(first["response"]["request_id"], "fast");

    gate.notify_one();
    let second = agent.next_frame().await;
    assert_eq!(second["response"]["request_id"], "slow");
    session.close().await.expect("close");
}

/// A panicking callback yields an error response and the session keeps
/// delivering messages.
#[tokio::test]
async fn panicking_callback_is_contained() {
    let options = QueryOptions::new().can_use_tool(|tool, _input, _ctx| async move {
        if tool == "Bash" {
            panic!("callback exploded");
        }
        Ok(PermissionResult::allow())
    });
    let (session, mut agent, _) = connected_session(options).await;

    agent.request("boom", json!({"subtype": "can_use_tool", "tool_name": "Bash", "input": {}}));
    let response = agent.next_frame().await;
    assert_eq!(response["response"]["subtype"], "error");
    assert_eq!(response["response"]["request_id"], "boom");
    let message = response["response"]["error"].as_str().expect("error text");
    assert!(message.contains("callback exploded"), "got {message}");

    agent.send(assistant_frame("still alive"));
    let mut messages = session.messages().await.expect("messages");
    let next = tokio::time::timeout(STEP, messages.next())
        .await
        .expect("message in time")
        .expect("stream open")
        .expect("decoded");
    assert_eq!(next.kind(), "assistant");
    drop(messages);
    session.close().await.expect("close");
}

/// Unknown subtypes get an error response naming the subtype.
#[tokio::test]
async fn unsupported_subtype_is_an_error_response() {
    let (session, mut agent, _) = connected_session(QueryOptions::new()).await;

    agent.request("odd", json!({"subtype": "teleport"}));
    let response = agent.next_frame().await;
    assert_eq!(
        response["response"]["error"],
        "Unsupported control request subtype: teleport"
    );
    session.close().await.expect("close");
}

/// `control_cancel_request` is ignored: nothing is written and the read
/// loop continues.
#[tokio::test]
async fn cancel_request_is_ignored() {
    let (session, mut agent, _) = connected_session(QueryOptions::new()).await;

    agent.send(json!({"type": "control_cancel_request", "request_id": "inbound-9"}));
    agent.assert_silent(Duration::from_millis(100)).await;

    agent.send(assistant_frame("after cancel"));
    let mut messages = session.messages().await.expect("messages");
    let next = tokio::time::timeout(STEP, messages.next())
        .await
        .expect("message in time")
        .expect("stream open")
        .expect("decoded");
    assert_eq!(next.kind(), "assistant");
    drop(messages);
    session.close().await.expect("close");
}

// ── Hook callbacks ──────────────────────────────────────────────────────────

/// Hook output is serialized verbatim and the callback sees the typed
/// input and tool use id.
#[tokio::test]
async fn hook_output_is_serialized_verbatim() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let hook = hook_fn(move |input, tool_use_id, _ctx| {
        let seen = Arc::clone(&seen);
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
            assert_eq!(tool_use_id.as_deref(), Some("toolu_1"));
            assert_eq!(input.session_id, "sess-1");
            let HookEventInput::PreToolUse { tool_name, .. } = input.event else {
                panic!("expected PreToolUse input");
            };
            Ok(HookOutput {
                decision: Some("block".into()),
                reason: Some(format!("{tool_name} blocked by policy")),
                continue_: Some(false),
                hook_specific_output: Some(json!({"hookEventName": "PreToolUse"})),
                ..HookOutput::default()
            })
        }
    });
    let options = QueryOptions::new().hook(HookEvent::PreToolUse, HookMatcher::new(Some("Bash"), hook));
    let (session, mut agent, _) = connected_session(options).await;

    agent.request(
        "hook-req",
        json!({
            "subtype": "hook_callback",
            "callback_id": "hook_1",
            "tool_use_id": "toolu_1",
            "input": pre_tool_use_input("Bash"),
        }),
    );
    let response = agent.next_frame().await;
    assert_eq!(response["response"]["subtype"], "success");
    assert_eq!(
        response["response"]["response"],
        json!({
            "continue": false,
            "decision": "block",
            "reason": "Bash blocked by policy",
            "hookSpecificOutput": {"hookEventName": "PreToolUse"},
        })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    session.close().await.expect("close");
}

/// An unknown callback id is answered with an error naming it.
#[tokio::test]
async fn unknown_hook_id_is_an_error_response() {
    let (session, mut agent, _) = connected_session(QueryOptions::new()).await;

    agent.request(
        "hook-missing",
        json!({"subtype": "hook_callback", "callback_id": "hook_99", "input": pre_tool_use_input("Bash")}),
    );
    let response = agent.next_frame().await;
    assert_eq!(response["response"]["subtype"], "error");
    assert_eq!(response["response"]["error"], "No hook callback found for ID: hook_99");
    session.close().await.expect("close");
}

/// A hook input missing an event-specific field is rejected before the
/// callback runs.
#[tokio::test]
async fn malformed_hook_input_is_an_error_response() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let hook = hook_fn(move |_input, _id, _ctx| {
        seen.fetch_add(1, Ordering::SeqCst);
        async { Ok(HookOutput::default()) }
    });
    let options = QueryOptions::new().hook(HookEvent::PostToolUse, HookMatcher::new(None, hook));
    let (session, mut agent, _) = connected_session(options).await;

    let mut input = pre_tool_use_input("Bash");
    input["hook_event_name"] = json!("PostToolUse");
    agent.request(
        "hook-bad",
        json!({"subtype": "hook_callback", "callback_id": "hook_1", "input": input}),
    );
    let response = agent.next_frame().await;
    assert_eq!(response["response"]["subtype"], "error");
    let message = response["response"]["error"].as_str().expect("error text");
    assert!(message.contains("tool_response"), "got {message}");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    session.close().await.expect("close");
}
