//! Contract tests for JSON-RPC tool-server messages and hook output.

use std::sync::Arc;

use agent_conduit::control::mcp::{route_message, ToolServers, INTERNAL_ERROR, METHOD_NOT_FOUND};
use agent_conduit::models::hook::HookOutput;
use agent_conduit::models::tool_server::{
    SdkTool, SdkToolServer, ToolContent, ToolOutput, ToolServer,
};
use serde_json::json;

fn servers() -> ToolServers {
    let echo = SdkToolServer::new("echo", "0.3.1").tool(SdkTool::new(
        "say",
        "Repeat the input",
        json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]}),
        |args| async move { Ok(ToolOutput::text(args["text"].as_str().unwrap_or_default())) },
    ));
    let mut servers = ToolServers::new();
    servers.insert("echo".to_owned(), Arc::new(echo) as Arc<dyn ToolServer>);
    servers
}

#[test]
fn error_codes_are_json_rpc_standard() {
    assert_eq!(METHOD_NOT_FOUND, -32601);
    assert_eq!(INTERNAL_ERROR, -32603);
}

#[tokio::test]
async fn tools_list_shape() {
    let response = route_message(
        &servers(),
        "echo",
        &json!({"jsonrpc": "2.0", "id": "a", "method": "tools/list"}),
    )
    .await;
    assert_eq!(
        response,
        json!({
            "jsonrpc": "2.0",
            "id": "a",
            "result": {"tools": [{
                "name": "say",
                "description": "Repeat the input",
                "inputSchema": {
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"],
                },
            }]},
        })
    );
}

#[tokio::test]
async fn unknown_tool_is_internal_error() {
    let response = route_message(
        &servers(),
        "echo",
        &json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call", "params": {"name": "shout"}}),
    )
    .await;
    assert_eq!(response["id"], 4);
    assert_eq!(response["error"]["code"], INTERNAL_ERROR);
    let message = response["error"]["message"].as_str().expect("message");
    assert!(message.contains("Tool 'shout' not found"), "got {message}");
}

#[tokio::test]
async fn unknown_method_names_the_method() {
    let response = route_message(
        &servers(),
        "echo",
        &json!({"jsonrpc": "2.0", "id": 5, "method": "prompts/get"}),
    )
    .await;
    assert_eq!(
        response,
        json!({
            "jsonrpc": "2.0",
            "id": 5,
            "error": {"code": METHOD_NOT_FOUND, "message": "Method 'prompts/get' not found"},
        })
    );
}

#[test]
fn tool_output_json_marks_errors_only_when_set() {
    assert_eq!(
        ToolOutput::text("fine").to_json(),
        json!({"content": [{"type": "text", "text": "fine"}]})
    );
    assert_eq!(
        ToolOutput::error("bad path").to_json(),
        json!({"content": [{"type": "text", "text": "bad path"}], "isError": true})
    );
    let image = ToolOutput {
        content: vec![ToolContent::Image {
            data: "aGVsbG8=".into(),
            mime_type: "image/png".into(),
        }],
        is_error: false,
    };
    assert_eq!(
        image.to_json(),
        json!({"content": [{"type": "image", "data": "aGVsbG8=", "mimeType": "image/png"}]})
    );
}

#[test]
fn hook_output_uses_wire_field_names() {
    let output = HookOutput {
        continue_: Some(true),
        suppress_output: Some(true),
        stop_reason: Some("done".into()),
        system_message: Some("heads up".into()),
        async_: Some(true),
        async_timeout: Some(1500),
        ..HookOutput::default()
    };
    assert_eq!(
        serde_json::to_value(&output).expect("serialize"),
        json!({
            "continue": true,
            "suppressOutput": true,
            "stopReason": "done",
            "systemMessage": "heads up",
            "async": true,
            "asyncTimeout": 1500,
        })
    );
    assert_eq!(
        serde_json::to_value(HookOutput::default()).expect("serialize"),
        json!({})
    );
}
