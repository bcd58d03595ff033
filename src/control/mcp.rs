//! JSON-RPC routing for in-process tool servers.
//!
//! | Method                      | Result                                        |
//! |-----------------------------|-----------------------------------------------|
//! | `initialize`                | static protocol version, capabilities, info  |
//! | `tools/list`                | delegated to [`ToolServer::list_tools`]       |
//! | `tools/call`                | delegated to [`ToolServer::call_tool`]        |
//! | `notifications/initialized` | empty acknowledgement                         |
//! | *(any other)*               | error `-32601`                                |
//!
//! Handler failures (including panics) become error `-32603`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::models::tool_server::ToolServer;

/// JSON-RPC protocol version reported by `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
/// Method or server not found.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Tool handler failure.
pub const INTERNAL_ERROR: i64 = -32603;

/// Registry of in-process tool servers keyed by server name.
pub type ToolServers = HashMap<String, Arc<dyn ToolServer>>;

/// Route one JSON-RPC `message` to `server_name` and return the JSON-RPC
/// response object.
pub async fn route_message(servers: &ToolServers, server_name: &str, message: &Value) -> Value {
    let id = message.get("id").cloned().unwrap_or(Value::Null);

    let Some(server) = servers.get(server_name) else {
        warn!(server_name, "mcp message for unregistered server");
        return rpc_error(&id, METHOD_NOT_FOUND, &format!("Server '{server_name}' not found"));
    };

    let method = message.get("method").and_then(Value::as_str).unwrap_or("");
    debug!(server_name, method, "routing mcp message");

    match method {
        "initialize" => rpc_result(
            &id,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": server.name(),
                    "version": server.version(),
                },
            }),
        ),
        "tools/list" => match AssertUnwindSafe(server.list_tools()).catch_unwind().await {
            Ok(Ok(tools)) => rpc_result(&id, json!({ "tools": tools })),
            Ok(Err(e)) => rpc_error(&id, INTERNAL_ERROR, &e.to_string()),
            Err(_panic) => rpc_error(&id, INTERNAL_ERROR, "tools/list handler panicked"),
        },
        "tools/call" => {
            let params = message.get("params").unwrap_or(&Value::Null);
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return rpc_error(&id, INTERNAL_ERROR, "tools/call is missing 'params.name'");
            };
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            match AssertUnwindSafe(server.call_tool(name, arguments))
                .catch_unwind()
                .await
            {
                Ok(Ok(output)) => rpc_result(&id, output.to_json()),
                Ok(Err(e)) => {
                    warn!(server_name, tool = name, error = %e, "tool handler failed");
                    rpc_error(&id, INTERNAL_ERROR, &e.to_string())
                }
                Err(_panic) => {
                    warn!(server_name, tool = name, "tool handler panicked");
                    rpc_error(&id, INTERNAL_ERROR, &format!("tool '{name}' panicked"))
                }
            }
        }
        "notifications/initialized" => rpc_result(&id, json!({})),
        other => rpc_error(&id, METHOD_NOT_FOUND, &format!("Method '{other}' not found")),
    }
}

fn rpc_result(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}
