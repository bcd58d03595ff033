//! Message decoder: maps one generic JSON frame to a typed [`Message`].
//!
//! Pure functions with no I/O. Dispatch is on the required `type` field;
//! every variant checks its required fields before construction. All
//! failures are [`SdkError::Decode`] carrying the raw frame.
//!
//! | `type`         | Required fields                                              |
//! |----------------|--------------------------------------------------------------|
//! | `user`         | `message.content`                                            |
//! | `assistant`    | `message.content`, `message.model`                           |
//! | `system`       | `subtype`                                                    |
//! | `result`       | `subtype`, `duration_ms`, `duration_api_ms`, `is_error`, `num_turns`, `session_id` |
//! | `stream_event` | `uuid`, `session_id`, `event`                                |

use serde_json::{Map, Value};

use crate::models::message::{
    AssistantMessage, ContentBlock, Message, ResultMessage, StreamEvent, SystemMessage,
    UserContent, UserMessage,
};
use crate::{Result, SdkError};

/// Decode one application-level frame.
///
/// # Errors
///
/// Returns [`SdkError::Decode`] when the frame is not an object, the `type`
/// discriminator is missing or unknown, a required field is absent or of
/// the wrong kind, or a nested content block is invalid.
pub fn parse_message(value: &Value) -> Result<Message> {
    let Some(obj) = value.as_object() else {
        return Err(SdkError::decode(
            format!("message must be a JSON object, got {}", json_kind(value)),
            value.to_string(),
        ));
    };

    let kind = match obj.get("type") {
        Some(Value::String(kind)) => kind.as_str(),
        Some(other) => {
            return Err(SdkError::decode(
                format!("unknown message type: {other}"),
                value.to_string(),
            ))
        }
        None => {
            return Err(SdkError::decode(
                "message is missing required field 'type'",
                value.to_string(),
            ))
        }
    };

    match kind {
        "user" => parse_user(&Fields::new(obj, "user", value)),
        "assistant" => parse_assistant(&Fields::new(obj, "assistant", value)),
        "system" => parse_system(&Fields::new(obj, "system", value)),
        "result" => parse_result(&Fields::new(obj, "result", value)),
        "stream_event" => parse_stream_event(&Fields::new(obj, "stream_event", value)),
        other => Err(SdkError::decode(
            format!("unknown message type: '{other}'"),
            value.to_string(),
        )),
    }
}

/// Decode one content block of a `user` or `assistant` message.
///
/// # Errors
///
/// Returns [`SdkError::Decode`] for a missing or unknown block `type` or a
/// missing required block field.
pub fn parse_content_block(value: &Value) -> Result<ContentBlock> {
    parse_block(value, value)
}

// ── Variant parsers ───────────────────────────────────────────────────────────

fn parse_user(f: &Fields<'_>) -> Result<Message> {
    let message = f.object("message")?;
    let content = match message.value("content")? {
        Value::String(text) => UserContent::Text(text.clone()),
        Value::Array(items) => UserContent::Blocks(parse_blocks(items, f.raw)?),
        _ => return Err(message.wrong_kind("content", "a string or an array")),
    };

    Ok(Message::User(UserMessage {
        content,
        uuid: f.opt_str("uuid"),
        parent_tool_use_id: f.opt_str("parent_tool_use_id"),
    }))
}

fn parse_assistant(f: &Fields<'_>) -> Result<Message> {
    let message = f.object("message")?;
    let content = message.array("content")?;
    let model = message.str("model")?;

    let error = f.opt_str("error").or_else(|| message.opt_str("error"));

    Ok(Message::Assistant(AssistantMessage {
        content: parse_blocks(content, f.raw)?,
        model,
        parent_tool_use_id: f.opt_str("parent_tool_use_id"),
        error,
    }))
}

fn parse_system(f: &Fields<'_>) -> Result<Message> {
    Ok(Message::System(SystemMessage {
        subtype: f.str("subtype")?,
        data: f.raw.clone(),
    }))
}

fn parse_result(f: &Fields<'_>) -> Result<Message> {
    Ok(Message::Result(ResultMessage {
        subtype: f.str("subtype")?,
        duration_ms: f.u64("duration_ms")?,
        duration_api_ms: f.u64("duration_api_ms")?,
        is_error: f.bool("is_error")?,
        num_turns: f.u64("num_turns")?,
        session_id: f.str("session_id")?,
        total_cost_usd: f.get("total_cost_usd").and_then(Value::as_f64),
        usage: f.opt_value("usage"),
        result: f.opt_str("result"),
        structured_output: f.opt_value("structured_output"),
    }))
}

fn parse_stream_event(f: &Fields<'_>) -> Result<Message> {
    Ok(Message::StreamEvent(StreamEvent {
        uuid: f.str("uuid")?,
        session_id: f.str("session_id")?,
        event: f.value("event")?.clone(),
        parent_tool_use_id: f.opt_str("parent_tool_use_id"),
    }))
}

fn parse_blocks(items: &[Value], raw: &Value) -> Result<Vec<ContentBlock>> {
    items.iter().map(|item| parse_block(item, raw)).collect()
}

fn parse_block(value: &Value, raw: &Value) -> Result<ContentBlock> {
    let Some(obj) = value.as_object() else {
        return Err(SdkError::decode(
            format!("content block must be a JSON object, got {}", json_kind(value)),
            raw.to_string(),
        ));
    };

    let Some(kind) = obj.get("type").and_then(Value::as_str) else {
        return Err(SdkError::decode(
            "content block is missing required field 'type'",
            raw.to_string(),
        ));
    };

    match kind {
        "text" => {
            let f = Fields::new(obj, "text block", raw);
            Ok(ContentBlock::Text {
                text: f.str("text")?,
            })
        }
        "thinking" => {
            let f = Fields::new(obj, "thinking block", raw);
            Ok(ContentBlock::Thinking {
                thinking: f.str("thinking")?,
                signature: f.str("signature")?,
            })
        }
        "tool_use" => {
            let f = Fields::new(obj, "tool_use block", raw);
            Ok(ContentBlock::ToolUse {
                id: f.str("id")?,
                name: f.str("name")?,
                input: f.value("input")?.clone(),
            })
        }
        "tool_result" => {
            let f = Fields::new(obj, "tool_result block", raw);
            Ok(ContentBlock::ToolResult {
                tool_use_id: f.str("tool_use_id")?,
                content: f.opt_value("content"),
                is_error: f.get("is_error").and_then(Value::as_bool),
            })
        }
        other => Err(SdkError::decode(
            format!("unknown content block type: '{other}'"),
            raw.to_string(),
        )),
    }
}

// ── Field access ──────────────────────────────────────────────────────────────

/// Required/optional field lookups that produce uniform decode errors.
struct Fields<'a> {
    obj: &'a Map<String, Value>,
    kind: &'static str,
    prefix: &'static str,
    raw: &'a Value,
}

impl<'a> Fields<'a> {
    fn new(obj: &'a Map<String, Value>, kind: &'static str, raw: &'a Value) -> Self {
        Self {
            obj,
            kind,
            prefix: "",
            raw,
        }
    }

    fn missing(&self, field: &str) -> SdkError {
        SdkError::decode(
            format!(
                "missing required field '{}{field}' in {} message",
                self.prefix, self.kind
            ),
            self.raw.to_string(),
        )
    }

    fn wrong_kind(&self, field: &str, expected: &str) -> SdkError {
        SdkError::decode(
            format!(
                "field '{}{field}' in {} message must be {expected}",
                self.prefix, self.kind
            ),
            self.raw.to_string(),
        )
    }

    fn get(&self, field: &str) -> Option<&'a Value> {
        self.obj.get(field).filter(|v| !v.is_null())
    }

    fn value(&self, field: &str) -> Result<&'a Value> {
        self.get(field).ok_or_else(|| self.missing(field))
    }

    fn str(&self, field: &str) -> Result<String> {
        self.value(field)?
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| self.wrong_kind(field, "a string"))
    }

    fn u64(&self, field: &str) -> Result<u64> {
        self.value(field)?
            .as_u64()
            .ok_or_else(|| self.wrong_kind(field, "a non-negative integer"))
    }

    fn bool(&self, field: &str) -> Result<bool> {
        self.value(field)?
            .as_bool()
            .ok_or_else(|| self.wrong_kind(field, "a boolean"))
    }

    fn array(&self, field: &str) -> Result<&'a Vec<Value>> {
        self.value(field)?
            .as_array()
            .ok_or_else(|| self.wrong_kind(field, "an array"))
    }

    fn object(&self, field: &'static str) -> Result<Fields<'a>> {
        let obj = self
            .value(field)?
            .as_object()
            .ok_or_else(|| self.wrong_kind(field, "an object"))?;
        Ok(Fields {
            obj,
            kind: self.kind,
            prefix: nested_prefix(field),
            raw: self.raw,
        })
    }

    fn opt_str(&self, field: &str) -> Option<String> {
        self.get(field).and_then(Value::as_str).map(str::to_owned)
    }

    fn opt_value(&self, field: &str) -> Option<Value> {
        self.get(field).cloned()
    }
}

fn nested_prefix(field: &'static str) -> &'static str {
    match field {
        "message" => "message.",
        _ => "",
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
