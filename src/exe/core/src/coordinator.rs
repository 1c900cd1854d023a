//! Merges structured and text-derived tool calls into one ordered list and
//! builds the assistant message that records them.

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::CoordinatorError;
use crate::protocol::{CallOrigin, Message, StructuredToolCall, UnifiedToolCall};
use crate::tool_parser::ParsedToolCall;

/// Key holding structured arguments that were not valid JSON.
pub const RAW_ARGUMENTS_KEY: &str = "raw_arguments";
/// Key holding structured arguments that decoded to a non-object.
pub const VALUE_KEY: &str = "value";

/// Identifier for a call mined from text: `manual_<name>_<8 hex>`.
pub fn text_call_id(name: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("manual_{}_{}", name, &hex[..8])
}

/// Decode the raw argument string of a structured call into an object.
pub fn structured_input(name: &str, raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    let mut map = Map::new();
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(obj)) => return obj,
        Ok(other) => {
            tracing::warn!(tool = name, "structured tool call arguments were not an object; wrapping under {VALUE_KEY}");
            map.insert(VALUE_KEY.to_string(), other);
        }
        Err(err) => {
            tracing::debug!(tool = name, error = %err, "structured tool call arguments are not valid JSON");
            map.insert(RAW_ARGUMENTS_KEY.to_string(), Value::String(raw.to_string()));
        }
    }
    map
}

/// Structured calls first, in transport order and keeping their ids, then
/// text-derived calls with fresh ids. Same-named calls from both sources are
/// all kept.
pub fn unify(structured: Vec<StructuredToolCall>, text: Vec<ParsedToolCall>) -> Vec<UnifiedToolCall> {
    let from_transport = structured.into_iter().map(|call| UnifiedToolCall {
        input: structured_input(&call.name, &call.arguments),
        id: call.id,
        name: call.name,
        origin: CallOrigin::Structured,
    });
    let from_text = text.into_iter().map(|call| UnifiedToolCall {
        id: text_call_id(&call.name),
        input: call.arguments.into_mapping(&call.name),
        name: call.name,
        origin: CallOrigin::Text,
    });
    from_transport.chain(from_text).collect()
}

/// The assistant turn to log. Fails on a turn with neither text nor calls.
pub fn assistant_message(content: &str, calls: &[UnifiedToolCall]) -> Result<Message, CoordinatorError> {
    if content.is_empty() && calls.is_empty() {
        return Err(CoordinatorError::EmptyTurn);
    }
    let content = (!content.is_empty()).then(|| content.to_string());
    Ok(Message::assistant(content, calls.iter().map(UnifiedToolCall::to_record).collect()))
}
