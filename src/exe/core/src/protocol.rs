//! Message and tool-call types shared by the agent loop.
//!
//! `Message` serializes to the chat-completions wire shape so a history slice
//! can be posted as-is.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// `None` only for assistant turns that carry nothing but tool calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolInvocationRecord>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// Wire form of a tool call as logged on an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A tool call delivered through the transport's function-calling fields,
/// with arguments still in their raw string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOrigin {
    Structured,
    Text,
}

/// Execution-ready tool call. `input` is always an object.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedToolCall {
    pub id: String,
    pub name: String,
    pub input: Map<String, Value>,
    pub origin: CallOrigin,
}

impl UnifiedToolCall {
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(Value::as_str)
    }

    pub fn to_record(&self) -> ToolInvocationRecord {
        ToolInvocationRecord {
            id: self.id.clone(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: self.name.clone(),
                arguments: Value::Object(self.input.clone()).to_string(),
            },
        }
    }
}

/// Arguments of a tool call found in free text.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArguments {
    Mapping(Map<String, Value>),
    RawScalar(Value),
}

impl ToolArguments {
    /// Sentinel key a non-object payload is wrapped under.
    pub const RAW_VALUE_KEY: &'static str = "raw_value";

    /// Classify an `arguments` value. A string is decoded as JSON once; if
    /// that fails the string itself is the scalar.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Mapping(map),
            Value::String(s) => match serde_json::from_str::<Value>(&s) {
                Ok(Value::Object(map)) => Self::Mapping(map),
                Ok(other) => Self::RawScalar(other),
                Err(_) => Self::RawScalar(Value::String(s)),
            },
            other => Self::RawScalar(other),
        }
    }

    pub fn into_mapping(self, tool: &str) -> Map<String, Value> {
        match self {
            Self::Mapping(map) => map,
            Self::RawScalar(value) => {
                tracing::warn!(tool, "tool call arguments were not an object; wrapping under {}", Self::RAW_VALUE_KEY);
                let mut map = Map::new();
                map.insert(Self::RAW_VALUE_KEY.to_string(), value);
                map
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn assistant_message_serializes_to_wire_shape() {
        let call = UnifiedToolCall {
            id: "call_1".to_string(),
            name: "bash".to_string(),
            input: json!({"command": "ls"}).as_object().cloned().unwrap_or_default(),
            origin: CallOrigin::Structured,
        };
        let msg = Message::assistant(None, vec![call.to_record()]);
        assert_eq!(
            serde_json::to_value(&msg).expect("serialize"),
            json!({
                "role": "assistant",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "bash", "arguments": "{\"command\":\"ls\"}"}
                }]
            })
        );
    }

    #[test]
    fn tool_message_carries_call_id() {
        let value = serde_json::to_value(Message::tool("abc", "ok")).expect("serialize");
        assert_eq!(value, json!({"role": "tool", "content": "ok", "tool_call_id": "abc"}));
    }

    #[test]
    fn argument_classification() {
        assert_eq!(
            ToolArguments::from_value(json!("{\"command\":\"pwd\"}")),
            ToolArguments::Mapping(json!({"command": "pwd"}).as_object().cloned().unwrap_or_default())
        );
        assert_eq!(ToolArguments::from_value(json!("ls -la")), ToolArguments::RawScalar(json!("ls -la")));
        assert_eq!(ToolArguments::from_value(json!("[1,2]")), ToolArguments::RawScalar(json!([1, 2])));

        let wrapped = ToolArguments::from_value(json!(7)).into_mapping("bash");
        assert_eq!(Value::Object(wrapped), json!({"raw_value": 7}));
    }
}
