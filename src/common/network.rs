use std::collections::HashSet;
use std::io::{BufRead, BufReader};

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde_json::{Value, json};
use terminaut_core::{EventSink, Message, ModelRequest, ModelTransport, Role, TransportError, TransportEvent};

use crate::config::Settings;

pub fn default_client(timeout_secs: Option<u64>) -> Result<Client> {
    Client::builder()
        .timeout(timeout_secs.map(std::time::Duration::from_secs))
        .build()
        .context("create http client")
}

/// Chat Completions transport for OpenAI and compatible servers.
pub struct OpenAiTransport {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
}

impl OpenAiTransport {
    pub fn new(settings: &Settings) -> Result<Self> {
        // Streams can stay open for a long time.
        let client = default_client(None)?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        })
    }

    pub fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, request: &ModelRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": answered_messages(request.messages),
            "max_tokens": self.max_tokens,
            "stream": request.stream,
        });
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

impl ModelTransport for OpenAiTransport {
    fn send(&mut self, request: &ModelRequest<'_>, sink: &mut EventSink<'_>) -> Result<(), TransportError> {
        let url = self.chat_url();
        tracing::debug!(%url, model = %self.model, messages = request.messages.len(), "chat completion request");

        let mut req = self.client.post(&url).json(&self.request_body(request));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        if request.stream {
            req = req.header("Accept", "text/event-stream");
        }
        let resp = req.send().map_err(TransportError::request)?;

        let status = resp.status();
        tracing::debug!(%status, "chat completion status");
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(TransportError::Api {
                status: status.as_u16(),
                body,
            });
        }

        if request.stream {
            read_sse(BufReader::new(resp), sink)
        } else {
            let body: Value = resp.json().map_err(TransportError::decode)?;
            for event in events_from_completion(&body)? {
                if sink(event).is_break() {
                    break;
                }
            }
            Ok(())
        }
    }
}

/// Drop tool results whose assistant call fell out of the truncated window;
/// the API rejects a tool message without a preceding call.
pub fn answered_messages(messages: &[Message]) -> Vec<&Message> {
    let mut open_calls: HashSet<&str> = HashSet::new();
    messages
        .iter()
        .filter(|m| {
            if m.role != Role::Tool {
                open_calls.extend(m.tool_calls.iter().map(|c| c.id.as_str()));
                return true;
            }
            let answered = m.tool_call_id.as_deref().is_some_and(|id| open_calls.contains(id));
            if !answered {
                tracing::debug!(id = ?m.tool_call_id, "dropping orphaned tool result from request");
            }
            answered
        })
        .collect()
}

fn api_error(body: &Value) -> Option<TransportError> {
    let error = body.get("error")?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    Some(TransportError::Api { status: 200, body: message })
}

fn tool_call_delta(call: &Value, fallback_index: usize) -> TransportEvent {
    let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);
    let function = call.get("function");
    TransportEvent::ToolCallDelta {
        index: call
            .get("index")
            .and_then(Value::as_u64)
            .map_or(fallback_index, |i| i as usize),
        id: text(call.get("id")),
        name: text(function.and_then(|f| f.get("name"))),
        arguments: text(function.and_then(|f| f.get("arguments"))),
    }
}

/// Events for a whole non-streamed response.
pub fn events_from_completion(body: &Value) -> Result<Vec<TransportEvent>, TransportError> {
    if let Some(err) = api_error(body) {
        return Err(err);
    }
    let choice = body
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| TransportError::decode("response has no choices"))?;
    let message = choice.get("message").unwrap_or(&Value::Null);

    let mut events = Vec::new();
    if let Some(content) = message.get("content").and_then(Value::as_str) {
        if !content.is_empty() {
            events.push(TransportEvent::content(content));
        }
    }
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for (i, call) in calls.iter().enumerate() {
            if call.get("type").and_then(Value::as_str).unwrap_or("function") != "function" {
                continue;
            }
            events.push(tool_call_delta(call, i));
        }
    }
    events.push(TransportEvent::Finished {
        reason: choice.get("finish_reason").and_then(Value::as_str).map(str::to_string),
    });
    Ok(events)
}

/// Events carried by one streamed chunk.
pub fn events_from_chunk(chunk: &Value) -> Vec<TransportEvent> {
    let Some(choice) = chunk.get("choices").and_then(|c| c.get(0)) else {
        return Vec::new();
    };
    let mut events = Vec::new();
    if let Some(delta) = choice.get("delta") {
        if let Some(content) = delta.get("content").and_then(Value::as_str) {
            if !content.is_empty() {
                events.push(TransportEvent::content(content));
            }
        }
        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            events.extend(calls.iter().enumerate().map(|(i, call)| tool_call_delta(call, i)));
        }
    }
    if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
        events.push(TransportEvent::Finished {
            reason: Some(reason.to_string()),
        });
    }
    events
}

/// Read `data:` lines until `[DONE]`, end of input, or the sink breaks.
pub fn read_sse<R: BufRead>(mut reader: R, sink: &mut EventSink<'_>) -> Result<(), TransportError> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| TransportError::request(format!("read SSE line: {e}")))?;
        if n == 0 {
            return Ok(());
        }
        let Some(data) = line.trim_end_matches(['\r', '\n']).strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            return Ok(());
        }
        let chunk: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed stream chunk");
                continue;
            }
        };
        if let Some(err) = api_error(&chunk) {
            return Err(err);
        }
        for event in events_from_chunk(&chunk) {
            if sink(event).is_break() {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::ops::ControlFlow;

    fn collect_sse(input: &str) -> (Result<(), TransportError>, Vec<TransportEvent>) {
        let mut events = Vec::new();
        let result = read_sse(Cursor::new(input.to_string()), &mut |e| {
            events.push(e);
            ControlFlow::Continue(())
        });
        (result, events)
    }

    #[test]
    fn orphaned_tool_results_are_not_sent() {
        let call = terminaut_core::UnifiedToolCall {
            id: "kept".into(),
            name: "bash".into(),
            input: serde_json::Map::new(),
            origin: terminaut_core::CallOrigin::Structured,
        };
        let messages = vec![
            Message::system("sys"),
            Message::user("A"),
            Message::tool("lost", "old output"),
            Message::assistant(None, vec![call.to_record()]),
            Message::tool("kept", "new output"),
        ];
        let kept = answered_messages(&messages);
        let sent: Vec<&str> = kept.iter().map(|m| m.text()).collect();
        assert_eq!(sent, ["sys", "A", "", "new output"]);
    }

    #[test]
    fn completion_to_events() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Checking.",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "bash", "arguments": "{\"command\":\"ls\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        assert_eq!(
            events_from_completion(&body).expect("events"),
            vec![
                TransportEvent::content("Checking."),
                TransportEvent::tool_call(0, "call_1", "bash", "{\"command\":\"ls\"}"),
                TransportEvent::Finished { reason: Some("tool_calls".into()) },
            ]
        );
    }

    #[test]
    fn completion_error_body() {
        let err = events_from_completion(&json!({"error": {"message": "bad key"}})).expect_err("error");
        assert_eq!(err.to_string(), "API error (200): bad key");
        assert!(events_from_completion(&json!({"choices": []})).is_err());
    }

    #[test]
    fn stream_chunks_to_events() {
        let input = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
            ": keep-alive\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\"function\":{\"name\":\"bash\",\"arguments\":\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        );
        let (result, events) = collect_sse(input);
        assert!(result.is_ok());
        assert_eq!(
            events,
            vec![
                TransportEvent::content("Hel"),
                TransportEvent::content("lo"),
                TransportEvent::ToolCallDelta {
                    index: 0,
                    id: Some("c1".into()),
                    name: Some("bash".into()),
                    arguments: Some(String::new()),
                },
                TransportEvent::ToolCallDelta {
                    index: 0,
                    id: None,
                    name: None,
                    arguments: Some("{}".into()),
                },
                TransportEvent::Finished { reason: Some("tool_calls".into()) },
            ]
        );
    }

    #[test]
    fn stream_error_chunk() {
        let (result, events) = collect_sse("data: {\"error\":{\"message\":\"overloaded\"}}\n\n");
        assert!(events.is_empty());
        assert_eq!(result.expect_err("error").to_string(), "API error (200): overloaded");
    }

    #[test]
    fn sink_break_stops_reading() {
        let input = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n";
        let mut seen = Vec::new();
        let result = read_sse(Cursor::new(input), &mut |e| {
            seen.push(e);
            ControlFlow::Break(())
        });
        assert!(result.is_ok());
        assert_eq!(seen, vec![TransportEvent::content("a")]);
    }
}
