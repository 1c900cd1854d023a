use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pretty_assertions::assert_eq;
use serde_json::json;
use terminaut_core::openai_tools::default_tools;
use terminaut_core::{
    CallOrigin, CancelFlag, Conversation, EventSink, HistoryLimit, Message, ModelRequest, ModelTransport, Role,
    StaticPrompt, SystemPromptSource, TransportError, TransportEvent, TurnOptions,
};

/// Replays canned responses and records what it was sent.
#[derive(Default)]
struct ScriptedTransport {
    responses: VecDeque<Result<Vec<TransportEvent>, TransportError>>,
    requests: Vec<(Vec<Message>, bool)>,
    /// Raise this flag after emitting the given number of events.
    cancel_after: Option<(usize, CancelFlag)>,
}

impl ScriptedTransport {
    fn reply(mut self, events: Vec<TransportEvent>) -> Self {
        self.responses.push_back(Ok(events));
        self
    }

    fn fail(mut self, err: TransportError) -> Self {
        self.responses.push_back(Err(err));
        self
    }
}

impl ModelTransport for &mut ScriptedTransport {
    fn send(&mut self, request: &ModelRequest<'_>, sink: &mut EventSink<'_>) -> Result<(), TransportError> {
        self.requests.push((request.messages.to_vec(), request.stream));
        let events = self.responses.pop_front().unwrap_or_else(|| Ok(Vec::new()))?;
        for (n, event) in events.into_iter().enumerate() {
            if let Some((after, flag)) = &self.cancel_after {
                if n == *after {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            if sink(event).is_break() {
                break;
            }
        }
        Ok(())
    }
}

/// Echoes the number of inbound messages so each turn's prompt is distinct.
struct CountingPrompt(usize);

impl SystemPromptSource for CountingPrompt {
    fn system_prompt(&mut self, inbound: &[Message]) -> String {
        self.0 += 1;
        format!("prompt #{} ({} inbound)", self.0, inbound.len())
    }
}

fn no_cancel() -> CancelFlag {
    Arc::new(AtomicBool::new(false))
}

fn finished() -> TransportEvent {
    TransportEvent::Finished { reason: Some("stop".to_string()) }
}

#[test]
fn text_and_structured_calls_are_unified_and_logged() {
    let mut transport = ScriptedTransport::default().reply(vec![
        TransportEvent::content("Listing.\n```json\n{\"name\":\"bash\",\"arguments\":{\"command\":\"ls\"}}\n```"),
        TransportEvent::tool_call(0, "call_1", "bash", "{\"command\":\"pwd\"}"),
        finished(),
    ]);
    let mut convo = Conversation::new(&mut transport, StaticPrompt("sys".into()), HistoryLimit::default(), default_tools());

    let mut streamed = String::new();
    let outcome = convo.turn(vec![Message::user("where am I?")], TurnOptions::default(), &no_cancel(), &mut |d: &str| {
        streamed.push_str(d)
    });

    assert_eq!(outcome.error, None);
    assert_eq!(streamed, outcome.content);
    assert_eq!(outcome.tool_calls.len(), 2);
    assert_eq!(outcome.tool_calls[0].id, "call_1");
    assert_eq!(outcome.tool_calls[0].origin, CallOrigin::Structured);
    assert_eq!(outcome.tool_calls[1].origin, CallOrigin::Text);
    assert_eq!(outcome.tool_calls[1].str_arg("command"), Some("ls"));

    let logged = convo.history().messages();
    assert_eq!(logged.len(), 3);
    let assistant = &logged[2];
    assert_eq!(assistant.role, Role::Assistant);
    let ids: Vec<&str> = assistant.tool_calls.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, [outcome.tool_calls[0].id.as_str(), outcome.tool_calls[1].id.as_str()]);
}

#[test]
fn system_prompt_is_recomputed_every_turn() {
    let mut transport = ScriptedTransport::default()
        .reply(vec![TransportEvent::content("one"), finished()])
        .reply(vec![TransportEvent::content("two"), finished()]);
    {
        let mut convo = Conversation::new(&mut transport, CountingPrompt(0), HistoryLimit::default(), Vec::new());
        convo.turn(vec![Message::user("a")], TurnOptions { stream: false }, &no_cancel(), &mut |_: &str| {});
        convo.turn(
            vec![Message::tool("t", "result"), Message::user("b")],
            TurnOptions::default(),
            &no_cancel(),
            &mut |_: &str| {},
        );
        let systems: Vec<&Message> = convo.history().messages().iter().filter(|m| m.role == Role::System).collect();
        assert_eq!(systems.len(), 1);
        assert_eq!(systems[0].text(), "prompt #3 (2 inbound)");
    }

    assert_eq!(transport.requests.len(), 2);
    let (first, first_stream) = &transport.requests[0];
    assert!(!first_stream);
    assert_eq!(first[0].text(), "prompt #2 (1 inbound)");
    let (second, second_stream) = &transport.requests[1];
    assert!(second_stream);
    assert_eq!(second[0].role, Role::System);
    assert_eq!(second.len(), 5);
}

#[test]
fn outbound_view_is_truncated() {
    let mut transport = ScriptedTransport::default();
    for _ in 0..3 {
        transport = transport.reply(vec![TransportEvent::content("ok"), finished()]);
    }
    let limit = HistoryLimit::new(3).expect("valid limit");
    {
        let mut convo = Conversation::new(&mut transport, StaticPrompt("sys".into()), limit, Vec::new());
        for text in ["A", "B", "C"] {
            convo.turn(vec![Message::user(text)], TurnOptions::default(), &no_cancel(), &mut |_: &str| {});
        }
    }
    let (last, _) = transport.requests.last().expect("request");
    let texts: Vec<&str> = last.iter().map(Message::text).collect();
    assert_eq!(texts, ["sys", "A", "C"]);
}

#[test]
fn transport_error_keeps_inbound_and_logs_no_reply() {
    let mut transport = ScriptedTransport::default().fail(TransportError::Api {
        status: 500,
        body: "boom".to_string(),
    });
    let mut convo = Conversation::new(&mut transport, StaticPrompt("sys".into()), HistoryLimit::default(), Vec::new());
    let outcome = convo.turn(vec![Message::user("hi")], TurnOptions::default(), &no_cancel(), &mut |_: &str| {});

    assert_eq!(outcome.error.as_deref(), Some("API error (500): boom"));
    assert!(outcome.tool_calls.is_empty());
    let roles: Vec<Role> = convo.history().messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::System, Role::User]);
}

#[test]
fn cancelled_stream_logs_partial_turn() {
    let cancel = no_cancel();
    let mut transport = ScriptedTransport {
        cancel_after: Some((2, Arc::clone(&cancel))),
        ..ScriptedTransport::default()
    }
    .reply(vec![
        TransportEvent::content("Working"),
        TransportEvent::content(" on it"),
        TransportEvent::content(" and more"),
        finished(),
    ]);
    let mut convo = Conversation::new(&mut transport, StaticPrompt("sys".into()), HistoryLimit::default(), Vec::new());
    let outcome = convo.turn(vec![Message::user("go")], TurnOptions::default(), &cancel, &mut |_: &str| {});

    assert!(outcome.interrupted);
    assert_eq!(outcome.content, "Working on it");
    let last = convo.history().messages().last().expect("assistant turn");
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.text(), "Working on it");
}

#[test]
fn empty_reply_is_not_logged() {
    let mut transport = ScriptedTransport::default().reply(vec![finished()]);
    let mut convo = Conversation::new(&mut transport, StaticPrompt("sys".into()), HistoryLimit::default(), Vec::new());
    let outcome = convo.turn(vec![Message::user("hi")], TurnOptions::default(), &no_cancel(), &mut |_: &str| {});
    assert_eq!(outcome.error, None);
    assert!(outcome.content.is_empty());
    assert_eq!(convo.history().len(), 2);
}

#[test]
fn interrupted_tool_arguments_fall_back_to_raw() {
    let cancel = no_cancel();
    let mut transport = ScriptedTransport {
        cancel_after: Some((2, Arc::clone(&cancel))),
        ..ScriptedTransport::default()
    }
    .reply(vec![
        TransportEvent::ToolCallDelta {
            index: 0,
            id: Some("call_x".into()),
            name: Some("bash".into()),
            arguments: None,
        },
        TransportEvent::ToolCallDelta {
            index: 0,
            id: None,
            name: None,
            arguments: Some("{\"command\": \"ec".into()),
        },
        TransportEvent::ToolCallDelta {
            index: 0,
            id: None,
            name: None,
            arguments: Some("ho\"}".into()),
        },
    ]);
    let mut convo = Conversation::new(&mut transport, StaticPrompt("sys".into()), HistoryLimit::default(), Vec::new());
    let outcome = convo.turn(vec![Message::user("go")], TurnOptions::default(), &cancel, &mut |_: &str| {});

    assert!(outcome.interrupted);
    assert_eq!(outcome.tool_calls.len(), 1);
    assert_eq!(
        serde_json::Value::Object(outcome.tool_calls[0].input.clone()),
        json!({"raw_arguments": "{\"command\": \"ec"})
    );
}

#[test]
fn cancel_before_first_event_stops_immediately() {
    let cancel = no_cancel();
    cancel.store(true, Ordering::SeqCst);
    let mut transport = ScriptedTransport::default().reply(vec![TransportEvent::content("never"), finished()]);
    let mut convo = Conversation::new(&mut transport, StaticPrompt("sys".into()), HistoryLimit::default(), Vec::new());
    let mut seen = String::new();
    let outcome = convo.turn(vec![Message::user("go")], TurnOptions::default(), &cancel, &mut |d: &str| seen.push_str(d));
    assert!(outcome.interrupted);
    assert!(seen.is_empty());
    assert!(outcome.content.is_empty());
    assert_eq!(convo.history().len(), 2);
}
