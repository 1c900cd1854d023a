//! Single assembler for model output.
//!
//! A streaming transport emits one batch of events per network chunk; a
//! non-streaming transport emits the same events once for the whole
//! response. Either way `TurnAssembler` builds the turn.

use std::collections::BTreeMap;

use crate::protocol::StructuredToolCall;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ContentDelta(String),
    /// Fragment of the structured tool call at `index`. Present fields are
    /// appended to what was received before.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    Finished { reason: Option<String> },
}

impl TransportEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self::ContentDelta(text.into())
    }

    /// A complete tool call in one event.
    pub fn tool_call(index: usize, id: &str, name: &str, arguments: &str) -> Self {
        Self::ToolCallDelta {
            index,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            arguments: Some(arguments.to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
pub struct TurnAssembler {
    content: String,
    calls: BTreeMap<usize, PartialCall>,
    finish_reason: Option<String>,
    finished: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledTurn {
    pub content: String,
    pub tool_calls: Vec<StructuredToolCall>,
    pub finish_reason: Option<String>,
    /// False when the stream stopped before a finish event.
    pub complete: bool,
}

impl TurnAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ContentDelta(text) => self.content.push_str(&text),
            TransportEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                let call = self.calls.entry(index).or_default();
                // Some servers repeat the id on every fragment.
                if let Some(id) = id.filter(|id| !id.is_empty()) {
                    call.id = id;
                }
                if let Some(name) = name {
                    call.name.push_str(&name);
                }
                if let Some(arguments) = arguments {
                    call.arguments.push_str(&arguments);
                }
            }
            TransportEvent::Finished { reason } => {
                self.finish_reason = reason;
                self.finished = true;
            }
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Calls lacking an id or a name are dropped.
    pub fn finish(self) -> AssembledTurn {
        let tool_calls = self
            .calls
            .into_iter()
            .filter_map(|(index, call)| {
                if call.id.is_empty() || call.name.is_empty() {
                    tracing::debug!(index, "dropping incomplete structured tool call");
                    return None;
                }
                Some(StructuredToolCall {
                    id: call.id,
                    name: call.name,
                    arguments: call.arguments,
                })
            })
            .collect();
        AssembledTurn {
            content: self.content,
            tool_calls,
            finish_reason: self.finish_reason,
            complete: self.finished,
        }
    }
}
