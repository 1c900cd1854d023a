//! One model turn, start to finish.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::coordinator;
use crate::history::{HistoryLimit, MessageHistory};
use crate::openai_tools::OpenAiTool;
use crate::protocol::{Message, Role, UnifiedToolCall};
use crate::stream::{TransportEvent, TurnAssembler};
use crate::tool_parser::extract_tool_calls;
use crate::transport::{ModelRequest, ModelTransport};

/// Set from another thread (e.g. a Ctrl-C handler) to stop the current turn.
pub type CancelFlag = Arc<AtomicBool>;

/// Supplies the system prompt for each turn, given that turn's inbound
/// messages.
pub trait SystemPromptSource {
    fn system_prompt(&mut self, inbound: &[Message]) -> String;
}

/// A fixed system prompt.
#[derive(Debug, Clone)]
pub struct StaticPrompt(pub String);

impl SystemPromptSource for StaticPrompt {
    fn system_prompt(&mut self, _inbound: &[Message]) -> String {
        self.0.clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TurnOptions {
    pub stream: bool,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self { stream: true }
    }
}

#[derive(Debug, Default)]
pub struct TurnOutcome {
    /// Text the model produced, including any tool-call syntax it contained.
    pub content: String,
    /// Calls awaiting execution, structured ones first.
    pub tool_calls: Vec<UnifiedToolCall>,
    /// The cancel flag stopped the stream early.
    pub interrupted: bool,
    /// Transport or protocol failure. Nothing was logged for the assistant.
    pub error: Option<String>,
}

impl TurnOutcome {
    fn failed(content: String, error: impl Into<String>) -> Self {
        Self {
            content,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

pub struct Conversation<T, P> {
    history: MessageHistory,
    transport: T,
    prompts: P,
    tools: Vec<OpenAiTool>,
}

impl<T: ModelTransport, P: SystemPromptSource> Conversation<T, P> {
    pub fn new(transport: T, mut prompts: P, limit: HistoryLimit, tools: Vec<OpenAiTool>) -> Self {
        let system = prompts.system_prompt(&[]);
        Self {
            history: MessageHistory::new(system, limit),
            transport,
            prompts,
            tools,
        }
    }

    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    pub fn prompts_mut(&mut self) -> &mut P {
        &mut self.prompts
    }

    pub fn tools(&self) -> &[OpenAiTool] {
        &self.tools
    }

    /// Run one turn: log `inbound`, refresh the system prompt, call the
    /// model, then log the assistant reply with every tool call found.
    ///
    /// Content deltas are handed to `on_delta` as they arrive. When `cancel`
    /// is set mid-stream, whatever arrived so far is still logged and
    /// returned.
    pub fn turn(
        &mut self,
        inbound: Vec<Message>,
        options: TurnOptions,
        cancel: &CancelFlag,
        on_delta: &mut dyn FnMut(&str),
    ) -> TurnOutcome {
        let system_prompt = self.prompts.system_prompt(&inbound);
        self.history.add_all(inbound);
        self.history.replace_system_message(system_prompt);

        let view = self.history.truncated_history();
        if view.first().map(|m| m.role) != Some(Role::System) {
            debug_assert!(false, "outbound history must start with the system message");
            return TurnOutcome::failed(String::new(), "protocol violation: outbound history does not start with a system message");
        }
        tracing::debug!(messages = view.len(), logged = self.history.len(), stream = options.stream, "sending turn");

        let mut assembler = TurnAssembler::new();
        let mut interrupted = false;
        let request = ModelRequest {
            messages: &view,
            tools: &self.tools,
            stream: options.stream,
        };
        let sent = self.transport.send(&request, &mut |event| {
            if cancel.load(Ordering::SeqCst) {
                interrupted = true;
                return ControlFlow::Break(());
            }
            if let TransportEvent::ContentDelta(text) = &event {
                on_delta(text);
            }
            assembler.push(event);
            ControlFlow::Continue(())
        });

        if let Err(err) = sent {
            tracing::error!(error = %err, "model request failed");
            return TurnOutcome::failed(assembler.content().to_string(), err.to_string());
        }

        let turn = assembler.finish();
        if interrupted {
            tracing::info!(chars = turn.content.len(), calls = turn.tool_calls.len(), "turn interrupted; keeping partial response");
        } else if !turn.complete {
            tracing::debug!("stream ended without a finish event");
        }

        let text_calls = extract_tool_calls(&turn.content);
        let calls = coordinator::unify(turn.tool_calls, text_calls);
        match coordinator::assistant_message(&turn.content, &calls) {
            Ok(message) => self.history.add(message),
            Err(err) => tracing::warn!("{err}"),
        }

        TurnOutcome {
            content: turn.content,
            tool_calls: calls,
            interrupted,
            error: None,
        }
    }
}
