//! Agent loop core: message history, tool-call extraction and unification,
//! the turn driver, and tool execution.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod bash;
pub mod conversation;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod history;
pub mod openai_tools;
pub mod protocol;
pub mod stream;
pub mod tool_parser;
pub mod transport;

pub use conversation::{CancelFlag, Conversation, StaticPrompt, SystemPromptSource, TurnOptions, TurnOutcome};
pub use error::{CoordinatorError, HistoryLimitError, TransportError};
pub use history::{HistoryLimit, MessageHistory};
pub use protocol::{CallOrigin, Message, Role, StructuredToolCall, ToolArguments, UnifiedToolCall};
pub use stream::{TransportEvent, TurnAssembler};
pub use transport::{EventSink, ModelRequest, ModelTransport};
