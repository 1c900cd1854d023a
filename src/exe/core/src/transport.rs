use std::ops::ControlFlow;

use crate::error::TransportError;
use crate::openai_tools::OpenAiTool;
use crate::protocol::Message;
use crate::stream::TransportEvent;

pub struct ModelRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [OpenAiTool],
    pub stream: bool,
}

/// Receives events as they arrive. `Break` asks the transport to stop reading.
pub type EventSink<'a> = dyn FnMut(TransportEvent) -> ControlFlow<()> + 'a;

/// Connection to a chat model.
///
/// Implementations feed every event of one response into `sink` and return
/// `Ok(())` once the response ends or the sink breaks. Errors are returned
/// as-is; no retries happen here.
pub trait ModelTransport {
    fn send(&mut self, request: &ModelRequest<'_>, sink: &mut EventSink<'_>) -> Result<(), TransportError>;
}
