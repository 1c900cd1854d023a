//! Conversation log with a pinned system message and a bounded outbound view.

use crate::error::HistoryLimitError;
use crate::protocol::{Message, Role};

pub const MIN_HISTORY_LIMIT: usize = 3;
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Maximum number of messages sent per request, system message included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimit(usize);

impl HistoryLimit {
    pub fn new(limit: usize) -> Result<Self, HistoryLimitError> {
        if limit < MIN_HISTORY_LIMIT {
            return Err(HistoryLimitError::TooSmall {
                got: limit,
                min: MIN_HISTORY_LIMIT,
            });
        }
        Ok(Self(limit))
    }

    /// Raise values below the floor instead of rejecting them.
    pub fn clamped(limit: usize) -> Self {
        Self(limit.max(MIN_HISTORY_LIMIT))
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for HistoryLimit {
    fn default() -> Self {
        Self(DEFAULT_HISTORY_LIMIT)
    }
}

/// Ordered message log. Index 0 always holds the single system message.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    messages: Vec<Message>,
    limit: HistoryLimit,
}

impl MessageHistory {
    pub fn new(system_prompt: impl Into<String>, limit: HistoryLimit) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
            limit,
        }
    }

    pub fn limit(&self) -> HistoryLimit {
        self.limit
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn system_prompt(&self) -> &str {
        self.messages[0].text()
    }

    /// Append a message. A system message takes over the system slot rather
    /// than being appended.
    pub fn add(&mut self, message: Message) {
        if message.role == Role::System {
            self.replace_system_message(message.content.unwrap_or_default());
        } else {
            self.messages.push(message);
        }
    }

    pub fn add_all(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.add(message);
        }
    }

    pub fn replace_system_message(&mut self, content: impl Into<String>) {
        self.messages.retain(|m| m.role != Role::System);
        self.messages.insert(0, Message::system(content));
    }

    pub fn latest_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    pub fn truncated_history(&self) -> Vec<Message> {
        self.truncated_view(self.limit.get())
    }

    /// At most `limit` messages: the system message, the first user message
    /// when one exists, then the most recent others, in log order.
    pub fn truncated_view(&self, limit: usize) -> Vec<Message> {
        let system = &self.messages[0];
        let rest = &self.messages[1..];
        let slots = limit.saturating_sub(1);
        if slots == 0 {
            return vec![system.clone()];
        }

        let keep: Vec<usize> = match rest.iter().position(|m| m.role == Role::User) {
            Some(first_user) => {
                let others: Vec<usize> = (0..rest.len()).filter(|&i| i != first_user).collect();
                let recent = others.len().saturating_sub(slots - 1);
                let mut keep = others[recent..].to_vec();
                keep.push(first_user);
                keep.sort_unstable();
                keep
            }
            None => (rest.len().saturating_sub(slots)..rest.len()).collect(),
        };

        std::iter::once(system.clone())
            .chain(keep.into_iter().map(|i| rest[i].clone()))
            .collect()
    }
}
