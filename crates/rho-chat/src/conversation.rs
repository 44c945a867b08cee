//! Append-only dialogue history

use rho_ai::Message;

/// Ordered history of one run; entries are never reordered or edited
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message. Messages with no content are dropped, so stored
    /// history never holds an empty entry; returns whether it was kept.
    pub fn append(&mut self, message: Message) -> bool {
        if message.is_empty() {
            tracing::debug!(role = %message.role(), "dropping empty message");
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Current history, oldest first
    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
