use crate::models::Message;

/// Prefix stored in front of remembered user input so the model can tell
/// earlier turns apart from the current one.
pub const PREVIOUS_INPUT_PREFIX: &str = "Previous User Input: ";

/// Append-only log of completed exchanges used to seed prompts.
///
/// Storage is unbounded; callers read a bounded trailing window through
/// [`ConversationMemory::window`].
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    entries: Vec<Message>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished exchange: the user turn first, then the assistant turn.
    pub fn append(&mut self, user_text: &str, response_text: &str) {
        self.entries
            .push(Message::user(format!("{PREVIOUS_INPUT_PREFIX}{user_text}")));
        self.entries.push(Message::assistant(response_text));
    }

    /// The last `n` entries in their original order.
    pub fn window(&self, n: usize) -> &[Message] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Message] {
        &self.entries
    }
}
