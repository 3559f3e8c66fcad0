//! Fixed state vocabulary.

use std::fmt;

/// Current phase of the dialogue. Only `Clear` has a real handler; the rest are reserved for multi-turn flows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConversationState {
    #[default]
    Clear,
    AwaitingChoices,
    AwaitingConfirmAdd,
    Error,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Clear => "CLEAR",
            ConversationState::AwaitingChoices => "AWAITING_CHOICES",
            ConversationState::AwaitingConfirmAdd => "AWAITING_CONFIRM_ADD",
            ConversationState::Error => "ERROR",
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
