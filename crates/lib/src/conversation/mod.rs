//! Conversation state machine.
//!
//! One process-wide state, advanced by a pure `transition` per inbound event. The router's
//! inbound worker is the only caller and the only owner of the current state.

mod state;
mod transition;

pub use state::ConversationState;
pub use transition::{transition, Transition, TransitionError, ACTION_SAW};
