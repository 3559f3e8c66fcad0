//! Pure transition function: (state, event) -> (next state, ledger rows, replies).
//!
//! No clock, no globals, no I/O. The row timestamp is taken from the event so the same
//! inputs always give the same outputs.

use super::ConversationState;
use crate::message::{InboundEvent, LedgerRow, LedgerTarget, OutboundMessage};
use chrono::SecondsFormat;
use serde_json::Value;
use thiserror::Error;

/// Action column written for every sighting.
pub const ACTION_SAW: &str = "SAW";

const PEOPLE_COMMENT_DELIMITER: char = '/';
const NAME_DELIMITER: char = ',';

/// Output of one transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: ConversationState,
    pub ledger_rows: Vec<LedgerRow>,
    pub replies: Vec<OutboundMessage>,
}

impl Transition {
    /// Stay in `state` with no output.
    pub fn hold(state: ConversationState) -> Self {
        Self {
            next: state,
            ledger_rows: Vec::new(),
            replies: Vec::new(),
        }
    }
}

/// Logic errors. The caller resets to `Clear` and keeps going.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("event has no sender to reply to")]
    MissingSender,
}

/// Advance the conversation by one event.
pub fn transition(
    state: ConversationState,
    event: &InboundEvent,
    target: &LedgerTarget,
) -> Result<Transition, TransitionError> {
    match state {
        ConversationState::Clear => process_clear(event, target),
        ConversationState::AwaitingChoices
        | ConversationState::AwaitingConfirmAdd
        | ConversationState::Error => {
            log::debug!(
                "conversation: no handler for state {}, holding (sender {})",
                state,
                event.sender_id
            );
            Ok(Transition::hold(state))
        }
    }
}

/// `"Alice, Bob / met at the conference"`: one SAW row per name, one reply with the count.
fn process_clear(event: &InboundEvent, target: &LedgerTarget) -> Result<Transition, TransitionError> {
    if event.sender_id.trim().is_empty() {
        return Err(TransitionError::MissingSender);
    }

    let (people, comment) = split_people_and_comment(&event.text);
    let names = split_names(people);
    let seen_at = event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);

    let ledger_rows: Vec<LedgerRow> = names
        .iter()
        .map(|name| {
            LedgerRow::single(
                target,
                vec![
                    Value::String(name.to_string()),
                    Value::String(seen_at.clone()),
                    Value::String(ACTION_SAW.to_string()),
                    Value::String(comment.to_string()),
                ],
            )
        })
        .collect();

    let reply = OutboundMessage::response(
        event.sender_id.clone(),
        format!("You just saw {} people!", ledger_rows.len()),
    );

    Ok(Transition {
        next: ConversationState::Clear,
        ledger_rows,
        replies: vec![reply],
    })
}

/// Split on the first `/`. Without one, the comment is empty. The comment is trimmed.
fn split_people_and_comment(text: &str) -> (&str, &str) {
    match text.split_once(PEOPLE_COMMENT_DELIMITER) {
        Some((people, comment)) => (people, comment.trim()),
        None => (text, ""),
    }
}

/// Comma-separated names, trimmed; empty names are dropped.
fn split_names(people: &str) -> Vec<&str> {
    people
        .split(NAME_DELIMITER)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect()
}
