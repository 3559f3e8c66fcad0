//! Values passed between the webhook boundary, the state machine, and the two outbound queues.
//!
//! Each value is owned outright by whichever queue it sits in; nothing here is shared or mutated after enqueue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One text message received from the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Page-scoped id of the person who wrote the message.
    pub sender_id: String,
    /// Id of the page that received it.
    pub recipient_id: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// Messenger `messaging_type` for a send call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyKind {
    /// Reply to a message the user just sent.
    Response,
    /// Proactive update inside the standard messaging window.
    Update,
    /// Tagged message outside the messaging window.
    MessageTag,
}

/// A reply destined for one conversation participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub recipient_id: String,
    pub kind: ReplyKind,
    pub text: String,
}

impl OutboundMessage {
    pub fn response(recipient_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            kind: ReplyKind::Response,
            text: text.into(),
        }
    }
}

/// Where ledger rows are appended: spreadsheet id and A1 range (e.g. `Database!A:D`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTarget {
    pub spreadsheet_id: String,
    pub range: String,
}

/// Cells to append to the ledger. `values` is rows × columns of scalars.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRow {
    #[serde(skip)]
    pub spreadsheet_id: String,
    #[serde(skip)]
    pub range: String,
    pub values: Vec<Vec<serde_json::Value>>,
}

impl LedgerRow {
    /// Single-row record against `target`.
    pub fn single(target: &LedgerTarget, cells: Vec<serde_json::Value>) -> Self {
        Self {
            spreadsheet_id: target.spreadsheet_id.clone(),
            range: target.range.clone(),
            values: vec![cells],
        }
    }
}
