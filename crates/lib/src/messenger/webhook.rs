//! Messenger webhook payloads (POST body) and conversion to inbound events.

use crate::message::InboundEvent;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Only page subscriptions carry Messenger events.
pub const PAGE_OBJECT: &str = "page";

/// Top-level webhook body: `{ "object": "page", "entry": [...] }`.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub messaging: Vec<MessagingItem>,
}

/// One messaging event. Receipts and postbacks have no `message`, or a message without text.
#[derive(Debug, Deserialize)]
pub struct MessagingItem {
    #[serde(default)]
    pub sender: Option<Participant>,
    #[serde(default)]
    pub recipient: Option<Participant>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub message: Option<MessagingText>,
}

#[derive(Debug, Deserialize)]
pub struct Participant {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagingText {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("malformed webhook payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported webhook object: {0:?}")]
    UnsupportedObject(String),
}

/// Parse a POST body into inbound events, in payload order. Items without text are skipped.
pub fn parse_webhook(body: &[u8]) -> Result<Vec<InboundEvent>, WebhookError> {
    parse_webhook_at(body, Utc::now())
}

/// Like [`parse_webhook`], stamping items that carry no usable timestamp with `received_at`.
/// Items missing a sender or recipient are skipped without failing their siblings.
pub fn parse_webhook_at(
    body: &[u8],
    received_at: DateTime<Utc>,
) -> Result<Vec<InboundEvent>, WebhookError> {
    let payload: WebhookPayload = serde_json::from_slice(body)?;
    if payload.object != PAGE_OBJECT {
        return Err(WebhookError::UnsupportedObject(payload.object));
    }
    let events = payload
        .entry
        .into_iter()
        .flat_map(|entry| entry.messaging)
        .filter_map(|item| {
            let text = item.message?.text?;
            let (Some(sender), Some(recipient)) = (item.sender, item.recipient) else {
                log::debug!("webhook: skipping message without sender or recipient");
                return None;
            };
            Some(InboundEvent {
                sender_id: sender.id,
                recipient_id: recipient.id,
                timestamp: item
                    .timestamp
                    .and_then(timestamp_from_millis)
                    .unwrap_or(received_at),
                text,
            })
        })
        .collect();
    Ok(events)
}

/// Platform timestamps are epoch milliseconds. Zero, negative and out-of-range values are unusable.
fn timestamp_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    if ms <= 0 {
        return None;
    }
    Utc.timestamp_millis_opt(ms).single()
}
