//! Messenger platform: webhook intake and the Send API delivery client.

mod send;
mod webhook;

pub use send::{DeliveryError, MessageSender, MessengerClient, DEFAULT_GRAPH_API_BASE};
pub use webhook::{parse_webhook, parse_webhook_at, WebhookError, WebhookPayload, PAGE_OBJECT};
