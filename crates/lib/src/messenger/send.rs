//! Delivery client: Messenger Send API (`POST /me/messages`).

use crate::message::{OutboundMessage, ReplyKind};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com/v5.0";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("send request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("send api returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl DeliveryError {
    /// Transport errors, 429 and 5xx are worth another attempt; other statuses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Transport(_) => true,
            DeliveryError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Sends one reply to the platform. Shared read-only by every delivery worker.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError>;
}

#[derive(Serialize)]
struct SendRequest<'a> {
    recipient: SendRecipient<'a>,
    messaging_type: ReplyKind,
    message: SendText<'a>,
}

#[derive(Serialize)]
struct SendRecipient<'a> {
    id: &'a str,
}

#[derive(Serialize)]
struct SendText<'a> {
    text: &'a str,
}

/// Messenger Send API client authenticated with the page access token.
#[derive(Clone)]
pub struct MessengerClient {
    api_base: String,
    access_token: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl MessengerClient {
    pub fn new(api_base: Option<String>, access_token: impl Into<String>, timeout: Duration) -> Self {
        let api_base = api_base
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_GRAPH_API_BASE.to_string());
        Self {
            api_base,
            access_token: access_token.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    /// POST {api_base}/me/messages?access_token=... with the reply as JSON.
    pub async fn send_message(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let url = format!("{}/me/messages", self.api_base);
        let body = SendRequest {
            recipient: SendRecipient {
                id: &message.recipient_id,
            },
            messaging_type: message.kind,
            message: SendText {
                text: &message.text,
            },
        };
        // The token rides in the query string, so strip URLs from transport errors before they reach a log.
        let res = self
            .client
            .post(&url)
            .query(&[("access_token", self.access_token.as_str())])
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.without_url()))?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(DeliveryError::Status { status, body });
        }
        log::debug!("messenger: delivered reply to {}", message.recipient_id);
        Ok(())
    }
}

#[async_trait]
impl MessageSender for MessengerClient {
    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        self.send_message(message).await
    }
}
