//! Ledger writer: Sheets API `values:append`.

use crate::ledger::auth::{AccessTokenProvider, AuthError};
use crate::message::LedgerRow;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("sheets auth: {0}")]
    Auth(#[from] AuthError),
    #[error("invalid sheets url: {0}")]
    Url(String),
    #[error("append request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("sheets api returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Auth(e) => e.is_retryable(),
            LedgerError::Url(_) => false,
            LedgerError::Transport(_) => true,
            LedgerError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Appends rows to the external tabular store. Shared read-only by every ledger worker.
#[async_trait]
pub trait LedgerSink: Send + Sync {
    async fn append(&self, row: &LedgerRow) -> Result<(), LedgerError>;
}

/// Sheets API client. New rows always go after existing content (`INSERT_ROWS`).
#[derive(Clone)]
pub struct SheetsClient {
    api_base: String,
    auth: Arc<dyn AccessTokenProvider>,
    timeout: Duration,
    client: reqwest::Client,
}

impl SheetsClient {
    pub fn new(api_base: Option<String>, auth: Arc<dyn AccessTokenProvider>, timeout: Duration) -> Self {
        let api_base = api_base
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_SHEETS_API_BASE.to_string());
        Self {
            api_base,
            auth,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    /// `{api_base}/v4/spreadsheets/{id}/values/{range}:append`, with each segment percent-encoded.
    fn append_url(&self, row: &LedgerRow) -> Result<reqwest::Url, LedgerError> {
        let mut url = reqwest::Url::parse(&self.api_base).map_err(|e| LedgerError::Url(e.to_string()))?;
        let range = format!("{}:append", row.range);
        url.path_segments_mut()
            .map_err(|_| LedgerError::Url(format!("{} cannot be a base", self.api_base)))?
            .pop_if_empty()
            .extend([
                "v4",
                "spreadsheets",
                row.spreadsheet_id.as_str(),
                "values",
                range.as_str(),
            ]);
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        Ok(url)
    }

    pub async fn append_row(&self, row: &LedgerRow) -> Result<(), LedgerError> {
        let url = self.append_url(row)?;
        let token = self.auth.access_token().await?;
        let res = self
            .client
            .post(url)
            .bearer_auth(token)
            .timeout(self.timeout)
            .json(row)
            .send()
            .await
            .map_err(LedgerError::Transport)?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(LedgerError::Status { status, body });
        }
        log::debug!(
            "sheets: appended {} row(s) to {} {}",
            row.values.len(),
            row.spreadsheet_id,
            row.range
        );
        Ok(())
    }
}

#[async_trait]
impl LedgerSink for SheetsClient {
    async fn append(&self, row: &LedgerRow) -> Result<(), LedgerError> {
        self.append_row(row).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::StaticToken;

    fn row(range: &str) -> LedgerRow {
        LedgerRow {
            spreadsheet_id: "abc123".to_string(),
            range: range.to_string(),
            values: vec![vec![serde_json::json!("Alice")]],
        }
    }

    fn client(base: Option<&str>) -> SheetsClient {
        SheetsClient::new(
            base.map(String::from),
            Arc::new(StaticToken::new("t")),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn append_url_default_base() {
        let url = client(None).append_url(&row("Database!A:D")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc123/values/Database!A:D:append?valueInputOption=USER_ENTERED&insertDataOption=INSERT_ROWS"
        );
    }

    #[test]
    fn append_url_encodes_sheet_names() {
        let url = client(Some("http://127.0.0.1:9/")).append_url(&row("My Sheet!A:D")).unwrap();
        assert_eq!(url.path(), "/v4/spreadsheets/abc123/values/My%20Sheet!A:D:append");
    }

    #[test]
    fn retryable_classification() {
        assert!(LedgerError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(!LedgerError::Status { status: 404, body: String::new() }.is_retryable());
        assert!(!LedgerError::Url("x".into()).is_retryable());
        assert!(!LedgerError::Auth(AuthError::MissingField("client_email")).is_retryable());
    }
}
