//! Sheets API credentials: service-account JWT grant or a fixed bearer token.
//!
//! The service-account flow signs an RS256 assertion with the account's private key and
//! exchanges it at the token endpoint for a one-hour access token, cached until shortly before expiry.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("reading service account key {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing service account key: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("service account key is missing {0}")]
    MissingField(&'static str),
    #[error("invalid service account private key: {0}")]
    InvalidKey(#[source] jsonwebtoken::errors::Error),
    #[error("signing token assertion: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
    #[error("token request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("token endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl AuthError {
    /// Network trouble or a 429/5xx from the token endpoint; everything else needs operator action.
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::Transport(_) => true,
            AuthError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Supplies bearer tokens for Sheets API calls.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, AuthError>;
}

/// Google service-account key file (the JSON downloaded from the cloud console).
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(default, rename = "type")]
    pub key_type: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub private_key_id: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub client_email: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub auth_uri: String,
    #[serde(default)]
    pub token_uri: String,
    #[serde(default)]
    pub auth_provider_x509_cert_url: String,
    #[serde(default)]
    pub client_x509_cert_url: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("private_key_id", &self.private_key_id)
            .field("private_key", &"[REDACTED]")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ServiceAccountKey {
    pub fn from_json(s: &str) -> Result<Self, AuthError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let s = std::fs::read_to_string(path).map_err(|source| AuthError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&s)
    }

    /// Build a key from `GCREDS_*` variables via `lookup`. None when the private key or client email is absent.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).unwrap_or_default();
        let key = Self {
            key_type: get("GCREDS_TYPE"),
            project_id: get("GCREDS_PROJECT_ID"),
            private_key_id: get("GCREDS_PRIVATE_KEY_ID"),
            private_key: get("GCREDS_PRIVATE_KEY"),
            client_email: get("GCREDS_CLIENT_EMAIL"),
            client_id: get("GCREDS_CLIENT_ID"),
            auth_uri: get("GCREDS_AUTH_URI"),
            token_uri: get("GCREDS_TOKEN_URI"),
            auth_provider_x509_cert_url: get("GCREDS_AUTH_PROVIDER_CERT_URL"),
            client_x509_cert_url: get("GCREDS_CLIENT_CERT_URL"),
        };
        if key.private_key.is_empty() || key.client_email.is_empty() {
            return None;
        }
        Some(key)
    }

    /// PEM with real newlines; env vars usually carry them escaped as `\n`.
    fn private_key_pem(&self) -> String {
        self.private_key.replace("\\n", "\n")
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

/// When a token issued at `now` should be replaced. The margin never eats more than half of
/// a short lifetime; huge or negative lifetimes saturate instead of overflowing.
fn refresh_deadline(now: i64, expires_in: i64) -> i64 {
    let lifetime = expires_in.max(0);
    let margin = EXPIRY_MARGIN_SECS.min(lifetime / 2);
    now.saturating_add(lifetime).saturating_sub(margin)
}

struct CachedToken {
    token: String,
    refresh_at: i64,
}

/// Service-account token source. Construction validates the key once; tokens are fetched lazily.
pub struct ServiceAccountAuth {
    client_email: String,
    key_id: Option<String>,
    token_uri: String,
    encoding_key: EncodingKey,
    timeout: Duration,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub fn new(key: &ServiceAccountKey, timeout: Duration) -> Result<Self, AuthError> {
        if key.client_email.trim().is_empty() {
            return Err(AuthError::MissingField("client_email"));
        }
        if key.private_key.trim().is_empty() {
            return Err(AuthError::MissingField("private_key"));
        }
        let encoding_key =
            EncodingKey::from_rsa_pem(key.private_key_pem().as_bytes()).map_err(AuthError::InvalidKey)?;
        let token_uri = if key.token_uri.trim().is_empty() {
            DEFAULT_TOKEN_URI.to_string()
        } else {
            key.token_uri.trim().to_string()
        };
        Ok(Self {
            client_email: key.client_email.trim().to_string(),
            key_id: Some(key.private_key_id.trim().to_string()).filter(|s| !s.is_empty()),
            token_uri,
            encoding_key,
            timeout,
            client: reqwest::Client::new(),
            cached: Mutex::new(None),
        })
    }

    fn signed_assertion(&self, now: i64) -> Result<String, AuthError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key_id.clone();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&header, &claims, &self.encoding_key).map_err(AuthError::Sign)
    }

    async fn fetch_token(&self, now: i64) -> Result<CachedToken, AuthError> {
        let assertion = self.signed_assertion(now)?;
        let res = self
            .client
            .post(&self.token_uri)
            .timeout(self.timeout)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(AuthError::Transport)?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(AuthError::Status { status, body });
        }
        let data: TokenResponse = res.json().await.map_err(AuthError::Transport)?;
        log::debug!("sheets auth: obtained access token valid for {}s", data.expires_in);
        Ok(CachedToken {
            token: data.access_token,
            refresh_at: refresh_deadline(now, data.expires_in),
        })
    }
}

#[async_trait]
impl AccessTokenProvider for ServiceAccountAuth {
    async fn access_token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        let now = chrono::Utc::now().timestamp();
        if let Some(ref c) = *cached {
            if now < c.refresh_at {
                return Ok(c.token.clone());
            }
        }
        let fresh = self.fetch_token(now).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

/// Fixed bearer token (e.g. from `gcloud auth print-access-token`).
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}
