//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.metlog/config.json`), then environment variables
//! for secrets and deployment settings (`PORT`, `VERIFY_TOKEN`, ...) are laid over it once, in
//! `load_config`. Everything downstream reads only the resulting `Config`.

use crate::ledger::ServiceAccountKey;
use crate::message::LedgerTarget;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Webhook server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Messenger page settings (verify token, page access token).
    #[serde(default)]
    pub messenger: MessengerConfig,

    /// Spreadsheet the sightings are appended to.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Worker pool sizes, retries, and timeouts.
    #[serde(default)]
    pub workers: WorkersConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 8080). PORT env overrides it at load time.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0"; the platform has to reach the webhook).
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Messenger page config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessengerConfig {
    /// Token the platform echoes in the subscription handshake. Overridden by VERIFY_TOKEN env.
    pub verify_token: Option<String>,
    /// Page access token for the Send API. Overridden by PAGE_ACCESS_TOKEN env.
    pub page_access_token: Option<String>,
    /// Graph API base including version (default https://graph.facebook.com/v5.0).
    pub api_base: Option<String>,
}

/// Ledger spreadsheet config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerConfig {
    /// Spreadsheet id. Overridden by SHEETS_ID env.
    pub spreadsheet_id: Option<String>,
    /// A1 range rows are appended to (default "Database!A:D").
    #[serde(default = "default_ledger_range")]
    pub range: String,
    /// Sheets API base (default https://sheets.googleapis.com).
    pub api_base: Option<String>,
    /// Service account key JSON. Relative paths are resolved against the config file's parent.
    /// When unset, the key is assembled from GCREDS_* env variables.
    pub credentials_path: Option<PathBuf>,
    /// Fixed bearer token instead of a service account. Overridden by LEDGER_ACCESS_TOKEN env.
    pub access_token: Option<String>,
}

fn default_ledger_range() -> String {
    "Database!A:D".to_string()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            range: default_ledger_range(),
            api_base: None,
            credentials_path: None,
            access_token: None,
        }
    }
}

/// Worker pools and per-item delivery policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkersConfig {
    /// Concurrent reply delivery workers (min 1).
    #[serde(default = "default_pool_size")]
    pub outbound: usize,
    /// Concurrent ledger append workers (min 1).
    #[serde(default = "default_pool_size")]
    pub ledger: usize,
    /// Attempts per reply or row, including the first (min 1). Only retryable failures are retried.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles after each retry.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Timeout for each outbound HTTP call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How long shutdown waits for queued work to finish.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_pool_size() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_drain_timeout_secs() -> u64 {
    10
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            outbound: default_pool_size(),
            ledger: default_pool_size(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl WorkersConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Non-empty, trimmed env var.
fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn config_non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Config {
    /// Lay environment overrides over the file values. `lookup` returns trimmed, non-empty values.
    /// An unparsable PORT is ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("VERIFY_TOKEN") {
            self.messenger.verify_token = Some(v);
        }
        if let Some(v) = lookup("PAGE_ACCESS_TOKEN") {
            self.messenger.page_access_token = Some(v);
        }
        if let Some(v) = lookup("SHEETS_ID") {
            self.ledger.spreadsheet_id = Some(v);
        }
        if let Some(v) = lookup("LEDGER_ACCESS_TOKEN") {
            self.ledger.access_token = Some(v);
        }
        if let Some(p) = lookup("PORT") {
            match p.parse() {
                Ok(port) => self.gateway.port = port,
                Err(_) => log::warn!("ignoring invalid PORT value {:?}", p),
            }
        }
    }
}

/// Webhook verify token, if configured.
pub fn resolve_verify_token(config: &Config) -> Option<String> {
    config_non_empty(&config.messenger.verify_token)
}

/// Page access token for the Send API, if configured.
pub fn resolve_page_access_token(config: &Config) -> Option<String> {
    config_non_empty(&config.messenger.page_access_token)
}

pub fn resolve_spreadsheet_id(config: &Config) -> Option<String> {
    config_non_empty(&config.ledger.spreadsheet_id)
}

/// Fixed ledger bearer token; takes precedence over the service account.
pub fn resolve_ledger_access_token(config: &Config) -> Option<String> {
    config_non_empty(&config.ledger.access_token)
}

/// Ledger target from config; fails when no spreadsheet id is set.
pub fn resolve_ledger_target(config: &Config) -> Result<LedgerTarget> {
    let spreadsheet_id = resolve_spreadsheet_id(config).context(
        "ledger spreadsheet not configured (set ledger.spreadsheetId or SHEETS_ID)",
    )?;
    let range = config.ledger.range.trim();
    let range = if range.is_empty() {
        default_ledger_range()
    } else {
        range.to_string()
    };
    Ok(LedgerTarget {
        spreadsheet_id,
        range,
    })
}

/// Resolve the service account key: `ledger.credentialsPath` if set, otherwise GCREDS_* env.
/// Ok(None) when neither is available.
pub fn resolve_service_account_key(config: &Config, config_path: &Path) -> Result<Option<ServiceAccountKey>> {
    if let Some(path) = config.ledger.credentials_path.as_ref().filter(|p| !p.as_os_str().is_empty()) {
        let path = resolve_relative(path, config_path);
        let key = ServiceAccountKey::from_file(&path)
            .with_context(|| format!("loading service account key from {}", path.display()))?;
        return Ok(Some(key));
    }
    Ok(ServiceAccountKey::from_vars(|name| std::env::var(name).ok()))
}

/// Relative paths are taken from the config file's directory.
fn resolve_relative(path: &Path, config_path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(path)
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("METLOG_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".metlog").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (or METLOG_CONFIG_PATH), then apply env overrides.
/// Missing file => default config. Returns the config and the path that was used (for resolving relative
/// credential paths).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config: Config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    config.apply_env(env_non_empty);
    Ok((config, path))
}
