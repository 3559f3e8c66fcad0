//! Webhook HTTP server: subscription handshake, event intake, health.

use crate::config::{self, Config};
use crate::ledger::{AccessTokenProvider, ServiceAccountAuth, SheetsClient, StaticToken};
use crate::messenger::{parse_webhook, MessengerClient, WebhookError};
use crate::router::{EventRouter, RouterSettings};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SUBSCRIBE_MODE: &str = "subscribe";
const RECEIVED_OK: &str = "Received okay.";

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct GatewayState {
    /// Port reported by the health probe.
    pub port: u16,
    /// Expected `hub.verify_token`. When None every handshake is refused.
    pub verify_token: Option<String>,
    /// Intake for parsed webhook events.
    pub router: EventRouter,
}

/// Query of `GET /webhook`: `hub.mode`, `hub.verify_token`, `hub.challenge`.
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// HTTP routes over the given state. Exposed so the boundary can be served with any router.
pub fn app(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .with_state(state)
}

/// Ledger credentials: a fixed token if one is configured, otherwise the service account.
fn build_ledger_auth(config: &Config, config_path: &Path) -> Result<Arc<dyn AccessTokenProvider>> {
    if let Some(token) = config::resolve_ledger_access_token(config) {
        log::info!("ledger: using configured access token");
        return Ok(Arc::new(StaticToken::new(token)));
    }
    let key = config::resolve_service_account_key(config, config_path)?.context(
        "ledger credentials not configured (set ledger.credentialsPath, GCREDS_* env, or ledger.accessToken)",
    )?;
    let auth = ServiceAccountAuth::new(&key, config.workers.request_timeout())
        .context("building service account auth")?;
    log::info!("ledger: using service account {}", key.client_email);
    Ok(Arc::new(auth))
}

/// Run the relay: build clients, start the event router, serve HTTP until SIGINT/SIGTERM,
/// then drain queued replies and rows.
/// `config_path` is the path to the config file (used to resolve a relative credentials path).
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let port = config.gateway.port;
    let bind = config.gateway.bind.trim().to_string();

    let verify_token = config::resolve_verify_token(&config);
    if verify_token.is_none() {
        log::warn!("no verify token configured (messenger.verifyToken or VERIFY_TOKEN); webhook handshakes will be refused");
    }
    let page_token = config::resolve_page_access_token(&config).context(
        "messenger page access token not configured (set messenger.pageAccessToken or PAGE_ACCESS_TOKEN)",
    )?;
    let target = config::resolve_ledger_target(&config)?;
    let timeout = config.workers.request_timeout();

    let sender = Arc::new(MessengerClient::new(
        config.messenger.api_base.clone(),
        page_token,
        timeout,
    ));
    let auth = build_ledger_auth(&config, &config_path)?;
    let sink = Arc::new(SheetsClient::new(config.ledger.api_base.clone(), auth, timeout));

    log::info!(
        "ledger target: spreadsheet {} range {}",
        target.spreadsheet_id,
        target.range
    );
    let (router, workers) =
        EventRouter::spawn(RouterSettings::from(&config.workers), target, sender, sink);

    let state = GatewayState {
        port,
        verify_token,
        router,
    };

    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("webhook listening on {}", bind_addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("http server stopped, draining queues");

    // The server owned the last router handles; with them gone the workers run down their queues.
    if !workers.drain(config.workers.drain_timeout()).await {
        log::warn!("shutting down with undelivered replies or rows");
    }
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, no longer accepting webhooks");
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.port,
    }))
}

/// GET /webhook: subscription handshake. Echo the challenge when mode and token match.
async fn verify_webhook(
    State(state): State<GatewayState>,
    Query(params): Query<VerifyParams>,
) -> (StatusCode, String) {
    let mode_ok = params.mode.as_deref() == Some(SUBSCRIBE_MODE);
    let token_ok = match (&state.verify_token, &params.verify_token) {
        (Some(expected), Some(provided)) => expected == provided,
        _ => false,
    };
    if mode_ok && token_ok {
        log::info!("webhook subscription verified, returning challenge");
        (StatusCode::OK, params.challenge.unwrap_or_default())
    } else {
        log::warn!("webhook verification refused (mode {:?})", params.mode);
        (StatusCode::FORBIDDEN, "Wrong mode or token".to_string())
    }
}

/// POST /webhook: parse events and queue them; acknowledge before any processing happens.
async fn receive_webhook(State(state): State<GatewayState>, body: Bytes) -> (StatusCode, &'static str) {
    let events = match parse_webhook(&body) {
        Ok(events) => events,
        Err(e @ WebhookError::Malformed(_)) => {
            log::warn!("webhook: rejecting payload: {}", e);
            return (StatusCode::BAD_REQUEST, "Malformed payload");
        }
        Err(e @ WebhookError::UnsupportedObject(_)) => {
            log::debug!("webhook: {}", e);
            return (StatusCode::NOT_FOUND, "Unsupported object");
        }
    };
    let count = events.len();
    for event in events {
        if state.router.submit(event).is_err() {
            log::warn!("webhook: router closed, refusing payload");
            return (StatusCode::SERVICE_UNAVAILABLE, "Shutting down");
        }
    }
    log::debug!("webhook: queued {} event(s)", count);
    (StatusCode::OK, RECEIVED_OK)
}
