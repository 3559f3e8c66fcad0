//! Shared helpers for integration tests: free ports, a recording upstream stub, polling.

#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

/// One request seen by the stub.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: String,
    pub authorization: Option<String>,
    pub body: String,
}

impl Recorded {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("recorded body is JSON")
    }
}

/// Records every request and answers with a fixed status and JSON body.
#[derive(Clone)]
pub struct Upstream {
    requests: Arc<Mutex<Vec<Recorded>>>,
    status: StatusCode,
    response: serde_json::Value,
}

impl Upstream {
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path_prefix: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.starts_with(path_prefix))
            .collect()
    }
}

async fn record(
    State(upstream): State<Upstream>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    upstream.requests.lock().unwrap().push(Recorded {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        body: String::from_utf8_lossy(&body).into_owned(),
    });
    (upstream.status, Json(upstream.response.clone())).into_response()
}

/// Start a stub on 127.0.0.1; returns its base URL ("http://127.0.0.1:PORT").
pub async fn start_upstream(status: u16, response: serde_json::Value) -> (String, Upstream) {
    let upstream = Upstream {
        requests: Arc::new(Mutex::new(Vec::new())),
        status: StatusCode::from_u16(status).expect("valid status"),
        response,
    };
    let app = Router::new().fallback(record).with_state(upstream.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{}", addr), upstream)
}

/// Poll `cond` every 20ms for up to 5s.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
