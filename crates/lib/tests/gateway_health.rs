//! Integration test: start the relay on a free port, GET /, assert health JSON.
//! Upstream APIs point at a port nothing listens on; the health probe never touches them.
//! The server task is left running when the test ends.

mod support;

use metlog::config::Config;
use metlog::gateway;
use std::path::PathBuf;
use std::time::Duration;

#[tokio::test]
async fn gateway_health_http_responds_with_running() {
    let port = support::free_port();
    let unused = support::free_port();

    let mut config = Config::default();
    config.gateway.port = port;
    config.gateway.bind = "127.0.0.1".to_string();
    config.messenger.page_access_token = Some("page-token".to_string());
    config.messenger.api_base = Some(format!("http://127.0.0.1:{}/v5.0", unused));
    config.ledger.spreadsheet_id = Some("sheet-1".to_string());
    config.ledger.api_base = Some(format!("http://127.0.0.1:{}", unused));
    config.ledger.access_token = Some("sheets-token".to_string());

    let config_path = std::env::temp_dir()
        .join(format!("metlog-health-{}", uuid::Uuid::new_v4()))
        .join("config.json");
    let gateway_handle = tokio::spawn(async move {
        let _ = gateway::run_gateway(config, config_path).await;
    });

    let url = format!("http://127.0.0.1:{}/", port);
    let client = reqwest::Client::new();
    let mut last_err = None;
    for _ in 0..100 {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let json: serde_json::Value = resp.json().await.expect("parse JSON");
                assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
                assert_eq!(json.get("port").and_then(|v| v.as_u64()), Some(port as u64));
                return;
            }
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    gateway_handle.abort();
    panic!(
        "GET {} did not return 200 with health JSON within 5s; last error: {:?}",
        url, last_err
    );
}

#[tokio::test]
async fn gateway_refuses_to_start_without_page_token() {
    let mut config = Config::default();
    config.gateway.bind = "127.0.0.1".to_string();
    config.gateway.port = support::free_port();
    config.ledger.spreadsheet_id = Some("sheet-1".to_string());
    config.ledger.access_token = Some("sheets-token".to_string());

    let err = gateway::run_gateway(config, PathBuf::from("config.json"))
        .await
        .expect_err("startup should fail");
    assert!(err.to_string().contains("page access token"), "{}", err);
}
