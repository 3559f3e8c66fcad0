//! End-to-end: run the relay against stub Messenger and Sheets upstreams, drive it over HTTP,
//! and check what reaches the upstreams.

mod support;

use metlog::config::Config;
use metlog::gateway;
use serde_json::json;

const VERIFY_TOKEN: &str = "verify-me";

async fn start_relay(upstream_base: &str) -> (String, tokio::task::JoinHandle<()>) {
    let port = support::free_port();
    let mut config = Config::default();
    config.gateway.port = port;
    config.gateway.bind = "127.0.0.1".to_string();
    config.messenger.verify_token = Some(VERIFY_TOKEN.to_string());
    config.messenger.page_access_token = Some("page-token".to_string());
    config.messenger.api_base = Some(format!("{}/v5.0", upstream_base));
    config.ledger.spreadsheet_id = Some("sheet-1".to_string());
    config.ledger.api_base = Some(upstream_base.to_string());
    config.ledger.access_token = Some("sheets-token".to_string());
    config.workers.retry_base_ms = 1;

    let config_path = std::env::temp_dir()
        .join(format!("metlog-relay-{}", uuid::Uuid::new_v4()))
        .join("config.json");
    let handle = tokio::spawn(async move {
        let _ = gateway::run_gateway(config, config_path).await;
    });

    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if client.get(&base).send().await.is_ok() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    (base, handle)
}

fn payload(sender: &str, text: &str) -> serde_json::Value {
    json!({
        "object": "page",
        "entry": [{
            "id": "page-1",
            "time": 1700000000000i64,
            "messaging": [{
                "sender": { "id": sender },
                "recipient": { "id": "page-1" },
                "timestamp": 1700000000000i64,
                "message": { "mid": "m-1", "text": text }
            }]
        }]
    })
}

#[tokio::test]
async fn webhook_event_is_replied_to_and_logged() {
    let (upstream_base, upstream) = support::start_upstream(200, json!({})).await;
    let (base, relay) = start_relay(&upstream_base).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/webhook", base))
        .json(&payload("user-42", "Alice, Bob / met at the conference"))
        .send()
        .await
        .expect("post webhook");
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(res.text().await.unwrap(), "Received okay.");

    let done = support::wait_until(|| {
        upstream.requests_to("/v5.0/me/messages").len() == 1
            && upstream.requests_to("/v4/spreadsheets/").len() == 2
    })
    .await;
    assert!(done, "upstream saw {:?}", upstream.requests());

    let sends = upstream.requests_to("/v5.0/me/messages");
    assert_eq!(sends[0].method, "POST");
    assert_eq!(sends[0].query, "access_token=page-token");
    assert_eq!(
        sends[0].json(),
        json!({
            "recipient": { "id": "user-42" },
            "messaging_type": "RESPONSE",
            "message": { "text": "You just saw 2 people!" }
        })
    );

    let appends = upstream.requests_to("/v4/spreadsheets/");
    let mut names = Vec::new();
    for append in &appends {
        assert_eq!(append.path, "/v4/spreadsheets/sheet-1/values/Database!A:D:append");
        assert_eq!(
            append.query,
            "valueInputOption=USER_ENTERED&insertDataOption=INSERT_ROWS"
        );
        assert_eq!(append.authorization.as_deref(), Some("Bearer sheets-token"));
        let body = append.json();
        let row = &body["values"][0];
        assert_eq!(row[1], json!("2023-11-14T22:13:20.000Z"));
        assert_eq!(row[2], json!("SAW"));
        assert_eq!(row[3], json!("met at the conference"));
        names.push(row[0].as_str().unwrap().to_string());
    }
    names.sort();
    assert_eq!(names, vec!["Alice", "Bob"]);

    relay.abort();
}

#[tokio::test]
async fn upstream_failures_do_not_affect_acknowledgement() {
    let (upstream_base, upstream) =
        support::start_upstream(500, json!({ "error": "unavailable" })).await;
    let (base, relay) = start_relay(&upstream_base).await;
    let client = reqwest::Client::new();

    for i in 0..3 {
        let res = client
            .post(format!("{}/webhook", base))
            .json(&payload(&format!("user-{}", i), "Carol"))
            .send()
            .await
            .expect("post webhook");
        assert_eq!(res.status().as_u16(), 200);
    }

    // Three replies and three rows, each tried the default three times.
    let done = support::wait_until(|| {
        upstream.requests_to("/v5.0/me/messages").len() == 9
            && upstream.requests_to("/v4/spreadsheets/").len() == 9
    })
    .await;
    assert!(done, "upstream saw {} request(s)", upstream.requests().len());

    relay.abort();
}

#[tokio::test]
async fn verify_handshake_echoes_challenge_only_for_right_token() {
    let (upstream_base, _upstream) = support::start_upstream(200, json!({})).await;
    let (base, relay) = start_relay(&upstream_base).await;
    let client = reqwest::Client::new();

    let ok = client
        .get(format!(
            "{}/webhook?hub.mode=subscribe&hub.verify_token={}&hub.challenge=1158201444",
            base, VERIFY_TOKEN
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status().as_u16(), 200);
    assert_eq!(ok.text().await.unwrap(), "1158201444");

    let wrong = client
        .get(format!(
            "{}/webhook?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=1",
            base
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status().as_u16(), 403);
    assert_eq!(wrong.text().await.unwrap(), "Wrong mode or token");

    let bad_mode = client
        .get(format!(
            "{}/webhook?hub.mode=unsubscribe&hub.verify_token={}&hub.challenge=1",
            base, VERIFY_TOKEN
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_mode.status().as_u16(), 403);

    relay.abort();
}

#[tokio::test]
async fn malformed_and_foreign_payloads_are_rejected_without_side_effects() {
    let (upstream_base, upstream) = support::start_upstream(200, json!({})).await;
    let (base, relay) = start_relay(&upstream_base).await;
    let client = reqwest::Client::new();

    let malformed = client
        .post(format!("{}/webhook", base))
        .header("content-type", "application/json")
        .body("{\"object\": \"page\", \"entry\": [")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status().as_u16(), 400);

    let foreign = client
        .post(format!("{}/webhook", base))
        .json(&json!({ "object": "user", "entry": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(foreign.status().as_u16(), 404);

    // The relay keeps working after bad input.
    let res = client
        .post(format!("{}/webhook", base))
        .json(&payload("user-1", "Dana"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert!(
        support::wait_until(|| {
            upstream.requests_to("/v5.0/me/messages").len() == 1
                && upstream.requests_to("/v4/spreadsheets/").len() == 1
        })
        .await
    );

    relay.abort();
}
