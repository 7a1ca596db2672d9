//! End-to-end host proxy tests over real HTTP
//!
//! Starts the proxy on an ephemeral port and exercises the health
//! handshake, callback capture lifecycle, message-size caps, and the
//! create pipeline's proxy URL injection.

use clawker_core::docker::mock::MockRuntime;
use clawker_core::hostproxy::{EnsureOutcome, HostProxy, MAX_MESSAGE_BYTES};
use clawker_core::lifecycle::{run_create, CreateOptions, NoWorktrees};
use clawker_core::progress::EventSender;
use clawker_core::store::{ConfigStore, LoadOptions};
use std::time::Duration;
use tempfile::TempDir;

fn free_port() -> u16 {
    std::net::TcpListener::bind(("127.0.0.1", 0))
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("free port")
}

async fn started_proxy(tmp: &TempDir) -> HostProxy {
    let proxy = HostProxy::with_pid_path(free_port(), tmp.path().join("proxy.pid"));
    assert_eq!(
        proxy.ensure_running().await.expect("start"),
        EnsureOutcome::Started
    );
    proxy
}

#[tokio::test]
async fn healthz_reports_service_identity() {
    let tmp = TempDir::new().unwrap();
    let proxy = started_proxy(&tmp).await;

    let body: serde_json::Value = reqwest::get(format!("{}/healthz", proxy.local_url()))
        .await
        .expect("GET /healthz")
        .json()
        .await
        .expect("json body");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "clawker-host-proxy");

    proxy.stop(Duration::from_secs(1)).unwrap();
}

#[tokio::test]
async fn callback_capture_round_trip() {
    let tmp = TempDir::new().unwrap();
    let proxy = started_proxy(&tmp).await;
    let client = reqwest::Client::new();
    let base = proxy.local_url();

    // Nothing buffered yet.
    let empty: serde_json::Value = client
        .get(format!("{base}/callback/sess1/data"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(empty["received"], false);

    // Record a callback with a query string and body.
    let response = client
        .post(format!("{base}/callback/sess1?code=abc123&state=xyz"))
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let data: serde_json::Value = client
        .get(format!("{base}/callback/sess1/data"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(data["received"], true);
    assert_eq!(data["callback"]["query"], "code=abc123&state=xyz");
    assert_eq!(data["callback"]["body"], "payload");

    // Delete, then the session is gone.
    let deleted = client
        .delete(format!("{base}/callback/sess1"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status().as_u16(), 200);
    let missing = client
        .delete(format!("{base}/callback/sess1"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);

    proxy.stop(Duration::from_secs(1)).unwrap();
}

#[tokio::test]
async fn unknown_routes_are_404_json() {
    let tmp = TempDir::new().unwrap();
    let proxy = started_proxy(&tmp).await;

    let response = reqwest::get(format!("{}/nope", proxy.local_url()))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body.get("error").is_some());

    proxy.stop(Duration::from_secs(1)).unwrap();
}

#[tokio::test]
async fn oversized_gpg_message_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let proxy = started_proxy(&tmp).await;
    let client = reqwest::Client::new();

    // The JSON envelope alone busts the cap before base64 decoding.
    let huge = "A".repeat(MAX_MESSAGE_BYTES * 2);
    let response = client
        .post(format!("{}/gpg/agent", proxy.local_url()))
        .json(&serde_json::json!({ "data": huge }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 413);

    proxy.stop(Duration::from_secs(1)).unwrap();
}

#[tokio::test]
async fn malformed_gpg_request_is_400() {
    let tmp = TempDir::new().unwrap();
    let proxy = started_proxy(&tmp).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/gpg/agent", proxy.local_url()))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let response = client
        .post(format!("{}/gpg/agent", proxy.local_url()))
        .json(&serde_json::json!({ "data": "!!not-base64!!" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    proxy.stop(Duration::from_secs(1)).unwrap();
}

#[tokio::test]
async fn create_pipeline_injects_proxy_url_after_adoption_or_start() {
    let tmp = TempDir::new().unwrap();
    let home = tmp.path().join("home");
    let root = tmp.path().join("repo");
    std::fs::create_dir_all(&home).unwrap();
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(
        home.join("projects.yaml"),
        format!(
            "projects:\n  myapp:\n    name: My App\n    root: {}\n",
            root.display()
        ),
    )
    .unwrap();
    let store = ConfigStore::load(LoadOptions {
        cwd: Some(root.clone()),
        home: Some(home),
        ignore_env: true,
    })
    .unwrap();

    let proxy = HostProxy::with_pid_path(free_port(), tmp.path().join("proxy.pid"));
    let runtime = MockRuntime::new().with_image("alpine:3.20");

    let opts = CreateOptions {
        image: "alpine:3.20".to_string(),
        agent: Some("dev".to_string()),
        ..Default::default()
    };
    run_create(
        &runtime,
        &store,
        opts,
        Some(&proxy),
        &NoWorktrees,
        &|_| false,
        &EventSender::disabled(),
    )
    .await
    .unwrap();

    assert!(proxy.is_running());
    let specs = runtime.created_specs.lock().unwrap();
    let expected = format!("CLAWKER_HOST_PROXY={}", proxy.proxy_url());
    assert!(
        specs.last().unwrap().env.contains(&expected),
        "missing {expected}"
    );
    drop(specs);
    proxy.stop(Duration::from_secs(1)).unwrap();
}
