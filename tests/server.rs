//! End-to-end over a real socket.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use categories_service::categories::MemoryStore;
use categories_service::config::ServerConfig;
use categories_service::observability::DualSinkLogger;
use categories_service::{AppState, HttpServer, Shutdown};

mod common;

use common::{local_only_config, read_lines, temp_log_path, MemoryRecorder};

#[tokio::test]
async fn test_serves_until_shutdown() {
    let path = temp_log_path();
    let recorder = Arc::new(MemoryRecorder::default());
    let state = AppState {
        store: Arc::new(MemoryStore::new()),
        metrics: recorder.clone(),
        log: Arc::new(DualSinkLogger::open(&local_only_config(&path)).unwrap()),
        body_limit: ServerConfig::default().max_body_bytes,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(&ServerConfig::default(), state);
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let client = reqwest::Client::new();
    let base = format!("http://{}", addr);

    let created = client
        .post(format!("{}/categories", base))
        .json(&serde_json::json!({ "name": "books" }))
        .header("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    assert!(created.headers().contains_key("x-request-id"));

    let fetched = client
        .get(format!("{}/categories/1", base))
        .header("x-request-id", "caller-supplied")
        .send()
        .await
        .unwrap();
    assert_eq!(fetched.status(), 200);
    assert_eq!(fetched.headers()["x-request-id"], "caller-supplied");
    let body: serde_json::Value = fetched.json().await.unwrap();
    assert_eq!(body["name"], "books");

    let missing = client.get(format!("{}/nowhere", base)).send().await.unwrap();
    assert_eq!(missing.status(), 404);

    drop(client);
    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(recorder.count("/categories", 201), 1);
    assert_eq!(recorder.count("/categories/{id}", 200), 1);
    // Unrouted requests never reach a handler, so they are not measured.
    assert_eq!(recorder.total(), 2);
    assert_eq!(read_lines(&path).len(), 1);
}
