// HTTP backend client tests against a wiremock server.

use std::time::Duration;

use amsd::integrations::ams::refresh_switch;
use amsd::integrations::ams::BackendError;
use amsd::integrations::ams::HttpBackend;
use amsd::integrations::ams::PrinterBackend;
use amsd::integrations::ams::PrinterRecord;
use amsd::integrations::ams::PrinterSwitch;
use serde_json::json;
use tokio::sync::Mutex;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, HttpBackend) {
    let server = MockServer::start().await;
    let backend = HttpBackend::new(Duration::from_secs(5)).unwrap();
    (server, backend)
}

async fn mount_status(server: &MockServer, printer_id: &str, status: u16, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/api/status/{printer_id}")))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

// ── Printer list ────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_printers() {
    let (server, backend) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/printers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "01P00A", "name": "X1 Carbon", "online": true},
            {"id": "01S00B", "name": "P1S"},
        ])))
        .expect(1)
        .mount(&server)
        .await;

    // A trailing slash on the base URL is tolerated.
    let printers = backend
        .list_printers(&format!("{}/", server.uri()))
        .await
        .unwrap();

    assert_eq!(
        printers,
        vec![
            PrinterRecord::new("01P00A", "X1 Carbon"),
            PrinterRecord::new("01S00B", "P1S"),
        ]
    );
}

#[tokio::test]
async fn test_list_printers_server_error() {
    let (server, backend) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/printers"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = backend.list_printers(&server.uri()).await.unwrap_err();
    assert!(matches!(err, BackendError::Status(500)));
}

#[tokio::test]
async fn test_list_printers_not_an_array() {
    let (server, backend) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/printers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"printers": []})))
        .mount(&server)
        .await;

    let err = backend.list_printers(&server.uri()).await.unwrap_err();
    assert!(matches!(err, BackendError::Malformed(_)));
}

#[tokio::test]
async fn test_unreachable_backend() {
    let backend = HttpBackend::new(Duration::from_secs(1)).unwrap();
    let err = backend
        .list_printers("http://127.0.0.1:1")
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Transport(_)));
}

// ── Monitoring commands ─────────────────────────────────────────────

#[tokio::test]
async fn test_start_and_stop_monitoring() {
    let (server, backend) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/printer/P1/monitoring/start"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/printer/P1/monitoring/stop"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    backend.start_monitoring(&server.uri(), "P1").await.unwrap();
    backend.stop_monitoring(&server.uri(), "P1").await.unwrap();
}

#[tokio::test]
async fn test_monitoring_command_ignores_error_status() {
    let (server, backend) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/printer/P1/monitoring/start"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    backend.start_monitoring(&server.uri(), "P1").await.unwrap();
}

#[tokio::test]
async fn test_printer_id_is_a_single_path_segment() {
    let (server, backend) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/printer/A%2FB%3F1/monitoring/start"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    backend.start_monitoring(&server.uri(), "A/B?1").await.unwrap();
}

// ── Status ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_status() {
    let (server, backend) = setup().await;
    mount_status(&server, "P1", 200, json!({"monitoringEnabled": true, "online": true})).await;
    mount_status(&server, "P2", 200, json!({"online": true})).await;

    let status = backend.status(&server.uri(), "P1").await.unwrap();
    assert!(status.monitoring_enabled);
    let status = backend.status(&server.uri(), "P2").await.unwrap();
    assert!(!status.monitoring_enabled);
}

#[tokio::test]
async fn test_failed_status_poll_keeps_switch_state() {
    let (server, backend) = setup().await;
    mount_status(&server, "P1", 200, json!({"monitoringEnabled": true})).await;

    let switch = Mutex::new(PrinterSwitch::new(
        "entry",
        &server.uri(),
        PrinterRecord::new("P1", "X1C"),
        "ams_monitoring_P1".to_string(),
    ));
    assert_eq!(refresh_switch(&backend, &switch).await, Some(true));

    server.reset().await;
    mount_status(&server, "P1", 500, json!({"error": "down"})).await;

    assert_eq!(refresh_switch(&backend, &switch).await, None);
    assert!(switch.lock().await.is_on());
}

#[tokio::test]
async fn test_renamed_printer_addresses_backend_id() {
    let (server, backend) = setup().await;
    mount_status(&server, "P1", 200, json!({"monitoringEnabled": true})).await;

    let printer = PrinterRecord {
        id: "P1_2".to_string(),
        name: "Second".to_string(),
        source_id: Some("P1".to_string()),
    };
    let switch = Mutex::new(PrinterSwitch::new(
        "entry",
        &server.uri(),
        printer,
        "ams_monitoring_P1_2".to_string(),
    ));

    assert_eq!(refresh_switch(&backend, &switch).await, Some(true));
}
