use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use tracing::warn;

use super::reconcile::PrinterRecord;

/// Errors talking to the printer-monitoring backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend responded with HTTP {0}")]
    Status(u16),

    #[error("Malformed backend response: {0}")]
    Malformed(String),

    #[error("Invalid backend URL {0}")]
    InvalidUrl(String),
}

/// Monitoring status of a single printer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct PrinterStatus {
    #[serde(default, rename = "monitoringEnabled")]
    pub monitoring_enabled: bool,
}

/// Trait for backend operations
///
/// This trait allows for mocking the backend for testing purposes. Every call
/// is a single request: there is no retry policy.
#[async_trait]
pub trait PrinterBackend: Send + Sync {
    /// `GET {base_url}/api/printers`
    async fn list_printers(&self, base_url: &str) -> Result<Vec<PrinterRecord>, BackendError>;

    /// `POST {base_url}/api/printer/{id}/monitoring/start`
    async fn start_monitoring(&self, base_url: &str, printer_id: &str)
        -> Result<(), BackendError>;

    /// `POST {base_url}/api/printer/{id}/monitoring/stop`
    async fn stop_monitoring(&self, base_url: &str, printer_id: &str) -> Result<(), BackendError>;

    /// `GET {base_url}/api/status/{id}`
    async fn status(&self, base_url: &str, printer_id: &str)
        -> Result<PrinterStatus, BackendError>;
}

/// Strip trailing slashes so URLs can be joined and compared.
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Join path segments onto a base URL, percent-encoding each one.
///
/// A path already present on the base URL is kept as a prefix.
pub fn endpoint(base_url: &str, segments: &[&str]) -> Result<reqwest::Url, BackendError> {
    let base = normalize_base_url(base_url);
    let mut url =
        reqwest::Url::parse(&base).map_err(|e| BackendError::InvalidUrl(format!("{base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| BackendError::InvalidUrl(base))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Parse the `/api/printers` body.
///
/// Printers without a usable `id` are skipped. Numeric ids are accepted and
/// stringified, a missing `name` falls back to the id.
pub fn parse_printer_list(body: serde_json::Value) -> Result<Vec<PrinterRecord>, BackendError> {
    let items = match body {
        serde_json::Value::Array(items) => items,
        other => {
            return Err(BackendError::Malformed(format!(
                "expected a JSON array of printers, got {}",
                json_kind(&other)
            )))
        }
    };

    let mut printers = Vec::with_capacity(items.len());
    for item in items {
        let id = match item.get("id") {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                warn!("Skipping printer without a usable id: {}", item);
                continue;
            }
        };
        let name = item
            .get("name")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| id.clone());
        printers.push(PrinterRecord::new(id, name));
    }
    Ok(printers)
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Real backend implementation using reqwest
///
/// One client is shared by every config entry; the base URL is supplied per
/// call since it is only known once an entry (or a setup flow) provides it.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
}

impl HttpBackend {
    /// Create a backend client with the given per-request timeout
    pub fn new(timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("amsd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    /// Wrap an existing reqwest client
    pub fn from_reqwest(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn post_monitoring(
        &self,
        base_url: &str,
        printer_id: &str,
        action: &str,
    ) -> Result<(), BackendError> {
        let url = endpoint(base_url, &["api", "printer", printer_id, "monitoring", action])?;
        debug!("POST {}", url);
        let resp = self.http.post(url).send().await?;
        if !resp.status().is_success() {
            // Body and status are not part of the contract; note it and move on.
            warn!(
                "Backend answered HTTP {} to monitoring {} for {}",
                resp.status().as_u16(),
                action,
                printer_id
            );
        }
        Ok(())
    }
}

#[async_trait]
impl PrinterBackend for HttpBackend {
    async fn list_printers(&self, base_url: &str) -> Result<Vec<PrinterRecord>, BackendError> {
        let url = endpoint(base_url, &["api", "printers"])?;
        debug!("GET {}", url);
        let resp = self.http.get(url).send().await?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(BackendError::Status(resp.status().as_u16()));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;
        parse_printer_list(body)
    }

    async fn start_monitoring(
        &self,
        base_url: &str,
        printer_id: &str,
    ) -> Result<(), BackendError> {
        self.post_monitoring(base_url, printer_id, "start").await
    }

    async fn stop_monitoring(&self, base_url: &str, printer_id: &str) -> Result<(), BackendError> {
        self.post_monitoring(base_url, printer_id, "stop").await
    }

    async fn status(
        &self,
        base_url: &str,
        printer_id: &str,
    ) -> Result<PrinterStatus, BackendError> {
        let url = endpoint(base_url, &["api", "status", printer_id])?;
        let resp = self.http.get(url).send().await?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(BackendError::Status(resp.status().as_u16()));
        }
        resp.json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))
    }
}

/// Mock backend for testing
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockBackend {
    /// Printer list per base URL; a missing URL behaves like HTTP 500
    pub printers: std::sync::Mutex<std::collections::HashMap<String, Vec<PrinterRecord>>>,
    /// Status per backend printer id; a missing id behaves like HTTP 500
    pub statuses: std::sync::Mutex<std::collections::HashMap<String, bool>>,
    /// Recorded (action, base_url, printer_id) calls
    pub calls: std::sync::Mutex<Vec<(String, String, String)>>,
}

#[cfg(test)]
impl MockBackend {
    /// Create a new mock backend
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_printers(self, base_url: &str, printers: Vec<PrinterRecord>) -> Self {
        self.set_printers(base_url, printers);
        self
    }

    pub fn set_printers(&self, base_url: &str, printers: Vec<PrinterRecord>) {
        self.printers
            .lock()
            .unwrap()
            .insert(base_url.to_string(), printers);
    }

    pub fn fail_printers(&self, base_url: &str) {
        self.printers.lock().unwrap().remove(base_url);
    }

    pub fn set_status(&self, printer_id: &str, enabled: bool) {
        self.statuses
            .lock()
            .unwrap()
            .insert(printer_id.to_string(), enabled);
    }

    pub fn fail_status(&self, printer_id: &str) {
        self.statuses.lock().unwrap().remove(printer_id);
    }

    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, action: &str, base_url: &str, printer_id: &str) {
        self.calls.lock().unwrap().push((
            action.to_string(),
            base_url.to_string(),
            printer_id.to_string(),
        ));
    }
}

#[cfg(test)]
#[async_trait]
impl PrinterBackend for MockBackend {
    async fn list_printers(&self, base_url: &str) -> Result<Vec<PrinterRecord>, BackendError> {
        self.record("list", base_url, "");
        self.printers
            .lock()
            .unwrap()
            .get(base_url)
            .cloned()
            .ok_or(BackendError::Status(500))
    }

    async fn start_monitoring(
        &self,
        base_url: &str,
        printer_id: &str,
    ) -> Result<(), BackendError> {
        self.record("start", base_url, printer_id);
        Ok(())
    }

    async fn stop_monitoring(&self, base_url: &str, printer_id: &str) -> Result<(), BackendError> {
        self.record("stop", base_url, printer_id);
        Ok(())
    }

    async fn status(
        &self,
        base_url: &str,
        printer_id: &str,
    ) -> Result<PrinterStatus, BackendError> {
        self.record("status", base_url, printer_id);
        self.statuses
            .lock()
            .unwrap()
            .get(printer_id)
            .map(|&monitoring_enabled| PrinterStatus { monitoring_enabled })
            .ok_or(BackendError::Status(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("http://host:8080/"), "http://host:8080");
        assert_eq!(normalize_base_url(" http://host// "), "http://host");
        assert_eq!(normalize_base_url("http://host"), "http://host");
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let url = endpoint("http://host:8080/", &["api", "status", "a/b?c#d"]).unwrap();
        assert_eq!(url.as_str(), "http://host:8080/api/status/a%2Fb%3Fc%23d");

        let url = endpoint("http://host/prefix", &["api", "printers"]).unwrap();
        assert_eq!(url.as_str(), "http://host/prefix/api/printers");

        assert!(matches!(
            endpoint("not a url", &["api"]),
            Err(BackendError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_parse_printer_list() {
        let body = serde_json::json!([
            {"id": "P1", "name": "X1 Carbon", "model": "X1C"},
            {"id": 42, "name": "Numeric"},
            {"id": "P3"},
            {"name": "No id"},
            {"id": "", "name": "Empty id"},
        ]);
        let printers = parse_printer_list(body).unwrap();
        assert_eq!(
            printers,
            vec![
                PrinterRecord::new("P1", "X1 Carbon"),
                PrinterRecord::new("42", "Numeric"),
                PrinterRecord::new("P3", "P3"),
            ]
        );
    }

    #[test]
    fn test_parse_printer_list_rejects_non_array() {
        let err = parse_printer_list(serde_json::json!({"printers": []})).unwrap_err();
        assert!(matches!(err, BackendError::Malformed(_)));
    }

    #[test]
    fn test_status_missing_field_is_off() {
        let status: PrinterStatus = serde_json::from_str(r#"{"online": true}"#).unwrap();
        assert!(!status.monitoring_enabled);
        let status: PrinterStatus = serde_json::from_str(r#"{"monitoringEnabled": true}"#).unwrap();
        assert!(status.monitoring_enabled);
    }
}
