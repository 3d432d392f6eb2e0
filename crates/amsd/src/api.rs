use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::engine::EngineError;
use crate::engine::ToIntegrationMessage;
use crate::entries::ConfigEntry;
use crate::entries::EntryError;
use crate::flow::FlowError;
use crate::flow::FlowResult;
use crate::flow::UserInput;
use crate::integrations::ams::FlowManager;
use crate::integrations::ams::FlowResponse;
use crate::integrations::ams::PrinterBackend;
use crate::integrations::ams::DOMAIN;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct CommandResponse {
    entity_id: String,
    on: bool,
}

/// Shared application state
pub struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
    flows: Arc<FlowManager<dyn PrinterBackend>>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, flows: Arc<FlowManager<dyn PrinterBackend>>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            engine,
            flows,
        }
    }

    /// Tell the integration about an entry change. The integration may be
    /// disabled, in which case the entry only takes effect on its next start.
    fn forward(&self, msg: ToIntegrationMessage) {
        if let Err(e) = self.engine.send_to_integration(DOMAIN, msg) {
            tracing::warn!("Entry change not forwarded to {}: {}", DOMAIN, e);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Flow(FlowError::UnknownFlow(_))
            | ApiError::Flow(FlowError::Entry(EntryError::NotFound(_)))
            | ApiError::Engine(EngineError::UnknownEntity(_)) => StatusCode::NOT_FOUND,
            ApiError::Flow(FlowError::MissingField(_))
            | ApiError::Flow(FlowError::InvalidField(_))
            | ApiError::Flow(FlowError::OutOfOrder(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

#[tracing::instrument(skip(state))]
async fn get_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(crate::engine::State::clone(&state.engine.state_snapshot()))
}

#[tracing::instrument(skip(state))]
async fn list_entities(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.entity_states().await)
}

#[tracing::instrument(skip(state))]
async fn list_entries(State(state): State<Arc<AppState>>) -> Json<Vec<ConfigEntry>> {
    Json(state.flows.entries().await)
}

#[tracing::instrument(skip(state))]
async fn remove_entry(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<String>,
) -> Result<Json<ConfigEntry>, ApiError> {
    let entry = state.flows.remove_entry(&entry_id).await?;
    state.forward(ToIntegrationMessage::EntryRemoved {
        entry_id: entry.entry_id.clone(),
    });
    Ok(Json(entry))
}

#[tracing::instrument(skip(state))]
async fn start_setup(State(state): State<Arc<AppState>>) -> Result<Json<FlowResponse>, ApiError> {
    Ok(Json(state.flows.start_setup().await?))
}

#[tracing::instrument(skip(state, input))]
async fn submit_setup(
    State(state): State<Arc<AppState>>,
    Path(flow_id): Path<String>,
    Json(input): Json<UserInput>,
) -> Result<Json<FlowResponse>, ApiError> {
    let resp = state.flows.submit_setup(&flow_id, input).await?;
    if let FlowResult::CreateEntry { data, .. } = &resp.result {
        state.forward(ToIntegrationMessage::EntryAdded(data.clone()));
    }
    Ok(Json(resp))
}

#[tracing::instrument(skip(state))]
async fn abort_setup(
    State(state): State<Arc<AppState>>,
    Path(flow_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.flows.abort_setup(&flow_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state))]
async fn start_options(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<String>,
) -> Result<Json<FlowResponse>, ApiError> {
    Ok(Json(state.flows.start_options(&entry_id).await?))
}

#[tracing::instrument(skip(state, input))]
async fn submit_options(
    State(state): State<Arc<AppState>>,
    Path(flow_id): Path<String>,
    Json(input): Json<UserInput>,
) -> Result<Json<FlowResponse>, ApiError> {
    let resp = state.flows.submit_options(&flow_id, input).await?;
    if let FlowResult::CreateEntry { data, .. } = &resp.result {
        state.forward(ToIntegrationMessage::EntryUpdated(data.clone()));
    }
    Ok(Json(resp))
}

#[tracing::instrument(skip(state))]
async fn abort_options(
    State(state): State<Arc<AppState>>,
    Path(flow_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.flows.abort_options(&flow_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn switch_command(
    state: &AppState,
    entity_id: String,
    on: bool,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError> {
    state.engine.send_switch_command(entity_id.clone(), on)?;
    Ok((StatusCode::ACCEPTED, Json(CommandResponse { entity_id, on })))
}

#[tracing::instrument(skip(state))]
async fn turn_on(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    switch_command(&state, entity_id, true)
}

#[tracing::instrument(skip(state))]
async fn turn_off(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    switch_command(&state, entity_id, false)
}

/// Create the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/state", get(get_state))
        .route("/v1/entities", get(list_entities))
        .route("/v1/entries", get(list_entries))
        .route("/v1/entries/:entry_id", delete(remove_entry))
        .route("/v1/entries/:entry_id/options", post(start_options))
        .route("/v1/flows", post(start_setup))
        .route("/v1/flows/:flow_id", post(submit_setup).delete(abort_setup))
        .route(
            "/v1/options/:flow_id",
            post(submit_options).delete(abort_options),
        )
        .route("/v1/switches/:entity_id/turn_on", post(turn_on))
        .route("/v1/switches/:entity_id/turn_off", post(turn_off))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires.
pub async fn serve(
    listen: &str,
    port: u16,
    state: Arc<AppState>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", listen, port))?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Method;
    use axum::http::Request;
    use serde_json::json;
    use serde_json::Value;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    use super::*;
    use crate::entries::EntryStore;
    use crate::integrations::ams::MockBackend;
    use crate::integrations::ams::PrinterRecord;

    const URL: &str = "http://backend";

    fn router(backend: MockBackend) -> Router {
        let backend: Arc<dyn PrinterBackend> = Arc::new(backend);
        let store = Arc::new(Mutex::new(EntryStore::in_memory(DOMAIN)));
        let flows = Arc::new(FlowManager::new(backend, store));
        create_router(Arc::new(AppState::new(Arc::new(Engine::new()), flows)))
    }

    async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.map(|b| b.to_string()).unwrap_or_default()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_ping() {
        let router = router(MockBackend::new());
        let (status, body) = call(&router, Method::GET, "/v1/ping", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_setup_flow_round_trip() {
        let router = router(MockBackend::new().with_printers(
            URL,
            vec![PrinterRecord::new("P1", "X1C")],
        ));

        let (status, body) = call(&router, Method::POST, "/v1/flows", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["type"], "show_form");
        assert_eq!(body["result"]["step_id"], "user");
        let flow_id = body["flow_id"].as_str().unwrap().to_string();
        let uri = format!("/v1/flows/{flow_id}");

        let (_, body) = call(&router, Method::POST, &uri, Some(json!({"base_url": URL}))).await;
        assert_eq!(body["result"]["step_id"], "select_printers");
        assert_eq!(body["result"]["fields"][0]["options"][0]["label"], "X1C (P1)");

        let (status, body) = call(&router, Method::POST, &uri, Some(json!({"printers": ["P1"]}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["type"], "create_entry");
        assert_eq!(body["result"]["data"]["data"]["printers"][0]["id"], "P1");

        let (_, entries) = call(&router, Method::GET, "/v1/entries", None).await;
        assert_eq!(entries.as_array().unwrap().len(), 1);

        let (status, _) = call(&router, Method::POST, &uri, Some(json!({"printers": ["P1"]}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_field_is_bad_request() {
        let router = router(MockBackend::new());
        let (_, body) = call(&router, Method::POST, "/v1/flows", None).await;
        let uri = format!("/v1/flows/{}", body["flow_id"].as_str().unwrap());

        let (status, body) = call(&router, Method::POST, &uri, Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing required field: base_url");

        let (status, _) = call(&router, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_unknown_resources() {
        let router = router(MockBackend::new());
        for (method, uri) in [
            (Method::DELETE, "/v1/entries/missing"),
            (Method::POST, "/v1/entries/missing/options"),
            (Method::DELETE, "/v1/options/missing"),
            (Method::POST, "/v1/switches/switch.missing/turn_on"),
        ] {
            let (status, body) = call(&router, method, uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert!(body["error"].is_string());
        }
    }

    #[tokio::test]
    async fn test_state_starts_empty() {
        let router = router(MockBackend::new());
        let (status, body) = call(&router, Method::GET, "/v1/state", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"switches": {}, "notifications": []}));

        let (_, body) = call(&router, Method::GET, "/v1/entities", None).await;
        assert_eq!(body, json!([]));
    }
}
