use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::correlation::random_id;
use crate::error::{BridgeError, ValidationError};
use crate::registry::catalog;
use crate::state::BridgeState;
use crate::subscriptions::{EventDelivery, EventRegistry};

// ── Response types ───────────────────────────────────────────────

#[derive(Serialize)]
struct ApiOk<T: Serialize> {
    ok: bool,
    data: T,
}

#[derive(Serialize)]
struct ApiErr<E: Serialize> {
    ok: bool,
    error: E,
}

fn ok_json<T: Serialize>(data: T) -> axum::response::Response {
    Json(ApiOk { ok: true, data }).into_response()
}

fn err_json<E: Serialize>(status: StatusCode, error: E) -> axum::response::Response {
    (status, Json(ApiErr { ok: false, error })).into_response()
}

/// Status for a failed command. The body always carries the structured error.
fn status_for(error: &BridgeError) -> StatusCode {
    match error {
        BridgeError::Validation(_) => StatusCode::BAD_REQUEST,
        BridgeError::UnknownCommand { .. } => StatusCode::NOT_FOUND,
        BridgeError::NotConnected | BridgeError::Disconnected => StatusCode::SERVICE_UNAVAILABLE,
        BridgeError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        BridgeError::Execution { .. } | BridgeError::BatchFailed { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A structured error plus its display text.
#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(flatten)]
    error: BridgeError,
}

fn bridge_err(error: BridgeError) -> axum::response::Response {
    let status = status_for(&error);
    err_json(
        status,
        ErrorBody {
            message: error.to_string(),
            error,
        },
    )
}

// ── Handlers ─────────────────────────────────────────────────────

async fn get_health(Extension(state): Extension<Arc<BridgeState>>) -> impl IntoResponse {
    ok_json(state.health())
}

async fn get_tools(Extension(state): Extension<Arc<BridgeState>>) -> impl IntoResponse {
    ok_json(catalog::to_json_schema(&state.registry))
}

async fn get_llm_tools() -> impl IntoResponse {
    ok_json(catalog::to_llm_tools())
}

#[derive(Deserialize)]
struct HelpQuery {
    topic: Option<String>,
}

async fn get_help(
    Extension(state): Extension<Arc<BridgeState>>,
    Query(query): Query<HelpQuery>,
) -> impl IntoResponse {
    ok_json(catalog::help_text(&state.registry, query.topic.as_deref()))
}

async fn post_command(
    Extension(state): Extension<Arc<BridgeState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let params = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(v) => v,
            Err(e) => {
                return bridge_err(BridgeError::Validation(ValidationError::new(
                    "",
                    format!("body is not valid JSON: {e}"),
                )))
            }
        }
    };
    match state.execute(&name, params).await {
        Ok(data) => ok_json(data),
        Err(e) => {
            debug!(command = %name, code = e.code(), "command failed");
            bridge_err(e)
        }
    }
}

#[derive(Deserialize)]
struct NotifyBody {
    message: String,
}

async fn post_notify(
    Extension(state): Extension<Arc<BridgeState>>,
    Json(body): Json<NotifyBody>,
) -> impl IntoResponse {
    match state.notify(&body.message) {
        Ok(()) => ok_json(Value::Null),
        Err(e) => bridge_err(e),
    }
}

async fn post_settings(
    Extension(state): Extension<Arc<BridgeState>>,
    Json(body): Json<Map<String, Value>>,
) -> impl IntoResponse {
    match state.update_host_settings(body) {
        Ok(()) => ok_json(Value::Null),
        Err(e) => bridge_err(e),
    }
}

/// Unsubscribes when the SSE client goes away and the stream is dropped.
/// Everything one SSE client subscribed to; dropped when the client goes away.
struct SseSubscription {
    events: Arc<EventRegistry>,
    connection: String,
    rx: mpsc::UnboundedReceiver<EventDelivery>,
}

impl Drop for SseSubscription {
    fn drop(&mut self) {
        let removed = self.events.drop_connection(&self.connection);
        debug!(connection = %self.connection, removed, "event stream closed");
    }
}

/// Query values that parse as JSON (`100`, `true`, `null`) filter on that
/// value; anything else is compared as a string.
fn query_filter(query: HashMap<String, String>) -> Map<String, Value> {
    query
        .into_iter()
        .map(|(k, v)| {
            let value = serde_json::from_str(&v).unwrap_or(Value::String(v));
            (k, value)
        })
        .collect()
}

/// Server-sent events for one or more comma-separated event types. Query
/// parameters form the filter.
async fn get_events(
    Extension(state): Extension<Arc<BridgeState>>,
    Path(event_types): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let types: Vec<&str> = event_types
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    let connection = format!("sse-{}", random_id());
    let (_, rx) = state
        .events
        .subscribe_connection(&connection, &types, Some(query_filter(query)));
    let subscription = SseSubscription {
        events: Arc::clone(&state.events),
        connection,
        rx,
    };

    let stream = futures_util::stream::unfold(subscription, |mut sub| async move {
        let delivery = sub.rx.recv().await?;
        let event = Event::default()
            .event(delivery.event.clone())
            .json_data(&delivery)
            .unwrap_or_else(|_| Event::default().comment("unserializable event"));
        Some((Ok::<_, Infallible>(event), sub))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── Server startup ───────────────────────────────────────────────

pub fn router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/api/health", get(get_health))
        .route("/api/tools", get(get_tools))
        .route("/api/llm-tools", get(get_llm_tools))
        .route("/api/help", get(get_help))
        .route("/api/command/{name}", post(post_command))
        .route("/api/notify", post(post_notify))
        .route("/api/settings", post(post_settings))
        .route("/api/events/{event_types}", get(get_events))
        .layer(CorsLayer::permissive())
        .layer(Extension(state))
}

/// Start the HTTP surface on 127.0.0.1:`port` (0 = OS pick). Returns the port.
pub async fn start_api_server(state: Arc<BridgeState>, port: u16) -> Result<u16, BridgeError> {
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let port = listener.local_addr()?.port();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server error");
        }
    });
    info!(port, "API server listening on http://127.0.0.1:{port}");

    Ok(port)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;
    use crate::chunked::ChunkPlan;
    use crate::demo::{DemoHost, Document};
    use crate::settings::BridgeSettings;
    use crate::transport::Connection;

    async fn serve(with_host: bool) -> (String, Arc<BridgeState>) {
        let state = Arc::new(
            BridgeState::new(BridgeSettings::default().without_delays(), PathBuf::from("/tmp")).unwrap(),
        );
        if with_host {
            let demo = DemoHost::new(Document::sample(), ChunkPlan::new(10));
            let (ours, theirs) = Connection::memory_pair();
            demo.serve(theirs);
            state.attach_host(ours);
        }
        let port = start_api_server(Arc::clone(&state), 0).await.unwrap();
        (format!("http://127.0.0.1:{port}"), state)
    }

    #[tokio::test]
    async fn command_round_trip_over_http() {
        let (base, _state) = serve(true).await;
        let client = reqwest::Client::new();

        let body: Value = client
            .post(format!("{base}/api/command/get_document_info"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(body["data"]["name"], "Landing page");

        let resp = client
            .post(format!("{base}/api/command/get_node_info"))
            .json(&json!({ "nodeId": "" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"]["code"], "Validation");
        assert_eq!(body["error"]["detail"]["field"], "nodeId");
    }

    #[tokio::test]
    async fn strict_batch_failure_carries_outcomes() {
        let (base, _state) = serve(true).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/command/clone_nodes"))
            .json(&json!({ "clones": [{ "nodeId": "8:8" }] }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "BatchFailed");
        assert_eq!(body["error"]["detail"]["results"][0]["error"], "Node not found: 8:8");
    }

    #[tokio::test]
    async fn health_and_catalogue_without_host() {
        let (base, state) = serve(false).await;
        let client = reqwest::Client::new();

        let health: Value = client
            .get(format!("{base}/api/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["data"]["hostConnected"], false);

        let tools: Value = client
            .get(format!("{base}/api/tools"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(tools["data"].as_array().unwrap().len(), state.registry.len());

        let resp = client
            .post(format!("{base}/api/command/get_selection"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        let resp = client
            .post(format!("{base}/api/command/explode"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[test]
    fn query_values_keep_their_json_type() {
        let query: HashMap<String, String> = [
            ("progress", "100"),
            ("final", "true"),
            ("commandType", "scan_text_nodes"),
            ("nodeId", "1:2"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let filter = query_filter(query);
        assert_eq!(filter["progress"], json!(100));
        assert_eq!(filter["final"], json!(true));
        assert_eq!(filter["commandType"], json!("scan_text_nodes"));
        assert_eq!(filter["nodeId"], json!("1:2"));

        let events = EventRegistry::new();
        let (_, mut rx) = events.subscribe_connection("sse-t", &["command_progress"], Some(filter));
        events.publish(
            "command_progress",
            &json!({ "progress": 100, "final": true, "commandType": "scan_text_nodes", "nodeId": "1:2" }),
        );
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn closing_a_stream_drops_its_subscriptions() {
        let events = Arc::new(EventRegistry::new());
        let (_, rx) = events.subscribe_connection("sse-a", &["selection_change", "document_change"], None);
        let (_keep, _other) = events.subscribe_channel("selection_change", None);
        let stream = SseSubscription {
            events: Arc::clone(&events),
            connection: "sse-a".to_string(),
            rx,
        };
        assert_eq!(events.len(), 3);

        drop(stream);
        assert_eq!(events.len(), 1);
    }
}
