use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use rtchat_core::{ChatError, GroupId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::hub::ChatHub;
use crate::identity::{HeaderIdentity, IdentityResolver};
use crate::metrics::MALFORMED_INPUT_TOTAL;
use crate::session::machine::parse_body;
use crate::session::ConnectionSession;
use crate::socket;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    /// `0` asks the OS for a free port.
    pub port: u16,
    pub heartbeat_interval: Duration,
    /// Rendered payloads buffered per client.
    pub outbound_queue: usize,
    /// Request header carrying the authenticated user.
    pub identity_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            heartbeat_interval: Duration::from_secs(30),
            outbound_queue: 256,
            identity_header: "x-user-id".into(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ChatHub>,
    pub identity: Arc<dyn IdentityResolver>,
    pub config: Arc<ServerConfig>,
    pub start_time: Instant,
    /// Renders `/metrics`; the route answers 404 without it.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(hub: Arc<ChatHub>, config: ServerConfig) -> Self {
        Self {
            identity: Arc::new(HeaderIdentity::new(config.identity_header.clone())),
            hub,
            config: Arc::new(config),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/chat/{group}", get(ws_handler))
        .route(
            "/groups/{group}/messages",
            get(history_handler).post(post_message_handler),
        )
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve `hub` with default state. The returned handle owns the
/// server task.
pub async fn start(config: ServerConfig, hub: Arc<ChatHub>) -> std::io::Result<ServerHandle> {
    start_with_state(AppState::new(hub, config)).await
}

/// Bind `state.config`'s address and serve `state`.
pub async fn start_with_state(state: AppState) -> std::io::Result<ServerHandle> {
    let listener =
        tokio::net::TcpListener::bind((state.config.host.as_str(), state.config.port)).await?;
    let addr = listener.local_addr()?;
    let router = build_router(state);

    info!(%addr, "rtchat server started");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "server stopped");
        }
    });

    Ok(ServerHandle {
        port: addr.port(),
        addr,
        server,
    })
}

/// Handle returned by `start()`. Dropping it leaves the server running;
/// call [`shutdown`](Self::shutdown) to stop it.
pub struct ServerHandle {
    pub port: u16,
    pub addr: SocketAddr,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn shutdown(self) {
        self.server.abort();
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn error_response(error: &ChatError) -> Response {
    let status = match error {
        ChatError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
        ChatError::MalformedInput(_) => StatusCode::BAD_REQUEST,
        ChatError::InvalidState { .. } => StatusCode::CONFLICT,
        ChatError::DeliveryFailure { .. } | ChatError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let body = ErrorBody {
        error: error.error_kind(),
        message: error.to_string(),
    };
    (status, Json(body)).into_response()
}

fn unauthorized() -> Response {
    let body = ErrorBody {
        error: "unauthorized",
        message: "missing user identity".into(),
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

fn resolve_user(
    state: &AppState,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<UserId, Response> {
    state.identity.resolve(headers, query).ok_or_else(unauthorized)
}

/// GET /ws/chat/{group}
///
/// Identity, group existence and access are checked before the upgrade,
/// so a rejected client never reaches the registry or the online set.
async fn ws_handler(
    Path(group): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let user = match resolve_user(&state, &headers, &query) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let group = GroupId::from(group);
    if let Err(e) = state.hub.admit(&user, &group) {
        debug!(user_id = %user, group_id = %group, error = %e, "connection refused");
        return error_response(&e);
    }
    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, user, group))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, user: UserId, group: GroupId) {
    let (out_tx, out_rx) = mpsc::channel(state.config.outbound_queue.max(1));
    let session = ConnectionSession::new(state.hub.clone(), user, group, out_tx);
    socket::run_session(socket, session, out_rx, state.config.heartbeat_interval).await;
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    group_id: GroupId,
    /// Rendered payloads, oldest first.
    messages: Vec<String>,
}

/// GET /groups/{group}/messages?limit=N
async fn history_handler(
    Path(group): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let user = match resolve_user(&state, &headers, &query) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let limit = match query.get("limit").map(|raw| raw.parse::<u32>()).transpose() {
        Ok(limit) => limit,
        Err(e) => {
            let error = ChatError::MalformedInput(format!("invalid limit: {e}"));
            return error_response(&error);
        }
    };
    let group = GroupId::from(group);
    match state.hub.rendered_history(&user, &group, limit) {
        Ok(messages) => Json(HistoryResponse {
            group_id: group,
            messages,
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Serialize)]
struct PostedResponse {
    group_id: GroupId,
    /// The stored message rendered for its author.
    message: String,
}

/// POST /groups/{group}/messages
///
/// Same body as a socket frame (`{"body": "..."}`). The message goes
/// through the group's persist-then-publish path, so connected members
/// receive it in order with socket traffic.
async fn post_message_handler(
    Path(group): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
    raw: String,
) -> Response {
    let user = match resolve_user(&state, &headers, &query) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let group = GroupId::from(group);
    if let Err(e) = state.hub.admit(&user, &group) {
        return error_response(&e);
    }
    let body = match parse_body(&raw) {
        Ok(body) => body,
        Err(e) => {
            counter!(MALFORMED_INPUT_TOTAL).increment(1);
            return error_response(&e);
        }
    };
    match state.hub.post_message(&user, &group, &body).await {
        Ok(message) => {
            let rendered = state.hub.renderer().render_message(&message, &user);
            let posted = PostedResponse {
                group_id: group,
                message: rendered,
            };
            (StatusCode::CREATED, Json(posted)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    /// Live subscribed connections.
    pub connections: usize,
    /// Groups with at least one live connection.
    pub groups: usize,
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.hub.registry();
    Json(HealthResponse {
        status: "ok".into(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        connections: registry.connection_count(),
        groups: registry.group_count(),
    })
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use crate::render::JsonRenderer;
    use axum::body::Body;
    use axum::http::Request;
    use rtchat_core::MessageStore;
    use rtchat_store::SqliteMessageStore;
    use tower::ServiceExt;

    fn app() -> (Arc<SqliteMessageStore>, Router) {
        let store = Arc::new(SqliteMessageStore::in_memory().unwrap());
        let _ = store.groups().create(&GroupId::from("lobby"), false, &[]).unwrap();
        let _ = store
            .groups()
            .create(&GroupId::from("secret"), true, &[UserId::from("alice")])
            .unwrap();
        (store.clone(), build_router(state(store)))
    }

    fn state(store: Arc<SqliteMessageStore>) -> AppState {
        let hub = Arc::new(ChatHub::new(store, Arc::new(JsonRenderer), HubConfig::default()));
        AppState::new(hub, ServerConfig::default())
    }

    type Reply = (StatusCode, serde_json::Value);

    async fn request(app: Router, uri: &str, user: Option<&str>) -> Reply {
        send(app, "GET", uri, user, "").await
    }

    async fn post(app: Router, uri: &str, user: Option<&str>, body: &str) -> Reply {
        send(app, "POST", uri, user, body).await
    }

    async fn send(
        app: Router,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: &str,
    ) -> Reply {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header("x-user-id", user);
        }
        let resp = app
            .oneshot(req.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let (_store, app) = app();
        let (status, body) = request(app, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["groups"], 0);
    }

    #[tokio::test]
    async fn ws_requires_identity() {
        let (_store, app) = app();
        let (status, body) = request(app, "/ws/chat/lobby", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");
    }

    #[tokio::test]
    async fn ws_rejects_unknown_group_before_upgrade() {
        let (_store, app) = app();
        let (status, body) = request(app, "/ws/chat/nowhere", Some("alice")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn ws_rejects_private_group_outsider() {
        let (_store, app) = app();
        let (status, _) = request(app, "/ws/chat/secret?user=bob", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn ws_admitted_without_upgrade_headers_is_a_bad_request() {
        let (_store, app) = app();
        let (status, _) = request(app, "/ws/chat/lobby", Some("alice")).await;
        assert!(status.is_client_error());
        assert_ne!(status, StatusCode::NOT_FOUND);
        assert_ne!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn history_returns_rendered_messages() {
        let (store, app) = app();
        let lobby = GroupId::from("lobby");
        for body in ["one", "two", "three"] {
            let _ = store.create_message(&lobby, &UserId::from("alice"), body).unwrap();
        }

        let (status, body) = request(app, "/groups/lobby/messages?limit=2", Some("bob")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["group_id"], "lobby");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        let last: serde_json::Value = serde_json::from_str(messages[1].as_str().unwrap()).unwrap();
        assert_eq!(last["body"], "three");
        assert_eq!(last["own"], false);
    }

    #[tokio::test]
    async fn history_rejects_bad_limit() {
        let (_store, app) = app();
        let (status, body) = request(app, "/groups/lobby/messages?limit=lots", Some("bob")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "malformed_input");
    }

    #[tokio::test]
    async fn post_message_stores_and_renders_for_author() {
        let (store, app) = app();
        let (status, body) =
            post(app, "/groups/lobby/messages", Some("alice"), r#"{"body":"over http"}"#).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["group_id"], "lobby");
        let message: serde_json::Value =
            serde_json::from_str(body["message"].as_str().unwrap()).unwrap();
        assert_eq!(message["body"], "over http");
        assert_eq!(message["author"], "alice");
        assert_eq!(message["own"], true);

        let stored = store.recent_messages(&GroupId::from("lobby"), 30).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].author, UserId::from("alice"));
    }

    #[tokio::test]
    async fn post_message_is_checked_like_a_connection() {
        let (store, app) = app();
        let cases = [
            ("/groups/lobby/messages", None, r#"{"body":"x"}"#, StatusCode::UNAUTHORIZED),
            ("/groups/nowhere/messages", Some("alice"), r#"{"body":"x"}"#, StatusCode::NOT_FOUND),
            ("/groups/secret/messages", Some("bob"), r#"{"body":"x"}"#, StatusCode::FORBIDDEN),
            ("/groups/lobby/messages", Some("alice"), r#"{"body":""}"#, StatusCode::BAD_REQUEST),
            ("/groups/lobby/messages", Some("alice"), "not json", StatusCode::BAD_REQUEST),
        ];
        for (uri, user, body, expected) in cases {
            let (status, _) = post(app.clone(), uri, user, body).await;
            assert_eq!(status, expected, "{uri} {user:?} {body}");
        }
        assert!(store
            .recent_messages(&GroupId::from("lobby"), 30)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn metrics_route_needs_a_recorder() {
        let (store, app) = app();
        let (status, _) = request(app, "/metrics", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let app = build_router(state(store).with_metrics(handle));
        let resp = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (_store, app) = app();
        let (status, _) = request(app, "/nonexistent", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn error_statuses() {
        let cases = [
            (ChatError::NotFound("g".into()), StatusCode::NOT_FOUND),
            (ChatError::Forbidden("g".into()), StatusCode::FORBIDDEN),
            (ChatError::MalformedInput("x".into()), StatusCode::BAD_REQUEST),
            (ChatError::Store("io".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(error_response(&error).status(), status);
        }
    }
}
