//! HTTP API server
//!
//! Maps requests onto the reconciler, interface control and auth. Every
//! route except health and login sits behind [`auth::require_auth`].

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use wgui_common::{
    render_client_config, Error, ErrorKind, JsonFileStore, PeerPatch, PeerRecord, ProcessExecutor,
    Reconciler, WgController,
};

use crate::auth::{self, AuthManager, LoginFailure};
use crate::config::DaemonConfig;
use crate::interface::InterfaceControl;

/// Shared server state
pub struct AppState {
    pub engine: Reconciler,
    pub interface: InterfaceControl,
    pub auth: AuthManager,
    pub config: DaemonConfig,
}

impl AppState {
    /// Wire the production backends described by `config`.
    ///
    /// Also returns the administrator password when one was generated.
    pub fn from_config(config: DaemonConfig) -> anyhow::Result<(Self, Option<String>)> {
        let exec = Arc::new(ProcessExecutor::new(config.wireguard.command_timeout()));
        let runtime = Arc::new(WgController::new(config.wireguard.interface.clone(), exec.clone()));
        let store = Arc::new(JsonFileStore::new(config.registry_path()));
        let (auth, generated) =
            AuthManager::load_or_init(&config.credentials_path(), config.auth.clone())?;

        let state = Self {
            engine: Reconciler::new(store, runtime),
            interface: InterfaceControl::new(&config.wireguard, exec),
            auth,
            config,
        };
        Ok((state, generated))
    }
}

/// Error wrapper rendered as `{"error", "kind"}`
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation | ErrorKind::Format => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::ExternalTool if self.0.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::ExternalTool => StatusCode::BAD_GATEWAY,
            ErrorKind::Storage | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self.0);
        }
        let body = json!({
            "error": self.0.to_string(),
            "kind": self.0.kind().as_str(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the router
pub fn router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.backup.max_upload_bytes;

    let protected_routes = Router::new()
        .route("/api/auth/logout", post(logout_handler))
        .route("/api/auth/password", put(change_password_handler))
        .route("/api/server/status", get(server_status_handler))
        .route("/api/server/keys", put(server_keys_handler))
        .route("/api/server/port", put(server_port_handler))
        .route("/api/server/restart", post(server_restart_handler))
        .route("/api/peers", get(list_peers_handler).post(create_peer_handler))
        .route("/api/peers/status", get(peer_status_handler))
        .route("/api/peers/drift", get(peer_drift_handler))
        .route("/api/peers/import", post(import_peers_handler))
        .route(
            "/api/peers/:name",
            put(update_peer_handler).delete(delete_peer_handler),
        )
        .route("/api/peers/:name/enable", post(enable_peer_handler))
        .route("/api/peers/:name/disable", post(disable_peer_handler))
        .route("/api/peers/:name/config", get(peer_config_handler))
        .route("/api/backup", get(backup_handler))
        .route(
            "/api/backup/restore",
            post(restore_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_auth));

    let app = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/auth/login", post(login_handler))
        .merge(protected_routes);

    let app = match &state.config.static_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app.fallback(not_found_handler),
    };

    app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// Start the API server
pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr: SocketAddr = state.config.listen.parse()?;
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok", "version": wgui_common::VERSION}))
}

async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "Not found", "kind": ErrorKind::NotFound.as_str()})),
    )
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    password: String,
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Response {
    match state.auth.login(&req.password, auth::now_epoch_secs()) {
        Ok(session) => {
            let cookie = Cookie::build((auth::SESSION_COOKIE, session.token.clone()))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Strict)
                .secure(state.config.auth.secure_cookie);
            info!("Administrator logged in");
            (jar.add(cookie), Json(session)).into_response()
        }
        Err(LoginFailure::Locked { until }) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Too many failed login attempts",
                "kind": ErrorKind::Unauthorized.as_str(),
                "lockedUntil": until,
            })),
        )
            .into_response(),
        Err(LoginFailure::InvalidPassword) => {
            warn!("Failed login attempt");
            ApiError(Error::Unauthorized("Invalid password".to_string())).into_response()
        }
    }
}

async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> impl IntoResponse {
    if let Some(token) = auth::request_token(&headers) {
        state.auth.logout(&token);
    }
    (
        jar.remove(Cookie::build(auth::SESSION_COOKIE).path("/")),
        Json(json!({"status": "logged_out"})),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest {
    #[serde(default)]
    current_password: String,
    #[serde(default)]
    new_password: String,
}

async fn change_password_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<Json<Value>> {
    let token = auth::request_token(&headers);
    state
        .auth
        .change_password(&req.current_password, &req.new_password, token.as_deref())?;
    Ok(Json(json!({"status": "password_changed"})))
}

// ============================================================================
// Server
// ============================================================================

async fn server_status_handler(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.interface.status().await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeysRequest {
    #[serde(default)]
    rotate: bool,
    #[serde(default)]
    private_key: Option<String>,
}

async fn server_keys_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KeysRequest>,
) -> ApiResult<Json<Value>> {
    let private_key = match (req.private_key, req.rotate) {
        (Some(key), _) => Some(key),
        (None, true) => None,
        (None, false) => {
            return Err(Error::Validation("Provide privateKey or set rotate".to_string()).into())
        }
    };
    let public_key = state.interface.set_private_key(private_key).await?;
    Ok(Json(json!({"publicKey": public_key})))
}

#[derive(Debug, Deserialize)]
struct PortRequest {
    #[serde(default)]
    port: Option<i64>,
}

async fn server_port_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PortRequest>,
) -> ApiResult<Json<Value>> {
    let port = req
        .port
        .ok_or_else(|| Error::Validation("Missing fields: port".to_string()))?;
    let port = state.interface.set_port(port).await?;
    Ok(Json(json!({"port": port})))
}

async fn server_restart_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    state.interface.restart().await?;
    Ok(Json(json!({"status": "restarted"})))
}

// ============================================================================
// Peers
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreatePeerRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    ips: Vec<String>,
}

async fn list_peers_handler(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.list().await?))
}

async fn create_peer_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePeerRequest>,
) -> ApiResult<(StatusCode, Json<PeerRecord>)> {
    let peer = state.engine.create(&req.name, req.ips).await?;
    Ok((StatusCode::CREATED, Json(peer)))
}

async fn peer_status_handler(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.runtime_status().await?))
}

async fn peer_drift_handler(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.detect_drift().await?))
}

async fn import_peers_handler(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.import_from_runtime().await?))
}

async fn update_peer_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(patch): Json<PeerPatch>,
) -> ApiResult<Json<PeerRecord>> {
    Ok(Json(state.engine.update(&name, patch).await?))
}

async fn delete_peer_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    state.engine.delete(&name).await?;
    Ok(Json(json!({"status": "deleted", "name": name})))
}

async fn enable_peer_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let outcome = state.engine.enable(&name).await?;
    Ok(Json(json!({"name": name, "outcome": outcome, "disabled": false})))
}

async fn disable_peer_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let outcome = state.engine.disable(&name).await?;
    Ok(Json(json!({"name": name, "outcome": outcome, "disabled": true})))
}

async fn peer_config_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let peer = state.engine.get(&name).await?;
    if peer.private_key.is_none() {
        return Err(Error::Validation(format!(
            "Private key not available for peer '{}'",
            peer.name
        ))
        .into());
    }
    let server_key = state.interface.public_key().await?;
    let config = render_client_config(&peer, &server_key, &state.config.client)?;

    let headers = [
        (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.conf\"", download_name(&peer.name)),
        ),
    ];
    Ok((headers, config).into_response())
}

/// Peer name reduced to characters safe inside a quoted header filename
fn download_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ============================================================================
// Backup
// ============================================================================

async fn backup_handler(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let payload = state.engine.export().await?;
    let disposition = format!("attachment; filename=\"{}\"", payload.file_name());
    Ok(([(header::CONTENT_DISPOSITION, disposition)], Json(payload)).into_response())
}

async fn restore_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let data = match read_upload(&state, request).await {
        Ok(data) => data,
        Err(rejection) => return rejection,
    };

    match state.engine.restore(&data).await {
        Ok(peers) => Json(json!({
            "status": "restored",
            "peers": peers.len(),
            "enabled": peers.iter().filter(|p| !p.disabled).count(),
        }))
        .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// Backup bytes from a multipart `file` field or the raw body
async fn read_upload(state: &Arc<AppState>, request: Request) -> Result<Bytes, Response> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |ct| ct.starts_with("multipart/form-data"));

    if !is_multipart {
        return Bytes::from_request(request, state)
            .await
            .map_err(IntoResponse::into_response);
    }

    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(IntoResponse::into_response)?;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(IntoResponse::into_response)?
    {
        if field.name() == Some("file") {
            return field.bytes().await.map_err(IntoResponse::into_response);
        }
    }

    Err(ApiError(Error::Format("multipart upload has no 'file' field".to_string())).into_response())
}
