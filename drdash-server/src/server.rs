use crate::auth::require_token;
use crate::config::{AuthConfig, Config, HeadersConfig};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use drdash_core::{
    ArtifactRegistry, ArtifactRenderer, BackendIdentity, ClusterStatusReconciler, DashError,
    Database, DbWriteReadOperation, DbWriteReadOperationRequest, EventStore, KvStore,
    LastResultCache, MediaStore, MediaUploadOperation, MediaUploadOperationOutcome,
    MediaUploadOperationRequest, PngRenderer, ProbeAction, Result, SqliteArtifactRegistry,
    SqliteKvStore, StatusSnapshot, StatusSnapshotOperation, StatusSnapshotOperationRequest,
    format_probe_timestamp,
};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

pub struct ServerState {
    pub backend: BackendIdentity,
    pub auth: AuthConfig,
    pub headers: HeadersConfig,
    pub uploads_dir: PathBuf,
    pub events: Arc<EventStore>,
    pub db_write_read: DbWriteReadOperation,
    pub media_upload: MediaUploadOperation,
    pub status_snapshot: StatusSnapshotOperation,
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(default = "default_events_limit")]
    limit: usize,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    ok: Option<String>,
}

fn default_events_limit() -> usize {
    drdash_core::DEFAULT_STATUS_EVENT_TAIL
}

enum ApiError {
    BadRequest(String),
    Internal(DashError),
}

impl From<DashError> for ApiError {
    fn from(error: DashError) -> Self {
        Self::Internal(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal(error) => {
                tracing::error!("Request failed: {}", error);
                (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
            }
        };
        (status, Json(json!({ "ok": false, "error": message }))).into_response()
    }
}

pub async fn run_server(config: Config) -> Result<()> {
    let state = build_state(&config)?;

    tracing::info!(
        "Backend: {}, Bind: {}, Cluster endpoints: {}, Token header: {}",
        state.backend,
        config.bind_addr,
        config.cluster.endpoints.len(),
        state.auth.header
    );

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_state(config: &Config) -> Result<Arc<ServerState>> {
    let backend = BackendIdentity::resolve(config.backend_name.as_deref());

    let db = Database::open_in(&config.data_dir)?;
    tracing::info!("Opened database at {:?}", db.path());

    let kv: Arc<dyn KvStore> = Arc::new(SqliteKvStore::new(db.clone())?);
    let last_result = Arc::new(LastResultCache::new(kv.clone()));
    let events = Arc::new(EventStore::new(db.clone())?);

    let reconciler = Arc::new(ClusterStatusReconciler::new(
        config.cluster.endpoints.clone(),
        config.cluster.timeout(),
    )?);

    if !config.uploads.base_dir.is_dir() {
        tracing::warn!(
            "Upload directory {:?} does not exist yet; media probes will try to create it",
            config.uploads.base_dir
        );
    }
    if !PngRenderer::is_available() {
        tracing::warn!("Built without PNG rendering; media probes will fail");
    }

    let renderer: Arc<dyn ArtifactRenderer> = Arc::new(PngRenderer::new());
    let media_store = Arc::new(MediaStore::new(config.uploads.base_dir.clone()));
    let registry: Arc<dyn ArtifactRegistry> = Arc::new(SqliteArtifactRegistry::new(
        db,
        config.uploads.base_dir.clone(),
        config.uploads.base_url.clone(),
    )?);

    Ok(Arc::new(ServerState {
        backend,
        auth: config.auth.clone(),
        headers: config.headers.clone(),
        uploads_dir: config.uploads.base_dir.clone(),
        events: events.clone(),
        db_write_read: DbWriteReadOperation::new(kv, last_result.clone(), events.clone()),
        media_upload: MediaUploadOperation::new(
            renderer,
            media_store,
            registry,
            last_result.clone(),
            events.clone(),
        ),
        status_snapshot: StatusSnapshotOperation::new(last_result, reconciler, events)
            .with_event_tail(config.events.status_tail),
    }))
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    let probes = Router::new()
        .route("/api/db_write_read", post(db_write_read_handler))
        .route("/api/media_upload", post(media_upload_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler).post(status_handler))
        .route("/api/events", get(events_handler))
        .merge(probes)
        .nest_service("/uploads", ServeDir::new(&state.uploads_dir))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn probe_status(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let response = json!({
        "status": "ok",
        "backend": state.backend.as_str(),
        "timestamp": format_probe_timestamp(Utc::now()),
    });

    (StatusCode::OK, Json(response))
}

async fn status_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> std::result::Result<Json<StatusSnapshot>, ApiError> {
    let snapshot = state
        .status_snapshot
        .run(StatusSnapshotOperationRequest {
            backend: state.backend.clone(),
            frontend_header: header_value(&headers, &state.headers.frontend),
            backend_header: header_value(&headers, &state.headers.backend),
            now: Utc::now(),
        })
        .await?;

    Ok(Json(snapshot))
}

async fn db_write_read_handler(
    State(state): State<Arc<ServerState>>,
) -> std::result::Result<Response, ApiError> {
    let result = state
        .db_write_read
        .run(DbWriteReadOperationRequest {
            backend: state.backend.clone(),
            now: Utc::now(),
        })
        .await?;

    Ok((probe_status(result.ok), Json(result)).into_response())
}

async fn media_upload_handler(
    State(state): State<Arc<ServerState>>,
) -> std::result::Result<Response, ApiError> {
    let outcome = state
        .media_upload
        .run(MediaUploadOperationRequest {
            backend: state.backend.clone(),
            now: Utc::now(),
        })
        .await?;

    let response = match outcome {
        MediaUploadOperationOutcome::Completed(result) => {
            (probe_status(result.ok), Json(result)).into_response()
        }
        MediaUploadOperationOutcome::Failed(failure) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(failure)).into_response()
        }
    };
    Ok(response)
}

async fn events_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<EventsQuery>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let action = match query.action.as_deref().filter(|value| !value.is_empty()) {
        Some(raw) => Some(
            raw.parse::<ProbeAction>()
                .map_err(|_| ApiError::BadRequest(format!("unknown action: {}", raw)))?,
        ),
        None => None,
    };
    let ok = match query.ok.as_deref().filter(|value| !value.is_empty()) {
        Some(raw) => Some(parse_flag(raw).ok_or_else(|| {
            ApiError::BadRequest(format!("ok must be a boolean, got: {}", raw))
        })?),
        None => None,
    };

    let events = state.events.tail_filtered(query.limit, action, ok)?;
    Ok(Json(json!({ "ok": true, "events": events })))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
