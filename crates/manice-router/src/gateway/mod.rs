//! Gateway - HTTP API for the Excel add-in

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, KeepAliveStream, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::envelope::{handle, ManiceRequest, ManiceResponse};
use crate::health::HealthProbe;
use crate::router::{Generation, Router as ModelRouter, RouterError};

const SERVICE_NAME: &str = "Manice AI Backend";

type EventStream = BoxStream<'static, Result<Event, axum::Error>>;

/// API errors with HTTP mapping
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        let message = match self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) | ApiError::Validation(msg) => msg,
        };

        let body = json!({
            "error": message,
            "timestamp": Utc::now(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Shared state behind every handler
#[derive(Debug)]
pub struct AppState {
    pub config: Config,
    pub router: ModelRouter,
    pub health: HealthProbe,
    started: Instant,
    requests: AtomicU64,
}

impl AppState {
    pub fn new(config: Config, router: ModelRouter, health: HealthProbe) -> Self {
        Self {
            config,
            router,
            health,
            started: Instant::now(),
            requests: AtomicU64::new(0),
        }
    }

    /// Build the router and health probe from configuration, sharing one HTTP client
    pub fn from_config(config: Config) -> Result<Self, RouterError> {
        let client = reqwest::Client::new();
        let router = ModelRouter::from_config(&config, client.clone())?;
        let health = HealthProbe::new(config.endpoints(), client);
        Ok(Self::new(config, router, health))
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Assemble the HTTP application
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/manice", post(manice))
        .route("/manice/stream", post(manice_stream))
        .route("/stats", get(stats))
        .route("/config", get(show_config))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), track_request))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Main server
pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    pub fn new(config: Config) -> Result<Self, RouterError> {
        Ok(Self {
            state: Arc::new(AppState::from_config(config)?),
        })
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    pub async fn run(&self) -> std::io::Result<()> {
        let addr = self.state.config.bind_address();
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        tracing::info!(
            address = %addr,
            provider = %self.state.router.provider(),
            large_model = %self.state.config.large_model.identifier,
            small_model = %self.state.config.small_model.identifier,
            "Manice server listening"
        );

        axum::serve(listener, app(self.state.clone()))
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutting down");
}

/// Count requests and stamp each response with an id and its processing time
async fn track_request(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    state.requests.fetch_add(1, Ordering::Relaxed);
    let request_id = Uuid::new_v4().to_string();
    let started = Instant::now();

    let mut response = next.run(request).await;

    let elapsed = format!("{:.4}", started.elapsed().as_secs_f64());
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert("x-request-id", value);
    }
    if let Ok(value) = HeaderValue::from_str(&elapsed) {
        headers.insert("x-process-time", value);
    }
    response
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "docs": {
            "POST /manice": "Process an instruction",
            "POST /manice/stream": "Process an instruction with streamed output",
            "GET /health": "Provider availability",
            "GET /stats": "Usage counters",
        },
    }))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let report = state.health.report().await;
    Json(json!({
        "status": report.status(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": state.uptime_seconds(),
        "providers": report,
        "models": {
            "large_model": state.config.large_model.identifier,
            "small_model": state.config.small_model.identifier,
        },
        "timestamp": Utc::now(),
    }))
}

async fn manice(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ManiceRequest>, JsonRejection>,
) -> ApiResult<Json<ManiceResponse>> {
    let Json(request) = payload?;
    tracing::info!(
        instruction_len = request.instruction.len(),
        forced = ?request.force_model,
        "Processing instruction"
    );
    Ok(Json(handle(&state.router, request).await))
}

async fn manice_stream(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ManiceRequest>, JsonRejection>,
) -> ApiResult<Sse<KeepAliveStream<EventStream>>> {
    let Json(request) = payload?;
    if !request.stream {
        return Err(ApiError::BadRequest(
            "Stream parameter must be true".to_string(),
        ));
    }

    let generation = state
        .router
        .stream(&request.instruction, request.force_model, request.context())
        .await;

    let events: EventStream = match generation {
        Generation::Stream(fragments) => fragments
            .map(|fragment| match fragment {
                Ok(text) => Event::default().json_data(json!({ "chunk": text })),
                Err(e) => {
                    tracing::warn!(error = %e, "Stream interrupted");
                    Event::default().json_data(json!({ "error": e.to_string() }))
                }
            })
            .chain(stream::once(async { done_event() }))
            .boxed(),
        Generation::Complete(result) => stream::iter([
            Event::default().json_data(json!({ "chunk": result.content })),
            done_event(),
        ])
        .boxed(),
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn done_event() -> Result<Event, axum::Error> {
    Event::default().json_data(json!({ "done": true }))
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "uptime_seconds": state.uptime_seconds(),
        "total_requests": state.request_count(),
        "router": state.router.stats(),
        "cache": state.router.cache_stats(),
        "models": {
            "large_model": state.config.large_model.identifier,
            "small_model": state.config.small_model.identifier,
        },
        "preferred_provider": state.router.provider(),
        "timestamp": Utc::now(),
    }))
}

async fn show_config(State(state): State<Arc<AppState>>) -> ApiResult<Json<Config>> {
    if !state.config.debug {
        return Err(ApiError::NotFound("Endpoint not found".to_string()));
    }
    Ok(Json(state.config.clone()))
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Endpoint not found".to_string())
}
