//! HTTP API gateway for Lorebook.
//!
//! Exposes the chat API over REST:
//!
//! - `GET  /health`                          — liveness + version
//! - `POST /v1/chat`                         — send a query, get a reply
//! - `POST /v1/chat/stream`                  — send a query, get an SSE stream
//! - `GET  /v1/conversations/{id}/history`   — transcript / context view
//!
//! Security layers:
//! - Bearer-token authentication on all /v1 routes
//! - Request body size limit (1 MB)
//! - In-memory sliding-window rate limiting
//! - HTTP trace logging
//!
//! Built on Axum for high performance async HTTP.

pub mod routes;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tracing::{info, warn};

use lorebook_chat::{ChatOrchestrator, ContextStore, PromptAssembler, PromptTemplate};
use lorebook_config::AppConfig;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<ChatOrchestrator>,
    pub api_tokens: Vec<String>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the full router: public health route plus the authenticated v1 API.
pub fn build_router(state: SharedState, rate_limit_per_minute: usize) -> Router {
    let v1 = routes::v1_router(state.clone())
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let rate_limiter = Arc::new(RateLimiter::new(
        rate_limit_per_minute,
        std::time::Duration::from_secs(60),
    ));

    // CORS: no cross-origin reads by default; explicit origins can be added
    // behind a proxy.
    let cors = tower_http::cors::CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB body limit
        .layer(middleware::from_fn(move |req, next| {
            let limiter = rate_limiter.clone();
            rate_limit_middleware(limiter, req, next)
        }))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Build the shared state from config: provider, retriever, context store,
/// template, transcript, orchestrator.
///
/// A missing or invalid prompt template aborts startup.
pub async fn build_state(config: &AppConfig) -> Result<SharedState, Box<dyn std::error::Error>> {
    let provider = lorebook_providers::build_from_config(config)?;
    let retriever = Arc::new(lorebook_retrieval::build_from_config(config, provider.clone()));

    let store = Arc::new(ContextStore::new(
        config.chat.system_prompt.clone(),
        config.chat.max_context_chars,
    ));

    let template = match &config.chat.template_path {
        Some(path) => PromptTemplate::load(path)?,
        None => PromptTemplate::builtin(),
    };

    let mut orchestrator = ChatOrchestrator::new(
        provider,
        retriever,
        store,
        PromptAssembler::new(template),
        &config.provider.model,
        config.provider.temperature,
    )
    .with_max_tokens(config.provider.max_tokens)
    .with_timeouts(
        std::time::Duration::from_secs(config.retrieval.timeout_secs),
        std::time::Duration::from_secs(config.provider.request_timeout_secs),
    )
    .with_reply_without_knowledge(config.chat.reply_without_knowledge);

    if config.transcript.enabled {
        let db_path = config.transcript_db_path();
        let transcript =
            lorebook_chat::SqliteTranscript::new(&db_path.display().to_string()).await?;
        orchestrator = orchestrator.with_transcript(Arc::new(transcript));
    }

    if config.gateway.api_tokens.is_empty() {
        warn!("No gateway.api_tokens configured — the v1 API is UNAUTHENTICATED");
    }

    Ok(Arc::new(GatewayState {
        orchestrator: Arc::new(orchestrator),
        api_tokens: config.gateway.api_tokens.clone(),
    }))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = build_state(&config).await?;
    let app = build_router(state, config.gateway.rate_limit_per_minute);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Auth ---

/// Bearer-token check for /v1 routes. An empty token list disables auth
/// (development mode).
async fn auth_middleware(
    axum::extract::State(state): axum::extract::State<SharedState>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    if state.api_tokens.is_empty() {
        return Ok(next.run(req).await);
    }

    let provided = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if state.api_tokens.iter().any(|t| t == token) => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

// --- Rate Limiter ---

/// Simple in-memory sliding-window rate limiter.
///
/// Tracks request timestamps per client key (bearer token or "anonymous").
/// Thread-safe via `std::sync::Mutex` (non-async, held briefly).
struct RateLimiter {
    max_requests: usize,
    window: std::time::Duration,
    clients: std::sync::Mutex<HashMap<String, Vec<std::time::Instant>>>,
}

impl RateLimiter {
    fn new(max_requests: usize, window: std::time::Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Check if the client is within rate limits. Returns `true` if allowed.
    fn check(&self, client_key: &str) -> bool {
        let now = std::time::Instant::now();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        // Periodic cleanup: if map grows too large, evict stale entries
        if clients.len() > 10_000 {
            clients.retain(|_, timestamps| {
                timestamps
                    .last()
                    .is_some_and(|t| now.duration_since(*t) < self.window)
            });
        }

        let timestamps = clients.entry(client_key.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_requests {
            return false;
        }

        timestamps.push(now);
        true
    }
}

/// Rate limiting middleware. The /health endpoint is exempt so monitoring
/// can poll it freely.
async fn rate_limit_middleware(
    limiter: Arc<RateLimiter>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let client_key = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "anonymous".to_string());

    if !limiter.check(&client_key) {
        warn!(client = %client_key.chars().take(20).collect::<String>(), "Rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(req).await)
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
