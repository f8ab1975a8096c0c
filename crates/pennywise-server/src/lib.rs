//! Pennywise Web Server
//!
//! Axum-based REST API over the Pennywise transaction engine.
//!
//! Security features:
//! - Owner scoping via the `x-owner-id` header set by the upstream auth layer
//! - Restrictive CORS policy
//! - Input validation (pagination limits, upload size limits)
//! - Sanitized error responses

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use pennywise_core::ai::AIBackend;
use pennywise_core::Pipeline;

mod handlers;

/// Maximum backup upload size (10 MB)
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Header carrying the authenticated owner id
pub const OWNER_HEADER: &str = "x-owner-id";

const MAX_OWNER_LEN: usize = 128;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Reject requests without an owner header (secure by default)
    pub require_owner: bool,
    /// Owner used when the header is absent and `require_owner` is off
    pub default_owner: String,
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            require_owner: true,
            default_owner: "default".to_string(),
            allowed_origins: vec![],
        }
    }
}

/// Shared application state
pub struct AppState {
    pub pipeline: Pipeline,
    pub config: ServerConfig,
}

/// Owner resolved for the current request
#[derive(Clone, Debug)]
pub struct Owner(pub String);

/// Resolve the request owner and attach it as an extension
async fn owner_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == "/api/health" {
        return next.run(request).await;
    }

    let header_value = request
        .headers()
        .get(OWNER_HEADER)
        .map(|v| v.to_str().map(str::to_string));

    let owner = match header_value {
        Some(Ok(raw)) => match validate_owner(&raw) {
            Some(owner) => owner,
            None => {
                warn!(path = %request.uri().path(), "Rejected malformed owner header");
                return AppError::bad_request("Invalid owner id").into_response();
            }
        },
        Some(Err(_)) => {
            return AppError::bad_request("Invalid owner id").into_response();
        }
        None if state.config.require_owner => {
            warn!(path = %request.uri().path(), "Request without owner header");
            return AppError::unauthorized("Owner header required").into_response();
        }
        None => state.config.default_owner.clone(),
    };

    request.extensions_mut().insert(Owner(owner));
    next.run(request).await
}

/// Trimmed owner id, or None when empty, too long or containing control characters
pub fn validate_owner(raw: &str) -> Option<String> {
    let owner = raw.trim();
    if owner.is_empty() || owner.chars().count() > MAX_OWNER_LEN {
        return None;
    }
    if owner.chars().any(char::is_control) {
        return None;
    }
    Some(owner.to_string())
}

/// Success response
#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Create the application router
pub fn create_router(pipeline: Pipeline, config: ServerConfig) -> Router {
    let state = Arc::new(AppState {
        pipeline,
        config: config.clone(),
    });

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        // SMS ingestion and raw item maintenance
        .route("/sms", get(handlers::list_sms).post(handlers::ingest_sms))
        .route("/sms/stats", get(handlers::sms_stats))
        .route("/sms/reprocess", post(handlers::reprocess_sms))
        .route("/sms/:id", get(handlers::get_sms).delete(handlers::delete_sms))
        // Backup files
        .route("/backup/upload", post(handlers::upload_backup))
        .route("/backup/validate", post(handlers::validate_backup))
        // Transactions
        .route(
            "/transactions",
            get(handlers::list_transactions).post(handlers::create_transaction),
        )
        .route(
            "/transactions/:id",
            get(handlers::get_transaction)
                .patch(handlers::update_transaction)
                .delete(handlers::delete_transaction),
        )
        // Enrichment and reporting
        .route("/enrich", post(handlers::run_enrichment))
        .route("/analytics/summary", get(handlers::analytics_summary))
        .route("/export/:format", get(handlers::export_transactions));

    // Build CORS layer
    let owner_header = HeaderName::from_static(OWNER_HEADER);
    let cors = if config.allowed_origins.is_empty() {
        // Restrictive default: only allow same-origin
        CorsLayer::new()
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, owner_header])
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, owner_header])
    };

    // JSON-only API; nothing is rendered in a browser context
    let csp_value = HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'");

    // Base64 inflates uploads by a third, plus the JSON envelope
    let body_limit = MAX_UPLOAD_SIZE / 3 * 4 + 64 * 1024;

    Router::new()
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            owner_middleware,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Security headers
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_XSS_PROTECTION,
            HeaderValue::from_static("1; mode=block"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            csp_value,
        ))
}

/// Start the server with default configuration
pub async fn serve(pipeline: Pipeline, host: &str, port: u16) -> anyhow::Result<()> {
    serve_with_config(pipeline, host, port, ServerConfig::default()).await
}

/// Start the server with custom configuration
pub async fn serve_with_config(
    pipeline: Pipeline,
    host: &str,
    port: u16,
    config: ServerConfig,
) -> anyhow::Result<()> {
    if !config.require_owner {
        warn!(
            "⚠️  Owner header not required - all requests act as '{}'",
            config.default_owner
        );
    }

    check_ai_connection(&pipeline).await;

    let app = create_router(pipeline, config);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Log AI backend connection status
async fn check_ai_connection(pipeline: &Pipeline) {
    match pipeline.classifier().ai() {
        Some(client) => {
            if client.health_check().await {
                info!(
                    "✅ AI backend connected: {} ({})",
                    client.host(),
                    client.model()
                );
            } else {
                warn!(
                    "⚠️  AI backend configured but not responding: {} ({})",
                    client.host(),
                    client.model()
                );
            }
        }
        None => {
            info!("ℹ️  AI backend not configured (fallback extraction only)");
        }
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn not_found(msg: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn unauthorized(msg: &str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn payload_too_large(msg: &str) -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn internal(msg: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl From<pennywise_core::Error> for AppError {
    fn from(err: pennywise_core::Error) -> Self {
        use pennywise_core::Error;
        match err {
            Error::NotFound(what) => Self::not_found(&format!("Not found: {}", what)),
            Error::InvalidData(msg)
            | Error::UnsupportedFileKind(msg)
            | Error::AdapterParse(msg) => Self::bad_request(&msg),
            other => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                // Return generic message to client
                message: "An internal error occurred".to_string(),
                // Keep full error for logging
                internal: Some(other.into()),
            },
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "An internal error occurred".to_string(),
            internal: Some(err),
        }
    }
}
