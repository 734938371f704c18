//! HTTP surface of the service
//!
//! Routes under the configured API prefix:
//!
//! | Method | Path       | Purpose                                    |
//! |--------|------------|--------------------------------------------|
//! | GET    | `/health`  | Liveness, loaded models, device and memory |
//! | GET    | `/ready`   | 200 once every model is loaded, else 503   |
//! | GET    | `/models`  | Per-model identifiers and load state       |
//! | GET    | `/metrics` | Prometheus gauges and counters             |
//! | POST   | `/remove`  | Segment and erase an object                |
//! | POST   | `/fill`    | Segment and repaint an object from a prompt|
//! | POST   | `/replace` | Keep an object and regenerate the rest     |
//!
//! `/` and `/info` are served outside the prefix.

mod error;
mod extract;
mod responses;
mod routes;

pub use error::{ApiError, INTERNAL_ERROR_MESSAGE};
pub use extract::{ImageRequest, OperationParams};
pub use responses::{
    ErrorResponse, HealthResponse, InpaintResponse, ModelStatus, ModelStatusResponse,
};

use crate::context::AppContext;
use axum::{
    extract::{DefaultBodyLimit, Request},
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::{fmt, future::Future, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

/// Headroom for multipart framing and base64 expansion on top of the file limit
const BODY_LIMIT_OVERHEAD: usize = 1024 * 1024;

/// Identifier assigned to every request and echoed in `x-request-id`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(pub Uuid);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Build the application router around a shared context
pub fn router(ctx: Arc<AppContext>) -> Router {
    let config = ctx.config();
    let body_limit = config
        .limits
        .max_file_size
        .saturating_mul(2)
        .saturating_add(BODY_LIMIT_OVERHEAD);

    let api = Router::new()
        .route("/health", get(routes::health))
        .route("/ready", get(routes::ready))
        .route("/models", get(routes::models))
        .route("/metrics", get(routes::metrics))
        .route("/remove", post(routes::remove))
        .route("/fill", post(routes::fill))
        .route("/replace", post(routes::replace));

    let prefix = config.api_prefix.trim_end_matches('/');
    let app = if prefix.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(prefix, api)
    };

    app.route("/", get(routes::root))
        .route("/info", get(routes::info))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
            let request_id = req
                .extensions()
                .get::<RequestId>()
                .map(ToString::to_string)
                .unwrap_or_default();
            tracing::info_span!(
                "http_request",
                method = %req.method(),
                uri = %req.uri(),
                request_id = %request_id,
            )
        }))
        .layer(middleware::from_fn(assign_request_id))
        .with_state(ctx)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            },
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn assign_request_id(mut req: Request, next: Next) -> Response {
    let request_id = RequestId(Uuid::new_v4());
    req.extensions_mut().insert(request_id);
    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Serve the router on `listener` until `shutdown` resolves
///
/// # Errors
/// - Accept loop I/O failure
pub async fn serve<F>(
    ctx: Arc<AppContext>,
    listener: TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
