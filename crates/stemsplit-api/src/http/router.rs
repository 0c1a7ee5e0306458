//! Router construction and server host for the API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{Method, Request, header::CONTENT_TYPE},
    routing::{get, post},
};
use stemsplit_events::EventBus;
use stemsplit_jobs::JobService;
use stemsplit_telemetry::{Metrics, build_sha};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{Span, info};

use crate::http::catalog::list_models;
use crate::http::constants::HEADER_REQUEST_ID;
use crate::http::health::{health, metrics, root};
use crate::http::separate::separate;
use crate::http::telemetry::HttpMetricsLayer;
use crate::state::ApiState;

/// Headroom added on top of the upload cap so the explicit 413 mapping in the
/// handler answers instead of the generic body-limit rejection.
const BODY_LIMIT_HEADROOM: u64 = 1024 * 1024;

/// Axum router wrapper hosting the separation API.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Construct the server with shared dependencies wired through state.
    #[must_use]
    pub fn new(
        jobs: JobService,
        events: EventBus,
        telemetry: Metrics,
        max_upload_bytes: u64,
    ) -> Self {
        let state = Arc::new(ApiState::new(
            jobs,
            telemetry.clone(),
            events,
            max_upload_bytes,
        ));

        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE]);
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(HEADER_REQUEST_ID)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    route = %request.uri().path(),
                    request_id = %request_id,
                    build_sha = %build_sha(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty
                )
            })
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &Span| {
                    span.record("status_code", response.status().as_u16());
                    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                    span.record("latency_ms", latency_ms);
                },
            );
        let layered = ServiceBuilder::new()
            .layer(stemsplit_telemetry::propagate_request_id_layer())
            .layer(stemsplit_telemetry::set_request_id_layer())
            .layer(trace_layer)
            .layer(HttpMetricsLayer::new(telemetry));

        let body_limit = usize::try_from(max_upload_bytes.saturating_add(BODY_LIMIT_HEADROOM))
            .unwrap_or(usize::MAX);
        let router = Router::new()
            .route("/", get(root))
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .route("/models", get(list_models))
            .route("/separate", post(separate))
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(cors_layer)
            .route_layer(layered)
            .with_state(state);

        Self { router }
    }

    /// Bind `addr` and serve until the process is stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or the server loop fails.
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local = listener.local_addr().context("failed to read bound address")?;
        info!(addr = %local, "api listening");
        axum::serve(listener, self.router)
            .await
            .context("api server terminated")
    }
}
