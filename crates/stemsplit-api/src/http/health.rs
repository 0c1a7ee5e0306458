//! Health and diagnostics endpoints.

use std::sync::Arc;

use axum::{Json, body::Body, extract::State, http::StatusCode, response::Response};
use serde::Serialize;
use stemsplit_telemetry::build_sha;
use tracing::error;

use crate::http::constants::CONTENT_TYPE_PROMETHEUS;
use crate::http::errors::ApiError;
use crate::state::ApiState;

#[derive(Serialize)]
pub(crate) struct ServiceInfo {
    pub(crate) service: &'static str,
    pub(crate) build: String,
}

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) degraded: Vec<String>,
    pub(crate) active_jobs: i64,
    pub(crate) reclaim_queue_depth: i64,
}

/// `GET /` service banner.
pub(crate) async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "stemsplit",
        build: build_sha().to_string(),
    })
}

/// `GET /health` liveness and degradation report.
pub(crate) async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let snapshot = state.telemetry.snapshot();
    let degraded = state.current_health_degraded();
    let status = if degraded.is_empty() {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status,
        degraded,
        active_jobs: snapshot.active_jobs,
        reclaim_queue_depth: snapshot.reclaim_queue_depth,
    })
}

/// `GET /metrics` Prometheus text exposition.
pub(crate) async fn metrics(State(state): State<Arc<ApiState>>) -> Result<Response, ApiError> {
    match state.telemetry.render() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(axum::http::header::CONTENT_TYPE, CONTENT_TYPE_PROMETHEUS)
            .body(Body::from(body))
            .map_err(|err| {
                error!(error = %err, "failed to build metrics response");
                ApiError::internal("failed to build metrics response")
            }),
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            Err(ApiError::internal("failed to render metrics"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_state;
    use tempfile::TempDir;

    #[tokio::test]
    async fn health_reports_ok_until_degraded() {
        let temp = TempDir::new().expect("tempdir");
        let state = Arc::new(test_state(&temp));

        let Json(body) = health(State(Arc::clone(&state))).await;
        assert_eq!(body.status, "ok");
        assert!(body.degraded.is_empty());

        state.add_degraded_component("workspace_root");
        let Json(body) = health(State(state)).await;
        assert_eq!(body.status, "degraded");
        assert_eq!(body.degraded, vec!["workspace_root"]);
    }

    #[tokio::test]
    async fn metrics_render_in_text_format() {
        let temp = TempDir::new().expect("tempdir");
        let state = Arc::new(test_state(&temp));

        let response = metrics(State(state)).await.expect("metrics response");
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn root_identifies_the_service() {
        let Json(info) = root().await;
        assert_eq!(info.service, "stemsplit");
    }
}
