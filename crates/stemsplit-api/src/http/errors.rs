//! RFC9457-style API error wrapper.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use stemsplit_jobs::JobError;
use tracing::{error, warn};

use crate::http::constants::{
    PROBLEM_BAD_REQUEST, PROBLEM_INTERNAL, PROBLEM_PAYLOAD_TOO_LARGE, PROBLEM_SEPARATION_TIMEOUT,
};
use crate::models::ProblemDetails;

/// Structured API error rendered as an RFC9457 problem document.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    kind: &'static str,
    title: &'static str,
    pub(crate) detail: Option<String>,
}

impl ApiError {
    const fn new(status: StatusCode, kind: &'static str, title: &'static str) -> Self {
        Self {
            status,
            kind,
            title,
            detail: None,
        }
    }

    pub(crate) fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub(crate) fn internal(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            PROBLEM_INTERNAL,
            "internal server error",
        )
        .with_detail(detail)
    }

    pub(crate) fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, PROBLEM_BAD_REQUEST, "bad request").with_detail(detail)
    }

    pub(crate) fn payload_too_large(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            PROBLEM_PAYLOAD_TOO_LARGE,
            "payload too large",
        )
        .with_detail(detail)
    }

    pub(crate) fn separation_timeout(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::REQUEST_TIMEOUT,
            PROBLEM_SEPARATION_TIMEOUT,
            "separation deadline exceeded",
        )
        .with_detail(detail)
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match &err {
            JobError::InvalidInput { field, reason, .. } => {
                warn!(field, reason, "rejected separation request");
                Self::bad_request(format!("{field}: {reason}"))
            }
            JobError::ToolTimeout { deadline } => {
                warn!(deadline_secs = deadline.as_secs(), "separation timed out");
                Self::separation_timeout(format!(
                    "separation exceeded the {}s deadline",
                    deadline.as_secs()
                ))
            }
            JobError::ToolExecution { exit_code, .. } => {
                error!(exit_code = ?exit_code, "separation tool failed");
                Self::internal("separation tool failed")
            }
            JobError::OutputNotFound { .. } | JobError::NoTracksProduced { .. } => {
                error!(error = %err, outcome = err.outcome(), "separation produced no usable output");
                Self::internal("separation produced no usable output")
            }
            _ => {
                error!(error = %err, outcome = err.outcome(), "separation job failed");
                Self::internal("separation job failed")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ProblemDetails {
            kind: self.kind.to_string(),
            title: self.title.to_string(),
            status: self.status.as_u16(),
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}
