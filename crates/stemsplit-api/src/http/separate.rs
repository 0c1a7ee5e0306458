//! Upload-and-separate endpoint.
//!
//! `POST /separate` accepts a multipart form with an `audio` file part and an
//! optional `stems` field, runs the job pipeline, and streams the resulting
//! archive back. The job's workspace is tied to the response body via a
//! drop-guard, so reclamation happens only after the stream ends — whether the
//! client read it fully or hung up.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, State, multipart::MultipartError},
    http::{StatusCode, header},
    response::Response,
};
use futures_core::Stream;
use stemsplit_jobs::{DeferredReclaim, Delivery, JobError, JobService, StemCount};
use tokio_util::io::ReaderStream;
use tracing::{error, info};

use crate::http::constants::CONTENT_TYPE_ZIP;
use crate::http::errors::ApiError;
use crate::state::ApiState;

/// Default stem configuration when the form omits the `stems` field.
const DEFAULT_STEMS: StemCount = StemCount::Two;

struct UploadForm {
    filename: String,
    stems: StemCount,
    payload: Bytes,
}

/// `POST /separate` request handler.
pub(crate) async fn separate(
    State(state): State<Arc<ApiState>>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = read_form(multipart, state.max_upload_bytes).await?;
    info!(
        filename = %form.filename,
        stems = form.stems.as_u8(),
        bytes = form.payload.len(),
        "separation requested"
    );

    let completed = match state
        .jobs
        .run(form.filename, form.stems, &form.payload)
        .await
    {
        Ok(completed) => {
            state.remove_degraded_component("workspace_root");
            completed
        }
        Err(err) => {
            // Environment-level failures mean the workspace root itself is
            // unhealthy, not just this one job.
            if matches!(err, JobError::Resource { .. }) {
                state.add_degraded_component("workspace_root");
            }
            return Err(err.into());
        }
    };
    let delivery = state.jobs.deliver(completed);
    stream_archive(delivery).await
}

/// Reads the multipart form, validating in the documented order: filename
/// present, extension supported, stem count supported, payload within the cap.
async fn read_form(mut multipart: Multipart, max_bytes: u64) -> Result<UploadForm, ApiError> {
    let mut filename = None;
    let mut stems_raw = None;
    let mut payload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(&err, "malformed multipart body"))?
    {
        let name = field.name().map(ToString::to_string);
        match name.as_deref() {
            Some("audio") => {
                let upload_name = field.file_name().map(ToString::to_string).ok_or_else(|| {
                    ApiError::bad_request("audio: upload with a filename is required")
                })?;
                // Filename and extension are rejected before the body is
                // buffered, so a bad upload never costs a full read.
                JobService::validate_upload(&upload_name)?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| multipart_error(&err, "unreadable upload"))?;
                filename = Some(upload_name);
                payload = Some(bytes);
            }
            Some("stems") => {
                stems_raw = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| multipart_error(&err, "unreadable stems field"))?,
                );
            }
            _ => {}
        }
    }

    let filename =
        filename.ok_or_else(|| ApiError::bad_request("audio: upload with a filename is required"))?;
    let payload =
        payload.ok_or_else(|| ApiError::bad_request("audio: upload with a filename is required"))?;

    let stems = match stems_raw {
        Some(raw) => {
            let value = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ApiError::bad_request("stems: must be one of 2, 4 or 5"))?;
            JobService::parse_stems(value)?
        }
        None => DEFAULT_STEMS,
    };

    if u64::try_from(payload.len()).unwrap_or(u64::MAX) > max_bytes {
        return Err(ApiError::payload_too_large(format!(
            "upload exceeds {max_bytes} bytes"
        )));
    }

    Ok(UploadForm {
        filename,
        stems,
        payload,
    })
}

/// Map a multipart failure onto the problem taxonomy. Length-limit failures
/// carry a 413 status from the extractor and must keep it; everything else is
/// a malformed request.
fn multipart_error(err: &MultipartError, context: &str) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large(format!("{context}: {err}"))
    } else {
        ApiError::bad_request(format!("{context}: {err}"))
    }
}

async fn stream_archive(delivery: Delivery) -> Result<Response, ApiError> {
    let Delivery {
        job,
        archive_path,
        archive_name,
        archive_bytes,
        guard,
    } = delivery;

    let file = tokio::fs::File::open(&archive_path).await.map_err(|err| {
        error!(job_id = %job.id, error = %err, "archive vanished before delivery");
        ApiError::internal("archive unavailable")
    })?;
    let stream = GuardedStream {
        inner: ReaderStream::new(file),
        _guard: guard,
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, CONTENT_TYPE_ZIP)
        .header(header::CONTENT_LENGTH, archive_bytes)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{archive_name}\""),
        )
        .body(Body::from_stream(stream))
        .map_err(|err| {
            error!(job_id = %job.id, error = %err, "failed to build delivery response");
            ApiError::internal("failed to build delivery response")
        })
}

/// Response body stream holding the workspace's reclamation guard. The guard
/// drops — and schedules cleanup — when the body is finished or abandoned.
struct GuardedStream {
    inner: ReaderStream<tokio::fs::File>,
    _guard: DeferredReclaim,
}

impl Stream for GuardedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}
