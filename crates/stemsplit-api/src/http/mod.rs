//! HTTP surface modules (router, handlers, middleware).

/// Model catalog endpoint.
pub(crate) mod catalog;
/// Shared constants and header names.
pub(crate) mod constants;
/// Problem response helpers and error types.
pub(crate) mod errors;
/// Health and diagnostics endpoints.
pub(crate) mod health;
/// Router construction and server host.
pub(crate) mod router;
/// Upload-and-separate endpoint.
pub(crate) mod separate;
/// Metrics middleware for HTTP requests.
pub(crate) mod telemetry;
