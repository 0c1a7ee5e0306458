//! Shared HTTP constants (headers, problem URIs, media types).

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";

pub(crate) const PROBLEM_INTERNAL: &str = "https://stemsplit.dev/problems/internal";
pub(crate) const PROBLEM_BAD_REQUEST: &str = "https://stemsplit.dev/problems/bad-request";
pub(crate) const PROBLEM_PAYLOAD_TOO_LARGE: &str =
    "https://stemsplit.dev/problems/payload-too-large";
pub(crate) const PROBLEM_SEPARATION_TIMEOUT: &str =
    "https://stemsplit.dev/problems/separation-timeout";

pub(crate) const CONTENT_TYPE_ZIP: &str = "application/zip";
pub(crate) const CONTENT_TYPE_PROMETHEUS: &str = "text/plain; version=0.0.4";
