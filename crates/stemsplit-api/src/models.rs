//! Shared HTTP DTOs for the public API.

use serde::{Deserialize, Serialize};

/// RFC9457-compatible problem document surfaced on validation/runtime errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// Problem type identifier.
    #[serde(rename = "type")]
    pub kind: String,
    /// Short human-readable summary, constant per problem type.
    pub title: String,
    /// HTTP status code mirrored into the body.
    pub status: u16,
    /// Occurrence-specific detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One entry of the model catalog surfaced by `GET /models`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelEntry {
    /// Number of stems the configuration separates into.
    pub stems: u8,
    /// Pretrained model name.
    pub name: String,
    /// Human description of the stems produced.
    pub description: String,
}

/// Response body of `GET /models`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCatalog {
    /// Supported configurations in ascending stem order.
    pub models: Vec<ModelEntry>,
}
