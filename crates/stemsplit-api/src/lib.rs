//! HTTP API for the Stemsplit separation service.
//!
//! # Design
//! - Thin handlers over the job pipeline; all domain rules live in
//!   `stemsplit-jobs`.
//! - Errors surface as RFC9457 problem documents with stable type URIs.
//! - Delivery streams hold a reclamation guard so cleanup trails the response.
#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

mod http;
/// Shared HTTP DTOs.
pub mod models;
mod state;
#[cfg(test)]
mod testing;

pub use http::router::ApiServer;
