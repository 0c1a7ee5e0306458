//! Separation job lifecycle: workspaces, tool invocation, output resolution,
//! archiving, and reclamation.
//!
//! # Design
//! - One private workspace per job; jobs never observe each other's files.
//! - The separation tool is an opaque child process under a hard deadline.
//! - Cleanup is deferred past delivery via a drop-guard and a worker task;
//!   the startup sweep covers anything a crash leaves behind.
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

mod archiver;
mod error;
mod invoker;
mod model;
mod reclaim;
mod resolver;
mod service;
mod sweeper;
mod workspace;

pub use archiver::archive;
pub use error::{JobError, JobResult};
pub use invoker::SeparationInvoker;
pub use model::{Job, JobState, SeparationResult, StemCount, TrackSet};
pub use reclaim::{DeferredReclaim, ReclaimQueue, ReclaimWorker, spawn_reclaim_worker};
pub use resolver::{Resolution, TRACK_EXTENSIONS, resolve};
pub use service::{CompletedJob, Delivery, JobService, UPLOAD_EXTENSIONS};
pub use sweeper::sweep;
pub use workspace::{OUTPUT_DIR_NAME, Workspace, WorkspaceAllocator};
