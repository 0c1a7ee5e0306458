//! # Design
//!
//! - Provide structured, constant-message errors for the job pipeline.
//! - Capture operation context (paths, fields, diagnostics) to make failures
//!   reproducible in tests.
//! - Preserve source errors without interpolating context into error messages.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for job pipeline operations.
pub type JobResult<T> = Result<T, JobError>;

/// Errors produced by the separation job pipeline.
#[derive(Debug, Error)]
pub enum JobError {
    /// Request-shape validation failures, rejected before any workspace exists.
    #[error("invalid job input")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Environment-level failures while preparing or using a workspace.
    #[error("workspace resource failure")]
    Resource {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The separation tool could not be launched.
    #[error("separation tool failed to start")]
    ToolSpawn {
        /// Executable that failed to spawn.
        program: String,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The separation tool exited with a non-zero status.
    #[error("separation tool failed")]
    ToolExecution {
        /// Exit code when the process was not killed by a signal.
        exit_code: Option<i32>,
        /// Captured diagnostic output (stderr, falling back to stdout).
        diagnostic: String,
    },
    /// The separation tool exceeded its wall-clock deadline and was killed.
    #[error("separation tool deadline exceeded")]
    ToolTimeout {
        /// Deadline that was enforced.
        deadline: Duration,
    },
    /// No track directory could be located under the tool's output tree.
    #[error("separation output not found")]
    OutputNotFound {
        /// Primary path that was expected.
        expected: PathBuf,
        /// Number of subdirectory candidates found by the fallback.
        candidates: usize,
    },
    /// The located track directory contained no recognised audio files.
    #[error("no tracks produced")]
    NoTracksProduced {
        /// Track directory that was searched.
        track_dir: PathBuf,
    },
    /// Writing or verifying the delivery archive failed.
    #[error("archive write failure")]
    ArchiveWrite {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying zip error.
        source: zip::result::ZipError,
    },
    /// Traversal of an output tree failed.
    #[error("output traversal failure")]
    Walkdir {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
}

impl JobError {
    pub(crate) fn invalid_input(
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidInput {
            field,
            reason,
            value,
        }
    }

    pub(crate) fn resource(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: io::Error,
    ) -> Self {
        Self::Resource {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn archive(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: zip::result::ZipError,
    ) -> Self {
        Self::ArchiveWrite {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn walkdir(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: walkdir::Error,
    ) -> Self {
        Self::Walkdir {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Label used for outcome metrics and logs.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::Resource { .. } => "resource",
            Self::ToolSpawn { .. } => "tool_spawn",
            Self::ToolExecution { .. } => "tool_execution",
            Self::ToolTimeout { .. } => "tool_timeout",
            Self::OutputNotFound { .. } => "output_not_found",
            Self::NoTracksProduced { .. } => "no_tracks",
            Self::ArchiveWrite { .. } => "archive_write",
            Self::Walkdir { .. } => "walkdir",
        }
    }
}
