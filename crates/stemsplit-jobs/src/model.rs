//! Core job types: stem counts, lifecycle states, and per-job bookkeeping.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Supported stem configurations. The separation tool ships exactly these
/// three pretrained models; anything else is rejected before a workspace is
/// allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StemCount {
    /// Vocals and accompaniment.
    Two,
    /// Vocals, drums, bass and other.
    Four,
    /// Vocals, drums, bass, piano and other.
    Five,
}

impl StemCount {
    /// Parse a requested stem count, returning `None` outside {2, 4, 5}.
    #[must_use]
    pub const fn parse(value: u64) -> Option<Self> {
        match value {
            2 => Some(Self::Two),
            4 => Some(Self::Four),
            5 => Some(Self::Five),
            _ => None,
        }
    }

    /// Numeric stem count.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Two => 2,
            Self::Four => 4,
            Self::Five => 5,
        }
    }

    /// Model identifier passed to the separation tool via `-p`.
    #[must_use]
    pub fn model_id(self) -> String {
        format!("spleeter:{}stems-16kHz", self.as_u8())
    }

    /// Human description of the configuration, mirrored by the catalog endpoint.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Two => "Vocals and accompaniment",
            Self::Four => "Vocals, drums, bass, other",
            Self::Five => "Vocals, drums, bass, piano, other",
        }
    }
}

impl fmt::Display for StemCount {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.as_u8())
    }
}

/// Lifecycle states of a separation job.
///
/// `Created → Running → {Succeeded, Failed, TimedOut} → {Delivered, Discarded}
/// → Reclaimed`. The final hop to `Reclaimed` happens either synchronously on
/// error paths or via the deferred reclaim worker after delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum JobState {
    Created,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Delivered,
    Discarded,
    Reclaimed,
}

impl JobState {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Delivered => "delivered",
            Self::Discarded => "discarded",
            Self::Reclaimed => "reclaimed",
        }
    }
}

/// One upload-to-delivery unit of work. Owned exclusively by the request
/// handler that created it; never observed by another job.
#[derive(Debug, Clone)]
pub struct Job {
    /// Collision-resistant job identifier, doubling as the workspace name.
    pub id: Uuid,
    /// Original upload filename.
    pub filename: String,
    /// Upload base name with the extension stripped.
    pub base_name: String,
    /// Requested stem configuration.
    pub stems: StemCount,
    /// Absolute path of the private workspace.
    pub workspace_path: PathBuf,
    /// Current lifecycle state.
    pub state: JobState,
    /// When the job was created.
    pub started_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn new(
        id: Uuid,
        filename: String,
        base_name: String,
        stems: StemCount,
        workspace_path: PathBuf,
    ) -> Self {
        Self {
            id,
            filename,
            base_name,
            stems,
            workspace_path,
            state: JobState::Created,
            started_at: Utc::now(),
        }
    }

    /// Advance the lifecycle state, logging the transition.
    pub(crate) fn transition(&mut self, next: JobState) {
        info!(
            job_id = %self.id,
            from = self.state.as_str(),
            to = next.as_str(),
            "job state transition"
        );
        self.state = next;
    }
}

/// Outcome of one separation tool run. Consumed immediately; never persisted.
#[derive(Debug, Clone)]
pub struct SeparationResult {
    /// Process exit code, absent when killed by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Validated set of separated track files for one job.
#[derive(Debug, Clone)]
pub struct TrackSet {
    /// Directory the tracks live under; archive entries are relative to it.
    pub dir: PathBuf,
    /// Absolute paths of the recognised audio files, non-empty by contract.
    pub files: Vec<PathBuf>,
}
