//! Workspace allocation and release.
//!
//! Each job owns a uniquely-named directory under a fixed root. Allocation is
//! the only fallible step surfaced to callers; release runs on cleanup paths
//! and therefore logs instead of propagating.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{JobError, JobResult};

/// Name of the subtree the separation tool writes into.
pub const OUTPUT_DIR_NAME: &str = "output";

/// Private, uniquely-named filesystem scope for one job.
#[derive(Debug, Clone)]
pub struct Workspace {
    id: Uuid,
    path: PathBuf,
}

impl Workspace {
    /// Identifier of the owning job.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Absolute path of the workspace directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path the uploaded input is stored at. Only the final path component of
    /// `filename` is used, so a hostile filename cannot escape the workspace.
    #[must_use]
    pub fn input_path(&self, filename: &str) -> PathBuf {
        let name = Path::new(filename)
            .file_name()
            .map_or_else(|| "input".into(), ToOwned::to_owned);
        self.path.join(name)
    }

    /// Directory the separation tool is pointed at via `-o`.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.path.join(OUTPUT_DIR_NAME)
    }

    /// Deterministic location of the delivery archive.
    #[must_use]
    pub fn archive_path(&self, base_name: &str) -> PathBuf {
        self.path.join(format!("{base_name}_separated.zip"))
    }
}

/// Creates and destroys per-job workspaces under a fixed root.
#[derive(Debug, Clone)]
pub struct WorkspaceAllocator {
    root: PathBuf,
}

impl WorkspaceAllocator {
    /// Construct an allocator rooted at `root`, creating the root if needed.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Resource`] if the root cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> JobResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|source| JobError::resource("workspace.root", &root, source))?;
        Ok(Self { root })
    }

    /// Root directory workspaces are created under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh workspace with a collision-resistant random name,
    /// including the empty output subtree.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Resource`] if the directories cannot be created,
    /// e.g. because the root is not writable.
    pub fn allocate(&self) -> JobResult<Workspace> {
        let id = Uuid::new_v4();
        let path = self.root.join(id.to_string());
        fs::create_dir(&path)
            .map_err(|source| JobError::resource("workspace.allocate", &path, source))?;
        let output = path.join(OUTPUT_DIR_NAME);
        fs::create_dir(&output)
            .map_err(|source| JobError::resource("workspace.output", &output, source))?;
        debug!(job_id = %id, path = %path.display(), "workspace allocated");
        Ok(Workspace { id, path })
    }

    /// Recursively remove a workspace. Idempotent: a missing or partially
    /// removed tree is not an error. Failures are logged and left for the
    /// startup sweep; they never propagate past this call.
    ///
    /// Returns `false` when removal failed for a reason other than the tree
    /// already being gone, so callers can count reclamation failures.
    pub fn release(&self, workspace: &Workspace) -> bool {
        match fs::remove_dir_all(workspace.path()) {
            Ok(()) => {
                debug!(job_id = %workspace.id(), "workspace released");
                true
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!(
                    job_id = %workspace.id(),
                    path = %workspace.path().display(),
                    error = %err,
                    "workspace release failed; leaving for startup sweep"
                );
                false
            }
        }
    }
}
