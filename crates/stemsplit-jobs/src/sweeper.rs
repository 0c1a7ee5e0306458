//! Startup sweep of stale workspaces.
//!
//! Runs once before the listener binds. Anything under the workspace root
//! older than the configured age is assumed to be an orphan from a previous
//! process and is removed. Entries that cannot be inspected or removed are
//! skipped with a warning so one bad directory never blocks startup.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use stemsplit_events::{Event, EventBus};
use stemsplit_telemetry::Metrics;
use tracing::{info, warn};

use crate::error::{JobError, JobResult};

/// Remove top-level entries under `root` whose modification time is older
/// than `max_age`. Returns the number of entries removed.
///
/// A missing root is not an error; there is simply nothing to sweep.
///
/// # Errors
///
/// Returns [`JobError::Resource`] only when the root itself cannot be read.
/// Per-entry failures are logged and skipped.
pub fn sweep(
    root: &Path,
    max_age: Duration,
    events: &EventBus,
    metrics: &Metrics,
) -> JobResult<usize> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(root = %root.display(), "workspace root absent; nothing to sweep");
            return Ok(0);
        }
        Err(source) => return Err(JobError::resource("sweep.read_dir", root, source)),
    };

    let now = SystemTime::now();
    let mut removed = 0usize;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(root = %root.display(), error = %err, "skipping unreadable sweep entry");
                continue;
            }
        };
        let path = entry.path();
        let age = match entry.metadata().and_then(|meta| meta.modified()) {
            Ok(modified) => now.duration_since(modified).unwrap_or(Duration::ZERO),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping entry without readable mtime");
                continue;
            }
        };
        if age < max_age {
            continue;
        }
        // Stray files (partial uploads, leftover archives) are orphans too.
        let removal = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removal {
            Ok(()) => {
                info!(path = %path.display(), age_secs = age.as_secs(), "swept stale workspace entry");
                removed += 1;
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to sweep stale entry");
            }
        }
    }

    metrics.add_swept_workspaces(u64::try_from(removed).unwrap_or(u64::MAX));
    events.publish(Event::SweepCompleted { removed });
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Backdate an entry's mtime so it falls past the sweep threshold.
    fn set_mtime(path: &Path, age: Duration) {
        let target = SystemTime::now() - age;
        let handle = std::fs::File::open(path).expect("open entry");
        handle.set_modified(target).expect("set mtime");
    }

    fn fixture() -> (EventBus, Metrics) {
        (EventBus::with_capacity(8), Metrics::new().expect("metrics"))
    }

    #[test]
    fn old_directories_are_removed_fresh_ones_kept() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let stale = temp.path().join("stale-job");
        let fresh = temp.path().join("fresh-job");
        std::fs::create_dir(&stale)?;
        std::fs::create_dir(&fresh)?;
        set_mtime(&stale, Duration::from_secs(7_200));

        let (events, metrics) = fixture();
        let removed = sweep(temp.path(), Duration::from_secs(3_600), &events, &metrics)?;
        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert_eq!(metrics.snapshot().swept_workspaces_total, 1);
        Ok(())
    }

    #[test]
    fn stale_files_are_swept_fresh_ones_kept() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let stale = temp.path().join("stray.zip");
        let fresh = temp.path().join("recent.log");
        std::fs::write(&stale, b"zip")?;
        std::fs::write(&fresh, b"log")?;
        set_mtime(&stale, Duration::from_secs(7_200));

        let (events, metrics) = fixture();
        let removed = sweep(temp.path(), Duration::from_secs(3_600), &events, &metrics)?;
        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        Ok(())
    }

    #[test]
    fn missing_root_sweeps_nothing() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path().join("never-created");

        let (events, metrics) = fixture();
        let removed = sweep(&root, Duration::from_secs(60), &events, &metrics)?;
        assert_eq!(removed, 0);
        Ok(())
    }

    #[tokio::test]
    async fn sweep_publishes_completion_event() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let stale = temp.path().join("stale-job");
        std::fs::create_dir(&stale)?;
        set_mtime(&stale, Duration::from_secs(120));

        let (events, metrics) = fixture();
        let mut stream = events.subscribe(None);
        sweep(temp.path(), Duration::from_secs(60), &events, &metrics)?;

        let envelope = stream.next().await.expect("sweep event");
        assert!(matches!(envelope.event, Event::SweepCompleted { removed: 1 }));
        Ok(())
    }
}
