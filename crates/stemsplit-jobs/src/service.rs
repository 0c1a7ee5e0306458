//! Job pipeline orchestration.
//!
//! `JobService` owns the full upload-to-archive sequence: validate, allocate
//! a workspace, persist the upload, invoke the tool under its deadline,
//! resolve the track directory, and write the delivery archive. Any failure
//! after allocation releases the workspace synchronously before the error is
//! returned; successful jobs hand their workspace to the deferred reclaim
//! queue via [`JobService::deliver`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use stemsplit_events::{Event, EventBus};
use stemsplit_telemetry::Metrics;
use tracing::{info, warn};

use crate::archiver;
use crate::error::{JobError, JobResult};
use crate::invoker::SeparationInvoker;
use crate::model::{Job, JobState, StemCount};
use crate::reclaim::{DeferredReclaim, ReclaimQueue};
use crate::resolver;
use crate::workspace::{Workspace, WorkspaceAllocator};

/// Upload extensions accepted for separation input.
pub const UPLOAD_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "m4a", "ogg"];

/// A job that ran to completion and is ready for delivery.
#[derive(Debug)]
pub struct CompletedJob {
    /// The job record, in the `Succeeded` state.
    pub job: Job,
    /// Absolute path of the archive inside the workspace.
    pub archive_path: PathBuf,
    /// Download filename offered to the client.
    pub archive_name: String,
    /// Archive size in bytes.
    pub archive_bytes: u64,
    workspace: Workspace,
}

/// A completed job bound to its reclamation guard for streaming out.
pub struct Delivery {
    /// The job record, in the `Delivered` state.
    pub job: Job,
    /// Absolute path of the archive to stream.
    pub archive_path: PathBuf,
    /// Download filename offered to the client.
    pub archive_name: String,
    /// Archive size in bytes.
    pub archive_bytes: u64,
    /// Drop-guard that schedules workspace reclamation.
    pub guard: DeferredReclaim,
}

/// Orchestrates separation jobs from validated upload to delivery archive.
#[derive(Clone)]
pub struct JobService {
    allocator: WorkspaceAllocator,
    invoker: SeparationInvoker,
    reclaim: ReclaimQueue,
    events: EventBus,
    metrics: Metrics,
    active: Arc<AtomicI64>,
}

impl JobService {
    /// Assemble the service from its collaborators.
    #[must_use]
    pub fn new(
        allocator: WorkspaceAllocator,
        invoker: SeparationInvoker,
        reclaim: ReclaimQueue,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            allocator,
            invoker,
            reclaim,
            events,
            metrics,
            active: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Validate an upload filename and derive the base name used for the
    /// track directory and archive.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidInput`] when the filename is empty or its
    /// extension is not a supported audio format.
    pub fn validate_upload(filename: &str) -> JobResult<String> {
        if filename.trim().is_empty() {
            return Err(JobError::invalid_input(
                "audio",
                "filename must not be empty",
                None,
            ));
        }
        let name = Path::new(filename);
        let supported = name
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                UPLOAD_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            });
        if !supported {
            return Err(JobError::invalid_input(
                "audio",
                "unsupported audio format",
                Some(filename.to_string()),
            ));
        }
        let base = name
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("input");
        Ok(base.to_string())
    }

    /// Parse a requested stem count.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidInput`] outside {2, 4, 5}.
    pub fn parse_stems(value: u64) -> JobResult<StemCount> {
        StemCount::parse(value).ok_or_else(|| {
            JobError::invalid_input("stems", "must be one of 2, 4 or 5", Some(value.to_string()))
        })
    }

    /// Run one separation job end to end.
    ///
    /// On success the workspace stays alive inside the returned
    /// [`CompletedJob`] until [`JobService::deliver`] hands it to the reclaim
    /// queue. On failure the workspace has already been released.
    ///
    /// # Errors
    ///
    /// Propagates any [`JobError`] raised by validation, workspace
    /// preparation, tool invocation, resolution, or archiving.
    pub async fn run(
        &self,
        filename: String,
        stems: StemCount,
        payload: &[u8],
    ) -> JobResult<CompletedJob> {
        let base_name = Self::validate_upload(&filename)?;

        let workspace = self.allocator.allocate()?;
        let mut job = Job::new(
            workspace.id(),
            filename,
            base_name,
            stems,
            workspace.path().to_path_buf(),
        );
        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        self.metrics.set_active_jobs(active);
        self.publish(Event::JobCreated {
            job_id: job.id,
            filename: job.filename.clone(),
            stems: stems.as_u8(),
        });

        let outcome = self.execute(&mut job, &workspace, payload).await;
        let active = self.active.fetch_sub(1, Ordering::Relaxed) - 1;
        self.metrics.set_active_jobs(active);
        let elapsed = (chrono::Utc::now() - job.started_at)
            .to_std()
            .unwrap_or_default();
        self.metrics.observe_job_duration(elapsed);

        match outcome {
            Ok((archive_path, archive_bytes)) => {
                job.transition(JobState::Succeeded);
                self.metrics.inc_job("succeeded");
                self.publish(Event::SeparationCompleted { job_id: job.id });
                let archive_name = format!("{}_separated.zip", job.base_name);
                info!(job_id = %job.id, bytes = archive_bytes, "job completed");
                Ok(CompletedJob {
                    job,
                    archive_path,
                    archive_name,
                    archive_bytes,
                    workspace,
                })
            }
            Err(err) => {
                let terminal = if matches!(err, JobError::ToolTimeout { .. }) {
                    JobState::TimedOut
                } else {
                    JobState::Failed
                };
                job.transition(terminal);
                self.metrics.inc_job(err.outcome());
                self.publish(Event::SeparationFailed {
                    job_id: job.id,
                    message: err.to_string(),
                });
                job.transition(JobState::Discarded);
                if self.allocator.release(&workspace) {
                    job.transition(JobState::Reclaimed);
                } else {
                    warn!(job_id = %job.id, "failed job workspace left for startup sweep");
                }
                Err(err)
            }
        }
    }

    /// Mark a completed job as delivered and attach its reclamation guard.
    #[must_use]
    pub fn deliver(&self, completed: CompletedJob) -> Delivery {
        let CompletedJob {
            mut job,
            archive_path,
            archive_name,
            archive_bytes,
            workspace,
        } = completed;
        job.transition(JobState::Delivered);
        Delivery {
            job,
            archive_path,
            archive_name,
            archive_bytes,
            guard: DeferredReclaim::new(self.reclaim.clone(), workspace),
        }
    }

    async fn execute(
        &self,
        job: &mut Job,
        workspace: &Workspace,
        payload: &[u8],
    ) -> JobResult<(PathBuf, u64)> {
        let input_path = workspace.input_path(&job.filename);
        let stored = tokio::fs::write(&input_path, payload)
            .await
            .map_err(|source| JobError::resource("job.store_input", &input_path, source));
        self.step("store_input", stored)?;

        job.transition(JobState::Running);
        self.publish(Event::SeparationStarted {
            job_id: job.id,
            model: job.stems.model_id(),
        });
        let separation = self
            .invoker
            .run(&input_path, &workspace.output_dir(), job.stems)
            .await;
        let _ = self.step("separate", separation)?;

        let resolution = self.step(
            "resolve",
            resolver::resolve(&workspace.output_dir(), &job.base_name),
        )?;
        if resolution.fallback {
            self.metrics.inc_resolver_fallback();
            self.publish(Event::ResolverFallback {
                job_id: job.id,
                track_dir: resolution.tracks.dir.display().to_string(),
            });
        }

        let archive_path = workspace.archive_path(&job.base_name);
        let archive_bytes = self.step(
            "archive",
            archiver::archive(&archive_path, &resolution.tracks),
        )?;
        self.publish(Event::ArchiveWritten {
            job_id: job.id,
            bytes: archive_bytes,
        });

        Ok((archive_path, archive_bytes))
    }

    fn step<T>(&self, step: &str, result: JobResult<T>) -> JobResult<T> {
        let status = if result.is_ok() { "completed" } else { "failed" };
        self.metrics.inc_job_step(step, status);
        result
    }

    fn publish(&self, event: Event) {
        self.metrics.inc_event(event.kind());
        self.events.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::reclaim::spawn_reclaim_worker;

    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-separator");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake tool");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake tool");
        path
    }

    struct Harness {
        service: JobService,
        _temp: TempDir,
    }

    fn harness(tool_body: &str) -> Harness {
        harness_with_deadline(tool_body, Duration::from_secs(10))
    }

    fn harness_with_deadline(tool_body: &str, deadline: Duration) -> Harness {
        let temp = TempDir::new().expect("tempdir");
        let tool = fake_tool(temp.path(), tool_body);
        let allocator =
            WorkspaceAllocator::new(temp.path().join("workspaces")).expect("allocator");
        let events = EventBus::with_capacity(64);
        let metrics = Metrics::new().expect("metrics");
        let (queue, _worker) =
            spawn_reclaim_worker(allocator.clone(), events.clone(), metrics.clone());
        let invoker = SeparationInvoker::new(tool.to_string_lossy().into_owned(), deadline);
        let service = JobService::new(allocator, invoker, queue, events, metrics);
        Harness {
            service,
            _temp: temp,
        }
    }

    // Writes a plausible track set: the tool sees `separate -p <model> -o
    // <output> <input>`, so $5 is the output directory and $6 the input.
    const PRODUCING_TOOL: &str = r#"base=$(basename "$6" .wav)
mkdir -p "$5/$base"
cp "$6" "$5/$base/vocals.wav"
cp "$6" "$5/$base/accompaniment.wav""#;

    #[tokio::test]
    async fn successful_job_produces_archive() -> anyhow::Result<()> {
        let harness = harness(PRODUCING_TOOL);
        let completed = harness
            .service
            .run("mix.wav".to_string(), StemCount::Two, b"pcm-bytes")
            .await?;

        assert_eq!(completed.job.state, JobState::Succeeded);
        assert_eq!(completed.archive_name, "mix_separated.zip");
        assert!(completed.archive_path.is_file());
        assert!(completed.archive_bytes > 0);
        Ok(())
    }

    #[tokio::test]
    async fn delivery_schedules_reclamation_on_guard_drop() -> anyhow::Result<()> {
        let harness = harness(PRODUCING_TOOL);
        let completed = harness
            .service
            .run("mix.wav".to_string(), StemCount::Two, b"pcm-bytes")
            .await?;
        let workspace_path = completed.job.workspace_path.clone();

        let delivery = harness.service.deliver(completed);
        assert_eq!(delivery.job.state, JobState::Delivered);
        assert!(workspace_path.exists(), "alive while the guard is held");
        drop(delivery);

        // The reclaim worker runs on the same runtime; poll briefly.
        for _ in 0..50 {
            if !workspace_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!workspace_path.exists(), "guard drop must reclaim");
        Ok(())
    }

    #[tokio::test]
    async fn tool_failure_releases_workspace_synchronously() -> anyhow::Result<()> {
        let harness = harness("echo 'gpu unavailable' >&2; exit 7");
        let err = harness
            .service
            .run("mix.wav".to_string(), StemCount::Four, b"pcm")
            .await
            .expect_err("failing tool must fail the job");
        assert!(matches!(err, JobError::ToolExecution { .. }));

        // No workspaces may survive a failed job.
        let root = harness.service.allocator.root().to_path_buf();
        let leftovers: Vec<_> = fs::read_dir(root)?.collect();
        assert!(leftovers.is_empty());
        assert_eq!(harness.service.metrics.snapshot().active_jobs, 0);
        Ok(())
    }

    // Fails uploads named bad.* and separates everything else, so one harness
    // can drive mixed-outcome concurrent jobs.
    const SELECTIVE_TOOL: &str = r#"name=$(basename "$6")
case "$name" in bad.*) echo "boom" >&2; exit 9;; esac
base=${name%.*}
mkdir -p "$5/$base"
cp "$6" "$5/$base/vocals.wav""#;

    #[tokio::test]
    async fn concurrent_jobs_are_isolated() -> anyhow::Result<()> {
        let harness = harness(SELECTIVE_TOOL);
        let good = harness
            .service
            .run("mix.wav".to_string(), StemCount::Two, b"pcm");
        let bad = harness
            .service
            .run("bad.wav".to_string(), StemCount::Two, b"pcm");
        let (good, bad) = tokio::join!(good, bad);

        let good = good.expect("good job must succeed");
        bad.expect_err("bad job must fail");
        assert!(
            good.archive_path.is_file(),
            "failed job's cleanup must not touch the other job's archive"
        );
        Ok(())
    }

    #[tokio::test]
    async fn deadline_expiry_fails_job_and_releases_workspace() -> anyhow::Result<()> {
        let harness = harness_with_deadline("sleep 30", Duration::from_millis(200));
        let err = harness
            .service
            .run("mix.wav".to_string(), StemCount::Two, b"pcm")
            .await
            .expect_err("hanging tool must time out");
        assert!(matches!(err, JobError::ToolTimeout { .. }));

        let root = harness.service.allocator.root().to_path_buf();
        assert_eq!(fs::read_dir(root)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_upload_allocates_no_workspace() -> anyhow::Result<()> {
        let harness = harness(PRODUCING_TOOL);
        let err = harness
            .service
            .run("song.aiff".to_string(), StemCount::Two, b"pcm")
            .await
            .expect_err("aiff is unsupported");
        assert!(matches!(err, JobError::InvalidInput { .. }));

        let root = harness.service.allocator.root().to_path_buf();
        assert_eq!(fs::read_dir(root)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn empty_tool_output_is_a_job_error() -> anyhow::Result<()> {
        let harness = harness("exit 0");
        let err = harness
            .service
            .run("mix.wav".to_string(), StemCount::Two, b"pcm")
            .await
            .expect_err("no output must fail resolution");
        assert!(matches!(err, JobError::OutputNotFound { .. }));
        Ok(())
    }

    #[test]
    fn upload_validation_enforces_extension_set() {
        assert_eq!(JobService::validate_upload("song.mp3").unwrap(), "song");
        assert_eq!(JobService::validate_upload("Song.FLAC").unwrap(), "Song");
        assert!(JobService::validate_upload("song.aiff").is_err());
        assert!(JobService::validate_upload("song").is_err());
        assert!(JobService::validate_upload("").is_err());
    }

    #[test]
    fn stems_outside_catalog_are_rejected() {
        assert!(JobService::parse_stems(2).is_ok());
        assert!(JobService::parse_stems(5).is_ok());
        let err = JobService::parse_stems(3).expect_err("3 stems unsupported");
        assert!(matches!(err, JobError::InvalidInput { .. }));
    }
}
