//! Separation tool invocation under a hard wall-clock deadline.
//!
//! The tool is treated as an opaque child process: `<tool> separate -p
//! <model> -o <output> <input>`. Success means a clean exit only; the output
//! resolver performs the real verification, which also covers partial files
//! left behind by a killed process.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{JobError, JobResult};
use crate::model::{SeparationResult, StemCount};

/// Runs the external separation executable against a workspace.
#[derive(Debug, Clone)]
pub struct SeparationInvoker {
    tool: String,
    deadline: Duration,
}

impl SeparationInvoker {
    /// Construct an invoker for the given executable and per-run deadline.
    #[must_use]
    pub const fn new(tool: String, deadline: Duration) -> Self {
        Self { tool, deadline }
    }

    /// Deadline enforced on each run.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run the tool against `input`, writing into `output_dir`.
    ///
    /// The child is killed and reaped when the deadline expires; a non-zero
    /// exit yields [`JobError::ToolExecution`] carrying the captured
    /// diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::ToolSpawn`], [`JobError::ToolTimeout`],
    /// [`JobError::ToolExecution`], or [`JobError::Resource`] when waiting on
    /// the child fails.
    pub async fn run(
        &self,
        input: &Path,
        output_dir: &Path,
        stems: StemCount,
    ) -> JobResult<SeparationResult> {
        let model = stems.model_id();
        debug!(tool = %self.tool, model = %model, input = %input.display(), "invoking separation tool");

        let mut child = Command::new(&self.tool)
            .arg("separate")
            .arg("-p")
            .arg(&model)
            .arg("-o")
            .arg(output_dir)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| JobError::ToolSpawn {
                program: self.tool.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(read_to_string(stdout));
        let stderr_task = tokio::spawn(read_to_string(stderr));

        let status = match timeout(self.deadline, child.wait()).await {
            Ok(wait) => {
                wait.map_err(|source| JobError::resource("tool.wait", input, source))?
            }
            Err(_) => {
                Self::kill_and_reap(&mut child).await;
                return Err(JobError::ToolTimeout {
                    deadline: self.deadline,
                });
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        debug!(exit_code = ?status.code(), "separation tool exited");

        if status.success() {
            Ok(SeparationResult {
                exit_code: status.code(),
                stdout,
                stderr,
            })
        } else {
            let diagnostic = if stderr.trim().is_empty() {
                stdout
            } else {
                stderr
            };
            Err(JobError::ToolExecution {
                exit_code: status.code(),
                diagnostic,
            })
        }
    }

    /// Force-terminate the child and wait for it to be reaped, so the
    /// workspace is no longer being written into when reclamation proceeds.
    async fn kill_and_reap(child: &mut Child) {
        if let Err(err) = child.start_kill() {
            warn!(error = %err, "failed to signal timed-out separation process");
        }
        if let Err(err) = child.wait().await {
            warn!(error = %err, "failed to reap timed-out separation process");
        }
    }
}

async fn read_to_string<R>(reader: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buffer = Vec::new();
    if reader.read_to_end(&mut buffer).await.is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Install a shell script standing in for the separation tool.
    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-separator");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake tool");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake tool");
        path
    }

    fn invoker_for(tool: &Path, deadline: Duration) -> SeparationInvoker {
        SeparationInvoker::new(tool.to_string_lossy().into_owned(), deadline)
    }

    #[tokio::test]
    async fn clean_exit_yields_result() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let tool = fake_tool(temp.path(), "echo separating; exit 0");
        let input = temp.path().join("song.wav");
        fs::write(&input, b"audio")?;
        let output = temp.path().join("output");
        fs::create_dir(&output)?;

        let invoker = invoker_for(&tool, Duration::from_secs(5));
        let result = invoker.run(&input, &output, StemCount::Two).await?;
        assert_eq!(result.exit_code, Some(0));
        assert!(result.stdout.contains("separating"));
        Ok(())
    }

    #[tokio::test]
    async fn model_argument_encodes_stem_count() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        // The script echoes its arguments so the test can assert the -p value.
        let tool = fake_tool(temp.path(), "echo \"$@\"");
        let input = temp.path().join("song.wav");
        fs::write(&input, b"audio")?;
        let output = temp.path().join("output");
        fs::create_dir(&output)?;

        let invoker = invoker_for(&tool, Duration::from_secs(5));
        let result = invoker.run(&input, &output, StemCount::Five).await?;
        assert!(result.stdout.contains("spleeter:5stems-16kHz"));
        assert!(result.stdout.starts_with("separate"));
        Ok(())
    }

    #[tokio::test]
    async fn non_zero_exit_carries_diagnostics() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let tool = fake_tool(temp.path(), "echo 'model load failed' >&2; exit 3");
        let input = temp.path().join("song.wav");
        fs::write(&input, b"audio")?;
        let output = temp.path().join("output");
        fs::create_dir(&output)?;

        let invoker = invoker_for(&tool, Duration::from_secs(5));
        let err = invoker
            .run(&input, &output, StemCount::Four)
            .await
            .expect_err("non-zero exit must fail");
        match err {
            JobError::ToolExecution {
                exit_code,
                diagnostic,
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(diagnostic.contains("model load failed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn deadline_kills_hanging_tool() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let tool = fake_tool(temp.path(), "sleep 30");
        let input = temp.path().join("song.wav");
        fs::write(&input, b"audio")?;
        let output = temp.path().join("output");
        fs::create_dir(&output)?;

        let invoker = invoker_for(&tool, Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = invoker
            .run(&input, &output, StemCount::Two)
            .await
            .expect_err("hanging tool must time out");
        assert!(matches!(err, JobError::ToolTimeout { .. }));
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "child must be reaped promptly, not after its sleep"
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_executable_fails_to_spawn() {
        let invoker = SeparationInvoker::new(
            "/nonexistent/separator".to_string(),
            Duration::from_secs(1),
        );
        let err = invoker
            .run(Path::new("in.wav"), Path::new("/tmp"), StemCount::Two)
            .await
            .expect_err("missing executable must fail");
        assert!(matches!(err, JobError::ToolSpawn { .. }));
    }
}
