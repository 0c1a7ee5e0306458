//! Shared fixtures for handler tests.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use stemsplit_events::EventBus;
use stemsplit_jobs::{JobService, SeparationInvoker, WorkspaceAllocator, spawn_reclaim_worker};
use stemsplit_telemetry::Metrics;
use tempfile::TempDir;

use crate::state::ApiState;

/// Install a shell script at `<temp>/fake-separator` standing in for the tool.
pub(crate) fn install_fake_tool(temp: &TempDir, body: &str) {
    let path = temp.path().join("fake-separator");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake tool");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake tool");
}

/// Fake tool body that produces a plausible two-stem track set.
pub(crate) const PRODUCING_TOOL: &str = r#"name=$(basename "$6")
base=${name%.*}
mkdir -p "$5/$base"
cp "$6" "$5/$base/vocals.wav"
cp "$6" "$5/$base/accompaniment.wav""#;

/// Build an [`ApiState`] wired to a fake tool under `temp`.
pub(crate) fn test_state(temp: &TempDir) -> ApiState {
    let allocator = WorkspaceAllocator::new(temp.path().join("workspaces")).expect("allocator");
    let events = EventBus::with_capacity(64);
    let metrics = Metrics::new().expect("metrics");
    let (queue, _worker) = spawn_reclaim_worker(allocator.clone(), events.clone(), metrics.clone());
    let invoker = SeparationInvoker::new(
        tool_path(temp.path()),
        Duration::from_secs(5),
    );
    let jobs = JobService::new(allocator, invoker, queue, events.clone(), metrics.clone());
    ApiState::new(jobs, metrics, events, 1024 * 1024)
}

fn tool_path(dir: &Path) -> String {
    dir.join("fake-separator").display().to_string()
}
