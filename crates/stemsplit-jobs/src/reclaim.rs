//! Deferred workspace reclamation.
//!
//! Post-delivery cleanup must not race the response body and must still be
//! guaranteed to run, so it is routed through an in-process queue consumed by
//! a dedicated worker task. The worker is spawned at bootstrap and joined at
//! shutdown; the channel closing drains any queued work first. Workspaces
//! orphaned by a hard crash are covered by the startup sweep instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use stemsplit_events::{Event, EventBus};
use stemsplit_telemetry::Metrics;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::workspace::{Workspace, WorkspaceAllocator};

/// Handle used to enqueue workspaces for deferred reclamation.
#[derive(Clone)]
pub struct ReclaimQueue {
    sender: mpsc::UnboundedSender<Workspace>,
    depth: Arc<AtomicI64>,
    allocator: WorkspaceAllocator,
    events: EventBus,
    metrics: Metrics,
}

impl ReclaimQueue {
    /// Schedule a workspace for reclamation by the worker task.
    ///
    /// If the worker has already shut down the workspace is released inline,
    /// so scheduling never silently drops work.
    pub fn schedule(&self, workspace: Workspace) {
        self.events.publish(Event::ReclamationScheduled {
            job_id: workspace.id(),
        });
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.metrics.set_reclaim_queue_depth(depth);

        if let Err(err) = self.sender.send(workspace) {
            let workspace = err.0;
            warn!(job_id = %workspace.id(), "reclaim worker unavailable; releasing inline");
            let depth = self.depth.fetch_sub(1, Ordering::Relaxed) - 1;
            self.metrics.set_reclaim_queue_depth(depth);
            release_and_record(&self.allocator, &workspace, &self.events, &self.metrics);
        }
    }
}

/// Join handle for the reclaim worker task.
pub struct ReclaimWorker {
    handle: JoinHandle<()>,
}

impl ReclaimWorker {
    /// Wait for the worker to drain its queue and exit. Call after the last
    /// [`ReclaimQueue`] clone has been dropped.
    pub async fn join(self) {
        if let Err(err) = self.handle.await {
            warn!(error = %err, "reclaim worker task panicked");
        }
    }
}

/// Spawn the reclaim worker and return its queue handle.
#[must_use]
pub fn spawn_reclaim_worker(
    allocator: WorkspaceAllocator,
    events: EventBus,
    metrics: Metrics,
) -> (ReclaimQueue, ReclaimWorker) {
    let (sender, mut receiver) = mpsc::unbounded_channel::<Workspace>();
    let depth = Arc::new(AtomicI64::new(0));

    let worker = {
        let allocator = allocator.clone();
        let events = events.clone();
        let metrics = metrics.clone();
        let depth = Arc::clone(&depth);
        tokio::spawn(async move {
            while let Some(workspace) = receiver.recv().await {
                let remaining = depth.fetch_sub(1, Ordering::Relaxed) - 1;
                metrics.set_reclaim_queue_depth(remaining);
                release_and_record(&allocator, &workspace, &events, &metrics);
            }
            debug!("reclaim worker drained and stopped");
        })
    };

    (
        ReclaimQueue {
            sender,
            depth,
            allocator,
            events,
            metrics,
        },
        ReclaimWorker { handle: worker },
    )
}

fn release_and_record(
    allocator: &WorkspaceAllocator,
    workspace: &Workspace,
    events: &EventBus,
    metrics: &Metrics,
) {
    if allocator.release(workspace) {
        events.publish(Event::ReclamationCompleted {
            job_id: workspace.id(),
        });
    } else {
        metrics.inc_reclamation_failure();
    }
}

/// Guard that schedules its workspace for reclamation when dropped.
///
/// Attached to the delivery stream so reclamation happens after the response
/// body is fully transmitted — or aborted — and exactly once either way.
pub struct DeferredReclaim {
    queue: ReclaimQueue,
    workspace: Option<Workspace>,
}

impl DeferredReclaim {
    /// Tie `workspace` to this guard's lifetime.
    #[must_use]
    pub const fn new(queue: ReclaimQueue, workspace: Workspace) -> Self {
        Self {
            queue,
            workspace: Some(workspace),
        }
    }
}

impl Drop for DeferredReclaim {
    fn drop(&mut self) {
        if let Some(workspace) = self.workspace.take() {
            self.queue.schedule(workspace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn fixture(root: &std::path::Path) -> (WorkspaceAllocator, EventBus, Metrics) {
        let allocator = WorkspaceAllocator::new(root).expect("allocator");
        let events = EventBus::with_capacity(32);
        let metrics = Metrics::new().expect("metrics");
        (allocator, events, metrics)
    }

    #[tokio::test]
    async fn scheduled_workspace_is_removed() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let (allocator, events, metrics) = fixture(temp.path());
        let mut stream = events.subscribe(None);
        let (queue, worker) = spawn_reclaim_worker(allocator.clone(), events, metrics);

        let workspace = allocator.allocate()?;
        let path = workspace.path().to_path_buf();
        queue.schedule(workspace);

        let mut saw_completed = false;
        for _ in 0..2 {
            match timeout(Duration::from_secs(2), stream.next()).await {
                Ok(Some(envelope)) => {
                    if matches!(envelope.event, Event::ReclamationCompleted { .. }) {
                        saw_completed = true;
                        break;
                    }
                }
                _ => break,
            }
        }
        assert!(saw_completed, "expected a reclamation completion event");
        assert!(!path.exists());

        drop(queue);
        worker.join().await;
        Ok(())
    }

    #[tokio::test]
    async fn worker_drains_queue_before_join_returns() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let (allocator, events, metrics) = fixture(temp.path());
        let (queue, worker) = spawn_reclaim_worker(allocator.clone(), events, metrics);

        let mut paths = Vec::new();
        for _ in 0..4 {
            let workspace = allocator.allocate()?;
            paths.push(workspace.path().to_path_buf());
            queue.schedule(workspace);
        }

        drop(queue);
        timeout(Duration::from_secs(5), worker.join()).await?;
        for path in paths {
            assert!(!path.exists(), "queued workspace must be reclaimed");
        }
        Ok(())
    }

    #[tokio::test]
    async fn guard_schedules_on_drop_exactly_once() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let (allocator, events, metrics) = fixture(temp.path());
        let mut stream = events.subscribe(None);
        let (queue, worker) = spawn_reclaim_worker(allocator.clone(), events.clone(), metrics);

        let workspace = allocator.allocate()?;
        let guard = DeferredReclaim::new(queue.clone(), workspace);
        // No scheduling before the guard goes out of scope.
        assert!(events.last_event_id().is_none());
        drop(guard);

        let envelope = timeout(Duration::from_secs(2), stream.next())
            .await?
            .expect("event expected");
        assert!(matches!(
            envelope.event,
            Event::ReclamationScheduled { .. }
        ));

        drop(queue);
        worker.join().await;
        Ok(())
    }

    #[tokio::test]
    async fn schedule_after_worker_shutdown_releases_inline() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let (allocator, events, metrics) = fixture(temp.path());
        let (queue, worker) = spawn_reclaim_worker(allocator.clone(), events, metrics);

        // Abort the worker so its receiver drops and sends start failing.
        worker.handle.abort();
        let _ = worker.handle.await;

        let workspace = allocator.allocate()?;
        let path = workspace.path().to_path_buf();
        queue.schedule(workspace);
        assert!(!path.exists(), "inline release must reclaim the workspace");
        Ok(())
    }
}
