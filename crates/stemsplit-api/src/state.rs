//! API application state and health tracking.

use std::sync::{Mutex, MutexGuard};

use stemsplit_events::{Event, EventBus};
use stemsplit_jobs::JobService;
use stemsplit_telemetry::Metrics;
use tracing::warn;

pub(crate) struct ApiState {
    pub(crate) jobs: JobService,
    pub(crate) telemetry: Metrics,
    pub(crate) events: EventBus,
    pub(crate) max_upload_bytes: u64,
    health_status: Mutex<Vec<String>>,
}

impl ApiState {
    pub(crate) fn new(
        jobs: JobService,
        telemetry: Metrics,
        events: EventBus,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            jobs,
            telemetry,
            events,
            max_upload_bytes,
            health_status: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add_degraded_component(&self, component: &str) -> bool {
        let mut guard = Self::lock_guard(&self.health_status, "health_status");
        if guard.iter().any(|entry| entry == component) {
            return false;
        }
        guard.push(component.to_string());
        guard.sort();
        let snapshot = guard.clone();
        drop(guard);
        let _ = self.events.publish(Event::HealthChanged { degraded: snapshot });
        true
    }

    pub(crate) fn remove_degraded_component(&self, component: &str) -> bool {
        let mut guard = Self::lock_guard(&self.health_status, "health_status");
        let previous = guard.len();
        guard.retain(|entry| entry != component);
        let changed = guard.len() != previous;
        let snapshot = guard.clone();
        drop(guard);
        if changed {
            let _ = self.events.publish(Event::HealthChanged { degraded: snapshot });
        }
        changed
    }

    pub(crate) fn current_health_degraded(&self) -> Vec<String> {
        Self::lock_guard(&self.health_status, "health_status").clone()
    }

    fn lock_guard<'a, T>(mutex: &'a Mutex<T>, name: &str) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| {
            warn!(lock = name, "state mutex poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::test_state;
    use tempfile::TempDir;

    // test_state spawns the reclaim worker, which needs a runtime.
    #[tokio::test]
    async fn degraded_components_are_tracked_and_deduplicated() {
        let temp = TempDir::new().expect("tempdir");
        let state = test_state(&temp);

        assert!(state.add_degraded_component("workspace_root"));
        assert!(!state.add_degraded_component("workspace_root"));
        assert_eq!(state.current_health_degraded(), vec!["workspace_root"]);

        assert!(state.remove_degraded_component("workspace_root"));
        assert!(!state.remove_degraded_component("workspace_root"));
        assert!(state.current_health_degraded().is_empty());
    }
}
