//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes a minimal set of counters/gauges relevant to the job pipeline.

use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: std::sync::Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    events_emitted_total: IntCounterVec,
    jobs_total: IntCounterVec,
    job_steps_total: IntCounterVec,
    active_jobs: IntGauge,
    reclaim_queue_depth: IntGauge,
    job_duration_ms: IntGauge,
    resolver_fallback_total: IntCounter,
    swept_workspaces_total: IntCounter,
    reclamation_failures_total: IntCounter,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Current number of in-flight separation jobs.
    pub active_jobs: i64,
    /// Workspaces queued for deferred reclamation.
    pub reclaim_queue_depth: i64,
    /// Wall-clock duration of the most recent job (ms).
    pub job_duration_ms: i64,
    /// Total resolver fallbacks to the sole-subdirectory path.
    pub resolver_fallback_total: u64,
    /// Total stale workspaces removed by the startup sweep.
    pub swept_workspaces_total: u64,
    /// Total reclamation attempts that failed and were left for the sweeper.
    pub reclamation_failures_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests received"),
            &["route", "code"],
        )?;
        let events_emitted_total = IntCounterVec::new(
            Opts::new("events_emitted_total", "Domain events emitted by type"),
            &["type"],
        )?;
        let jobs_total = IntCounterVec::new(
            Opts::new("jobs_total", "Separation jobs completed by outcome"),
            &["outcome"],
        )?;
        let job_steps_total = IntCounterVec::new(
            Opts::new(
                "job_steps_total",
                "Job pipeline steps executed by status",
            ),
            &["step", "status"],
        )?;
        let active_jobs =
            IntGauge::with_opts(Opts::new("active_jobs", "Number of in-flight jobs"))?;
        let reclaim_queue_depth = IntGauge::with_opts(Opts::new(
            "reclaim_queue_depth",
            "Workspaces queued for deferred reclamation",
        ))?;
        let job_duration_ms = IntGauge::with_opts(Opts::new(
            "job_duration_ms",
            "Duration of the most recent job (ms)",
        ))?;
        let resolver_fallback_total = IntCounter::with_opts(Opts::new(
            "resolver_fallback_total",
            "Track directories located via the sole-subdirectory fallback",
        ))?;
        let swept_workspaces_total = IntCounter::with_opts(Opts::new(
            "swept_workspaces_total",
            "Stale workspaces removed at startup",
        ))?;
        let reclamation_failures_total = IntCounter::with_opts(Opts::new(
            "reclamation_failures_total",
            "Workspace reclamation attempts that failed",
        ))?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(events_emitted_total.clone()))?;
        registry.register(Box::new(jobs_total.clone()))?;
        registry.register(Box::new(job_steps_total.clone()))?;
        registry.register(Box::new(active_jobs.clone()))?;
        registry.register(Box::new(reclaim_queue_depth.clone()))?;
        registry.register(Box::new(job_duration_ms.clone()))?;
        registry.register(Box::new(resolver_fallback_total.clone()))?;
        registry.register(Box::new(swept_workspaces_total.clone()))?;
        registry.register(Box::new(reclamation_failures_total.clone()))?;

        Ok(Self {
            inner: std::sync::Arc::new(MetricsInner {
                registry,
                http_requests_total,
                events_emitted_total,
                jobs_total,
                job_steps_total,
                active_jobs,
                reclaim_queue_depth,
                job_duration_ms,
                resolver_fallback_total,
                swept_workspaces_total,
                reclamation_failures_total,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Increment the emitted event counter for the specific event type.
    pub fn inc_event(&self, event_type: &str) {
        self.inner
            .events_emitted_total
            .with_label_values(&[event_type])
            .inc();
    }

    /// Increment the completed job counter for the given outcome.
    pub fn inc_job(&self, outcome: &str) {
        self.inner.jobs_total.with_label_values(&[outcome]).inc();
    }

    /// Increment the job pipeline step counter.
    pub fn inc_job_step(&self, step: &str, status: &str) {
        self.inner
            .job_steps_total
            .with_label_values(&[step, status])
            .inc();
    }

    /// Adjust the in-flight job gauge.
    pub fn set_active_jobs(&self, count: i64) {
        self.inner.active_jobs.set(count);
    }

    /// Set the deferred reclamation queue depth gauge.
    pub fn set_reclaim_queue_depth(&self, depth: i64) {
        self.inner.reclaim_queue_depth.set(depth);
    }

    /// Record the wall-clock duration of a completed job.
    pub fn observe_job_duration(&self, duration: Duration) {
        self.inner.job_duration_ms.set(Self::duration_to_ms(duration));
    }

    /// Increment the resolver fallback counter.
    pub fn inc_resolver_fallback(&self) {
        self.inner.resolver_fallback_total.inc();
    }

    /// Record stale workspaces removed by the startup sweep.
    pub fn add_swept_workspaces(&self, count: u64) {
        self.inner.swept_workspaces_total.inc_by(count);
    }

    /// Increment the reclamation failure counter.
    pub fn inc_reclamation_failure(&self) {
        self.inner.reclamation_failures_total.inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_jobs: self.inner.active_jobs.get(),
            reclaim_queue_depth: self.inner.reclaim_queue_depth.get(),
            job_duration_ms: self.inner.job_duration_ms.get(),
            resolver_fallback_total: self.inner.resolver_fallback_total.get(),
            swept_workspaces_total: self.inner.swept_workspaces_total.get(),
            reclamation_failures_total: self.inner.reclamation_failures_total.get(),
        }
    }

    /// Convert a duration to milliseconds saturating at `i64::MAX`.
    pub(crate) fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn duration_to_ms_saturates_on_large_values() {
        let duration = Duration::from_secs(u64::MAX / 2);
        assert_eq!(Metrics::duration_to_ms(duration), i64::MAX);
    }

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_http_request("/separate", 200);
        metrics.inc_event("job_created");
        metrics.inc_job("succeeded");
        metrics.inc_job_step("archive", "completed");
        metrics.set_active_jobs(2);
        metrics.set_reclaim_queue_depth(1);
        metrics.observe_job_duration(Duration::from_millis(430));
        metrics.inc_resolver_fallback();
        metrics.add_swept_workspaces(3);
        metrics.inc_reclamation_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_jobs, 2);
        assert_eq!(snapshot.reclaim_queue_depth, 1);
        assert_eq!(snapshot.job_duration_ms, 430);
        assert_eq!(snapshot.resolver_fallback_total, 1);
        assert_eq!(snapshot.swept_workspaces_total, 3);
        assert_eq!(snapshot.reclamation_failures_total, 1);

        let rendered = metrics.render()?;
        assert!(rendered.contains("http_requests_total"));
        assert!(rendered.contains("job_steps_total"));
        assert!(rendered.contains("swept_workspaces_total"));
        Ok(())
    }
}
