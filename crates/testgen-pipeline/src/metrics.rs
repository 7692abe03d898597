use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use testgen_core::StageKind;

/// Trait for metrics backends. Implementations can forward to Prometheus,
/// StatsD, or simply log metrics.
pub trait MetricsBackend: Send + Sync {
    fn record_counter(&self, name: &str, value: u64);
    fn record_histogram(&self, name: &str, value: f64);
}

#[derive(Debug, Default)]
struct StageCounters {
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl StageCounters {
    fn snapshot(&self) -> StageCounts {
        StageCounts {
            started: self.started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

fn metric_prefix(kind: StageKind) -> &'static str {
    match kind {
        StageKind::ListFiles => "testgen.stage.list_files",
        StageKind::Summaries => "testgen.stage.summaries",
        StageKind::Code => "testgen.stage.code",
        StageKind::Publish => "testgen.stage.publish",
    }
}

/// In-memory metrics collector with atomic counters.
#[derive(Default)]
pub struct PipelineMetrics {
    list_files: StageCounters,
    summaries: StageCounters,
    code: StageCounters,
    publish: StageCounters,
    /// Invocations refused before any remote call (precondition or validation).
    rejected: AtomicU64,
    orphaned_branches: AtomicU64,
    backend: Option<Arc<dyn MetricsBackend>>,
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics")
            .field("snapshot", &self.snapshot())
            .field("backend", &self.backend.is_some())
            .finish()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::new()
        }
    }

    fn stage(&self, kind: StageKind) -> &StageCounters {
        match kind {
            StageKind::ListFiles => &self.list_files,
            StageKind::Summaries => &self.summaries,
            StageKind::Code => &self.code,
            StageKind::Publish => &self.publish,
        }
    }

    fn emit(&self, kind: StageKind, event: &str, value: u64) {
        if let Some(backend) = &self.backend {
            backend.record_counter(&format!("{}.{event}", metric_prefix(kind)), value);
        }
    }

    pub fn record_stage_started(&self, kind: StageKind) {
        let val = self.stage(kind).started.fetch_add(1, Ordering::Relaxed) + 1;
        self.emit(kind, "started", val);
    }

    pub fn record_stage_succeeded(&self, kind: StageKind, elapsed_ms: u64) {
        let val = self.stage(kind).succeeded.fetch_add(1, Ordering::Relaxed) + 1;
        self.emit(kind, "succeeded", val);
        if let Some(backend) = &self.backend {
            backend.record_histogram(
                &format!("{}.duration_ms", metric_prefix(kind)),
                elapsed_ms as f64,
            );
        }
    }

    pub fn record_stage_failed(&self, kind: StageKind) {
        let val = self.stage(kind).failed.fetch_add(1, Ordering::Relaxed) + 1;
        self.emit(kind, "failed", val);
    }

    pub fn record_rejected(&self) {
        let val = self.rejected.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(backend) = &self.backend {
            backend.record_counter("testgen.pipeline.rejected", val);
        }
    }

    pub fn record_orphaned_branch(&self) {
        let val = self.orphaned_branches.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(backend) = &self.backend {
            backend.record_counter("testgen.publish.orphaned_branches", val);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            list_files: self.list_files.snapshot(),
            summaries: self.summaries.snapshot(),
            code: self.code.snapshot(),
            publish: self.publish.snapshot(),
            rejected: self.rejected.load(Ordering::Relaxed),
            orphaned_branches: self.orphaned_branches.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StageCounts {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// A point-in-time snapshot of pipeline metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub list_files: StageCounts,
    pub summaries: StageCounts,
    pub code: StageCounts,
    pub publish: StageCounts,
    pub rejected: u64,
    pub orphaned_branches: u64,
}

impl MetricsSnapshot {
    pub fn stage(&self, kind: StageKind) -> StageCounts {
        match kind {
            StageKind::ListFiles => self.list_files,
            StageKind::Summaries => self.summaries,
            StageKind::Code => self.code,
            StageKind::Publish => self.publish,
        }
    }
}

/// Logging-based metrics backend. Emits metrics as structured log events.
pub struct LoggingMetricsBackend;

impl MetricsBackend for LoggingMetricsBackend {
    fn record_counter(&self, name: &str, value: u64) {
        tracing::info!(metric = name, value = value, kind = "counter", "metric");
    }

    fn record_histogram(&self, name: &str, value: f64) {
        tracing::info!(metric = name, value = value, kind = "histogram", "metric");
    }
}
