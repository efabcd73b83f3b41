use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::artifact::ArtifactRef;
use crate::jobs::JobStage;
use crate::processing::MembershipCounts;

/// Severity classification for run events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational event.
    Info,
    /// Something degraded but the run continues.
    Warning,
    /// The run failed.
    Error,
    /// Infrastructure failure (disk, permissions).
    Critical,
}

/// Events emitted while a run progresses.
#[derive(Debug, Clone)]
pub enum RunEvent {
    StageChanged { stage: JobStage, progress: u8 },
    TableIngested { table: String, rows: usize, columns: Vec<String> },
    RoleFallback { table: String, role: String, column: String },
    RoleUnresolved { table: String, role: String, required: bool },
    CrossValidationSkipped { reason: String },
    PartitionWritten { table: String, label: String, rows: usize, artifact: ArtifactRef },
    WriteThrottled { duration: Duration },
    CrossValidated { counts: MembershipCounts, artifact: ArtifactRef },
    Cancelled { committed: usize },
    Failed { message: String, critical: bool },
    RunFinished { elapsed: Duration, metrics: ExecutionMetricsSnapshot },
}

impl RunEvent {
    pub fn severity(&self) -> Severity {
        match self {
            RunEvent::RoleFallback { .. }
            | RunEvent::CrossValidationSkipped { .. }
            | RunEvent::Cancelled { .. } => Severity::Warning,
            RunEvent::RoleUnresolved { required, .. } => {
                if *required {
                    Severity::Error
                } else {
                    Severity::Warning
                }
            }
            RunEvent::Failed { critical: true, .. } => Severity::Critical,
            RunEvent::Failed { .. } => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunEvent::StageChanged { stage, progress } => write!(f, "stage={stage} progress={progress}"),
            RunEvent::TableIngested { table, rows, columns } => {
                write!(f, "ingested table={table} rows={rows} columns={columns:?}")
            }
            RunEvent::RoleFallback { table, role, column } => write!(
                f,
                "table={table} role={role} resolved by position to column '{column}'"
            ),
            RunEvent::RoleUnresolved { table, role, required } => {
                write!(f, "table={table} role={role} unresolved required={required}")
            }
            RunEvent::CrossValidationSkipped { reason } => {
                write!(f, "cross-validation skipped: {reason}")
            }
            RunEvent::PartitionWritten { table, label, rows, artifact } => write!(
                f,
                "partition table={table} key='{label}' rows={rows} artifact={} bytes={}",
                artifact.name, artifact.bytes
            ),
            RunEvent::WriteThrottled { duration } => write!(f, "artifact write throttled {duration:?}"),
            RunEvent::CrossValidated { counts, artifact } => write!(
                f,
                "cross-validation members={} non_members={} total={} artifact={}",
                counts.members, counts.non_members, counts.total, artifact.name
            ),
            RunEvent::Cancelled { committed } => {
                write!(f, "run cancelled after {committed} artifact(s)")
            }
            RunEvent::Failed { message, .. } => write!(f, "run failed: {message}"),
            RunEvent::RunFinished { elapsed, metrics } => {
                write!(f, "run finished in {elapsed:?} ({metrics})")
            }
        }
    }
}

/// Observer hook for run events.
pub trait RunObserver: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}

/// Logs run events to stderr.
#[derive(Debug, Default)]
pub struct StdErrRunObserver;

impl RunObserver for StdErrRunObserver {
    fn on_event(&self, event: &RunEvent) {
        eprintln!("[run][{:?}] {event}", event.severity());
    }
}

/// Forwards run events to `tracing` at the level matching their severity.
#[derive(Debug, Default)]
pub struct TracingRunObserver;

impl RunObserver for TracingRunObserver {
    fn on_event(&self, event: &RunEvent) {
        match event.severity() {
            Severity::Info => tracing::info!(target: "billing_partition", "{event}"),
            Severity::Warning => tracing::warn!(target: "billing_partition", "{event}"),
            Severity::Error | Severity::Critical => {
                tracing::error!(target: "billing_partition", "{event}")
            }
        }
    }
}

/// Appends run events at or above a severity to a local log file.
#[derive(Debug)]
pub struct FileRunObserver {
    path: PathBuf,
    min_severity: Severity,
    lock: Mutex<()>,
}

impl FileRunObserver {
    /// Create a file observer that appends every event to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            min_severity: Severity::Info,
            lock: Mutex::new(()),
        }
    }

    /// Only record events at or above `severity`.
    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }
}

impl RunObserver for FileRunObserver {
    fn on_event(&self, event: &RunEvent) {
        let severity = event.severity();
        if severity < self.min_severity {
            return;
        }
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{} {:?} {event}", unix_ts(), severity);
        }
    }
}

/// Fans events out to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn RunObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn RunObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl RunObserver for CompositeObserver {
    fn on_event(&self, event: &RunEvent) {
        for o in &self.observers {
            o.on_event(event);
        }
    }
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Real-time counters for a partitioning run.
///
/// The engine updates these while it works; callers can snapshot them at any time.
pub struct ExecutionMetrics {
    started_at: Mutex<Option<Instant>>,
    elapsed_ns: AtomicU64,

    rows_scanned: AtomicU64,
    partitions_started: AtomicU64,
    partitions_written: AtomicU64,
    artifact_bytes: AtomicU64,
    write_wait_ns: AtomicU64,

    active_partitions: AtomicUsize,
    max_active_partitions: AtomicUsize,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Mutex::new(None),
            elapsed_ns: AtomicU64::new(0),
            rows_scanned: AtomicU64::new(0),
            partitions_started: AtomicU64::new(0),
            partitions_written: AtomicU64::new(0),
            artifact_bytes: AtomicU64::new(0),
            write_wait_ns: AtomicU64::new(0),
            active_partitions: AtomicUsize::new(0),
            max_active_partitions: AtomicUsize::new(0),
        }
    }

    /// Reset all counters and start the clock.
    pub fn begin_run(&self) {
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        for counter in [
            &self.elapsed_ns,
            &self.rows_scanned,
            &self.partitions_started,
            &self.partitions_written,
            &self.artifact_bytes,
            &self.write_wait_ns,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
        self.active_partitions.store(0, Ordering::SeqCst);
        self.max_active_partitions.store(0, Ordering::SeqCst);
    }

    /// Stop the clock started by [`Self::begin_run`].
    pub fn end_run(&self) {
        let started = *self.started_at.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(start) = started {
            self.elapsed_ns.store(duration_ns(start.elapsed()), Ordering::SeqCst);
        }
    }

    pub fn on_rows_scanned(&self, n: usize) {
        let _ = self.rows_scanned.fetch_add(n as u64, Ordering::SeqCst);
    }

    pub fn on_partition_start(&self) {
        let _ = self.partitions_started.fetch_add(1, Ordering::SeqCst);
        let now = self.active_partitions.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_partitions.fetch_max(now, Ordering::SeqCst);
    }

    pub fn on_partition_end(&self) {
        let _ = self.active_partitions.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn on_artifact_written(&self, bytes: u64) {
        let _ = self.partitions_written.fetch_add(1, Ordering::SeqCst);
        let _ = self.artifact_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn on_write_wait(&self, d: Duration) {
        let _ = self.write_wait_ns.fetch_add(duration_ns(d), Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        ExecutionMetricsSnapshot {
            elapsed: (elapsed_ns > 0).then(|| Duration::from_nanos(elapsed_ns)),
            rows_scanned: self.rows_scanned.load(Ordering::SeqCst),
            partitions_started: self.partitions_started.load(Ordering::SeqCst),
            partitions_written: self.partitions_written.load(Ordering::SeqCst),
            artifact_bytes: self.artifact_bytes.load(Ordering::SeqCst),
            write_wait: Duration::from_nanos(self.write_wait_ns.load(Ordering::SeqCst)),
            max_active_partitions: self.max_active_partitions.load(Ordering::SeqCst),
        }
    }
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_ns(d: Duration) -> u64 {
    d.as_nanos().min(u64::MAX as u128) as u64
}

/// Immutable snapshot of [`ExecutionMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionMetricsSnapshot {
    pub elapsed: Option<Duration>,
    pub rows_scanned: u64,
    pub partitions_started: u64,
    pub partitions_written: u64,
    pub artifact_bytes: u64,
    pub write_wait: Duration,
    pub max_active_partitions: usize,
}

impl fmt::Display for ExecutionMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows_scanned={}, partitions={}/{}, artifact_bytes={}, max_active_partitions={}, write_wait={:?}, elapsed={:?}",
            self.rows_scanned,
            self.partitions_written,
            self.partitions_started,
            self.artifact_bytes,
            self.max_active_partitions,
            self.write_wait,
            self.elapsed
        )
    }
}
