//! Partition-and-aggregate execution with configurable parallelism.
//!
//! This module sits "above" [`crate::processing`] and provides:
//!
//! - Per-key partition processing on a rayon pool, results kept in first-seen key order
//! - Throttling of concurrent artifact writes
//! - Cooperative cancellation at every per-key checkpoint
//! - Real-time metrics + observer hooks for monitoring

mod observer;
mod semaphore;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;
use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use crate::artifact::{artifact_name, ArtifactRef, ArtifactStore};
use crate::categorize::{CategoryCount, CategoryTable, DetailCount};
use crate::error::{ArtifactError, EngineError, EngineResult};
use crate::jobs::JobHandle;
use crate::processing::{aggregate_rows, distinct_count, group_rows, Group};
use crate::resolve::RoleMapping;
use crate::types::Table;

pub use observer::{
    CompositeObserver, ExecutionMetrics, ExecutionMetricsSnapshot, FileRunObserver, RunEvent, RunObserver,
    Severity, StdErrRunObserver, TracingRunObserver,
};

use semaphore::Semaphore;

/// Configuration for the [`PartitionEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Number of worker threads processing partitions.
    ///
    /// If `None`, uses the platform's available parallelism.
    pub num_threads: Option<usize>,
    /// Upper bound on concurrently running artifact writes.
    pub max_in_flight_writes: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            num_threads: None,
            max_in_flight_writes: available_parallelism(),
        }
    }
}

impl ExecutionOptions {
    /// Single-threaded, one write at a time.
    pub fn sequential() -> Self {
        Self {
            num_threads: Some(1),
            max_in_flight_writes: 1,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.num_threads == Some(0) {
            return Err(config_error("execution.num_threads must be > 0 when set"));
        }
        if self.max_in_flight_writes == 0 {
            return Err(config_error("execution.max_in_flight_writes must be > 0"));
        }
        Ok(())
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn config_error(message: &str) -> EngineError {
    EngineError::Config {
        message: message.to_string(),
    }
}

/// What to partition and how.
#[derive(Debug, Clone, Copy)]
pub struct PartitionRequest<'a> {
    /// Name used in errors, events and reports (`crystal`, `query`).
    pub table_name: &'a str,
    pub table: &'a Table,
    pub mapping: &'a RoleMapping,
    /// Role whose column defines the partitions.
    pub key_role: &'a str,
    /// Role whose column holds the service label.
    pub category_role: &'a str,
    /// Optional role counted distinctly per partition.
    pub distinct_role: Option<&'a str>,
    pub categories: &'a CategoryTable,
    /// First segment of every artifact name.
    pub artifact_prefix: &'a str,
}

/// Counts and artifact of one partition. The partition rows themselves are not retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionRecord {
    /// Normalized key.
    pub key: String,
    /// Display label (first-seen trimmed text of the key).
    pub label: String,
    pub rows: usize,
    pub categories: CategoryCount,
    pub details: DetailCount,
    /// Distinct values of the request's `distinct_role` within the partition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distinct: Option<usize>,
    pub artifact: ArtifactRef,
}

/// Result of a completed partition pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionSummary {
    pub table: String,
    /// Partitions in first-seen key order.
    pub partitions: Vec<PartitionRecord>,
    /// Global counts over every row, including rows with a missing key.
    pub categories: CategoryCount,
    pub details: DetailCount,
    pub total_rows: usize,
    /// Rows whose key was missing and which belong to no partition.
    pub excluded_rows: usize,
}

impl PartitionSummary {
    /// Case- and whitespace-insensitive lookup by key.
    pub fn partition(&self, label: &str) -> Option<&PartitionRecord> {
        let key = label.trim().to_lowercase();
        self.partitions.iter().find(|p| p.key == key)
    }

    /// Partition labels, sorted.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.partitions.iter().map(|p| p.label.clone()).collect();
        labels.sort();
        labels
    }
}

/// Outcome of [`PartitionEngine::partition_and_aggregate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionOutcome {
    Completed(PartitionSummary),
    /// The job was cancelled; `committed` holds the partitions written before that was noticed.
    Cancelled { committed: Vec<PartitionRecord> },
}

/// Per-call state shared by every group of one partitioning pass.
struct GroupContext<'c, 'r> {
    request: &'c PartitionRequest<'r>,
    label_idx: usize,
    distinct_idx: Option<usize>,
    sem: &'c Semaphore,
    store: &'c dyn ArtifactStore,
    metrics: &'c ExecutionMetrics,
}

enum GroupResult {
    Written(PartitionRecord),
    Skipped,
}

/// Runs the partition-and-aggregate pass over one table.
pub struct PartitionEngine {
    pool: ThreadPool,
    opts: ExecutionOptions,
    observer: Option<Arc<dyn RunObserver>>,
    metrics: Arc<ExecutionMetrics>,
}

impl PartitionEngine {
    /// Create a new engine with the given options.
    pub fn new(opts: ExecutionOptions) -> EngineResult<Self> {
        opts.validate()?;
        let n_threads = opts.num_threads.unwrap_or_else(available_parallelism).max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("partition-{i}"))
            .build()
            .map_err(|e| EngineError::Config {
                message: format!("failed to build worker pool: {e}"),
            })?;

        Ok(Self {
            pool,
            opts,
            observer: None,
            metrics: Arc::new(ExecutionMetrics::new()),
        })
    }

    /// Attach an observer for run events (metrics/logging).
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to the engine's own execution metrics.
    ///
    /// Counters accumulate across [`Self::partition_and_aggregate`] calls until
    /// [`ExecutionMetrics::begin_run`].
    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Group `request.table` by its key role, aggregate every group and persist one artifact
    /// per group.
    ///
    /// Fails before any artifact is written when the key or category role is not resolved.
    /// On an artifact write failure, artifacts already written by this call are deleted
    /// (best-effort) and the error is returned.
    pub fn partition_and_aggregate(
        &self,
        request: &PartitionRequest<'_>,
        job: &JobHandle,
        store: &dyn ArtifactStore,
    ) -> EngineResult<PartitionOutcome> {
        self.partition_and_aggregate_metered(request, job, store, &self.metrics)
    }

    /// Same as [`Self::partition_and_aggregate`], recording into caller-owned `metrics` so
    /// concurrent runs sharing one engine keep separate counters.
    pub fn partition_and_aggregate_metered(
        &self,
        request: &PartitionRequest<'_>,
        job: &JobHandle,
        store: &dyn ArtifactStore,
        metrics: &ExecutionMetrics,
    ) -> EngineResult<PartitionOutcome> {
        let table = request.table;
        let key_idx = request.mapping.require(request.table_name, table, request.key_role)?;
        let label_idx = request
            .mapping
            .require(request.table_name, table, request.category_role)?;
        let distinct_idx = request
            .distinct_role
            .and_then(|role| request.mapping.index_in(table, role));

        if job.check().is_err() {
            return Ok(PartitionOutcome::Cancelled { committed: Vec::new() });
        }

        metrics.on_rows_scanned(table.row_count());
        let global = aggregate_rows(table, label_idx, request.categories);
        let grouping = group_rows(table, key_idx);

        let sem = Semaphore::new(self.opts.max_in_flight_writes);
        let abort = AtomicBool::new(false);
        let ctx = GroupContext {
            request,
            label_idx,
            distinct_idx,
            sem: &sem,
            store,
            metrics,
        };

        let results: Vec<Result<GroupResult, ArtifactError>> = self.pool.install(|| {
            grouping
                .groups
                .par_iter()
                .map(|group| {
                    if abort.load(Ordering::SeqCst) || job.check().is_err() {
                        return Ok(GroupResult::Skipped);
                    }
                    let res = self.process_group(&ctx, group);
                    if res.is_err() {
                        abort.store(true, Ordering::SeqCst);
                    }
                    res.map(GroupResult::Written)
                })
                .collect()
        });

        let mut committed = Vec::with_capacity(results.len());
        let mut first_err = None;
        let mut skipped = false;
        for r in results {
            match r {
                Ok(GroupResult::Written(record)) => committed.push(record),
                Ok(GroupResult::Skipped) => skipped = true,
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        if let Some(err) = first_err {
            discard(store, committed.iter().map(|r| &r.artifact));
            return Err(err.into());
        }
        if skipped {
            return Ok(PartitionOutcome::Cancelled { committed });
        }

        Ok(PartitionOutcome::Completed(PartitionSummary {
            table: request.table_name.to_string(),
            partitions: committed,
            categories: global.categories,
            details: global.details,
            total_rows: table.row_count(),
            excluded_rows: grouping.excluded.len(),
        }))
    }

    fn process_group(&self, ctx: &GroupContext<'_, '_>, group: &Group) -> Result<PartitionRecord, ArtifactError> {
        ctx.metrics.on_partition_start();
        let res = self.write_group(ctx, group);
        ctx.metrics.on_partition_end();
        res
    }

    fn write_group(&self, ctx: &GroupContext<'_, '_>, group: &Group) -> Result<PartitionRecord, ArtifactError> {
        let GroupContext {
            request,
            label_idx,
            distinct_idx,
            sem,
            store,
            metrics,
        } = *ctx;
        let partition = group.materialize(request.table);
        let agg = aggregate_rows(&partition.table, label_idx, request.categories);
        let distinct = distinct_idx.map(|idx| distinct_count(&partition.table, idx));

        let name = artifact_name(request.artifact_prefix, &partition.label, store.format());
        let artifact = {
            let permit = sem.acquire();
            if permit.waited > Duration::ZERO {
                metrics.on_write_wait(permit.waited);
                self.emit(RunEvent::WriteThrottled {
                    duration: permit.waited,
                });
            }
            store.put(&name, &partition.table)?
        };
        metrics.on_artifact_written(artifact.bytes);

        let record = PartitionRecord {
            key: partition.key,
            label: partition.label,
            rows: group.rows.len(),
            categories: agg.categories,
            details: agg.details,
            distinct,
            artifact,
        };
        self.emit(RunEvent::PartitionWritten {
            table: request.table_name.to_string(),
            label: record.label.clone(),
            rows: record.rows,
            artifact: record.artifact.clone(),
        });
        Ok(record)
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

/// Best-effort removal of artifacts that belong to an aborted run.
pub(crate) fn discard<'a>(store: &dyn ArtifactStore, artifacts: impl IntoIterator<Item = &'a ArtifactRef>) {
    for a in artifacts {
        if let Err(e) = store.delete(&a.name) {
            tracing::warn!(target: "billing_partition", artifact = %a.name, error = %e, "failed to discard artifact");
        }
    }
}
