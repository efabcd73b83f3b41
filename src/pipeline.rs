//! End-to-end run over a crystal (provider) table and a query (validation) table.
//!
//! Order of work:
//!
//! 1. `starting`, then `reading` when raw sources are supplied
//! 2. resolve both role mappings; a missing required role aborts before any artifact is written
//! 3. `partitioning`: crystal by professional, then query by user
//! 4. `validating`: flag query rows whose user also appears in crystal (skipped when either
//!    identity role is unresolved)
//! 5. `completed`
//!
//! The job handle is checked at every stage change and before every partition. A failed run
//! deletes the artifacts it had already written; a cancelled run keeps them and reports them.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::artifact::{artifact_name, ArtifactRef, ArtifactStore, DirectoryArtifactStore};
use crate::config::{EngineConfig, TableProfile};
use crate::error::{EngineError, EngineResult, ErrorClass};
use crate::execution::{
    discard, ExecutionMetrics, ExecutionMetricsSnapshot, PartitionEngine, PartitionOutcome, PartitionRecord,
    PartitionRequest, PartitionSummary, RunEvent, RunObserver,
};
use crate::ingestion::{ingest_bytes, TableSource};
use crate::jobs::{milestones, Cancelled, JobHandle, JobStage, JobToken};
use crate::processing::{cross_validate, group_rows, MembershipCounts};
use crate::resolve::{resolve_roles, Resolution, RoleMapping};
use crate::types::Table;

/// Outcome of a run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(Box<RunReport>),
    Cancelled(CancelledRun),
}

impl RunOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled(_))
    }

    /// The report, if the run completed.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunOutcome::Completed(report) => Some(report.as_ref()),
            RunOutcome::Cancelled(_) => None,
        }
    }
}

/// What a cancelled run had produced before the cancellation was noticed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelledRun {
    pub token: JobToken,
    /// Partitions whose artifacts were written, in processing order.
    pub committed: Vec<PartitionRecord>,
}

/// Per-table section of a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub name: String,
    pub mapping: RoleMapping,
    #[serde(flatten)]
    pub summary: PartitionSummary,
}

/// Headline numbers of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub crystal_services: usize,
    pub query_services: usize,
    pub professionals: usize,
    pub validators: usize,
    /// Distinct users in the crystal table, when its user role resolved.
    pub crystal_users: Option<usize>,
    pub crystal_excluded_rows: usize,
    pub query_excluded_rows: usize,
}

/// Result of cross-validating query users against crystal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub flag_column: String,
    /// Query rows whose user appears in crystal.
    pub rows: MembershipCounts,
    /// Distinct query users, split by presence in crystal.
    pub users: MembershipCounts,
    pub artifact: ArtifactRef,
}

/// Serializable result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub token: JobToken,
    pub totals: RunTotals,
    pub crystal: TableReport,
    pub query: TableReport,
    /// Sorted partition labels of the crystal table.
    pub professionals: Vec<String>,
    /// Sorted distinct users of the crystal table (empty when unresolved).
    pub crystal_users: Vec<String>,
    /// Sorted partition labels of the query table.
    pub query_users: Vec<String>,
    /// `None` when cross-validation was skipped.
    pub validation: Option<ValidationReport>,
    /// Counters of this run only.
    pub metrics: ExecutionMetricsSnapshot,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// Crystal partition by professional, case- and whitespace-insensitive.
    pub fn crystal_partition(&self, label: &str) -> Option<&PartitionRecord> {
        self.crystal.summary.partition(label)
    }

    /// Query partition by user, case- and whitespace-insensitive.
    pub fn query_partition(&self, label: &str) -> Option<&PartitionRecord> {
        self.query.summary.partition(label)
    }

    /// Every artifact the run produced.
    pub fn artifacts(&self) -> impl Iterator<Item = &ArtifactRef> {
        self.crystal
            .summary
            .partitions
            .iter()
            .chain(&self.query.summary.partitions)
            .map(|p| &p.artifact)
            .chain(self.validation.as_ref().map(|v| &v.artifact))
    }
}

enum Abort {
    Cancelled,
    Failed(EngineError),
}

impl From<Cancelled> for Abort {
    fn from(_: Cancelled) -> Self {
        Abort::Cancelled
    }
}

impl From<EngineError> for Abort {
    fn from(e: EngineError) -> Self {
        Abort::Failed(e)
    }
}

/// State owned by one run: what it has written, how far it got and its counters.
#[derive(Default)]
struct RunState {
    partitions: Vec<PartitionRecord>,
    other: Vec<ArtifactRef>,
    progress: u8,
    metrics: ExecutionMetrics,
}

impl RunState {
    fn artifacts(&self) -> impl Iterator<Item = &ArtifactRef> {
        self.partitions.iter().map(|p| &p.artifact).chain(&self.other)
    }
}

/// Orchestrates a full two-table run.
///
/// A pipeline may be shared between threads; every run keeps its own metrics and artifact
/// bookkeeping.
pub struct Pipeline {
    config: EngineConfig,
    engine: PartitionEngine,
    store: Arc<dyn ArtifactStore>,
    observer: Option<Arc<dyn RunObserver>>,
}

impl Pipeline {
    /// Validate `config` and build a pipeline writing to `store`.
    pub fn new(config: EngineConfig, store: Arc<dyn ArtifactStore>) -> EngineResult<Self> {
        config.validate()?;
        let engine = PartitionEngine::new(config.execution.clone())?;
        Ok(Self {
            config,
            engine,
            store,
            observer: None,
        })
    }

    /// Pipeline writing single-use artifacts under `dir` in the configured format.
    pub fn with_directory_store(config: EngineConfig, dir: impl AsRef<std::path::Path>) -> EngineResult<Self> {
        let store = DirectoryArtifactStore::new(dir, config.artifact_format)?;
        Self::new(config, Arc::new(store))
    }

    /// Attach an observer for run events (metrics/logging).
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.engine = self.engine.with_observer(Arc::clone(&observer));
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Ingest both sources and run.
    pub fn run_sources(&self, job: &JobHandle, crystal: &TableSource, query: &TableSource) -> EngineResult<RunOutcome> {
        self.drive(job, |run| {
            self.stage(job, run, JobStage::Reading, milestones::READING)?;
            let crystal = self.ingest(&self.config.crystal, crystal)?;
            job.check()?;
            let query = self.ingest(&self.config.query, query)?;
            self.process(job, &crystal, &query, run)
        })
    }

    /// Run over already loaded tables.
    pub fn run_tables(&self, job: &JobHandle, crystal: &Table, query: &Table) -> EngineResult<RunOutcome> {
        self.drive(job, |run| self.process(job, crystal, query, run))
    }

    fn drive<F>(&self, job: &JobHandle, body: F) -> EngineResult<RunOutcome>
    where
        F: FnOnce(&mut RunState) -> Result<RunReport, Abort>,
    {
        let _span = tracing::info_span!("run", token = %job.token()).entered();
        let start = Instant::now();
        let mut run = RunState::default();
        run.metrics.begin_run();

        let result = self
            .stage(job, &mut run, JobStage::Starting, milestones::STARTING)
            .map_err(Abort::from)
            .and_then(|()| body(&mut run));
        run.metrics.end_run();
        let metrics = run.metrics.snapshot();

        let outcome = match result {
            Ok(mut report) => {
                // A cancel after the last checkpoint leaves a complete report; only the final
                // stage change is lost.
                if let Some(status) = job.complete() {
                    self.emit(RunEvent::StageChanged {
                        stage: status.stage,
                        progress: status.progress,
                    });
                }
                report.metrics = metrics.clone();
                report.elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                Ok(RunOutcome::Completed(Box::new(report)))
            }
            Err(Abort::Cancelled) => {
                self.emit(RunEvent::StageChanged {
                    stage: JobStage::Cancelled,
                    progress: run.progress,
                });
                self.emit(RunEvent::Cancelled {
                    committed: run.artifacts().count(),
                });
                Ok(RunOutcome::Cancelled(CancelledRun {
                    token: job.token(),
                    committed: run.partitions,
                }))
            }
            Err(Abort::Failed(err)) => {
                if let Some(status) = job.fail() {
                    self.emit(RunEvent::StageChanged {
                        stage: status.stage,
                        progress: status.progress,
                    });
                }
                discard(self.store.as_ref(), run.artifacts());
                self.emit(RunEvent::Failed {
                    message: err.to_string(),
                    critical: err.class() == ErrorClass::Resource,
                });
                Err(err)
            }
        };

        self.emit(RunEvent::RunFinished {
            elapsed: start.elapsed(),
            metrics,
        });
        outcome
    }

    fn ingest(&self, profile: &TableProfile, source: &TableSource) -> EngineResult<Table> {
        let table = ingest_bytes(source, &profile.ingestion)?;
        self.emit(RunEvent::TableIngested {
            table: profile.name.clone(),
            rows: table.row_count(),
            columns: table.columns.clone(),
        });
        Ok(table)
    }

    fn process(&self, job: &JobHandle, crystal: &Table, query: &Table, run: &mut RunState) -> Result<RunReport, Abort> {
        let cfg = &self.config;
        let crystal_map = self.resolve(&cfg.crystal, crystal);
        let query_map = self.resolve(&cfg.query, query);
        crystal_map.check_required(&cfg.crystal.name, crystal)?;
        query_map.check_required(&cfg.query.name, query)?;

        self.stage(job, run, JobStage::Partitioning, milestones::PARTITIONING_PRIMARY)?;
        let crystal_summary = self.partition(job, &cfg.crystal, crystal, &crystal_map, run)?;

        self.stage(job, run, JobStage::Partitioning, milestones::PARTITIONING_SECONDARY)?;
        let query_summary = self.partition(job, &cfg.query, query, &query_map, run)?;

        self.stage(job, run, JobStage::Validating, milestones::VALIDATING)?;
        let validation = self.validate(crystal, &crystal_map, query, &query_map, run)?;

        let crystal_user_idx = cfg
            .crystal
            .distinct_role
            .as_deref()
            .and_then(|role| crystal_map.index_in(crystal, role));
        let crystal_users: Vec<String> = match crystal_user_idx {
            Some(idx) => sorted(group_rows(crystal, idx).groups.into_iter().map(|g| g.label)),
            None => Vec::new(),
        };

        Ok(RunReport {
            token: job.token(),
            totals: RunTotals {
                crystal_services: crystal_summary.total_rows,
                query_services: query_summary.total_rows,
                professionals: crystal_summary.partitions.len(),
                validators: query_summary.partitions.len(),
                crystal_users: crystal_user_idx.map(|_| crystal_users.len()),
                crystal_excluded_rows: crystal_summary.excluded_rows,
                query_excluded_rows: query_summary.excluded_rows,
            },
            professionals: crystal_summary.labels(),
            crystal_users,
            query_users: query_summary.labels(),
            crystal: TableReport {
                name: cfg.crystal.name.clone(),
                mapping: crystal_map,
                summary: crystal_summary,
            },
            query: TableReport {
                name: cfg.query.name.clone(),
                mapping: query_map,
                summary: query_summary,
            },
            validation,
            metrics: run.metrics.snapshot(),
            elapsed_ms: 0,
        })
    }

    fn resolve(&self, profile: &TableProfile, table: &Table) -> RoleMapping {
        let mapping = resolve_roles(&table.columns, &profile.roles, &profile.exclude_columns);
        for role in mapping.roles() {
            match (&role.resolution, &role.column) {
                (Resolution::Position(_), Some(column)) => self.emit(RunEvent::RoleFallback {
                    table: profile.name.clone(),
                    role: role.role.clone(),
                    column: column.clone(),
                }),
                (Resolution::Unresolved, _) => self.emit(RunEvent::RoleUnresolved {
                    table: profile.name.clone(),
                    role: role.role.clone(),
                    required: role.required,
                }),
                _ => {}
            }
        }
        mapping
    }

    fn partition(
        &self,
        job: &JobHandle,
        profile: &TableProfile,
        table: &Table,
        mapping: &RoleMapping,
        run: &mut RunState,
    ) -> Result<PartitionSummary, Abort> {
        let request = PartitionRequest {
            table_name: &profile.name,
            table,
            mapping,
            key_role: &profile.key_role,
            category_role: &profile.category_role,
            distinct_role: profile.distinct_role.as_deref(),
            categories: &self.config.categories,
            artifact_prefix: &profile.artifact_prefix,
        };
        let outcome = self
            .engine
            .partition_and_aggregate_metered(&request, job, self.store.as_ref(), &run.metrics)?;
        match outcome {
            PartitionOutcome::Completed(summary) => {
                run.partitions.extend(summary.partitions.iter().cloned());
                Ok(summary)
            }
            PartitionOutcome::Cancelled { committed: records } => {
                run.partitions.extend(records);
                Err(Abort::Cancelled)
            }
        }
    }

    fn validate(
        &self,
        crystal: &Table,
        crystal_map: &RoleMapping,
        query: &Table,
        query_map: &RoleMapping,
        run: &mut RunState,
    ) -> Result<Option<ValidationReport>, Abort> {
        let cfg = &self.config;
        let query_col = identity_column(&cfg.query, query_map);
        let crystal_col = identity_column(&cfg.crystal, crystal_map);
        let (Some(query_col), Some(crystal_col)) = (query_col, crystal_col) else {
            let missing = if query_col.is_none() { &cfg.query } else { &cfg.crystal };
            self.emit(RunEvent::CrossValidationSkipped {
                reason: format!(
                    "table '{}': identity role '{}' unresolved",
                    missing.name,
                    missing.identity_role.as_deref().unwrap_or("-")
                ),
            });
            return Ok(None);
        };

        let cv = cross_validate(query, query_col, crystal, crystal_col, &cfg.flag_column)?;
        let name = artifact_name(&cfg.validation_prefix, "usuarios", self.store.format());
        let artifact = self.store.put(&name, &cv.table).map_err(EngineError::from)?;
        run.other.push(artifact.clone());

        self.emit(RunEvent::CrossValidated {
            counts: cv.counts,
            artifact: artifact.clone(),
        });
        Ok(Some(ValidationReport {
            flag_column: cfg.flag_column.clone(),
            rows: cv.counts,
            users: cv.identities,
            artifact,
        }))
    }

    fn stage(&self, job: &JobHandle, run: &mut RunState, stage: JobStage, progress: u8) -> Result<(), Cancelled> {
        let status = job.advance(stage, progress)?;
        run.progress = status.progress;
        self.emit(RunEvent::StageChanged {
            stage: status.stage,
            progress: status.progress,
        });
        Ok(())
    }

    fn emit(&self, event: RunEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

fn identity_column<'m>(profile: &TableProfile, mapping: &'m RoleMapping) -> Option<&'m str> {
    profile
        .identity_role
        .as_deref()
        .and_then(|role| mapping.column(role))
}

fn sorted(labels: impl Iterator<Item = String>) -> Vec<String> {
    let mut v: Vec<String> = labels.collect();
    v.sort();
    v
}
