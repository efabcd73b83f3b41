//! Job tracking: progress and cooperative cancellation for long-running runs.
//!
//! A [`JobRegistry`] is a cheaply cloneable handle onto process-wide job state (token -> status).
//! There is no persistence: a restart loses in-flight jobs and clients retry.
//!
//! Lifecycle: `starting -> reading -> partitioning -> validating -> completed`, with `failed`
//! and `cancelled` as absorbing states. A job's entry is removed when it completes, fails, or is
//! cancelled; cancellation is simply "the entry is gone", which the running engine notices at its
//! next checkpoint.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Unique identifier of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobToken(Uuid);

impl JobToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobToken {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl Serialize for JobToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

/// Stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Starting,
    Reading,
    Partitioning,
    Validating,
    Completed,
    Cancelled,
    Failed,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Starting => "starting",
            JobStage::Reading => "reading",
            JobStage::Partitioning => "partitioning",
            JobStage::Validating => "validating",
            JobStage::Completed => "completed",
            JobStage::Cancelled => "cancelled",
            JobStage::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed progress milestones reported at each checkpoint.
pub mod milestones {
    pub const STARTING: u8 = 0;
    pub const READING: u8 = 10;
    pub const PARTITIONING_PRIMARY: u8 = 30;
    pub const PARTITIONING_SECONDARY: u8 = 55;
    pub const VALIDATING: u8 = 80;
    pub const COMPLETED: u8 = 100;
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub token: JobToken,
    pub stage: JobStage,
    /// 0..=100, never decreasing.
    pub progress: u8,
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelResult {
    /// The job was live and has been removed.
    Cancelled,
    /// No live job has this token (unknown, finished, or already cancelled).
    NotFound,
}

/// Signal returned by checkpoints once the job has been cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Process-wide job state.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<JobToken, JobStatus>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job in the `starting` stage and return its token.
    pub fn create(&self) -> JobToken {
        let token = JobToken::new();
        let status = JobStatus {
            token,
            stage: JobStage::Starting,
            progress: milestones::STARTING,
        };
        self.write().insert(token, status);
        token
    }

    /// Register a new job and return a handle for the run that owns it.
    pub fn start(&self) -> JobHandle {
        let token = self.create();
        self.handle(token)
    }

    /// Handle for driving an existing token.
    pub fn handle(&self, token: JobToken) -> JobHandle {
        JobHandle {
            registry: self.clone(),
            token,
        }
    }

    /// Current status, or `None` if the job finished, failed, was cancelled, or never existed.
    pub fn status(&self, token: JobToken) -> Option<JobStatus> {
        self.read().get(&token).cloned()
    }

    /// Cancel a job. Idempotent: unknown or finished tokens report [`CancelResult::NotFound`].
    pub fn cancel(&self, token: JobToken) -> CancelResult {
        match self.write().remove(&token) {
            Some(_) => CancelResult::Cancelled,
            None => CancelResult::NotFound,
        }
    }

    /// Number of live jobs.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<JobToken, JobStatus>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<JobToken, JobStatus>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The owning run's view of one job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    registry: JobRegistry,
    token: JobToken,
}

impl JobHandle {
    pub fn token(&self) -> JobToken {
        self.token
    }

    /// Cancellation checkpoint: `Err(Cancelled)` once the job's entry is gone.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.registry.read().contains_key(&self.token) {
            Ok(())
        } else {
            Err(Cancelled)
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// Move to `stage` at `progress`. Progress never decreases. Doubles as a checkpoint.
    pub fn advance(&self, stage: JobStage, progress: u8) -> Result<JobStatus, Cancelled> {
        let mut jobs = self.registry.write();
        let status = jobs.get_mut(&self.token).ok_or(Cancelled)?;
        status.stage = stage;
        status.progress = status.progress.max(progress.min(milestones::COMPLETED));
        Ok(status.clone())
    }

    /// Remove the job as `completed` at 100%. Returns its final status, or `None` if it had
    /// already been cancelled.
    pub fn complete(&self) -> Option<JobStatus> {
        self.finish(JobStage::Completed, milestones::COMPLETED)
    }

    /// Remove the job as `failed`, keeping the progress it had reached.
    pub fn fail(&self) -> Option<JobStatus> {
        self.finish(JobStage::Failed, milestones::STARTING)
    }

    fn finish(&self, stage: JobStage, progress: u8) -> Option<JobStatus> {
        let mut status = self.registry.write().remove(&self.token)?;
        status.stage = stage;
        status.progress = status.progress.max(progress);
        Some(status)
    }

    /// Current status, if the job is still live.
    pub fn status(&self) -> Option<JobStatus> {
        self.registry.status(self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_query_cancel() {
        let reg = JobRegistry::new();
        let token = reg.create();
        let status = reg.status(token).unwrap();
        assert_eq!(status.stage, JobStage::Starting);
        assert_eq!(status.progress, 0);

        assert_eq!(reg.cancel(token), CancelResult::Cancelled);
        assert_eq!(reg.cancel(token), CancelResult::NotFound);
        assert!(reg.status(token).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn cancel_unknown_token_is_not_found() {
        let reg = JobRegistry::new();
        assert_eq!(reg.cancel(JobToken::new()), CancelResult::NotFound);
    }

    #[test]
    fn progress_never_decreases() {
        let reg = JobRegistry::new();
        let job = reg.start();
        job.advance(JobStage::Partitioning, milestones::PARTITIONING_SECONDARY)
            .unwrap();
        let st = job.advance(JobStage::Validating, 20).unwrap();
        assert_eq!(st.progress, milestones::PARTITIONING_SECONDARY);
        assert_eq!(st.stage, JobStage::Validating);
        let st = job.advance(JobStage::Completed, 250).unwrap();
        assert_eq!(st.progress, 100);
    }

    #[test]
    fn checkpoints_observe_external_cancellation() {
        let reg = JobRegistry::new();
        let job = reg.start();
        assert!(job.check().is_ok());
        reg.cancel(job.token());
        assert_eq!(job.check(), Err(Cancelled));
        assert_eq!(job.advance(JobStage::Reading, 10).unwrap_err(), Cancelled);
        assert!(job.complete().is_none());
        assert!(job.fail().is_none());
    }

    #[test]
    fn completion_removes_the_job() {
        let reg = JobRegistry::new();
        let job = reg.start();
        job.advance(JobStage::Validating, milestones::VALIDATING).unwrap();
        let last = job.complete().unwrap();
        assert_eq!(last.stage, JobStage::Completed);
        assert_eq!(last.progress, milestones::COMPLETED);
        assert!(job.status().is_none());
        assert_eq!(reg.cancel(job.token()), CancelResult::NotFound);
    }

    #[test]
    fn failure_keeps_progress_and_removes_the_job() {
        let reg = JobRegistry::new();
        let job = reg.start();
        job.advance(JobStage::Partitioning, milestones::PARTITIONING_PRIMARY).unwrap();
        let last = job.fail().unwrap();
        assert_eq!(last.stage, JobStage::Failed);
        assert_eq!(last.progress, milestones::PARTITIONING_PRIMARY);
        assert!(reg.is_empty());
        assert!(job.complete().is_none());
    }

    #[test]
    fn tokens_parse_from_their_display_form() {
        let t = JobToken::new();
        let parsed: JobToken = t.to_string().parse().unwrap();
        assert_eq!(parsed, t);
        assert!("not-a-token".parse::<JobToken>().is_err());
    }
}
