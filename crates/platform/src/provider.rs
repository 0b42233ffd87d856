// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The uniform platform contract every backend implements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rfm_core::{
    InstanceId, PlatformRunnerHealth, RunnerContext, RunnerIdentity, RunnerMetadata,
};
use thiserror::Error;

/// Errors from platform operations, per the system error taxonomy.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Generic platform failure: transient for health queries, fatal for
    /// registration.
    #[error("platform API error: {0}")]
    Api(String),
    /// The platform does not know the runner or job.
    #[error("not found: {0}")]
    NotFound(String),
    /// Credentials rejected; operators need to rotate them.
    #[error("token rejected: {0}")]
    Token(String),
    /// The platform refused to delete the runner.
    #[error("failed to delete runner: {0}")]
    Deletion(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Status of a job on its platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Waiting,
}

impl JobStatus {
    /// A job in one of these states has been picked up by some runner.
    pub fn picked_up(&self) -> bool {
        matches!(self, JobStatus::InProgress | JobStatus::Completed)
    }
}

/// Platform-side information about one job.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub status: JobStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub conclusion: Option<String>,
}

impl JobInfo {
    /// Seconds the job queued before a runner took it, clamped at zero.
    pub fn queue_duration(&self) -> Option<f64> {
        let (created, started) = (self.created_at?, self.started_at?);
        Some(((started - created).num_milliseconds() as f64 / 1000.0).max(0.0))
    }
}

/// A runner as the platform sees it after registration.
#[derive(Debug, Clone)]
pub struct PlatformRunner {
    /// The platform's opaque runner id.
    pub id: String,
    pub identity: RunnerIdentity,
    pub online: bool,
    pub busy: bool,
    pub labels: Vec<String>,
}

/// Result of a bulk health query, partitioning the requested set.
#[derive(Debug, Clone, Default)]
pub struct RunnersHealthResponse {
    /// Health known for these runners.
    pub requested_runners: Vec<PlatformRunnerHealth>,
    /// Temporary failure; ask again later.
    pub failed_requested_runners: Vec<RunnerIdentity>,
    /// Runners the platform knows about that the caller did not ask for:
    /// strays to be unregistered.
    pub non_requested_runners: Vec<RunnerIdentity>,
}

impl RunnersHealthResponse {
    /// Concatenate another backend's response into this one.
    pub fn append(&mut self, other: RunnersHealthResponse) {
        self.requested_runners.extend(other.requested_runners);
        self.failed_requested_runners
            .extend(other.failed_requested_runners);
        self.non_requested_runners.extend(other.non_requested_runners);
    }
}

/// Capability contract of one job platform.
#[async_trait]
pub trait PlatformProvider: Send + Sync {
    /// Register a runner and produce its boot context. The returned script
    /// embeds the one-time registration credentials.
    async fn get_runner_context(
        &self,
        metadata: &RunnerMetadata,
        instance_id: &InstanceId,
        labels: &[String],
    ) -> Result<(RunnerContext, PlatformRunner), PlatformError>;

    /// Health of a single runner.
    async fn get_runner_health(
        &self,
        identity: &RunnerIdentity,
    ) -> Result<PlatformRunnerHealth, PlatformError>;

    /// Health of many runners, partitioned into known / failed / strays.
    async fn get_runners_health(
        &self,
        requested: &[RunnerIdentity],
    ) -> Result<RunnersHealthResponse, PlatformError>;

    /// Unregister a runner. Idempotent: success means the platform no
    /// longer lists it.
    async fn delete_runner(&self, identity: &RunnerIdentity) -> Result<(), PlatformError>;

    /// Whether the job behind `job_url` has been picked up by some runner.
    async fn check_job_been_picked_up(
        &self,
        metadata: &RunnerMetadata,
        job_url: &str,
    ) -> Result<bool, PlatformError>;

    /// Details of one job, for queue-duration accounting.
    async fn get_job_info(
        &self,
        metadata: &RunnerMetadata,
        repository: &str,
        workflow_run_id: &str,
        instance_id: &InstanceId,
    ) -> Result<JobInfo, PlatformError>;
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
