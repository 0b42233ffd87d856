// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-runner metric records pulled from the VM's metrics exchange.

use crate::instance::InstanceId;
use crate::runner::RunnerMetadata;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for metric records.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("negative timestamp {0}")]
    NegativeTimestamp(f64),
    #[error("repository '{0}' is not in 'owner/repo' form")]
    InvalidRepository(String),
}

/// Metrics produced by the pre-job phase of a runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreJobMetrics {
    /// UNIX timestamp in seconds at which the record was issued.
    pub timestamp: f64,
    pub workflow: String,
    pub workflow_run_id: String,
    /// Repository in the form `owner/repo`.
    pub repository: String,
    /// The platform event that triggered the job.
    pub event: String,
}

impl PreJobMetrics {
    pub fn validate(&self) -> Result<(), MetricsError> {
        if self.timestamp < 0.0 {
            return Err(MetricsError::NegativeTimestamp(self.timestamp));
        }
        let mut parts = self.repository.splitn(2, '/');
        let owner = parts.next().unwrap_or_default();
        let repo = parts.next().unwrap_or_default();
        if owner.is_empty() || repo.is_empty() {
            return Err(MetricsError::InvalidRepository(self.repository.clone()));
        }
        Ok(())
    }
}

/// Outcome of the post-job phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostJobStatus {
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "abnormal")]
    Abnormal,
    #[serde(rename = "repo-policy-check-failure")]
    RepoPolicyCheckFailure,
}

/// Numeric detail attached to an abnormal post-job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeInformation {
    pub code: i64,
}

/// Metrics produced by the post-job phase of a runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostJobMetrics {
    /// UNIX timestamp in seconds at which the record was issued.
    pub timestamp: f64,
    pub status: PostJobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_info: Option<CodeInformation>,
}

impl PostJobMetrics {
    pub fn validate(&self) -> Result<(), MetricsError> {
        if self.timestamp < 0.0 {
            return Err(MetricsError::NegativeTimestamp(self.timestamp));
        }
        Ok(())
    }
}

/// Everything extracted from one runner's metric storage.
#[derive(Debug, Clone)]
pub struct RunnerMetrics {
    pub instance_id: InstanceId,
    pub metadata: RunnerMetadata,
    /// When the VM setup started, if the VM recorded it.
    pub installation_start_timestamp: Option<f64>,
    /// When the runner finished installing, if it got that far.
    pub installed_timestamp: Option<f64>,
    pub pre_job: Option<PreJobMetrics>,
    pub post_job: Option<PostJobMetrics>,
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
