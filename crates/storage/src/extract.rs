// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Extraction of metric records from a runner's storage directory.
//!
//! The VM drops four files into its metrics exchange; the cloud layer pulls
//! them into the runner's storage directory before teardown. Any file over
//! the size cap or failing to parse marks the whole directory corrupt; the
//! caller quarantines it and emits no events for that runner.

use crate::metrics_storage::{StorageEntry, StorageError};
use rfm_core::{PostJobMetrics, PreJobMetrics, RunnerMetadata, RunnerMetrics};
use std::path::Path;

/// Metric files above this size are treated as corrupt. Defends against a
/// compromised runner filling the manager's disk.
pub const MAX_METRIC_FILE_SIZE: u64 = 1024;

/// Name of the installation-finished timestamp file.
pub const RUNNER_INSTALLED_TS_FILE: &str = "runner-installed.timestamp";
/// Name of the installation-start timestamp file.
pub const INSTALLATION_START_TS_FILE: &str = "installation-start.timestamp";
/// Name of the pre-job metrics file.
pub const PRE_JOB_METRICS_FILE: &str = "pre-job-metrics.json";
/// Name of the post-job metrics file.
pub const POST_JOB_METRICS_FILE: &str = "post-job-metrics.json";

/// Read the metric records out of a runner's storage directory.
///
/// Missing files yield `None` fields; unparseable or oversized files fail
/// with [`StorageError::Corrupt`].
pub fn extract_metrics(
    entry: &StorageEntry,
    metadata: RunnerMetadata,
) -> Result<RunnerMetrics, StorageError> {
    let instance = entry.instance_id.name();

    let installation_start_timestamp = read_timestamp(
        &entry.path.join(INSTALLATION_START_TS_FILE),
        &instance,
    )?;
    let installed_timestamp =
        read_timestamp(&entry.path.join(RUNNER_INSTALLED_TS_FILE), &instance)?;

    let pre_job = match read_capped(&entry.path.join(PRE_JOB_METRICS_FILE), &instance)? {
        None => None,
        Some(raw) => {
            let record: PreJobMetrics = parse_json(&raw, &instance)?;
            record.validate().map_err(|err| StorageError::Corrupt {
                instance: instance.clone(),
                message: err.to_string(),
            })?;
            Some(record)
        }
    };

    let post_job = match read_capped(&entry.path.join(POST_JOB_METRICS_FILE), &instance)? {
        None => None,
        Some(raw) => {
            let record: PostJobMetrics = parse_json(&raw, &instance)?;
            record.validate().map_err(|err| StorageError::Corrupt {
                instance: instance.clone(),
                message: err.to_string(),
            })?;
            Some(record)
        }
    };

    Ok(RunnerMetrics {
        instance_id: entry.instance_id.clone(),
        metadata,
        installation_start_timestamp,
        installed_timestamp,
        pre_job,
        post_job,
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(
    raw: &str,
    instance: &str,
) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|err| StorageError::Corrupt {
        instance: instance.to_string(),
        message: err.to_string(),
    })
}

fn read_timestamp(path: &Path, instance: &str) -> Result<Option<f64>, StorageError> {
    let Some(raw) = read_capped(path, instance)? else {
        return Ok(None);
    };
    let value: f64 = raw.trim().parse().map_err(|_| StorageError::Corrupt {
        instance: instance.to_string(),
        message: format!("invalid timestamp in {}", path.display()),
    })?;
    if value < 0.0 {
        return Err(StorageError::Corrupt {
            instance: instance.to_string(),
            message: format!("negative timestamp in {}", path.display()),
        });
    }
    Ok(Some(value))
}

fn read_capped(path: &Path, instance: &str) -> Result<Option<String>, StorageError> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if metadata.len() > MAX_METRIC_FILE_SIZE {
        return Err(StorageError::Corrupt {
            instance: instance.to_string(),
            message: format!(
                "{} is {} bytes, over the {} byte limit",
                path.display(),
                metadata.len(),
                MAX_METRIC_FILE_SIZE
            ),
        });
    }
    Ok(Some(std::fs::read_to_string(path)?))
}

#[cfg(test)]
#[path = "extract_tests.rs"]
mod tests;
