// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reactive consumer: turns queue messages into spawned runners.
//!
//! One message is processed at a time. The consumer exits after a spawn
//! attempt (successful or requeued); the process manager starts a fresh
//! consumer process for the next message.

use crate::queue::{JobQueue, Message, QueueError};
use rfm_cloud::VmProvider;
use rfm_core::{Clock, RunnerMetadata};
use rfm_manager::RunnerManager;
use rfm_platform::{PlatformError, PlatformProvider};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Messages processed more often than this are rejected for good.
pub const RETRY_LIMIT: u32 = 5;
/// Exponential backoff base for retried messages, in seconds.
const BACKOFF_BASE_SECONDS: u64 = 10;
/// Backoff cap, in seconds.
const BACKOFF_MAX_SECONDS: u64 = 300;
/// Interval between picked-up probes after spawning.
const WAIT_TIME: Duration = Duration::from_secs(60);
/// Number of picked-up probes after spawning.
const PICKED_UP_PROBES: u32 = 5;

/// Control payload that stops the consumer. Used by tests and drain
/// tooling; never produced by the job router.
pub const END_PROCESSING_PAYLOAD: &str = "__END__";

/// Errors that terminate the consumer process.
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("invalid job details: {0}")]
    InvalidJob(String),
    #[error("platform error: {0}")]
    Platform(String),
}

/// A job spawn request from the queue.
#[derive(Debug, Clone, Deserialize)]
pub struct JobDetails {
    pub labels: HashSet<String>,
    pub url: String,
}

/// Parse and validate a message payload. The URL must carry a path.
pub fn parse_job_details(payload: &str) -> Result<JobDetails, ConsumeError> {
    let details: JobDetails = serde_json::from_str(payload)
        .map_err(|err| ConsumeError::InvalidJob(format!("{err}: {payload}")))?;
    let has_path = details
        .url
        .split_once("://")
        .map(|(_, rest)| rest.contains('/'))
        .unwrap_or(false);
    if !has_path {
        return Err(ConsumeError::InvalidJob(format!(
            "job url '{}' has no path",
            details.url
        )));
    }
    Ok(details)
}

/// Exponential backoff for a message's nth processing:
/// `min(10 · 2^(n−1), 300)` seconds.
pub fn calculate_backoff(process_count: u32) -> Duration {
    let exponent = process_count.saturating_sub(1).min(31);
    let seconds = BACKOFF_BASE_SECONDS.saturating_mul(1 << exponent);
    Duration::from_secs(seconds.min(BACKOFF_MAX_SECONDS))
}

/// Case-insensitive subset check of the job's labels against the labels
/// this manager can satisfy.
pub fn validate_labels(labels: &HashSet<String>, supported: &HashSet<String>) -> bool {
    let supported: HashSet<String> = supported.iter().map(|label| label.to_lowercase()).collect();
    labels
        .iter()
        .all(|label| supported.contains(&label.to_lowercase()))
}

/// Build the runner metadata for a job URL. Only GitHub URLs are routed.
pub fn build_runner_metadata(job_url: &str) -> Result<RunnerMetadata, ConsumeError> {
    let host = job_url
        .split_once("://")
        .map(|(_, rest)| rest.split('/').next().unwrap_or_default())
        .unwrap_or_default();
    if host.contains("github.com") {
        return Ok(RunnerMetadata::github());
    }
    Err(ConsumeError::InvalidJob(format!(
        "invalid job url {job_url}, only GitHub URLs are supported"
    )))
}

/// Consume messages until a runner is spawned or the end sentinel is seen.
pub async fn consume<Q, C, P, PP, K>(
    queue: &Q,
    manager: &RunnerManager<C, P, K>,
    platform: &PP,
    supported_labels: &HashSet<String>,
) -> Result<(), ConsumeError>
where
    Q: JobQueue,
    C: VmProvider,
    P: PlatformProvider,
    PP: PlatformProvider,
    K: Clock,
{
    loop {
        let message = queue.get().await?;
        if message.payload == END_PROCESSING_PAYLOAD {
            queue.ack(&message).await?;
            return Ok(());
        }

        let process_count = message.process_count;
        let details = match parse_job_details(&message.payload) {
            Ok(details) => details,
            Err(err) => {
                error!(error = %err, "invalid job details, rejecting message");
                queue.reject(&message, false).await?;
                return Err(err);
            }
        };
        info!(url = %details.url, labels = ?details.labels, "received reactive job");

        if process_count > RETRY_LIMIT {
            warn!(url = %details.url, process_count, "retry limit reached, dropping job");
            queue.reject(&message, false).await?;
            continue;
        }

        if process_count > 1 {
            let backoff = calculate_backoff(process_count);
            info!(
                url = %details.url,
                process_count,
                backoff_secs = backoff.as_secs(),
                "pausing retried job"
            );
            tokio::time::sleep(backoff).await;
        }

        if !validate_labels(&details.labels, supported_labels) {
            error!(
                labels = ?details.labels,
                "unsupported job labels, rejecting message"
            );
            queue.reject(&message, false).await?;
            continue;
        }

        let metadata = match build_runner_metadata(&details.url) {
            Ok(metadata) => metadata,
            Err(err) => {
                error!(error = %err, "unroutable job url, rejecting message");
                queue.reject(&message, false).await?;
                return Ok(());
            }
        };

        match platform.check_job_been_picked_up(&metadata, &details.url).await {
            Ok(true) => {
                info!(url = %details.url, "job already picked up, acking");
                queue.ack(&message).await?;
                continue;
            }
            Ok(false) => {}
            Err(PlatformError::NotFound(_)) => {
                warn!(url = %details.url, "job not found, not retrying");
                queue.reject(&message, false).await?;
                continue;
            }
            Err(err) => return Err(ConsumeError::Platform(err.to_string())),
        }

        spawn_runner(queue, manager, platform, &message, &metadata, &details.url).await?;
        return Ok(());
    }
}

/// Spawn one runner for a job, then watch for the job to be picked up.
async fn spawn_runner<Q, C, P, PP, K>(
    queue: &Q,
    manager: &RunnerManager<C, P, K>,
    platform: &PP,
    message: &Message,
    metadata: &RunnerMetadata,
    job_url: &str,
) -> Result<(), ConsumeError>
where
    Q: JobQueue,
    C: VmProvider,
    P: PlatformProvider,
    PP: PlatformProvider,
    K: Clock,
{
    info!(url = %job_url, "spawning reactive runner");
    let instance_ids = manager.create_runners(1, metadata, true).await;
    if instance_ids.is_empty() {
        error!(url = %job_url, "failed to spawn a runner, requeueing message");
        queue.reject(message, true).await?;
        return Ok(());
    }
    info!(runners = ?instance_ids, "reactive runner spawned");

    for attempt in 0..PICKED_UP_PROBES {
        tokio::time::sleep(WAIT_TIME).await;
        info!(url = %job_url, attempt, "checking if job was picked up");
        match platform.check_job_been_picked_up(metadata, job_url).await {
            Ok(true) => {
                info!(url = %job_url, "job picked up, acking message");
                queue.ack(message).await?;
                return Ok(());
            }
            Ok(false) => {}
            Err(PlatformError::NotFound(_)) => {
                warn!(url = %job_url, attempt, "job not found after spawning runner");
            }
            Err(err) => {
                warn!(url = %job_url, error = %err, "picked-up probe failed");
            }
        }
    }

    info!(
        url = %job_url,
        "job not picked up by the spawned runner, requeueing message"
    );
    queue.reject(message, true).await?;
    Ok(())
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;
