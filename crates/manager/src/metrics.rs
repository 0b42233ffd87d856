// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Derivation of metric events from a runner's extracted records.
//!
//! Durations are clamped to zero: pre/post timestamps come from the VM's
//! clock and may be skewed against each other and the install marker.

use rfm_core::{MetricEvent, RunnerMetrics};
use rfm_platform::JobInfo;

/// Build the RunnerStart/RunnerStop events a runner's metrics justify.
///
/// RunnerStart requires the install marker and a pre-job record;
/// RunnerStop additionally requires a post-job record. A post-job record
/// without a pre-job record yields nothing.
pub fn derive_runner_events(
    metrics: &RunnerMetrics,
    flavor: &str,
    job_info: Option<&JobInfo>,
) -> Vec<MetricEvent> {
    let mut events = Vec::new();

    let Some(installed) = metrics.installed_timestamp else {
        return events;
    };
    let Some(pre_job) = &metrics.pre_job else {
        return events;
    };

    events.push(MetricEvent::RunnerStart {
        timestamp: pre_job.timestamp,
        flavor: flavor.to_string(),
        workflow: pre_job.workflow.clone(),
        repo: pre_job.repository.clone(),
        github_event: pre_job.event.clone(),
        idle: (pre_job.timestamp - installed).max(0.0),
        queue_duration: job_info.and_then(JobInfo::queue_duration),
    });

    if let Some(post_job) = &metrics.post_job {
        events.push(MetricEvent::RunnerStop {
            timestamp: post_job.timestamp,
            flavor: flavor.to_string(),
            workflow: pre_job.workflow.clone(),
            repo: pre_job.repository.clone(),
            github_event: pre_job.event.clone(),
            status: post_job.status,
            status_info: post_job.status_info,
            job_duration: (post_job.timestamp - pre_job.timestamp).max(0.0),
            job_conclusion: job_info.and_then(|info| info.conclusion.clone()),
        });
    }

    events
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
