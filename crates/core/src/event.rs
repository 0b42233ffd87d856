// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Metric events appended to the fleet's event log.
//!
//! Serializes with `{"event": "event_name", "timestamp": ..., ...fields}`,
//! one JSON object per log line.

use crate::metrics::{CodeInformation, PostJobStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Events describing the lifecycle of runners and reconcile ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MetricEvent {
    /// A runner VM finished launching.
    RunnerInstalled {
        timestamp: f64,
        flavor: String,
        /// Installation duration in seconds.
        duration: f64,
    },

    /// A runner picked up a job.
    RunnerStart {
        timestamp: f64,
        flavor: String,
        workflow: String,
        repo: String,
        github_event: String,
        /// Seconds the runner sat idle before the job arrived.
        idle: f64,
        /// Seconds the job queued before the runner picked it up, when the
        /// platform could tell us.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue_duration: Option<f64>,
    },

    /// A runner finished its job.
    RunnerStop {
        timestamp: f64,
        flavor: String,
        workflow: String,
        repo: String,
        github_event: String,
        status: PostJobStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_info: Option<CodeInformation>,
        job_duration: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_conclusion: Option<String>,
    },

    /// A reconcile tick completed.
    Reconciliation {
        timestamp: f64,
        flavor: String,
        crashed_runners: i64,
        idle_runners: u64,
        active_runners: u64,
        /// None in reactive mode, where no fixed quantity is expected.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_runners: Option<u64>,
        duration: f64,
    },
}

/// Kind tag for counting issued events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RunnerInstalled,
    RunnerStart,
    RunnerStop,
    Reconciliation,
}

impl MetricEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MetricEvent::RunnerInstalled { .. } => EventKind::RunnerInstalled,
            MetricEvent::RunnerStart { .. } => EventKind::RunnerStart,
            MetricEvent::RunnerStop { .. } => EventKind::RunnerStop,
            MetricEvent::Reconciliation { .. } => EventKind::Reconciliation,
        }
    }
}

/// Per-kind counters for events issued during an operation.
pub type EventStats = HashMap<EventKind, u64>;

/// Merge two stats maps, summing per-kind counters.
pub fn merge_stats(mut left: EventStats, right: EventStats) -> EventStats {
    for (kind, count) in right {
        *left.entry(kind).or_default() += count;
    }
    left
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
