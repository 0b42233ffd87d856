// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Storage layer: per-runner metric directories and the metric event log.

mod event_log;
mod extract;
mod metrics_storage;

pub use event_log::{EventLog, EventLogError};
pub use extract::{
    extract_metrics, INSTALLATION_START_TS_FILE, MAX_METRIC_FILE_SIZE, POST_JOB_METRICS_FILE,
    PRE_JOB_METRICS_FILE, RUNNER_INSTALLED_TS_FILE,
};
pub use metrics_storage::{MetricsStorage, StorageEntry, StorageError};
