// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health checks for runner VMs.
//!
//! The decision ladder is pure so it can be tested without a cloud: first
//! the cloud state short-circuits, then an SSH probe report settles the
//! ACTIVE case.

use chrono::{DateTime, Utc};
use rfm_core::{Vm, VmState};
use std::time::Duration;

/// How long a VM may sit in build mode before it is considered stuck.
pub const BUILD_MODE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Decide health from the cloud state alone.
///
/// Returns `None` for ACTIVE VMs, which need an SSH probe to settle.
pub fn health_from_cloud_state(vm: &Vm, now: DateTime<Utc>) -> Option<bool> {
    match vm.state {
        VmState::Shutoff | VmState::Error | VmState::Unknown => Some(false),
        VmState::Initializing => Some(!vm.is_older_than(BUILD_MODE_TIMEOUT, now)),
        VmState::Active => None,
    }
}

/// What an SSH probe observed on an ACTIVE VM.
#[derive(Debug, Clone, Default)]
pub struct SshProbeReport {
    /// The runner-installed timestamp file exists.
    pub installed_marker: bool,
    /// Output of `cloud-init status`, if the command succeeded.
    pub cloud_init_status: Option<String>,
    /// Output of `ps aux` mentions a runner process.
    pub runner_process_running: Option<bool>,
}

/// Settle health for an ACTIVE VM from a probe report.
///
/// `accept_finished_job` marks a runner whose job already finished as
/// healthy; used while a freshly spawned reactive runner may race its own
/// teardown.
pub fn evaluate_ssh_probe(
    report: &SshProbeReport,
    vm: &Vm,
    now: DateTime<Utc>,
    accept_finished_job: bool,
) -> bool {
    // No installed marker yet: cloud-init may still be running. Healthy
    // unless the VM has been building for longer than the timeout.
    if !report.installed_marker {
        return !vm.is_older_than(BUILD_MODE_TIMEOUT, now);
    }

    match report.cloud_init_status.as_deref() {
        None => return false,
        Some(status) if status.contains("error") => return false,
        Some(status) if status.contains("done") => return accept_finished_job,
        Some(_) => {}
    }

    report.runner_process_running.unwrap_or(false)
}

/// Runner processes looked for in `ps aux` output.
pub const RUNNER_LISTENER_PROCESS: &str = "Runner.Listener";
pub const RUNNER_WORKER_PROCESS: &str = "Runner.Worker";

/// True when a process listing mentions either runner process.
pub fn has_runner_process(ps_output: &str) -> bool {
    ps_output.contains(RUNNER_LISTENER_PROCESS) || ps_output.contains(RUNNER_WORKER_PROCESS)
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
