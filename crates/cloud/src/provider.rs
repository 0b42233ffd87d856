// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The cloud provider contract the runner manager drives.

use crate::error::CloudError;
use async_trait::async_trait;
use rfm_core::{InstanceId, RunnerContext, RunnerIdentity, Vm};
use std::path::Path;
use std::time::Duration;

/// Adapter for VM lifecycle on one cloud project.
#[async_trait]
pub trait VmProvider: Send + Sync + 'static {
    /// The name prefix of every VM this provider owns.
    fn name_prefix(&self) -> &str;

    /// Launch a VM for a registered runner.
    async fn create_runner(
        &self,
        identity: &RunnerIdentity,
        context: &RunnerContext,
    ) -> Result<Vm, CloudError>;

    /// List the VMs whose names carry this provider's prefix.
    async fn get_vms(&self) -> Result<Vec<Vm>, CloudError>;

    /// Delete VMs in parallel, returning the ids actually deleted.
    /// Per-VM failures are logged and excluded; the call fails only on
    /// cloud-wide errors.
    async fn delete_vms(
        &self,
        instance_ids: &[InstanceId],
        wait: bool,
        timeout: Duration,
    ) -> Result<Vec<InstanceId>, CloudError>;

    /// Pull the VM's metric exchange files into `dest`.
    async fn pull_metrics(&self, vm: &Vm, dest: &Path) -> Result<(), CloudError>;

    /// Probe one VM's health (cloud state first, SSH for ACTIVE VMs).
    async fn check_health(&self, vm: &Vm, accept_finished_job: bool)
        -> Result<bool, CloudError>;

    /// Reclaim orphaned shared resources (keypairs, stale key files).
    async fn cleanup(&self) -> Result<(), CloudError>;
}
