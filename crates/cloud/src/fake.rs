// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake VM provider for tests: scriptable fleet, recorded calls.

use crate::error::CloudError;
use crate::provider::VmProvider;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rfm_core::{InstanceId, RunnerContext, RunnerIdentity, Vm, VmConfig, VmState};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A recorded call on the fake provider.
#[derive(Debug, Clone, PartialEq)]
pub enum VmProviderCall {
    CreateRunner { name: String },
    GetVms,
    DeleteVms { names: Vec<String>, wait: bool },
    PullMetrics { name: String },
    CheckHealth { name: String },
    Cleanup,
}

#[derive(Default)]
struct FakeState {
    vms: Vec<Vm>,
    calls: Vec<VmProviderCall>,
    fail_create: bool,
    fail_cloud: bool,
    health: HashMap<String, bool>,
    metric_files: HashMap<String, Vec<(String, String)>>,
}

/// Scriptable in-memory [`VmProvider`].
#[derive(Clone)]
pub struct FakeVmProvider {
    prefix: String,
    inner: Arc<Mutex<FakeState>>,
}

impl FakeVmProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            inner: Arc::new(Mutex::new(FakeState::default())),
        }
    }

    /// Seed the fleet with a VM.
    pub fn push_vm(&self, vm: Vm) {
        self.inner.lock().vms.push(vm);
    }

    /// Build and seed an ACTIVE VM for the given instance id.
    pub fn push_active_vm(&self, instance_id: InstanceId) -> Vm {
        let vm = Vm {
            metadata: rfm_core::RunnerMetadata::github(),
            config: VmConfig {
                image: "jammy".to_string(),
                flavor: "m1.small".to_string(),
            },
            state: VmState::Active,
            created_at: Utc::now(),
            addresses: vec!["203.0.113.5".to_string()],
            instance_id,
        };
        self.push_vm(vm.clone());
        vm
    }

    /// Make every `create_runner` call fail.
    pub fn fail_create(&self, fail: bool) {
        self.inner.lock().fail_create = fail;
    }

    /// Make `get_vms` fail with a cloud-wide error.
    pub fn fail_cloud(&self, fail: bool) {
        self.inner.lock().fail_cloud = fail;
    }

    /// Script the health verdict for one VM name.
    pub fn set_health(&self, name: impl Into<String>, healthy: bool) {
        self.inner.lock().health.insert(name.into(), healthy);
    }

    /// Script metric files written into the destination on pull.
    pub fn set_metric_files(&self, name: impl Into<String>, files: Vec<(String, String)>) {
        self.inner.lock().metric_files.insert(name.into(), files);
    }

    pub fn calls(&self) -> Vec<VmProviderCall> {
        self.inner.lock().calls.clone()
    }

    pub fn vm_names(&self) -> Vec<String> {
        self.inner.lock().vms.iter().map(Vm::name).collect()
    }
}

#[async_trait]
impl VmProvider for FakeVmProvider {
    fn name_prefix(&self) -> &str {
        &self.prefix
    }

    async fn create_runner(
        &self,
        identity: &RunnerIdentity,
        _context: &RunnerContext,
    ) -> Result<Vm, CloudError> {
        let mut state = self.inner.lock();
        state.calls.push(VmProviderCall::CreateRunner {
            name: identity.instance_id.name(),
        });
        if state.fail_create {
            return Err(CloudError::Api("scripted create failure".to_string()));
        }
        let vm = Vm {
            instance_id: identity.instance_id.clone(),
            metadata: identity.metadata.clone(),
            config: VmConfig {
                image: "jammy".to_string(),
                flavor: "m1.small".to_string(),
            },
            state: VmState::Active,
            created_at: Utc::now(),
            addresses: vec!["203.0.113.5".to_string()],
        };
        state.vms.push(vm.clone());
        Ok(vm)
    }

    async fn get_vms(&self) -> Result<Vec<Vm>, CloudError> {
        let mut state = self.inner.lock();
        state.calls.push(VmProviderCall::GetVms);
        if state.fail_cloud {
            return Err(CloudError::Api("scripted cloud failure".to_string()));
        }
        Ok(state.vms.clone())
    }

    async fn delete_vms(
        &self,
        instance_ids: &[InstanceId],
        wait: bool,
        _timeout: Duration,
    ) -> Result<Vec<InstanceId>, CloudError> {
        let mut state = self.inner.lock();
        state.calls.push(VmProviderCall::DeleteVms {
            names: instance_ids.iter().map(InstanceId::name).collect(),
            wait,
        });
        if state.fail_cloud {
            return Err(CloudError::Api("scripted cloud failure".to_string()));
        }
        let mut deleted = Vec::new();
        for instance_id in instance_ids {
            let before = state.vms.len();
            state.vms.retain(|vm| vm.instance_id != *instance_id);
            if state.vms.len() < before {
                deleted.push(instance_id.clone());
            }
        }
        Ok(deleted)
    }

    async fn pull_metrics(&self, vm: &Vm, dest: &Path) -> Result<(), CloudError> {
        let files = {
            let mut state = self.inner.lock();
            state.calls.push(VmProviderCall::PullMetrics { name: vm.name() });
            state.metric_files.get(&vm.name()).cloned()
        };
        if let Some(files) = files {
            for (name, content) in files {
                std::fs::write(dest.join(name), content)
                    .map_err(|err| CloudError::Api(err.to_string()))?;
            }
        }
        Ok(())
    }

    async fn check_health(
        &self,
        vm: &Vm,
        _accept_finished_job: bool,
    ) -> Result<bool, CloudError> {
        let mut state = self.inner.lock();
        state.calls.push(VmProviderCall::CheckHealth { name: vm.name() });
        Ok(state.health.get(&vm.name()).copied().unwrap_or(true))
    }

    async fn cleanup(&self) -> Result<(), CloudError> {
        self.inner.lock().calls.push(VmProviderCall::Cleanup);
        Ok(())
    }
}
