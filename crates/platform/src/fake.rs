// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake platform provider for tests: scriptable health and job answers,
//! recorded calls.

use crate::provider::{
    JobInfo, JobStatus, PlatformError, PlatformProvider, PlatformRunner, RunnersHealthResponse,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rfm_core::{
    InstanceId, PlatformRunnerHealth, RunnerContext, RunnerIdentity, RunnerMetadata,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// A recorded call on the fake platform.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    GetRunnerContext { name: String },
    GetRunnerHealth { name: String },
    GetRunnersHealth { names: Vec<String> },
    DeleteRunner { name: String },
    CheckJobPickedUp { url: String },
    GetJobInfo { repository: String },
}

/// Scripted answer for one picked-up probe.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum JobProbe {
    PickedUp,
    #[default]
    NotPicked,
    NotFound,
    Error,
}

/// Scripted health for one instance name.
#[derive(Debug, Clone, Copy)]
struct ScriptedHealth {
    online: bool,
    busy: bool,
    deletable: bool,
    runner_in_platform: bool,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<PlatformCall>,
    next_runner_id: i64,
    fail_context: bool,
    healths: HashMap<String, ScriptedHealth>,
    failed: HashSet<String>,
    strays: Vec<RunnerIdentity>,
    job_probes: VecDeque<JobProbe>,
    job_probe_default: JobProbe,
}

/// Scriptable in-memory [`PlatformProvider`].
#[derive(Clone)]
pub struct FakePlatform {
    inner: Arc<Mutex<FakeState>>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeState {
                next_runner_id: 100,
                job_probe_default: JobProbe::NotPicked,
                ..Default::default()
            })),
        }
    }

    /// Make registration fail.
    pub fn fail_context(&self, fail: bool) {
        self.inner.lock().fail_context = fail;
    }

    /// Script a runner as online and idle.
    pub fn set_idle(&self, name: impl Into<String>) {
        self.set_health(name, true, false, false, true);
    }

    /// Script a runner as online and busy.
    pub fn set_busy(&self, name: impl Into<String>) {
        self.set_health(name, true, true, false, true);
    }

    /// Script a runner as offline (still registered).
    pub fn set_offline(&self, name: impl Into<String>) {
        self.set_health(name, false, false, false, true);
    }

    /// Script a runner as deletable / unknown to the platform.
    pub fn set_deletable(&self, name: impl Into<String>) {
        self.set_health(name, false, false, true, false);
    }

    pub fn set_health(
        &self,
        name: impl Into<String>,
        online: bool,
        busy: bool,
        deletable: bool,
        runner_in_platform: bool,
    ) {
        self.inner.lock().healths.insert(
            name.into(),
            ScriptedHealth {
                online,
                busy,
                deletable,
                runner_in_platform,
            },
        );
    }

    /// Script a runner's health query to fail temporarily.
    pub fn set_failed(&self, name: impl Into<String>) {
        self.inner.lock().failed.insert(name.into());
    }

    /// Script stray runners reported as non-requested.
    pub fn set_strays(&self, strays: Vec<RunnerIdentity>) {
        self.inner.lock().strays = strays;
    }

    /// Queue answers for successive picked-up probes; once drained, the
    /// default (not picked) answers.
    pub fn script_job_probes(&self, probes: Vec<JobProbe>) {
        self.inner.lock().job_probes = probes.into();
    }

    pub fn set_job_probe_default(&self, probe: JobProbe) {
        self.inner.lock().job_probe_default = probe;
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.inner.lock().calls.clone()
    }

    fn health_for(identity: &RunnerIdentity, scripted: ScriptedHealth) -> PlatformRunnerHealth {
        PlatformRunnerHealth {
            identity: identity.clone(),
            online: scripted.online,
            busy: scripted.busy,
            deletable: scripted.deletable,
            runner_in_platform: scripted.runner_in_platform,
        }
    }
}

#[async_trait]
impl PlatformProvider for FakePlatform {
    async fn get_runner_context(
        &self,
        metadata: &RunnerMetadata,
        instance_id: &InstanceId,
        labels: &[String],
    ) -> Result<(RunnerContext, PlatformRunner), PlatformError> {
        let mut state = self.inner.lock();
        state.calls.push(PlatformCall::GetRunnerContext {
            name: instance_id.name(),
        });
        if state.fail_context {
            return Err(PlatformError::Api("scripted registration failure".to_string()));
        }
        state.next_runner_id += 1;
        let runner_id = state.next_runner_id;

        let context = RunnerContext {
            shell_run_script: format!("./run.sh --jitconfig fake-{runner_id}"),
            ingress_tcp_ports: Vec::new(),
        };
        let identity = RunnerIdentity::new(
            instance_id.clone(),
            RunnerMetadata {
                platform_name: metadata.platform_name.clone(),
                runner_id: Some(runner_id.to_string()),
                url: metadata.url.clone(),
            },
        );
        let runner = PlatformRunner {
            id: runner_id.to_string(),
            identity,
            online: false,
            busy: false,
            labels: labels.to_vec(),
        };
        Ok((context, runner))
    }

    async fn get_runner_health(
        &self,
        identity: &RunnerIdentity,
    ) -> Result<PlatformRunnerHealth, PlatformError> {
        let mut state = self.inner.lock();
        let name = identity.instance_id.name();
        state
            .calls
            .push(PlatformCall::GetRunnerHealth { name: name.clone() });
        if state.failed.contains(&name) {
            return Err(PlatformError::Api("scripted health failure".to_string()));
        }
        let scripted = state.healths.get(&name).copied().unwrap_or(ScriptedHealth {
            online: true,
            busy: false,
            deletable: false,
            runner_in_platform: true,
        });
        Ok(Self::health_for(identity, scripted))
    }

    async fn get_runners_health(
        &self,
        requested: &[RunnerIdentity],
    ) -> Result<RunnersHealthResponse, PlatformError> {
        let mut state = self.inner.lock();
        state.calls.push(PlatformCall::GetRunnersHealth {
            names: requested
                .iter()
                .map(|identity| identity.instance_id.name())
                .collect(),
        });

        let mut response = RunnersHealthResponse {
            non_requested_runners: state.strays.clone(),
            ..Default::default()
        };
        for identity in requested {
            let name = identity.instance_id.name();
            if state.failed.contains(&name) {
                response.failed_requested_runners.push(identity.clone());
                continue;
            }
            let scripted = state.healths.get(&name).copied().unwrap_or(ScriptedHealth {
                online: true,
                busy: false,
                deletable: false,
                runner_in_platform: true,
            });
            response
                .requested_runners
                .push(Self::health_for(identity, scripted));
        }
        Ok(response)
    }

    async fn delete_runner(&self, identity: &RunnerIdentity) -> Result<(), PlatformError> {
        self.inner.lock().calls.push(PlatformCall::DeleteRunner {
            name: identity.instance_id.name(),
        });
        Ok(())
    }

    async fn check_job_been_picked_up(
        &self,
        _metadata: &RunnerMetadata,
        job_url: &str,
    ) -> Result<bool, PlatformError> {
        let probe = {
            let mut state = self.inner.lock();
            state.calls.push(PlatformCall::CheckJobPickedUp {
                url: job_url.to_string(),
            });
            state
                .job_probes
                .pop_front()
                .unwrap_or(state.job_probe_default)
        };
        match probe {
            JobProbe::PickedUp => Ok(true),
            JobProbe::NotPicked => Ok(false),
            JobProbe::NotFound => Err(PlatformError::NotFound(job_url.to_string())),
            JobProbe::Error => Err(PlatformError::Api("scripted probe failure".to_string())),
        }
    }

    async fn get_job_info(
        &self,
        _metadata: &RunnerMetadata,
        repository: &str,
        _workflow_run_id: &str,
        _instance_id: &InstanceId,
    ) -> Result<JobInfo, PlatformError> {
        self.inner.lock().calls.push(PlatformCall::GetJobInfo {
            repository: repository.to_string(),
        });
        Ok(JobInfo {
            status: JobStatus::Completed,
            created_at: None,
            started_at: None,
            conclusion: Some("success".to_string()),
        })
    }
}
