// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The runner manager: owns the joined view of the fleet and mediates
//! between the platform (job source of truth) and the cloud (VM
//! lifecycle).
//!
//! Bulk operations swallow per-runner failures; only a cloud-wide error
//! propagates to the scaler.

use crate::metrics::derive_runner_events;
use chrono::Utc;
use parking_lot::Mutex;
use rfm_cloud::{CloudError, VmProvider};
use rfm_core::{
    Clock, EventStats, FlushMode, HealthState, InstanceId, MetricEvent, PlatformRunnerState,
    RunnerIdentity, RunnerInstance, RunnerMetadata, RunnerMetrics, Vm,
};
use rfm_platform::{JobInfo, PlatformProvider};
use rfm_storage::{extract_metrics, EventLog, MetricsStorage, StorageError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How long a VM may stay INITIALIZING before cleanup collects it.
pub const BUILD_MODE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Deadline for the bulk-delete worker pool.
const DELETE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Metric storages older than this with no live VM are collected: the VM
/// create window has long passed.
const OUTDATED_STORAGE_AGE: Duration = Duration::from_secs(5 * 60 + 30);

/// Owns the fleet of runners under one name prefix.
pub struct RunnerManager<C, P, K> {
    /// Manager name; doubles as the flavor tag on metric events.
    name: String,
    labels: Vec<String>,
    cloud: Arc<C>,
    platform: Arc<P>,
    storage: MetricsStorage,
    event_log: EventLog,
    clock: K,
    build_timeout: Duration,
    /// Stray platform runners reported by the last `get_runners`; the next
    /// cleanup unregisters them.
    strays: Mutex<Vec<RunnerIdentity>>,
}

impl<C, P, K> RunnerManager<C, P, K>
where
    C: VmProvider,
    P: PlatformProvider,
    K: Clock,
{
    pub fn new(
        name: impl Into<String>,
        labels: Vec<String>,
        cloud: Arc<C>,
        platform: Arc<P>,
        storage: MetricsStorage,
        event_log: EventLog,
        clock: K,
    ) -> Self {
        Self {
            name: name.into(),
            labels,
            cloud,
            platform,
            storage,
            event_log,
            clock,
            build_timeout: BUILD_MODE_TIMEOUT,
            strays: Mutex::new(Vec::new()),
        }
    }

    pub fn with_build_timeout(mut self, build_timeout: Duration) -> Self {
        self.build_timeout = build_timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        self.cloud.name_prefix()
    }

    /// Append a metric event; failures are logged, never fatal.
    pub fn emit_event(&self, event: &MetricEvent) {
        if let Err(err) = self.event_log.append(event) {
            warn!(error = %err, "failed to issue metric event");
        }
    }

    /// Spawn `num` fresh runners. Partial success is allowed; the returned
    /// ids are the successfully launched VMs, each with one
    /// `runner_installed` event behind it.
    pub async fn create_runners(
        &self,
        num: usize,
        metadata: &RunnerMetadata,
        reactive: bool,
    ) -> Vec<InstanceId> {
        let mut created = Vec::new();
        for _ in 0..num {
            match self.create_one(metadata, reactive).await {
                Ok(instance_id) => created.push(instance_id),
                Err(err) => warn!(error = %err, "failed to create runner"),
            }
        }
        info!(
            requested = num,
            created = created.len(),
            "runner creation finished"
        );
        created
    }

    async fn create_one(
        &self,
        metadata: &RunnerMetadata,
        reactive: bool,
    ) -> Result<InstanceId, String> {
        let instance_id = InstanceId::generate(self.prefix(), reactive);
        self.storage
            .create(&instance_id)
            .map_err(|err| format!("metric storage for {instance_id}: {err}"))?;

        let (context, runner) = match self
            .platform
            .get_runner_context(metadata, &instance_id, &self.labels)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                self.discard_storage(&instance_id);
                return Err(format!("registration of {instance_id}: {err}"));
            }
        };

        let started = self.clock.now();
        match self.cloud.create_runner(&runner.identity, &context).await {
            Ok(vm) => {
                let duration = self.clock.now().duration_since(started);
                self.emit_event(&MetricEvent::RunnerInstalled {
                    timestamp: self.clock.epoch_secs(),
                    flavor: self.name.clone(),
                    duration: duration.as_secs_f64(),
                });
                Ok(vm.instance_id)
            }
            Err(err) => {
                // Unregister the runner so the platform does not keep a
                // phantom entry, then drop the storage.
                if let Err(platform_err) = self.platform.delete_runner(&runner.identity).await {
                    warn!(runner = %runner.identity, error = %platform_err, "failed to unregister after launch failure");
                }
                self.discard_storage(&instance_id);
                Err(format!("launch of {instance_id}: {err}"))
            }
        }
    }

    /// The joined fleet view: every VM under the prefix paired with its
    /// platform health. Stray platform runners are remembered for the next
    /// cleanup.
    pub async fn get_runners(&self) -> Result<Vec<RunnerInstance>, CloudError> {
        let vms = self.cloud.get_vms().await?;
        let identities: Vec<RunnerIdentity> = vms
            .iter()
            .map(|vm| RunnerIdentity::new(vm.instance_id.clone(), vm.metadata.clone()))
            .collect();

        let health_response = match self.platform.get_runners_health(&identities).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "platform health query failed, treating all as unknown");
                Default::default()
            }
        };
        if !health_response.non_requested_runners.is_empty() {
            info!(
                strays = health_response.non_requested_runners.len(),
                "platform reported stray runners"
            );
            *self.strays.lock() = health_response.non_requested_runners.clone();
        }

        let mut instances = Vec::new();
        for vm in &vms {
            let health = health_response
                .requested_runners
                .iter()
                .find(|candidate| candidate.identity.instance_id == vm.instance_id);
            instances.push(self.join_runner(vm, health.cloned()).await);
        }
        Ok(instances)
    }

    async fn join_runner(
        &self,
        vm: &Vm,
        platform_health: Option<rfm_core::PlatformRunnerHealth>,
    ) -> RunnerInstance {
        let platform_state = platform_health
            .as_ref()
            .filter(|health| health.runner_in_platform)
            .map(|health| PlatformRunnerState::from_health(health.online, health.busy));

        // Online runners are self-evidently healthy. Everything else gets
        // a cloud-side probe so a wedged VM shows up as unhealthy.
        let health = match platform_state {
            Some(PlatformRunnerState::Idle) | Some(PlatformRunnerState::Busy) => {
                HealthState::Healthy
            }
            _ => match self.cloud.check_health(vm, false).await {
                Ok(verdict) => HealthState::from_value(Some(verdict)),
                Err(err) => {
                    warn!(instance = %vm.name(), error = %err, "health check failed");
                    HealthState::Unknown
                }
            },
        };

        RunnerInstance {
            name: vm.name(),
            instance_id: vm.instance_id.clone(),
            metadata: vm.metadata.clone(),
            cloud_state: vm.state,
            created_at: vm.created_at,
            platform_state,
            platform_health,
            health,
        }
    }

    /// Delete terminal, platform-deletable, stuck and unhealthy runners;
    /// extract their metrics; unregister strays; reclaim cloud orphans.
    /// Idempotent on an unchanged cloud.
    pub async fn cleanup_runners(&self) -> Result<EventStats, CloudError> {
        let runners = self.get_runners().await?;
        let now = self.clock.utc_now();

        let mut to_delete = Vec::new();
        for runner in runners {
            if self.should_cleanup(&runner, now) {
                to_delete.push(runner);
            }
        }
        let mut stats = self.delete_selected(to_delete).await;

        let strays: Vec<RunnerIdentity> = std::mem::take(&mut *self.strays.lock());
        for stray in strays {
            info!(runner = %stray, "unregistering stray platform runner");
            if let Err(err) = self.platform.delete_runner(&stray).await {
                warn!(runner = %stray, error = %err, "failed to unregister stray");
            }
        }

        stats = rfm_core::merge_stats(stats, self.collect_outdated_storages().await);

        if let Err(err) = self.cloud.cleanup().await {
            warn!(error = %err, "cloud cleanup failed");
        }
        Ok(stats)
    }

    fn should_cleanup(&self, runner: &RunnerInstance, now: chrono::DateTime<Utc>) -> bool {
        let stuck = runner.cloud_state == rfm_core::VmState::Initializing
            && now - runner.created_at
                > chrono::Duration::from_std(self.build_timeout).unwrap_or_default();

        if runner.cloud_state.is_terminal() {
            info!(runner = %runner.name, state = %runner.cloud_state, "cleanup: terminal VM");
            return true;
        }
        if stuck {
            info!(runner = %runner.name, "cleanup: VM stuck in build mode");
            return true;
        }
        if let Some(health) = &runner.platform_health {
            if health.deletable {
                // A runner the platform never saw gets its full build
                // timeout before being collected.
                if !health.runner_in_platform
                    && runner.cloud_state == rfm_core::VmState::Initializing
                {
                    return false;
                }
                info!(runner = %runner.name, "cleanup: platform marks runner deletable");
                return true;
            }
        }
        if runner.health == HealthState::Unhealthy {
            info!(runner = %runner.name, "cleanup: failed health check");
            return true;
        }
        false
    }

    /// Delete up to `num` idle runners, oldest first.
    pub async fn delete_runners(&self, num: usize) -> Result<EventStats, CloudError> {
        let runners = self.get_runners().await?;
        let mut idle: Vec<RunnerInstance> = runners
            .into_iter()
            .filter(|runner| runner.platform_state == Some(PlatformRunnerState::Idle))
            .collect();
        idle.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.name.cmp(&right.name))
        });
        idle.truncate(num);
        Ok(self.delete_selected(idle).await)
    }

    /// Flush runners: idle only, or idle and busy.
    pub async fn flush_runners(&self, mode: FlushMode) -> Result<EventStats, CloudError> {
        let runners = self.get_runners().await?;
        let selected: Vec<RunnerInstance> = runners
            .into_iter()
            .filter(|runner| match runner.platform_state {
                Some(PlatformRunnerState::Idle) => true,
                Some(PlatformRunnerState::Busy) => mode == FlushMode::Busy,
                _ => false,
            })
            .collect();
        Ok(self.delete_selected(selected).await)
    }

    /// Tear down the given runners: pull and emit their metrics, unregister
    /// them from the platform, delete the VMs, drop their storages.
    async fn delete_selected(&self, runners: Vec<RunnerInstance>) -> EventStats {
        let mut stats = EventStats::new();
        if runners.is_empty() {
            return stats;
        }

        let vms = match self.cloud.get_vms().await {
            Ok(vms) => vms,
            Err(err) => {
                warn!(error = %err, "could not list VMs before delete");
                Vec::new()
            }
        };

        for runner in &runners {
            if let Some(vm) = vms
                .iter()
                .find(|candidate| candidate.instance_id == runner.instance_id)
            {
                for event in self.extract_events(vm).await {
                    self.emit_event(&event);
                    *stats.entry(event.kind()).or_default() += 1;
                }
            }

            if let Err(err) = self.platform.delete_runner(&runner.identity()).await {
                warn!(runner = %runner.name, error = %err, "failed to unregister runner");
            }
        }

        let ids: Vec<InstanceId> = runners
            .iter()
            .map(|runner| runner.instance_id.clone())
            .collect();
        let deleted = match self.cloud.delete_vms(&ids, false, DELETE_TIMEOUT).await {
            Ok(deleted) => deleted,
            Err(err) => {
                warn!(error = %err, "bulk VM delete failed");
                Vec::new()
            }
        };

        for instance_id in &deleted {
            self.discard_storage(instance_id);
        }
        info!(
            requested = ids.len(),
            deleted = deleted.len(),
            "runner deletion finished"
        );
        stats
    }

    /// Pull a VM's metric files and derive its events. A corrupt storage
    /// is quarantined and yields no events.
    async fn extract_events(&self, vm: &Vm) -> Vec<MetricEvent> {
        let entry = match self.storage.get(&vm.instance_id) {
            Ok(entry) => entry,
            Err(StorageError::NotFound(_)) => match self.storage.create(&vm.instance_id) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(instance = %vm.name(), error = %err, "no metric storage");
                    return Vec::new();
                }
            },
            Err(err) => {
                warn!(instance = %vm.name(), error = %err, "no metric storage");
                return Vec::new();
            }
        };

        if let Err(err) = self.cloud.pull_metrics(vm, &entry.path).await {
            warn!(instance = %vm.name(), error = %err, "metric pull failed");
            if matches!(&err, CloudError::Ssh(rfm_cloud::SshError::FileTooLarge { .. })) {
                self.quarantine(&vm.instance_id);
                return Vec::new();
            }
        }

        match extract_metrics(&entry, vm.metadata.clone()) {
            Ok(metrics) => {
                let job_info = self.job_info_for(&metrics).await;
                derive_runner_events(&metrics, &self.name, job_info.as_ref())
            }
            Err(StorageError::Corrupt { instance, message }) => {
                warn!(instance = %instance, message = %message, "corrupt metrics, quarantining");
                self.quarantine(&vm.instance_id);
                Vec::new()
            }
            Err(err) => {
                warn!(instance = %vm.name(), error = %err, "metric extraction failed");
                Vec::new()
            }
        }
    }

    async fn job_info_for(&self, metrics: &RunnerMetrics) -> Option<JobInfo> {
        let pre_job = metrics.pre_job.as_ref()?;
        match self
            .platform
            .get_job_info(
                &metrics.metadata,
                &pre_job.repository,
                &pre_job.workflow_run_id,
                &metrics.instance_id,
            )
            .await
        {
            Ok(info) => Some(info),
            Err(err) => {
                warn!(instance = %metrics.instance_id, error = %err, "job info unavailable");
                None
            }
        }
    }

    /// Collect metric storages whose VM is long gone: emit what they hold,
    /// then delete them so the instance id's namespace is clean.
    async fn collect_outdated_storages(&self) -> EventStats {
        let mut stats = EventStats::new();
        let entries = match self.storage.list_all() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "could not list metric storages");
                return stats;
            }
        };
        if entries.is_empty() {
            return stats;
        }

        let live: Vec<InstanceId> = match self.cloud.get_vms().await {
            Ok(vms) => vms.into_iter().map(|vm| vm.instance_id).collect(),
            Err(err) => {
                warn!(error = %err, "could not list VMs for storage cleanup");
                return stats;
            }
        };

        for entry in entries {
            if live.contains(&entry.instance_id) {
                continue;
            }
            // Leave fresh storages alone: their VM may still be inside the
            // create window.
            let age = std::fs::metadata(&entry.path)
                .and_then(|metadata| metadata.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok());
            if age.map(|age| age < OUTDATED_STORAGE_AGE).unwrap_or(true) {
                continue;
            }

            match extract_metrics(&entry, RunnerMetadata::github()) {
                Ok(metrics) => {
                    for event in derive_runner_events(&metrics, &self.name, None) {
                        self.emit_event(&event);
                        *stats.entry(event.kind()).or_default() += 1;
                    }
                    self.discard_storage(&entry.instance_id);
                }
                Err(StorageError::Corrupt { .. }) => self.quarantine(&entry.instance_id),
                Err(err) => {
                    warn!(instance = %entry.instance_id, error = %err, "orphan storage extraction failed");
                }
            }
        }
        stats
    }

    fn discard_storage(&self, instance_id: &InstanceId) {
        match self.storage.delete(instance_id) {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(err) => warn!(instance = %instance_id, error = %err, "failed to delete metric storage"),
        }
    }

    fn quarantine(&self, instance_id: &InstanceId) {
        if let Err(err) = self.storage.move_to_quarantine(instance_id) {
            warn!(instance = %instance_id, error = %err, "failed to quarantine metric storage");
        }
    }
}

#[cfg(test)]
#[path = "runner_manager_tests.rs"]
mod tests;
