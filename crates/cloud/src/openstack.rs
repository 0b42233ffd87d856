// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! High-level OpenStack resource semantics: launch with rollback, prefix
//! listing with duplicate resolution, bounded-parallel deletion, keypair
//! garbage collection, and SSH metric retrieval.

use crate::api::{OpenStackApi, ServerRecord};
use crate::cloud_init::{build_user_data, METRICS_EXCHANGE_PATH};
use crate::error::{CloudError, SshError};
use crate::health::{evaluate_ssh_probe, has_runner_process, health_from_cloud_state, SshProbeReport};
use crate::provider::VmProvider;
use crate::security_group::{
    missing_rules, required_rules, SECURITY_GROUP_DESCRIPTION, SECURITY_GROUP_NAME,
};
use crate::ssh::SshConnection;
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use futures::StreamExt;
use rfm_core::{
    InstanceId, RepoPolicyConfig, RunnerContext, RunnerIdentity, RunnerMetadata, ServiceConfig,
    Vm, VmConfig, VmState,
};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Time allowed for a server to reach ACTIVE after create.
pub const CREATE_SERVER_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Poll interval while waiting for a server to come up or go away.
const SERVER_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Concurrent deletions in a bulk delete.
const DELETE_POOL_SIZE: usize = 30;

/// Keypairs younger than this are never garbage-collected: their VM may
/// still be inside the create window.
const KEYPAIR_MIN_AGE: Duration = Duration::from_secs(5 * 60 + 30);

/// Metric files pulled off a VM before teardown.
const METRIC_FILES: [&str; 4] = [
    "installation-start.timestamp",
    "runner-installed.timestamp",
    "pre-job-metrics.json",
    "post-job-metrics.json",
];

/// Size cap applied while pulling metric files.
const METRIC_FILE_PULL_LIMIT: u64 = 1024;

/// Fleet naming and local resource configuration.
#[derive(Debug, Clone)]
pub struct CloudSettings {
    pub prefix: String,
    pub network: String,
    pub key_dir: PathBuf,
    pub system_user: String,
    pub proxy_command: Option<String>,
}

/// OpenStack resource operations for one project.
pub struct OpenStackCloud {
    api: OpenStackApi,
    settings: CloudSettings,
}

impl OpenStackCloud {
    pub fn new(api: OpenStackApi, settings: CloudSettings) -> Self {
        Self { api, settings }
    }

    pub fn prefix(&self) -> &str {
        &self.settings.prefix
    }

    /// Ensure the shared security group exists with all required rules.
    /// Idempotent: a second call creates nothing.
    pub async fn ensure_security_group(
        &self,
        extra_ingress_ports: &[u16],
    ) -> Result<String, CloudError> {
        let (group_id, existing) = match self.api.find_security_group(SECURITY_GROUP_NAME).await? {
            Some(found) => found,
            None => {
                let id = self
                    .api
                    .create_security_group(SECURITY_GROUP_NAME, SECURITY_GROUP_DESCRIPTION)
                    .await?;
                (id, Vec::new())
            }
        };

        let expected = required_rules(extra_ingress_ports);
        for rule in missing_rules(&expected, &existing) {
            self.api.create_security_group_rule(&group_id, &rule).await?;
        }
        Ok(SECURITY_GROUP_NAME.to_string())
    }

    /// Launch a VM, rolling back partial resources on failure.
    pub async fn launch_instance(
        &self,
        identity: &RunnerIdentity,
        vm_config: &VmConfig,
        user_data: &str,
        extra_ingress_ports: &[u16],
    ) -> Result<Vm, CloudError> {
        let name = identity.instance_id.name();

        if self.find_server_by_name(&name).await?.is_some() {
            return Err(CloudError::Api(format!(
                "a server named {name} already exists"
            )));
        }

        let security_group = self.ensure_security_group(extra_ingress_ports).await?;
        let network_id = self
            .api
            .find_network_id(&self.settings.network)
            .await?
            .ok_or_else(|| CloudError::NotFound(format!("network {}", self.settings.network)))?;

        let private_key = self.api.create_keypair(&name).await?;
        let key_path = self.save_key_file(&name, &private_key)?;

        let metadata = &identity.metadata;
        let mut server_metadata = HashMap::from([
            ("prefix".to_string(), self.settings.prefix.clone()),
            ("platform_name".to_string(), metadata.platform_name.clone()),
        ]);
        if let Some(runner_id) = &metadata.runner_id {
            server_metadata.insert("runner_id".to_string(), runner_id.clone());
        }
        if let Some(url) = &metadata.url {
            server_metadata.insert("url".to_string(), url.clone());
        }

        let body = json!({
            "server": {
                "name": name,
                "imageRef": vm_config.image,
                "flavorRef": vm_config.flavor,
                "key_name": name,
                "networks": [{"uuid": network_id}],
                "security_groups": [{"name": security_group}],
                "metadata": server_metadata,
                "user_data": base64::engine::general_purpose::STANDARD.encode(user_data),
            }
        });

        let server_id = match self.api.create_server(body).await {
            Ok(id) => id,
            Err(err) => {
                self.rollback_keypair(&name, &key_path).await;
                return Err(err);
            }
        };

        match self.wait_for_active(&server_id).await {
            Ok(record) => self.server_to_vm(&record).ok_or_else(|| {
                CloudError::Api(format!("created server {name} has an unparseable name"))
            }),
            Err(CloudError::Timeout(message)) => {
                warn!(server = %name, "server create timed out, deleting");
                if let Err(err) = self.api.delete_server(&server_id).await {
                    warn!(server = %name, error = %err, "failed to delete timed out server");
                }
                Err(CloudError::Timeout(message))
            }
            Err(err) => {
                self.rollback_keypair(&name, &key_path).await;
                Err(err)
            }
        }
    }

    /// List VMs under the fleet prefix. Duplicate names keep the most
    /// recently created server; older duplicates are requested for
    /// deletion best-effort.
    pub async fn get_instances(&self) -> Result<Vec<Vm>, CloudError> {
        let records = self.list_prefixed_servers().await?;
        let (kept, losers) = resolve_duplicates(records);

        for loser in losers {
            warn!(
                server = %loser.name,
                id = %loser.id,
                "duplicate server name, requesting deletion of older copy"
            );
            if let Err(err) = self.api.delete_server(&loser.id).await {
                warn!(server = %loser.name, error = %err, "failed to delete duplicate server");
            }
        }

        Ok(kept.iter().filter_map(|record| self.server_to_vm(record)).collect())
    }

    /// Delete VMs with a bounded worker pool. Stragglers past `timeout`
    /// are abandoned and logged.
    pub async fn delete_instances(
        &self,
        instance_ids: &[InstanceId],
        wait: bool,
        timeout: Duration,
    ) -> Result<Vec<InstanceId>, CloudError> {
        if instance_ids.is_empty() {
            return Ok(Vec::new());
        }

        let records: HashMap<String, ServerRecord> = self
            .list_prefixed_servers()
            .await?
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();

        let mut pool = futures::stream::iter(instance_ids.iter().cloned().map(|instance_id| {
            let record = records.get(&instance_id.name()).cloned();
            async move {
                let outcome = self.delete_one(&instance_id, record, wait).await;
                (instance_id, outcome)
            }
        }))
        .buffer_unordered(DELETE_POOL_SIZE);

        let deadline = tokio::time::Instant::now() + timeout;
        let mut deleted = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, pool.next()).await {
                Ok(Some((instance_id, Ok(true)))) => deleted.push(instance_id),
                Ok(Some((instance_id, Ok(false)))) => {
                    debug!(instance = %instance_id, "server already gone, nothing to delete");
                }
                Ok(Some((instance_id, Err(err)))) => {
                    warn!(instance = %instance_id, error = %err, "failed to delete VM");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("bulk delete timed out, abandoning stragglers");
                    break;
                }
            }
        }
        Ok(deleted)
    }

    /// Open an SSH connection, trying each address until the echo probe
    /// answers.
    pub async fn get_ssh_connection(&self, vm: &Vm) -> Result<SshConnection, SshError> {
        let key_path = self.key_path(&vm.name());
        if !key_path.is_file() {
            return Err(SshError::KeyfileMissing(key_path));
        }
        for address in &vm.addresses {
            let connection = SshConnection::new(address.clone(), key_path.clone())
                .with_proxy_command(self.settings.proxy_command.clone());
            match connection.probe().await {
                Ok(()) => return Ok(connection),
                Err(err) => {
                    debug!(instance = %vm.name(), address = %address, error = %err, "ssh probe failed");
                }
            }
        }
        Err(SshError::ConnectFailed(vm.name()))
    }

    /// Pull the metric exchange files into `dest`. Missing files are
    /// skipped; an oversized file fails the pull so the caller can
    /// quarantine the runner.
    pub async fn pull_metrics_files(&self, vm: &Vm, dest: &Path) -> Result<(), CloudError> {
        let connection = self.get_ssh_connection(vm).await?;
        for file in METRIC_FILES {
            let remote = format!("{METRICS_EXCHANGE_PATH}/{file}");
            match connection
                .pull_file(&remote, &dest.join(file), METRIC_FILE_PULL_LIMIT)
                .await
            {
                Ok(()) => {}
                Err(err @ SshError::FileTooLarge { .. }) => return Err(err.into()),
                Err(err) => {
                    debug!(instance = %vm.name(), file, error = %err, "metric file not pulled");
                }
            }
        }
        Ok(())
    }

    /// Probe an ACTIVE VM over SSH and build the health report.
    pub async fn probe_health(&self, vm: &Vm) -> Result<SshProbeReport, CloudError> {
        let connection = self.get_ssh_connection(vm).await?;

        let marker = connection
            .run(&format!(
                "[ -f {METRICS_EXCHANGE_PATH}/runner-installed.timestamp ]"
            ))
            .await?;
        let cloud_init = connection.run("cloud-init status").await?;
        let processes = connection.run("ps aux").await?;

        Ok(SshProbeReport {
            installed_marker: marker.ok(),
            cloud_init_status: cloud_init.ok().then(|| cloud_init.stdout.clone()),
            runner_process_running: processes
                .ok()
                .then(|| has_runner_process(&processes.stdout)),
        })
    }

    /// Reclaim keypairs and key files no live VM references. Age-gated so
    /// a keypair for a VM still in its create window survives.
    pub async fn cleanup(&self) -> Result<(), CloudError> {
        let live_names: HashSet<String> = self
            .list_prefixed_servers()
            .await?
            .into_iter()
            .map(|record| record.name)
            .collect();

        let now = Utc::now();
        for keypair in self.api.list_keypairs().await? {
            if !InstanceId::name_has_prefix(&self.settings.prefix, &keypair.name)
                || live_names.contains(&keypair.name)
            {
                continue;
            }
            let old_enough = match keypair.created_at {
                Some(created_at) => {
                    now - created_at
                        > chrono::Duration::from_std(KEYPAIR_MIN_AGE).unwrap_or_default()
                }
                // No creation time reported: do not risk a keypair whose VM
                // is mid-create.
                None => false,
            };
            if !old_enough {
                continue;
            }
            info!(keypair = %keypair.name, "deleting orphan keypair");
            if let Err(err) = self.api.delete_keypair(&keypair.name).await {
                warn!(keypair = %keypair.name, error = %err, "failed to delete orphan keypair");
            }
            self.remove_key_file(&keypair.name);
        }

        self.cleanup_key_files(&live_names);
        Ok(())
    }

    async fn delete_one(
        &self,
        instance_id: &InstanceId,
        record: Option<ServerRecord>,
        wait: bool,
    ) -> Result<bool, CloudError> {
        let name = instance_id.name();
        let deleted = match &record {
            Some(record) => {
                let deleted = self.api.delete_server(&record.id).await?;
                if deleted && wait {
                    self.wait_for_gone(&record.id).await?;
                }
                deleted
            }
            None => false,
        };

        if let Err(err) = self.api.delete_keypair(&name).await {
            if !matches!(err, CloudError::NotFound(_)) {
                warn!(instance = %name, error = %err, "failed to delete keypair");
            }
        }
        self.remove_key_file(&name);
        Ok(deleted)
    }

    async fn wait_for_active(&self, server_id: &str) -> Result<ServerRecord, CloudError> {
        let deadline = tokio::time::Instant::now() + CREATE_SERVER_TIMEOUT;
        loop {
            let record = self.api.get_server(server_id).await?;
            match VmState::from_openstack_status(&record.status) {
                VmState::Active => return Ok(record),
                VmState::Error => {
                    return Err(CloudError::Api(format!(
                        "server {} entered ERROR during create",
                        record.name
                    )))
                }
                _ => {}
            }
            if tokio::time::Instant::now() + SERVER_POLL_INTERVAL > deadline {
                return Err(CloudError::Timeout(format!(
                    "server {server_id} did not become ACTIVE within {}s",
                    CREATE_SERVER_TIMEOUT.as_secs()
                )));
            }
            tokio::time::sleep(SERVER_POLL_INTERVAL).await;
        }
    }

    async fn wait_for_gone(&self, server_id: &str) -> Result<(), CloudError> {
        let deadline = tokio::time::Instant::now() + CREATE_SERVER_TIMEOUT;
        loop {
            match self.api.get_server(server_id).await {
                Err(CloudError::NotFound(_)) => return Ok(()),
                Err(err) => return Err(err),
                Ok(record) if VmState::from_openstack_status(&record.status) == VmState::Shutoff => {
                    return Ok(())
                }
                Ok(_) => {}
            }
            if tokio::time::Instant::now() + SERVER_POLL_INTERVAL > deadline {
                return Err(CloudError::Timeout(format!(
                    "server {server_id} still present after delete"
                )));
            }
            tokio::time::sleep(SERVER_POLL_INTERVAL).await;
        }
    }

    async fn find_server_by_name(&self, name: &str) -> Result<Option<ServerRecord>, CloudError> {
        Ok(self
            .list_prefixed_servers()
            .await?
            .into_iter()
            .find(|record| record.name == name))
    }

    async fn list_prefixed_servers(&self) -> Result<Vec<ServerRecord>, CloudError> {
        Ok(self
            .api
            .list_servers()
            .await?
            .into_iter()
            .filter(|record| InstanceId::name_has_prefix(&self.settings.prefix, &record.name))
            .collect())
    }

    fn server_to_vm(&self, record: &ServerRecord) -> Option<Vm> {
        let instance_id = match InstanceId::parse(&self.settings.prefix, &record.name) {
            Ok(instance_id) => instance_id,
            Err(err) => {
                warn!(server = %record.name, error = %err, "server name does not parse, skipping");
                return None;
            }
        };
        let metadata = RunnerMetadata {
            platform_name: record
                .metadata
                .get("platform_name")
                .cloned()
                .unwrap_or_else(|| rfm_core::PLATFORM_GITHUB.to_string()),
            runner_id: record.metadata.get("runner_id").cloned(),
            url: record.metadata.get("url").cloned(),
        };
        Some(Vm {
            instance_id,
            metadata,
            config: VmConfig {
                image: record.image_ref(),
                flavor: record.flavor_ref(),
            },
            state: VmState::from_openstack_status(&record.status),
            created_at: record.created_at(),
            addresses: record.address_list(),
        })
    }

    fn key_path(&self, name: &str) -> PathBuf {
        self.settings.key_dir.join(format!("{name}.key"))
    }

    fn save_key_file(&self, name: &str, private_key: &str) -> Result<PathBuf, CloudError> {
        std::fs::create_dir_all(&self.settings.key_dir).map_err(SshError::Io)?;
        let key_path = self.key_path(name);
        if key_path.exists() {
            warn!(instance = %name, "existing private key file found, removing it");
            let _ = std::fs::remove_file(&key_path);
        }
        std::fs::write(&key_path, private_key).map_err(SshError::Io)?;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o400))
            .map_err(SshError::Io)?;
        // The manager may run as root while the key belongs to the service
        // user; ownership transfer is best-effort outside that setup.
        let _ = std::process::Command::new("chown")
            .arg(&self.settings.system_user)
            .arg(&key_path)
            .status();
        Ok(key_path)
    }

    fn remove_key_file(&self, name: &str) {
        let key_path = self.key_path(name);
        if key_path.exists() {
            if let Err(err) = std::fs::remove_file(&key_path) {
                warn!(instance = %name, error = %err, "failed to remove key file");
            }
        }
    }

    fn cleanup_key_files(&self, live_names: &HashSet<String>) {
        let Ok(entries) = std::fs::read_dir(&self.settings.key_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = file_name.strip_suffix(".key") else {
                continue;
            };
            if live_names.contains(stem) {
                continue;
            }
            let old_enough = entry
                .metadata()
                .and_then(|metadata| metadata.modified())
                .map(|modified| {
                    modified.elapsed().unwrap_or_default() > KEYPAIR_MIN_AGE
                })
                .unwrap_or(false);
            if old_enough {
                info!(file = %file_name, "removing stale key file");
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }

    async fn rollback_keypair(&self, name: &str, key_path: &Path) {
        if let Err(err) = self.api.delete_keypair(name).await {
            warn!(instance = %name, error = %err, "failed to roll back keypair");
        }
        let _ = std::fs::remove_file(key_path);
    }
}

/// Split prefixed servers into the kept set and duplicate losers: for each
/// name, the most recently created server wins.
pub(crate) fn resolve_duplicates(
    records: Vec<ServerRecord>,
) -> (Vec<ServerRecord>, Vec<ServerRecord>) {
    let mut kept: HashMap<String, ServerRecord> = HashMap::new();
    let mut losers = Vec::new();
    for record in records {
        match kept.remove(&record.name) {
            None => {
                kept.insert(record.name.clone(), record);
            }
            Some(current) => {
                if record.created_at() > current.created_at() {
                    losers.push(current);
                    kept.insert(record.name.clone(), record);
                } else {
                    losers.push(record.clone());
                    kept.insert(record.name.clone(), current);
                }
            }
        }
    }
    (kept.into_values().collect(), losers)
}

/// Client for the repo-policy-compliance service's one-time tokens.
pub struct RepoPolicyClient {
    http: reqwest::Client,
    config: RepoPolicyConfig,
}

impl RepoPolicyClient {
    pub fn new(http: reqwest::Client, config: RepoPolicyConfig) -> Self {
        Self { http, config }
    }

    pub async fn one_time_token(&self) -> Result<String, CloudError> {
        let url = format!("{}/one-time-token", self.config.url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CloudError::Api(format!(
                "repo policy service returned {} for one-time token",
                response.status()
            )));
        }
        Ok(response.text().await?.trim().to_string())
    }
}

/// The [`VmProvider`] implementation backed by OpenStack.
pub struct OpenStackVmProvider {
    cloud: OpenStackCloud,
    server_config: Option<VmConfig>,
    service_config: ServiceConfig,
    repo_policy: Option<RepoPolicyClient>,
}

impl OpenStackVmProvider {
    pub fn new(
        cloud: OpenStackCloud,
        server_config: Option<VmConfig>,
        service_config: ServiceConfig,
        repo_policy: Option<RepoPolicyClient>,
    ) -> Self {
        Self {
            cloud,
            server_config,
            service_config,
            repo_policy,
        }
    }
}

#[async_trait]
impl VmProvider for OpenStackVmProvider {
    fn name_prefix(&self) -> &str {
        self.cloud.prefix()
    }

    async fn create_runner(
        &self,
        identity: &RunnerIdentity,
        context: &RunnerContext,
    ) -> Result<Vm, CloudError> {
        let Some(server_config) = &self.server_config else {
            return Err(CloudError::MissingServerConfig);
        };

        let repo_policy_token = match &self.repo_policy {
            Some(client) => Some(client.one_time_token().await?),
            None => None,
        };
        let user_data = build_user_data(
            context,
            &self.service_config,
            repo_policy_token.as_deref(),
        );

        let vm = self
            .cloud
            .launch_instance(
                identity,
                server_config,
                &user_data,
                &context.ingress_tcp_ports,
            )
            .await?;
        info!(instance = %vm.name(), "runner VM created");
        Ok(vm)
    }

    async fn get_vms(&self) -> Result<Vec<Vm>, CloudError> {
        self.cloud.get_instances().await
    }

    async fn delete_vms(
        &self,
        instance_ids: &[InstanceId],
        wait: bool,
        timeout: Duration,
    ) -> Result<Vec<InstanceId>, CloudError> {
        self.cloud.delete_instances(instance_ids, wait, timeout).await
    }

    async fn pull_metrics(&self, vm: &Vm, dest: &Path) -> Result<(), CloudError> {
        self.cloud.pull_metrics_files(vm, dest).await
    }

    async fn check_health(
        &self,
        vm: &Vm,
        accept_finished_job: bool,
    ) -> Result<bool, CloudError> {
        let now = Utc::now();
        if let Some(verdict) = health_from_cloud_state(vm, now) {
            return Ok(verdict);
        }
        let report = match self.cloud.probe_health(vm).await {
            Ok(report) => report,
            Err(CloudError::Ssh(err)) => {
                // Not being able to reach the VM at all is itself the
                // verdict, not a transient failure.
                warn!(instance = %vm.name(), error = %err, "ssh unreachable, marking unhealthy");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        Ok(evaluate_ssh_probe(&report, vm, now, accept_finished_job))
    }

    async fn cleanup(&self) -> Result<(), CloudError> {
        self.cloud.cleanup().await
    }
}

#[cfg(test)]
#[path = "openstack_tests.rs"]
mod tests;
