// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Application configuration: parsed once at startup, validated before
//! anything else runs. Unknown fields are rejected.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Validation(String),
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation(message.into())
}

/// Main entry point for the application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Name identifying this manager; doubles as the flavor in metrics.
    pub name: String,
    #[serde(default)]
    pub extra_labels: Vec<String>,
    #[serde(default)]
    pub github_config: Option<GithubConfig>,
    #[serde(default)]
    pub jobmanager_config: Option<JobManagerConfig>,
    pub service_config: ServiceConfig,
    pub non_reactive_configuration: NonReactiveConfig,
    #[serde(default)]
    pub reactive_configuration: Option<ReactiveConfig>,
    pub openstack_configuration: OpenStackConfig,
    #[serde(default)]
    pub planner_configuration: Option<PlannerSettings>,
}

impl AppConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Validate cross-field rules that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.github_config.is_none() && self.jobmanager_config.is_none() {
            return Err(invalid(
                "at least one of github_config or jobmanager_config is required",
            ));
        }
        if let Some(github) = &self.github_config {
            github.validate()?;
        }
        self.service_config.validate()?;
        if let Some(reactive) = &self.reactive_configuration {
            reactive.validate()?;
        }
        self.openstack_configuration.validate()?;
        Ok(())
    }

    /// The first non-reactive combination, if any is configured.
    /// Launching runners without one fails with a missing-server-config error.
    pub fn combination(&self) -> Option<&Combination> {
        self.non_reactive_configuration.combinations.first()
    }
}

/// GitHub platform configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GithubConfig {
    pub token: String,
    /// Either an organization name or an `owner/repo` path.
    pub path: String,
    /// Runner group, only meaningful for organization paths.
    #[serde(default)]
    pub runner_group: Option<String>,
}

impl GithubConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.token.is_empty() {
            return Err(invalid("github_config.token must not be empty"));
        }
        let parts: Vec<&str> = self.path.split('/').collect();
        match parts.as_slice() {
            [org] if !org.is_empty() => Ok(()),
            [owner, repo] if !owner.is_empty() && !repo.is_empty() => Ok(()),
            _ => Err(invalid(format!(
                "github_config.path '{}' is neither an org nor owner/repo",
                self.path
            ))),
        }
    }
}

/// Job-manager platform configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobManagerConfig {
    pub url: String,
    pub token: String,
}

/// Configuration for services supporting the runners.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// ProxyCommand for the manager's SSH connections into runners.
    #[serde(default)]
    pub manager_proxy_command: Option<String>,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub runner_proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub use_aproxy: bool,
    #[serde(default)]
    pub dockerhub_mirror: Option<String>,
    #[serde(default)]
    pub ssh_debug_connections: Vec<SshDebugConnection>,
    #[serde(default)]
    pub repo_policy_compliance: Option<RepoPolicyConfig>,
}

impl ServiceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let runner_proxy_set = self
            .runner_proxy
            .as_ref()
            .map(|proxy| proxy.proxy_address().is_some())
            .unwrap_or(false);
        if self.use_aproxy && !runner_proxy_set {
            return Err(invalid(
                "use_aproxy requires runner_proxy http or https to be set",
            ));
        }
        for connection in &self.ssh_debug_connections {
            connection.validate()?;
        }
        Ok(())
    }
}

/// Proxy endpoints for outbound traffic.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    #[serde(default)]
    pub http: Option<String>,
    #[serde(default)]
    pub https: Option<String>,
    #[serde(default)]
    pub no_proxy: Option<String>,
}

impl ProxyConfig {
    /// The address runners should point at: http wins over https.
    pub fn proxy_address(&self) -> Option<&str> {
        self.http
            .as_deref()
            .or(self.https.as_deref())
            .filter(|addr| !addr.is_empty())
    }
}

/// SSH relay endpoint for debug (tmate) sessions.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshDebugConnection {
    pub host: Ipv4Addr,
    pub port: u16,
    pub rsa_fingerprint: String,
    pub ed25519_fingerprint: String,
    #[serde(default)]
    pub use_runner_http_proxy: bool,
    #[serde(default = "default_local_proxy_host")]
    pub local_proxy_host: String,
    #[serde(default = "default_local_proxy_port")]
    pub local_proxy_port: u16,
}

fn default_local_proxy_host() -> String {
    "127.0.0.1".to_string()
}

fn default_local_proxy_port() -> u16 {
    3129
}

impl SshDebugConnection {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(invalid("ssh_debug_connections.port must be 1-65535"));
        }
        for (field, fingerprint) in [
            ("rsa_fingerprint", &self.rsa_fingerprint),
            ("ed25519_fingerprint", &self.ed25519_fingerprint),
        ] {
            if !fingerprint.starts_with("SHA256:") {
                return Err(invalid(format!(
                    "ssh_debug_connections.{field} must start with 'SHA256:'"
                )));
            }
        }
        Ok(())
    }
}

/// Repo-policy-compliance service endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoPolicyConfig {
    pub token: String,
    pub url: String,
}

/// Configuration for non-reactive (pressure/base-quantity) mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NonReactiveConfig {
    #[serde(default)]
    pub combinations: Vec<Combination>,
}

/// Image and flavor pairing the manager may spawn.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Combination {
    pub image: ImageRef,
    pub flavor: FlavorRef,
    pub base_virtual_machines: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageRef {
    pub name: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlavorRef {
    pub name: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Configuration for reactive (queue-driven) mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactiveConfig {
    pub queue: QueueConfig,
    pub max_total_virtual_machines: u32,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    #[serde(default)]
    pub flavors: Vec<FlavorRef>,
}

impl ReactiveConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.uri.is_empty() {
            return Err(invalid("reactive_configuration.queue.uri must not be empty"));
        }
        if self.queue.queue_name.is_empty() {
            return Err(invalid(
                "reactive_configuration.queue.queue_name must not be empty",
            ));
        }
        Ok(())
    }
}

/// Durable queue the reactive consumer reads from.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    pub uri: String,
    pub queue_name: String,
}

/// OpenStack project access and fleet naming.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenStackConfig {
    /// Prefix for every VM name this manager owns.
    pub vm_prefix: String,
    pub network: String,
    pub credentials: OpenStackCredentials,
    /// Directory holding per-runner private keys.
    #[serde(default = "default_key_dir")]
    pub key_dir: PathBuf,
    /// System user owning key files and metric storage.
    #[serde(default = "default_system_user")]
    pub system_user: String,
}

fn default_key_dir() -> PathBuf {
    PathBuf::from("/var/lib/runner-fleet/keys")
}

fn default_system_user() -> String {
    "runner-manager".to_string()
}

impl OpenStackConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.vm_prefix.is_empty() {
            return Err(invalid("openstack_configuration.vm_prefix must not be empty"));
        }
        if self.network.is_empty() {
            return Err(invalid("openstack_configuration.network must not be empty"));
        }
        Ok(())
    }
}

/// Keystone credentials for one project.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenStackCredentials {
    pub auth_url: String,
    pub project_name: String,
    pub username: String,
    pub password: String,
    pub user_domain_name: String,
    pub project_domain_name: String,
    pub region_name: String,
}

/// Planner service access for pressure-driven reconciliation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlannerSettings {
    pub url: String,
    pub token: String,
    /// Minutes between timer-driven cleanup reconciliations.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval: u64,
    /// Desired runner count while the planner is unreachable.
    #[serde(default)]
    pub fallback_runners: u32,
}

fn default_reconcile_interval() -> u64 {
    5
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
