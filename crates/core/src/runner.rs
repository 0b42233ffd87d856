// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner identity, bootstrap context and joined fleet view.

use crate::instance::InstanceId;
use crate::vm::VmState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform key for the GitHub backend.
pub const PLATFORM_GITHUB: &str = "github";
/// Platform key for the job-manager backend.
pub const PLATFORM_JOBMANAGER: &str = "jobmanager";

/// Metadata carried with every runner and every platform request.
///
/// `platform_name` selects the backend in the multiplexer; `runner_id` is
/// the opaque id the platform assigned at registration; `url` overrides the
/// backend base endpoint where the platform supports per-runner endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerMetadata {
    pub platform_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Default for RunnerMetadata {
    fn default() -> Self {
        Self {
            platform_name: PLATFORM_GITHUB.to_string(),
            runner_id: None,
            url: None,
        }
    }
}

impl RunnerMetadata {
    pub fn github() -> Self {
        Self::default()
    }

    pub fn with_runner_id(mut self, runner_id: impl Into<String>) -> Self {
        self.runner_id = Some(runner_id.into());
        self
    }
}

/// The unit of identity passed to platform calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerIdentity {
    pub instance_id: InstanceId,
    pub metadata: RunnerMetadata,
}

impl RunnerIdentity {
    pub fn new(instance_id: InstanceId, metadata: RunnerMetadata) -> Self {
        Self {
            instance_id,
            metadata,
        }
    }
}

impl fmt::Display for RunnerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.instance_id, self.metadata.platform_name)
    }
}

/// Per-runner bootstrap data produced by the platform at registration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunnerContext {
    /// Shell script the VM runs at boot; embeds the registration token.
    pub shell_run_script: String,
    /// Extra TCP ports to open ingress for.
    pub ingress_tcp_ports: Vec<u16>,
}

/// Platform view of one runner's health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformRunnerHealth {
    pub identity: RunnerIdentity,
    pub online: bool,
    pub busy: bool,
    /// The platform considers the runner safe to destroy.
    pub deletable: bool,
    pub runner_in_platform: bool,
}

/// Runner state as reported by the job platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformRunnerState {
    Busy,
    Idle,
    Offline,
}

impl PlatformRunnerState {
    /// Derive the state from the two independent health booleans.
    /// A runner can be offline-but-busy transiently; busy wins.
    pub fn from_health(online: bool, busy: bool) -> Self {
        if busy {
            PlatformRunnerState::Busy
        } else if online {
            PlatformRunnerState::Idle
        } else {
            PlatformRunnerState::Offline
        }
    }
}

impl fmt::Display for PlatformRunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformRunnerState::Busy => write!(f, "busy"),
            PlatformRunnerState::Idle => write!(f, "idle"),
            PlatformRunnerState::Offline => write!(f, "offline"),
        }
    }
}

/// Health of a runner as the manager sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthState {
    pub fn from_value(health: Option<bool>) -> Self {
        match health {
            None => HealthState::Unknown,
            Some(true) => HealthState::Healthy,
            Some(false) => HealthState::Unhealthy,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
            HealthState::Unknown => write!(f, "unknown"),
        }
    }
}

/// The joined view: a cloud VM paired with its platform health.
#[derive(Debug, Clone)]
pub struct RunnerInstance {
    pub name: String,
    pub instance_id: InstanceId,
    pub metadata: RunnerMetadata,
    pub cloud_state: VmState,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// None when the platform has no record or the health call failed.
    pub platform_state: Option<PlatformRunnerState>,
    /// The raw platform health, when the health call succeeded.
    pub platform_health: Option<PlatformRunnerHealth>,
    pub health: HealthState,
}

impl RunnerInstance {
    pub fn identity(&self) -> RunnerIdentity {
        RunnerIdentity::new(self.instance_id.clone(), self.metadata.clone())
    }
}

/// Which runners a flush should take down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Flush only runners whose platform state is IDLE.
    Idle,
    /// Flush both IDLE and BUSY runners.
    Busy,
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
