// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cloud VM model.

use crate::instance::InstanceId;
use crate::runner::RunnerMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Immutable launch parameters for a VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    /// Image name or id.
    pub image: String,
    /// Flavor name or id.
    pub flavor: String,
}

/// State of the instance hosting a runner, derived from the cloud's
/// native server status via a fixed mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Initializing,
    Active,
    Shutoff,
    Error,
    Unknown,
}

impl VmState {
    /// Map an OpenStack server status string onto the VM state.
    ///
    /// Statuses are documented at
    /// https://docs.openstack.org/api-guide/compute/server_concepts.html
    pub fn from_openstack_status(status: &str) -> Self {
        match status {
            "BUILD" | "REBUILD" => VmState::Initializing,
            "ACTIVE" => VmState::Active,
            "SHUTOFF" | "STOPPED" | "DELETED" => VmState::Shutoff,
            "ERROR" => VmState::Error,
            _ => VmState::Unknown,
        }
    }

    /// Terminal states: the VM will never serve a job again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VmState::Shutoff | VmState::Error)
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmState::Initializing => write!(f, "initializing"),
            VmState::Active => write!(f, "active"),
            VmState::Shutoff => write!(f, "shutoff"),
            VmState::Error => write!(f, "error"),
            VmState::Unknown => write!(f, "unknown"),
        }
    }
}

/// A VM as reported by the cloud.
#[derive(Debug, Clone)]
pub struct Vm {
    pub instance_id: InstanceId,
    /// Metadata as set at creation time.
    pub metadata: RunnerMetadata,
    pub config: VmConfig,
    pub state: VmState,
    pub created_at: DateTime<Utc>,
    /// Addresses to try, in order, for SSH access.
    pub addresses: Vec<String>,
}

impl Vm {
    /// True when the VM was created more than `age` before `now`.
    pub fn is_older_than(&self, age: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(age) {
            Ok(age) => now - self.created_at > age,
            Err(_) => false,
        }
    }

    pub fn name(&self) -> String {
        self.instance_id.name()
    }
}

#[cfg(test)]
#[path = "vm_tests.rs"]
mod tests;
