// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! OpenStack cloud layer: VM, keypair and security-group lifecycle, SSH
//! access into runners, and metric file retrieval.

mod api;
mod auth;
mod cloud_init;
mod error;
mod health;
mod openstack;
mod provider;
mod security_group;
mod ssh;

pub use api::{negotiate_microversion, OpenStackApi, ServerRecord, COMPUTE_API_CEILING};
pub use auth::{KeystoneAuth, Session};
pub use cloud_init::build_user_data;
pub use error::{CloudError, SshError};
pub use health::{evaluate_ssh_probe, health_from_cloud_state, SshProbeReport};
pub use openstack::{
    CloudSettings, OpenStackCloud, OpenStackVmProvider, RepoPolicyClient, CREATE_SERVER_TIMEOUT,
};
pub use provider::VmProvider;
pub use security_group::{missing_rules, required_rules, SecurityRule, SECURITY_GROUP_NAME};
pub use ssh::{SshConnection, SshOutput};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeVmProvider, VmProviderCall};
