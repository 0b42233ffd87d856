// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Security group policy for runner VMs.
//!
//! One project-scoped group shared by every runner. Rules are ensured
//! idempotently: pre-existing matching rules are never touched, only the
//! missing ones are created.

use serde::{Deserialize, Serialize};

/// Name of the shared security group.
pub const SECURITY_GROUP_NAME: &str = "github-runner-v1";

/// Description used when the group has to be created.
pub const SECURITY_GROUP_DESCRIPTION: &str = "For servers managed by the runner fleet manager.";

/// A security group rule in the shape the network API accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub direction: String,
    pub ethertype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_min: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_max: Option<u16>,
}

impl SecurityRule {
    fn ingress_tcp(port: u16) -> Self {
        Self {
            protocol: Some("tcp".to_string()),
            direction: "ingress".to_string(),
            ethertype: "IPv4".to_string(),
            port_range_min: Some(port),
            port_range_max: Some(port),
        }
    }
}

/// The rules every runner security group must contain: ICMP and SSH
/// ingress, tmate egress, plus one ingress rule per configured extra port.
pub fn required_rules(extra_ingress_ports: &[u16]) -> Vec<SecurityRule> {
    let mut rules = vec![
        SecurityRule {
            protocol: Some("icmp".to_string()),
            direction: "ingress".to_string(),
            ethertype: "IPv4".to_string(),
            port_range_min: None,
            port_range_max: None,
        },
        SecurityRule::ingress_tcp(22),
        SecurityRule {
            protocol: Some("tcp".to_string()),
            direction: "egress".to_string(),
            ethertype: "IPv4".to_string(),
            port_range_min: Some(10022),
            port_range_max: Some(10022),
        },
    ];
    for port in extra_ingress_ports {
        rules.push(SecurityRule::ingress_tcp(*port));
    }
    rules
}

/// A rule matches iff protocol, direction, ethertype and both port range
/// endpoints are equal.
fn rule_matches(existing: &SecurityRule, expected: &SecurityRule) -> bool {
    existing.protocol == expected.protocol
        && existing.direction == expected.direction
        && existing.ethertype == expected.ethertype
        && existing.port_range_min == expected.port_range_min
        && existing.port_range_max == expected.port_range_max
}

/// The subset of `expected` with no matching rule in `existing`.
pub fn missing_rules(expected: &[SecurityRule], existing: &[SecurityRule]) -> Vec<SecurityRule> {
    expected
        .iter()
        .filter(|rule| !existing.iter().any(|current| rule_matches(current, rule)))
        .cloned()
        .collect()
}

#[cfg(test)]
#[path = "security_group_tests.rs"]
mod tests;
