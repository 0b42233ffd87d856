// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::instance::ReactiveMode;

#[yare::parameterized(
    online_idle      = { true,  false, PlatformRunnerState::Idle },
    online_busy      = { true,  true,  PlatformRunnerState::Busy },
    offline          = { false, false, PlatformRunnerState::Offline },
    offline_but_busy = { false, true,  PlatformRunnerState::Busy },
)]
fn platform_state_from_health(online: bool, busy: bool, expected: PlatformRunnerState) {
    assert_eq!(PlatformRunnerState::from_health(online, busy), expected);
}

#[yare::parameterized(
    none      = { None,        HealthState::Unknown },
    healthy   = { Some(true),  HealthState::Healthy },
    unhealthy = { Some(false), HealthState::Unhealthy },
)]
fn health_state_from_value(value: Option<bool>, expected: HealthState) {
    assert_eq!(HealthState::from_value(value), expected);
}

#[test]
fn metadata_defaults_to_github() {
    let metadata = RunnerMetadata::default();
    assert_eq!(metadata.platform_name, PLATFORM_GITHUB);
    assert!(metadata.runner_id.is_none());
    assert!(metadata.url.is_none());
}

#[test]
fn metadata_serializes_without_empty_fields() {
    let json = serde_json::to_string(&RunnerMetadata::github()).unwrap();
    assert_eq!(json, r#"{"platform_name":"github"}"#);

    let with_id = RunnerMetadata::github().with_runner_id("42");
    let json = serde_json::to_string(&with_id).unwrap();
    assert!(json.contains(r#""runner_id":"42""#));
}

#[test]
fn identity_display_includes_platform() {
    let identity = RunnerIdentity::new(
        InstanceId::new("unit-0", ReactiveMode::NonReactive, "abc123"),
        RunnerMetadata::github(),
    );
    assert_eq!(identity.to_string(), "unit-0-n-abc123[github]");
}
