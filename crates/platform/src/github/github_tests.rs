// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use rfm_core::instance::ReactiveMode;

fn identity(suffix: &str) -> RunnerIdentity {
    RunnerIdentity::new(
        InstanceId::new("unit-0", ReactiveMode::NonReactive, suffix),
        RunnerMetadata::github().with_runner_id("11"),
    )
}

fn api_runner(name: &str, status: &str, busy: bool) -> ApiRunner {
    serde_json::from_value(serde_json::json!({
        "id": 11,
        "name": name,
        "status": status,
        "busy": busy
    }))
    .unwrap()
}

#[yare::parameterized(
    online_idle = { "online",  false, true,  false },
    online_busy = { "online",  true,  true,  true },
    offline     = { "offline", false, false, false },
)]
fn health_of_known_runner(status: &str, busy: bool, expect_online: bool, expect_busy: bool) {
    let identity = identity("abc123");
    let runner = api_runner("unit-0-n-abc123", status, busy);
    let health = GithubPlatform::health_of(&identity, &runner);
    assert_eq!(health.online, expect_online);
    assert_eq!(health.busy, expect_busy);
    assert!(!health.deletable);
    assert!(health.runner_in_platform);
}

#[test]
fn health_of_missing_runner_is_deletable() {
    let health = GithubPlatform::health_missing(&identity("abc123"));
    assert!(!health.online);
    assert!(!health.busy);
    assert!(health.deletable);
    assert!(!health.runner_in_platform);
}

#[yare::parameterized(
    queued      = { "queued",      JobStatus::Queued },
    waiting     = { "waiting",     JobStatus::Waiting },
    in_progress = { "in_progress", JobStatus::InProgress },
    completed   = { "completed",   JobStatus::Completed },
    unknown     = { "pending",     JobStatus::Queued },
)]
fn job_status_mapping(raw: &str, expected: JobStatus) {
    assert_eq!(job_status(raw), expected);
}

#[test]
fn parse_runner_id_reads_metadata() {
    assert_eq!(GithubPlatform::parse_runner_id(&identity("abc123")), Some(11));

    let without = RunnerIdentity::new(
        InstanceId::new("unit-0", ReactiveMode::NonReactive, "abc123"),
        RunnerMetadata::github(),
    );
    assert_eq!(GithubPlatform::parse_runner_id(&without), None);
}
