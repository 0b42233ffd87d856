// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use rfm_core::instance::ReactiveMode;

fn identity(suffix: &str) -> RunnerIdentity {
    RunnerIdentity::new(
        InstanceId::new("unit-0", ReactiveMode::Reactive, suffix),
        RunnerMetadata {
            platform_name: PLATFORM_JOBMANAGER.to_string(),
            runner_id: Some("3".to_string()),
            url: Some("http://jobmanager.example.com".to_string()),
        },
    )
}

#[test]
fn parse_job_id_accepts_v1_jobs_path() {
    assert_eq!(
        parse_job_id("http://jobmanager.example.com/v1/jobs/1234").unwrap(),
        1234
    );
}

#[yare::parameterized(
    wrong_path   = { "http://jobmanager.example.com/v1/runner" },
    no_path      = { "http://jobmanager.example.com/" },
    no_slash     = { "http://jobmanager.example.com" },
    missing_id   = { "http://jobmanager.example.com/v1/jobs/" },
    garbage_id   = { "http://jobmanager.example.com/v1/jobs/latest" },
)]
fn parse_job_id_rejects_bad_urls(url: &str) {
    assert!(matches!(parse_job_id(url), Err(PlatformError::Api(_))));
}

#[yare::parameterized(
    pending                = { "PENDING",     false, false, true,  false },
    in_progress            = { "IN_PROGRESS", false, true,  true,  false },
    completed_not_deletable = { "COMPLETED",  false, true,  true,  false },
    completed_deletable    = { "COMPLETED",   true,  true,  false, true },
)]
fn health_mapping(
    status: &str,
    record_deletable: bool,
    expect_online: bool,
    expect_busy: bool,
    expect_deletable: bool,
) {
    let record = RunnerHealthRecord {
        status: status.to_string(),
        deletable: record_deletable,
    };
    let health = JobManagerPlatform::health_from_record(&identity("abc123"), &record);
    assert_eq!(health.online, expect_online);
    assert_eq!(health.busy, expect_busy);
    assert_eq!(health.deletable, expect_deletable);
    assert!(health.runner_in_platform);
}

#[test]
fn missing_runner_health_is_deletable() {
    let health = JobManagerPlatform::health_missing(&identity("abc123"));
    assert!(health.deletable);
    assert!(!health.runner_in_platform);
}

#[test]
fn endpoint_prefers_metadata_url() {
    let platform = JobManagerPlatform::new(
        reqwest::Client::new(),
        "http://default.example.com",
        "token",
    );
    let with_url = identity("abc123").metadata;
    assert_eq!(platform.endpoint(&with_url), "http://jobmanager.example.com");

    let without_url = RunnerMetadata {
        platform_name: PLATFORM_JOBMANAGER.to_string(),
        runner_id: None,
        url: None,
    };
    assert_eq!(platform.endpoint(&without_url), "http://default.example.com");
}

#[test]
fn runner_id_required_for_health() {
    let without_id = RunnerIdentity::new(
        InstanceId::new("unit-0", ReactiveMode::Reactive, "abc123"),
        RunnerMetadata {
            platform_name: PLATFORM_JOBMANAGER.to_string(),
            runner_id: None,
            url: None,
        },
    );
    assert!(JobManagerPlatform::runner_id(&without_id).is_err());
    assert_eq!(
        JobManagerPlatform::runner_id(&identity("abc123")).unwrap(),
        "3"
    );
}
