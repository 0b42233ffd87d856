// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::queue::InMemoryQueue;
use rfm_cloud::FakeVmProvider;
use rfm_core::instance::ReactiveMode;
use rfm_core::FakeClock;
use rfm_platform::{FakePlatform, JobProbe};
use rfm_storage::{EventLog, MetricsStorage};
use std::sync::Arc;
use tempfile::TempDir;

const JOB_URL: &str = "https://api.github.com/repos/octo/hello/actions/jobs/42";

struct Harness {
    queue: InMemoryQueue,
    cloud: FakeVmProvider,
    platform: FakePlatform,
    manager: RunnerManager<FakeVmProvider, FakePlatform, FakeClock>,
    supported: HashSet<String>,
    _tmp: TempDir,
}

fn harness() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let cloud = FakeVmProvider::new("unit-0");
    let platform = FakePlatform::new();
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_700_000_000_000);
    let manager = RunnerManager::new(
        "small",
        vec!["small".to_string()],
        Arc::new(cloud.clone()),
        Arc::new(platform.clone()),
        MetricsStorage::new(
            tmp.path().join("runner-fs"),
            tmp.path().join("runner-fs-quarantine"),
            "unit-0",
        ),
        EventLog::new(tmp.path().join("metrics.log")),
        clock,
    );
    Harness {
        queue: InMemoryQueue::new(),
        cloud,
        platform,
        manager,
        supported: HashSet::from(["small".to_string()]),
        _tmp: tmp,
    }
}

fn job_payload(labels: &[&str]) -> String {
    serde_json::json!({"labels": labels, "url": JOB_URL}).to_string()
}

impl Harness {
    async fn consume(&self) -> Result<(), ConsumeError> {
        consume(&self.queue, &self.manager, &self.platform, &self.supported).await
    }
}

// ── pure helpers ─────────────────────────────────────────────────────────────

#[yare::parameterized(
    first_retry  = { 1, 10 },
    second_retry = { 2, 20 },
    third_retry  = { 3, 40 },
    fifth_retry  = { 5, 160 },
    capped       = { 6, 300 },
    deep_cap     = { 20, 300 },
)]
fn backoff_schedule(process_count: u32, expected_secs: u64) {
    assert_eq!(
        calculate_backoff(process_count),
        Duration::from_secs(expected_secs)
    );
}

#[yare::parameterized(
    subset           = { &["small"], &["small", "large"], true },
    exact            = { &["small"], &["small"], true },
    case_insensitive = { &["SMALL"], &["small"], true },
    unsupported      = { &["huge"], &["small"], false },
    partial          = { &["small", "huge"], &["small"], false },
    empty_job        = { &[], &["small"], true },
)]
fn label_validation(labels: &[&str], supported: &[&str], expected: bool) {
    let labels: HashSet<String> = labels.iter().map(|label| label.to_string()).collect();
    let supported: HashSet<String> = supported.iter().map(|label| label.to_string()).collect();
    assert_eq!(validate_labels(&labels, &supported), expected);
}

#[test]
fn metadata_built_for_github_urls_only() {
    assert!(build_runner_metadata(JOB_URL).is_ok());
    assert!(build_runner_metadata("https://gitlab.com/octo/hello/-/jobs/42").is_err());
}

#[test]
fn job_details_require_a_path() {
    assert!(parse_job_details(&job_payload(&["small"])).is_ok());
    let no_path = serde_json::json!({"labels": [], "url": "https://api.github.com"}).to_string();
    assert!(matches!(
        parse_job_details(&no_path),
        Err(ConsumeError::InvalidJob(_))
    ));
    assert!(matches!(
        parse_job_details("not json"),
        Err(ConsumeError::InvalidJob(_))
    ));
}

// ── consume flow ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn end_sentinel_stops_consumption() {
    let harness = harness();
    harness.queue.push(END_PROCESSING_PAYLOAD).await.unwrap();

    harness.consume().await.unwrap();

    assert!(harness.queue.ready_payloads().is_empty());
    assert!(harness.cloud.vm_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn spawns_runner_and_acks_when_job_picked_up() {
    let harness = harness();
    harness.queue.push(&job_payload(&["small"])).await.unwrap();
    // Pre-spawn probe: not picked; first post-spawn probe: picked.
    harness
        .platform
        .script_job_probes(vec![JobProbe::NotPicked, JobProbe::PickedUp]);

    harness.consume().await.unwrap();

    // Message is acked, one reactive runner exists.
    assert!(harness.queue.ready_payloads().is_empty());
    assert!(harness.queue.dead_payloads().is_empty());
    let names = harness.cloud.vm_names();
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("unit-0-r-"));
}

#[tokio::test(start_paused = true)]
async fn unsupported_labels_reject_without_requeue() {
    let harness = harness();
    harness.queue.push(&job_payload(&["huge"])).await.unwrap();
    harness.queue.push(END_PROCESSING_PAYLOAD).await.unwrap();

    harness.consume().await.unwrap();

    assert_eq!(harness.queue.dead_payloads().len(), 1);
    assert!(harness.cloud.vm_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn retry_limit_drops_message_without_spawn() {
    let harness = harness();
    // Claimed process count will be RETRY_LIMIT + 1.
    harness
        .queue
        .push_with_count(&job_payload(&["small"]), RETRY_LIMIT);
    harness.queue.push(END_PROCESSING_PAYLOAD).await.unwrap();

    harness.consume().await.unwrap();

    assert_eq!(harness.queue.dead_payloads().len(), 1);
    assert!(harness.cloud.vm_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn retried_message_waits_exponential_backoff() {
    let harness = harness();
    harness.queue.push_with_count(&job_payload(&["small"]), 1);
    harness
        .platform
        .script_job_probes(vec![JobProbe::NotPicked, JobProbe::PickedUp]);

    let started = tokio::time::Instant::now();
    harness.consume().await.unwrap();

    // Second processing: 20s backoff, then one 60s probe wait.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(80), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn already_picked_up_job_is_acked_without_spawn() {
    let harness = harness();
    harness.queue.push(&job_payload(&["small"])).await.unwrap();
    harness.queue.push(END_PROCESSING_PAYLOAD).await.unwrap();
    harness.platform.script_job_probes(vec![JobProbe::PickedUp]);

    harness.consume().await.unwrap();

    assert!(harness.queue.ready_payloads().is_empty());
    assert!(harness.queue.dead_payloads().is_empty());
    assert!(harness.cloud.vm_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_job_rejects_without_requeue() {
    let harness = harness();
    harness.queue.push(&job_payload(&["small"])).await.unwrap();
    harness.queue.push(END_PROCESSING_PAYLOAD).await.unwrap();
    harness.platform.script_job_probes(vec![JobProbe::NotFound]);

    harness.consume().await.unwrap();

    assert_eq!(harness.queue.dead_payloads().len(), 1);
    assert!(harness.cloud.vm_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn spawn_failure_requeues_message() {
    let harness = harness();
    harness.cloud.fail_create(true);
    harness.queue.push(&job_payload(&["small"])).await.unwrap();

    harness.consume().await.unwrap();

    assert_eq!(harness.queue.ready_payloads().len(), 1);
    assert!(harness.queue.dead_payloads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unanswered_probes_requeue_message() {
    let harness = harness();
    harness.queue.push(&job_payload(&["small"])).await.unwrap();
    // Every probe answers "not picked".

    let started = tokio::time::Instant::now();
    harness.consume().await.unwrap();

    // One runner spawned, message back in the queue after five probes.
    assert_eq!(harness.cloud.vm_names().len(), 1);
    assert_eq!(harness.queue.ready_payloads().len(), 1);
    assert!(started.elapsed() >= Duration::from_secs(300));
}

#[tokio::test(start_paused = true)]
async fn invalid_payload_is_poisonous() {
    let harness = harness();
    harness.queue.push("{not json").await.unwrap();

    let err = harness.consume().await.unwrap_err();
    assert!(matches!(err, ConsumeError::InvalidJob(_)));
    assert_eq!(harness.queue.dead_payloads().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn non_github_url_rejects_and_stops() {
    let harness = harness();
    let payload =
        serde_json::json!({"labels": ["small"], "url": "https://gitlab.com/octo/jobs/42"})
            .to_string();
    harness.queue.push(&payload).await.unwrap();

    harness.consume().await.unwrap();

    assert_eq!(harness.queue.dead_payloads().len(), 1);
    assert!(harness.cloud.vm_names().is_empty());
}
