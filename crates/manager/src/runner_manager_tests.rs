// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::Duration as ChronoDuration;
use rfm_cloud::{FakeVmProvider, VmProviderCall};
use rfm_core::instance::ReactiveMode;
use rfm_core::{FakeClock, VmConfig, VmState};
use rfm_platform::{FakePlatform, PlatformCall};
use tempfile::TempDir;

struct Harness {
    manager: RunnerManager<FakeVmProvider, FakePlatform, FakeClock>,
    cloud: FakeVmProvider,
    platform: FakePlatform,
    clock: FakeClock,
    _tmp: TempDir,
    log_path: std::path::PathBuf,
    quarantine_dir: std::path::PathBuf,
}

fn harness() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let cloud = FakeVmProvider::new("unit-0");
    let platform = FakePlatform::new();
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_700_000_000_000);

    let log_path = tmp.path().join("metrics.log");
    let quarantine_dir = tmp.path().join("runner-fs-quarantine");
    let storage = MetricsStorage::new(tmp.path().join("runner-fs"), &quarantine_dir, "unit-0");
    let manager = RunnerManager::new(
        "small",
        vec!["self-hosted".to_string()],
        Arc::new(cloud.clone()),
        Arc::new(platform.clone()),
        storage,
        EventLog::new(&log_path),
        clock.clone(),
    );
    Harness {
        manager,
        cloud,
        platform,
        clock,
        _tmp: tmp,
        log_path,
        quarantine_dir,
    }
}

fn instance(suffix: &str) -> InstanceId {
    InstanceId::new("unit-0", ReactiveMode::NonReactive, suffix)
}

impl Harness {
    fn seed_vm(&self, suffix: &str, state: VmState, age: ChronoDuration) -> Vm {
        let vm = Vm {
            instance_id: instance(suffix),
            metadata: RunnerMetadata::github().with_runner_id("7"),
            config: VmConfig {
                image: "jammy".to_string(),
                flavor: "m1.small".to_string(),
            },
            state,
            created_at: self.clock.utc_now() - age,
            addresses: vec!["203.0.113.5".to_string()],
        };
        self.cloud.push_vm(vm.clone());
        vm
    }

    fn logged_events(&self) -> Vec<MetricEvent> {
        let Ok(content) = std::fs::read_to_string(&self.log_path) else {
            return Vec::new();
        };
        content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

// ── create_runners ───────────────────────────────────────────────────────────

#[tokio::test]
async fn create_runners_spawns_and_emits_installed() {
    let harness = harness();
    let created = harness
        .manager
        .create_runners(3, &RunnerMetadata::github(), false)
        .await;

    assert_eq!(created.len(), 3);
    assert_eq!(harness.cloud.vm_names().len(), 3);

    let contexts = harness
        .platform
        .calls()
        .into_iter()
        .filter(|call| matches!(call, PlatformCall::GetRunnerContext { .. }))
        .count();
    assert_eq!(contexts, 3);

    let events = harness.logged_events();
    assert_eq!(events.len(), 3);
    assert!(events
        .iter()
        .all(|event| matches!(event, MetricEvent::RunnerInstalled { flavor, .. } if flavor == "small")));
}

#[tokio::test]
async fn create_runners_flags_reactive_instances() {
    let harness = harness();
    let created = harness
        .manager
        .create_runners(1, &RunnerMetadata::github(), true)
        .await;
    assert_eq!(created[0].reactive, ReactiveMode::Reactive);
}

#[tokio::test]
async fn registration_failure_creates_nothing() {
    let harness = harness();
    harness.platform.fail_context(true);

    let created = harness
        .manager
        .create_runners(2, &RunnerMetadata::github(), false)
        .await;

    assert!(created.is_empty());
    assert!(harness.cloud.vm_names().is_empty());
    assert!(harness.logged_events().is_empty());
    // Storage directories must not leak for failed attempts.
    assert!(harness.manager.storage.list_all().unwrap().is_empty());
}

#[tokio::test]
async fn launch_failure_unregisters_runner() {
    let harness = harness();
    harness.cloud.fail_create(true);

    let created = harness
        .manager
        .create_runners(1, &RunnerMetadata::github(), false)
        .await;

    assert!(created.is_empty());
    let deletions = harness
        .platform
        .calls()
        .into_iter()
        .filter(|call| matches!(call, PlatformCall::DeleteRunner { .. }))
        .count();
    assert_eq!(deletions, 1);
    assert!(harness.logged_events().is_empty());
}

// ── get_runners ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn get_runners_joins_vm_and_platform_state() {
    let harness = harness();
    harness.seed_vm("idle0001", VmState::Active, ChronoDuration::minutes(5));
    harness.seed_vm("busy0001", VmState::Active, ChronoDuration::minutes(5));
    harness.seed_vm("gone0001", VmState::Active, ChronoDuration::minutes(5));
    harness.platform.set_idle("unit-0-n-idle0001");
    harness.platform.set_busy("unit-0-n-busy0001");
    harness.platform.set_failed("unit-0-n-gone0001");

    let mut runners = harness.manager.get_runners().await.unwrap();
    runners.sort_by(|a, b| a.name.cmp(&b.name));

    let by_name = |name: &str| {
        runners
            .iter()
            .find(|runner| runner.name.contains(name))
            .unwrap()
    };
    assert_eq!(
        by_name("idle0001").platform_state,
        Some(PlatformRunnerState::Idle)
    );
    assert_eq!(
        by_name("busy0001").platform_state,
        Some(PlatformRunnerState::Busy)
    );
    // Health query failed for this one: no platform state, health from the
    // cloud probe.
    assert_eq!(by_name("gone0001").platform_state, None);
    assert_eq!(by_name("gone0001").health, HealthState::Healthy);
}

#[tokio::test]
async fn get_runners_propagates_cloud_error() {
    let harness = harness();
    harness.cloud.fail_cloud(true);
    assert!(harness.manager.get_runners().await.is_err());
}

// ── cleanup_runners ──────────────────────────────────────────────────────────

#[tokio::test]
async fn cleanup_deletes_terminal_vms() {
    let harness = harness();
    harness.seed_vm("dead0001", VmState::Shutoff, ChronoDuration::minutes(5));
    harness.seed_vm("live0001", VmState::Active, ChronoDuration::minutes(5));
    harness.platform.set_idle("unit-0-n-live0001");

    harness.manager.cleanup_runners().await.unwrap();

    assert_eq!(harness.cloud.vm_names(), vec!["unit-0-n-live0001"]);
}

#[tokio::test]
async fn cleanup_deletes_stuck_initializing_vms() {
    let harness = harness();
    harness.seed_vm("stuck001", VmState::Initializing, ChronoDuration::hours(2));
    harness.seed_vm("fresh001", VmState::Initializing, ChronoDuration::minutes(5));
    harness.platform.set_offline("unit-0-n-stuck001");
    harness.platform.set_offline("unit-0-n-fresh001");

    harness.manager.cleanup_runners().await.unwrap();

    assert_eq!(harness.cloud.vm_names(), vec!["unit-0-n-fresh001"]);
}

#[tokio::test]
async fn cleanup_deletes_platform_deletable_vms() {
    let harness = harness();
    harness.seed_vm("done0001", VmState::Active, ChronoDuration::minutes(5));
    harness
        .platform
        .set_health("unit-0-n-done0001", true, false, true, true);

    harness.manager.cleanup_runners().await.unwrap();
    assert!(harness.cloud.vm_names().is_empty());
}

#[tokio::test]
async fn unregistered_initializing_vm_gets_build_timeout() {
    let harness = harness();
    // The platform has never seen this runner (deletable, not in
    // platform), but the VM is still building: it must survive.
    harness.seed_vm("slow0001", VmState::Initializing, ChronoDuration::minutes(5));
    harness.platform.set_deletable("unit-0-n-slow0001");

    harness.manager.cleanup_runners().await.unwrap();
    assert_eq!(harness.cloud.vm_names(), vec!["unit-0-n-slow0001"]);

    // Past the build timeout the same VM is collected.
    let harness = self::harness();
    harness.seed_vm("slow0002", VmState::Initializing, ChronoDuration::hours(2));
    harness.platform.set_deletable("unit-0-n-slow0002");
    harness.manager.cleanup_runners().await.unwrap();
    assert!(harness.cloud.vm_names().is_empty());
}

#[tokio::test]
async fn cleanup_deletes_unhealthy_vms() {
    let harness = harness();
    harness.seed_vm("sick0001", VmState::Active, ChronoDuration::minutes(5));
    harness.platform.set_offline("unit-0-n-sick0001");
    harness.cloud.set_health("unit-0-n-sick0001", false);

    harness.manager.cleanup_runners().await.unwrap();
    assert!(harness.cloud.vm_names().is_empty());
}

#[tokio::test]
async fn cleanup_unregisters_strays_and_runs_cloud_cleanup() {
    let harness = harness();
    let stray = RunnerIdentity::new(instance("stray001"), RunnerMetadata::github());
    harness.platform.set_strays(vec![stray]);

    harness.manager.cleanup_runners().await.unwrap();

    assert!(harness
        .platform
        .calls()
        .contains(&PlatformCall::DeleteRunner {
            name: "unit-0-n-stray001".to_string()
        }));
    assert!(harness.cloud.calls().contains(&VmProviderCall::Cleanup));
}

#[tokio::test]
async fn cleanup_twice_is_idempotent() {
    let harness = harness();
    harness.seed_vm("dead0001", VmState::Error, ChronoDuration::minutes(5));

    harness.manager.cleanup_runners().await.unwrap();
    assert!(harness.cloud.vm_names().is_empty());

    let before = harness.logged_events().len();
    harness.manager.cleanup_runners().await.unwrap();
    assert!(harness.cloud.vm_names().is_empty());
    assert_eq!(harness.logged_events().len(), before);
}

#[tokio::test]
async fn cleanup_extracts_metrics_before_teardown() {
    let harness = harness();
    let vm = harness.seed_vm("done0001", VmState::Shutoff, ChronoDuration::hours(1));
    harness.cloud.set_metric_files(
        vm.name(),
        vec![
            ("runner-installed.timestamp".to_string(), "100".to_string()),
            (
                "pre-job-metrics.json".to_string(),
                r#"{"timestamp":160,"workflow":"Build","workflow_run_id":"42","repository":"octo/hello","event":"push"}"#
                    .to_string(),
            ),
            (
                "post-job-metrics.json".to_string(),
                r#"{"timestamp":220,"status":"normal"}"#.to_string(),
            ),
        ],
    );
    // The storage directory exists because the manager created the VM.
    harness.manager.storage.create(&vm.instance_id).unwrap();

    let stats = harness.manager.cleanup_runners().await.unwrap();

    assert_eq!(stats.get(&rfm_core::EventKind::RunnerStart), Some(&1));
    assert_eq!(stats.get(&rfm_core::EventKind::RunnerStop), Some(&1));
    let events = harness.logged_events();
    assert!(matches!(events[0], MetricEvent::RunnerStart { .. }));
    assert!(matches!(events[1], MetricEvent::RunnerStop { .. }));
    // Storage is gone afterwards.
    assert!(harness.manager.storage.get(&vm.instance_id).is_err());
}

#[tokio::test]
async fn corrupt_metrics_are_quarantined_without_events() {
    let harness = harness();
    let vm = harness.seed_vm("evil0001", VmState::Shutoff, ChronoDuration::hours(1));
    harness.cloud.set_metric_files(
        vm.name(),
        vec![("pre-job-metrics.json".to_string(), "not json".to_string())],
    );
    harness.manager.storage.create(&vm.instance_id).unwrap();

    let stats = harness.manager.cleanup_runners().await.unwrap();

    assert!(stats.is_empty());
    assert!(harness.logged_events().is_empty());
    assert!(harness
        .quarantine_dir
        .join("unit-0-n-evil0001.tar.gz")
        .is_file());
}

#[tokio::test]
async fn cloud_error_propagates_from_cleanup() {
    let harness = harness();
    harness.cloud.fail_cloud(true);
    assert!(harness.manager.cleanup_runners().await.is_err());
}

// ── delete_runners / flush_runners ───────────────────────────────────────────

#[tokio::test]
async fn delete_runners_prefers_oldest_idle() {
    let harness = harness();
    harness.seed_vm("old00001", VmState::Active, ChronoDuration::hours(3));
    harness.seed_vm("new00001", VmState::Active, ChronoDuration::minutes(5));
    harness.seed_vm("busy0001", VmState::Active, ChronoDuration::hours(4));
    harness.platform.set_idle("unit-0-n-old00001");
    harness.platform.set_idle("unit-0-n-new00001");
    harness.platform.set_busy("unit-0-n-busy0001");

    harness.manager.delete_runners(1).await.unwrap();

    let mut names = harness.cloud.vm_names();
    names.sort();
    assert_eq!(names, vec!["unit-0-n-busy0001", "unit-0-n-new00001"]);
}

#[tokio::test]
async fn delete_runners_never_touches_busy() {
    let harness = harness();
    harness.seed_vm("busy0001", VmState::Active, ChronoDuration::hours(4));
    harness.platform.set_busy("unit-0-n-busy0001");

    harness.manager.delete_runners(5).await.unwrap();
    assert_eq!(harness.cloud.vm_names(), vec!["unit-0-n-busy0001"]);
}

#[tokio::test]
async fn flush_idle_spares_busy_runners() {
    let harness = harness();
    harness.seed_vm("idle0001", VmState::Active, ChronoDuration::minutes(5));
    harness.seed_vm("busy0001", VmState::Active, ChronoDuration::minutes(5));
    harness.platform.set_idle("unit-0-n-idle0001");
    harness.platform.set_busy("unit-0-n-busy0001");

    harness.manager.flush_runners(FlushMode::Idle).await.unwrap();
    assert_eq!(harness.cloud.vm_names(), vec!["unit-0-n-busy0001"]);
}

#[tokio::test]
async fn flush_busy_takes_both() {
    let harness = harness();
    harness.seed_vm("idle0001", VmState::Active, ChronoDuration::minutes(5));
    harness.seed_vm("busy0001", VmState::Active, ChronoDuration::minutes(5));
    harness.platform.set_idle("unit-0-n-idle0001");
    harness.platform.set_busy("unit-0-n-busy0001");

    harness.manager.flush_runners(FlushMode::Busy).await.unwrap();
    assert!(harness.cloud.vm_names().is_empty());
}
