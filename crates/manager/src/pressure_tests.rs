// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use rfm_cloud::FakeVmProvider;
use rfm_core::{FakeClock, VmState};
use rfm_platform::FakePlatform;
use rfm_storage::{EventLog, MetricsStorage};
use tempfile::TempDir;

struct Harness {
    reconciler: PressureReconciler<FakeVmProvider, FakePlatform, FakeClock>,
    cloud: FakeVmProvider,
    _tmp: TempDir,
}

async fn harness(minimum_pressure: Option<i64>) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let cloud = FakeVmProvider::new("unit-0");
    let platform = FakePlatform::new();
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_700_000_000_000);
    let manager = Arc::new(RunnerManager::new(
        "small",
        vec![],
        Arc::new(cloud.clone()),
        Arc::new(platform.clone()),
        MetricsStorage::new(
            tmp.path().join("runner-fs"),
            tmp.path().join("runner-fs-quarantine"),
            "unit-0",
        ),
        EventLog::new(tmp.path().join("metrics.log")),
        clock,
    ));

    // Planner pointed at an unroutable address: flavor load fails and the
    // reconciler proceeds with the explicit minimum below.
    let planner = PlannerClient::new(
        reqwest::Client::new(),
        "http://127.0.0.1:1",
        "planner-token",
    );
    let mut reconciler = PressureReconciler::build(
        manager,
        planner,
        PressureReconcilerConfig {
            flavor_name: "small".to_string(),
            reconcile_interval: Duration::from_secs(300),
            fallback_runners: 1,
        },
        Arc::new(tokio::sync::Mutex::new(())),
        CancellationToken::new(),
    )
    .await;
    reconciler.minimum_pressure = minimum_pressure;
    Harness {
        reconciler,
        cloud,
        _tmp: tmp,
    }
}

#[yare::parameterized(
    zero_no_minimum     = { 0.0,  None,    0 },
    negative_pressure   = { -1.0, None,    0 },
    negative_minimum    = { -2.5, Some(0), 0 },
    floors_fraction     = { 2.9,  None,    2 },
    minimum_wins        = { 1.0,  Some(3), 3 },
    pressure_wins       = { 5.0,  Some(3), 5 },
)]
fn desired_total_cases(pressure: f64, minimum: Option<i64>, expected: usize) {
    assert_eq!(desired_total(pressure, minimum), expected);
}

#[tokio::test]
async fn create_handler_scales_up_to_pressure() {
    let harness = harness(None).await;
    harness.reconciler.handle_create(3.0).await;
    assert_eq!(harness.cloud.vm_names().len(), 3);
    assert_eq!(harness.reconciler.last_pressure(), Some(3.0));
}

#[tokio::test]
async fn create_handler_never_scales_down() {
    let harness = harness(None).await;
    harness.reconciler.handle_create(2.0).await;
    assert_eq!(harness.cloud.vm_names().len(), 2);

    harness.reconciler.handle_create(0.0).await;
    assert_eq!(harness.cloud.vm_names().len(), 2);
}

#[tokio::test]
async fn create_handler_respects_minimum_pressure() {
    let harness = harness(Some(2)).await;
    harness.reconciler.handle_create(0.0).await;
    assert_eq!(harness.cloud.vm_names().len(), 2);
}

#[tokio::test]
async fn timer_reconcile_cleans_then_tops_up() {
    let harness = harness(None).await;
    // One stuck VM that cleanup will collect.
    let stuck = rfm_core::Vm {
        instance_id: rfm_core::InstanceId::generate("unit-0", false),
        metadata: RunnerMetadata::github(),
        config: rfm_core::VmConfig {
            image: "jammy".to_string(),
            flavor: "m1.small".to_string(),
        },
        state: VmState::Error,
        created_at: chrono::Utc::now(),
        addresses: vec![],
    };
    harness.cloud.push_vm(stuck);

    harness.reconciler.handle_timer_reconcile(2.0).await;

    // The errored VM is gone and the fleet is back at the desired size.
    let names = harness.cloud.vm_names();
    assert_eq!(names.len(), 2);
}

#[tokio::test]
async fn timer_reconcile_with_satisfied_pressure_changes_nothing() {
    let harness = harness(None).await;
    harness.reconciler.handle_create(2.0).await;
    let before = harness.cloud.vm_names();

    harness.reconciler.handle_timer_reconcile(1.0).await;
    assert_eq!(harness.cloud.vm_names(), before);
}
