// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn runner_installed_serializes_with_snake_case_tag() {
    let event = MetricEvent::RunnerInstalled {
        timestamp: 1_700_000_000.0,
        flavor: "small".to_string(),
        duration: 42.5,
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["event"], "runner_installed");
    assert_eq!(json["flavor"], "small");
    assert_eq!(json["duration"], 42.5);
}

#[test]
fn runner_start_omits_missing_queue_duration() {
    let event = MetricEvent::RunnerStart {
        timestamp: 1.0,
        flavor: "small".to_string(),
        workflow: "Build".to_string(),
        repo: "octo/hello".to_string(),
        github_event: "push".to_string(),
        idle: 0.0,
        queue_duration: None,
    };
    let json = serde_json::to_string(&event).unwrap();
    assert!(!json.contains("queue_duration"));
}

#[test]
fn runner_stop_round_trips() {
    let event = MetricEvent::RunnerStop {
        timestamp: 2.0,
        flavor: "small".to_string(),
        workflow: "Build".to_string(),
        repo: "octo/hello".to_string(),
        github_event: "push".to_string(),
        status: PostJobStatus::Abnormal,
        status_info: Some(CodeInformation { code: 137 }),
        job_duration: 12.0,
        job_conclusion: Some("failure".to_string()),
    };
    let json = serde_json::to_string(&event).unwrap();
    let back: MetricEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}

#[test]
fn reconciliation_expected_runners_is_optional() {
    let event = MetricEvent::Reconciliation {
        timestamp: 3.0,
        flavor: "small".to_string(),
        crashed_runners: -1,
        idle_runners: 2,
        active_runners: 1,
        expected_runners: None,
        duration: 0.5,
    };
    let json = serde_json::to_string(&event).unwrap();
    assert!(!json.contains("expected_runners"));
    assert_eq!(json.matches("\"event\":\"reconciliation\"").count(), 1);
}

#[test]
fn merge_stats_sums_counters() {
    let mut left = EventStats::new();
    left.insert(EventKind::RunnerStart, 2);
    left.insert(EventKind::RunnerStop, 1);
    let mut right = EventStats::new();
    right.insert(EventKind::RunnerStop, 3);
    right.insert(EventKind::Reconciliation, 1);

    let merged = merge_stats(left, right);
    assert_eq!(merged[&EventKind::RunnerStart], 2);
    assert_eq!(merged[&EventKind::RunnerStop], 4);
    assert_eq!(merged[&EventKind::Reconciliation], 1);
}
