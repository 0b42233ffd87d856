// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::auth::KeystoneAuth;
use rfm_core::OpenStackCredentials;

fn record(name: &str, id: &str, created: &str) -> ServerRecord {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "name": name,
        "status": "ACTIVE",
        "created": created,
        "metadata": {"platform_name": "github", "runner_id": "77"},
        "addresses": {"net": [{"addr": "10.0.0.9"}]}
    }))
    .unwrap()
}

fn cloud() -> OpenStackCloud {
    let credentials = OpenStackCredentials {
        auth_url: "https://keystone.example.com/v3".to_string(),
        project_name: "runners".to_string(),
        username: "svc".to_string(),
        password: "hunter2".to_string(),
        user_domain_name: "Default".to_string(),
        project_domain_name: "Default".to_string(),
        region_name: "RegionOne".to_string(),
    };
    let api = OpenStackApi::new(
        reqwest::Client::new(),
        KeystoneAuth::new(reqwest::Client::new(), credentials),
    );
    OpenStackCloud::new(
        api,
        CloudSettings {
            prefix: "unit-0".to_string(),
            network: "external".to_string(),
            key_dir: PathBuf::from("/tmp/keys"),
            system_user: "runner-manager".to_string(),
            proxy_command: None,
        },
    )
}

#[test]
fn resolve_duplicates_keeps_newest() {
    let records = vec![
        record("unit-0-n-abc123", "old", "2026-01-01T00:00:00Z"),
        record("unit-0-n-abc123", "new", "2026-01-02T00:00:00Z"),
        record("unit-0-n-def456", "only", "2026-01-01T00:00:00Z"),
    ];
    let (kept, losers) = resolve_duplicates(records);

    let kept_ids: Vec<&str> = kept.iter().map(|record| record.id.as_str()).collect();
    assert!(kept_ids.contains(&"new"));
    assert!(kept_ids.contains(&"only"));
    assert_eq!(kept.len(), 2);
    assert_eq!(losers.len(), 1);
    assert_eq!(losers[0].id, "old");
}

#[test]
fn resolve_duplicates_order_independent() {
    let records = vec![
        record("unit-0-n-abc123", "new", "2026-01-02T00:00:00Z"),
        record("unit-0-n-abc123", "old", "2026-01-01T00:00:00Z"),
    ];
    let (kept, losers) = resolve_duplicates(records);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].id, "new");
    assert_eq!(losers[0].id, "old");
}

#[test]
fn server_to_vm_builds_joined_model() {
    let cloud = cloud();
    let vm = cloud
        .server_to_vm(&record("unit-0-n-abc123", "srv-1", "2026-01-01T00:00:00Z"))
        .unwrap();
    assert_eq!(vm.name(), "unit-0-n-abc123");
    assert_eq!(vm.metadata.platform_name, "github");
    assert_eq!(vm.metadata.runner_id.as_deref(), Some("77"));
    assert_eq!(vm.state, VmState::Active);
    assert_eq!(vm.addresses, vec!["10.0.0.9".to_string()]);
}

#[test]
fn server_to_vm_skips_unparseable_names() {
    let cloud = cloud();
    assert!(cloud
        .server_to_vm(&record("unit-0-!!!", "srv-1", "2026-01-01T00:00:00Z"))
        .is_none());
}
