// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn minimal_yaml() -> String {
    r#"
name: unit-0
extra_labels: ["self-hosted"]
github_config:
  token: ghp_token
  path: octo/hello
service_config:
  use_aproxy: false
non_reactive_configuration:
  combinations:
    - image:
        name: jammy
        labels: ["jammy"]
      flavor:
        name: m1.small
        labels: ["small"]
      base_virtual_machines: 2
openstack_configuration:
  vm_prefix: unit-0
  network: external
  credentials:
    auth_url: https://keystone.example.com/v3
    project_name: runners
    username: svc
    password: hunter2
    user_domain_name: Default
    project_domain_name: Default
    region_name: RegionOne
"#
    .to_string()
}

#[test]
fn minimal_config_parses_and_validates() {
    let config = AppConfig::from_yaml_str(&minimal_yaml()).unwrap();
    assert_eq!(config.name, "unit-0");
    assert_eq!(config.combination().unwrap().base_virtual_machines, 2);
    assert_eq!(config.openstack_configuration.system_user, "runner-manager");
    assert!(config.reactive_configuration.is_none());
}

#[test]
fn unknown_fields_are_rejected() {
    let raw = minimal_yaml() + "\nbogus_field: true\n";
    assert!(matches!(
        AppConfig::from_yaml_str(&raw),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn missing_platform_is_rejected() {
    let raw = minimal_yaml().replace(
        "github_config:\n  token: ghp_token\n  path: octo/hello\n",
        "",
    );
    let err = AppConfig::from_yaml_str(&raw).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
fn aproxy_without_runner_proxy_is_rejected() {
    let raw = minimal_yaml().replace("use_aproxy: false", "use_aproxy: true");
    let err = AppConfig::from_yaml_str(&raw).unwrap_err();
    let ConfigError::Validation(message) = err else {
        panic!("expected validation error");
    };
    assert!(message.contains("use_aproxy"));
}

#[test]
fn aproxy_with_runner_proxy_is_accepted() {
    let raw = minimal_yaml().replace(
        "use_aproxy: false",
        "use_aproxy: true\n  runner_proxy:\n    http: http://proxy.internal:3128",
    );
    let config = AppConfig::from_yaml_str(&raw).unwrap();
    assert!(config.service_config.use_aproxy);
    assert_eq!(
        config.service_config.runner_proxy.unwrap().proxy_address(),
        Some("http://proxy.internal:3128")
    );
}

#[yare::parameterized(
    org        = { "canonical", true },
    owner_repo = { "octo/hello", true },
    empty      = { "", false },
    extra      = { "a/b/c", false },
    no_owner   = { "/repo", false },
)]
fn github_path_validation(path: &str, ok: bool) {
    let raw = minimal_yaml().replace("path: octo/hello", &format!("path: \"{path}\""));
    assert_eq!(AppConfig::from_yaml_str(&raw).is_ok(), ok);
}

#[test]
fn ssh_debug_connection_fingerprints_checked() {
    let raw = minimal_yaml().replace(
        "use_aproxy: false",
        r#"use_aproxy: false
  ssh_debug_connections:
    - host: 10.1.2.3
      port: 10022
      rsa_fingerprint: "bad"
      ed25519_fingerprint: "SHA256:ok""#,
    );
    let err = AppConfig::from_yaml_str(&raw).unwrap_err();
    let ConfigError::Validation(message) = err else {
        panic!("expected validation error");
    };
    assert!(message.contains("rsa_fingerprint"));
}

#[test]
fn reactive_configuration_parses() {
    let raw = minimal_yaml()
        + r#"
reactive_configuration:
  queue:
    uri: /var/lib/runner-fleet/queue.db
    queue_name: unit-0
  max_total_virtual_machines: 10
"#;
    let config = AppConfig::from_yaml_str(&raw).unwrap();
    let reactive = config.reactive_configuration.unwrap();
    assert_eq!(reactive.max_total_virtual_machines, 10);
    assert_eq!(reactive.queue.queue_name, "unit-0");
}

#[test]
fn reactive_empty_queue_name_rejected() {
    let raw = minimal_yaml()
        + r#"
reactive_configuration:
  queue:
    uri: /var/lib/runner-fleet/queue.db
    queue_name: ""
  max_total_virtual_machines: 10
"#;
    assert!(AppConfig::from_yaml_str(&raw).is_err());
}

#[test]
fn planner_settings_defaults() {
    let raw = minimal_yaml()
        + r#"
planner_configuration:
  url: https://planner.example.com
  token: planner-token
"#;
    let config = AppConfig::from_yaml_str(&raw).unwrap();
    let planner = config.planner_configuration.unwrap();
    assert_eq!(planner.reconcile_interval, 5);
    assert_eq!(planner.fallback_runners, 0);
}
