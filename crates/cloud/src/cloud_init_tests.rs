// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use rfm_core::{ProxyConfig, RepoPolicyConfig};

fn service_config() -> ServiceConfig {
    ServiceConfig {
        manager_proxy_command: None,
        proxy: None,
        runner_proxy: None,
        use_aproxy: false,
        dockerhub_mirror: None,
        ssh_debug_connections: vec![],
        repo_policy_compliance: None,
    }
}

fn context() -> RunnerContext {
    RunnerContext {
        shell_run_script: "./run.sh --jitconfig abc".to_string(),
        ingress_tcp_ports: vec![],
    }
}

#[test]
fn user_data_embeds_run_script_and_markers() {
    let script = build_user_data(&context(), &service_config(), None);
    assert!(script.starts_with("#!/bin/bash"));
    assert!(script.contains("./run.sh --jitconfig abc"));
    assert!(script.contains("installation-start.timestamp"));
    assert!(script.contains("runner-installed.timestamp"));
    // The pre-job hook records the metrics record the manager pulls back.
    assert!(script.contains("pre-job-metrics.json"));
    assert!(script.contains("${GITHUB_WORKFLOW}"));
    // Installation start marker must precede the installed marker.
    let start = script.find("installation-start.timestamp").unwrap();
    let installed = script.find("runner-installed.timestamp").unwrap();
    assert!(start < installed);
}

#[test]
fn aproxy_disabled_without_runner_proxy() {
    let mut config = service_config();
    config.use_aproxy = false;
    let script = build_user_data(&context(), &config, None);
    assert!(!script.contains("aproxy"));
}

#[test]
fn aproxy_enabled_with_runner_proxy() {
    let mut config = service_config();
    config.use_aproxy = true;
    config.runner_proxy = Some(ProxyConfig {
        http: Some("http://proxy.internal:3128".to_string()),
        https: None,
        no_proxy: None,
    });
    let script = build_user_data(&context(), &config, None);
    assert!(script.contains("snap set aproxy proxy=http://proxy.internal:3128"));
}

#[test]
fn runner_proxy_lands_in_env() {
    let mut config = service_config();
    config.runner_proxy = Some(ProxyConfig {
        http: None,
        https: Some("http://proxy.internal:3129".to_string()),
        no_proxy: None,
    });
    let script = build_user_data(&context(), &config, None);
    assert!(script.contains("http_proxy=http://proxy.internal:3129"));
    assert!(script.contains("https_proxy=http://proxy.internal:3129"));
}

#[test]
fn dockerhub_mirror_configures_daemon() {
    let mut config = service_config();
    config.dockerhub_mirror = Some("https://mirror.internal".to_string());
    let script = build_user_data(&context(), &config, None);
    assert!(script.contains("registry-mirrors"));
    assert!(script.contains("DOCKERHUB_MIRROR=https://mirror.internal"));
}

#[test]
fn repo_policy_check_included_only_with_token() {
    let mut config = service_config();
    config.repo_policy_compliance = Some(RepoPolicyConfig {
        token: "service-token".to_string(),
        url: "https://policy.internal/".to_string(),
    });

    let with_token = build_user_data(&context(), &config, Some("one-time"));
    assert!(with_token.contains("Authorization: Bearer one-time"));
    assert!(with_token.contains("https://policy.internal/check-run"));

    let without_token = build_user_data(&context(), &config, None);
    assert!(without_token.contains("repo policy check disabled"));
}

#[test]
fn ssh_debug_connection_lands_in_env() {
    let mut config = service_config();
    config.ssh_debug_connections = vec![SshDebugConnection {
        host: "10.1.2.3".parse().unwrap(),
        port: 10022,
        rsa_fingerprint: "SHA256:rsa".to_string(),
        ed25519_fingerprint: "SHA256:ed".to_string(),
        use_runner_http_proxy: false,
        local_proxy_host: "127.0.0.1".to_string(),
        local_proxy_port: 3129,
    }];
    let script = build_user_data(&context(), &config, None);
    assert!(script.contains("TMATE_SERVER_HOST=10.1.2.3"));
    assert!(script.contains("TMATE_SERVER_PORT=10022"));
    assert!(script.contains("TMATE_SERVER_RSA_FINGERPRINT=SHA256:rsa"));
}
