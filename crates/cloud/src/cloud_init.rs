// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cloud-init user data assembly.
//!
//! The user data is a shell script the VM runs once at boot: it writes the
//! runner environment, the pre-job hook, then hands over to the platform's
//! run script. Composed with plain string templating.

use rand::seq::IndexedRandom;
use rfm_core::{RunnerContext, ServiceConfig, SshDebugConnection};

/// Directory inside the VM where metric files are exchanged.
pub const METRICS_EXCHANGE_PATH: &str = "/home/ubuntu/metrics-exchange";

/// Path of the pre-job hook the runner environment points at.
const PRE_JOB_SCRIPT_PATH: &str = "/home/ubuntu/actions-runner/pre-job.sh";

/// Build the complete user data script for one runner VM.
///
/// `repo_policy_token` is the one-time token fetched from the
/// repo-policy-compliance service, when that service is configured.
pub fn build_user_data(
    context: &RunnerContext,
    service_config: &ServiceConfig,
    repo_policy_token: Option<&str>,
) -> String {
    let ssh_debug = choose_ssh_debug(&service_config.ssh_debug_connections);
    let env_contents = env_contents(service_config, ssh_debug);
    let pre_job_contents = pre_job_contents(service_config, repo_policy_token);
    let aproxy_address = aproxy_address(service_config);

    let mut script = String::new();
    script.push_str("#!/bin/bash\nset -e\n\n");
    script.push_str(&format!(
        "mkdir -p {METRICS_EXCHANGE_PATH}\nchown ubuntu:ubuntu {METRICS_EXCHANGE_PATH}\n"
    ));
    script.push_str(&format!(
        "date +%s > {METRICS_EXCHANGE_PATH}/installation-start.timestamp\n\n"
    ));

    if let Some(address) = aproxy_address {
        script.push_str(&format!(
            "snap install aproxy --edge\nsnap set aproxy proxy={address} listen=:54969\n\n"
        ));
    }

    script.push_str("cat > /home/ubuntu/actions-runner/.env <<'RUNNER_ENV'\n");
    script.push_str(&env_contents);
    script.push_str("RUNNER_ENV\n\n");

    script.push_str(&format!("cat > {PRE_JOB_SCRIPT_PATH} <<'PRE_JOB'\n"));
    script.push_str(&pre_job_contents);
    script.push_str("PRE_JOB\n");
    script.push_str(&format!("chmod 755 {PRE_JOB_SCRIPT_PATH}\n\n"));

    if let Some(mirror) = &service_config.dockerhub_mirror {
        script.push_str(&format!(
            "mkdir -p /etc/docker\necho '{{\"registry-mirrors\": [\"{mirror}\"]}}' > /etc/docker/daemon.json\n\n"
        ));
    }

    script.push_str(&format!(
        "date +%s > {METRICS_EXCHANGE_PATH}/runner-installed.timestamp\n\n"
    ));

    script.push_str("su - ubuntu -c 'cd /home/ubuntu/actions-runner && ");
    script.push_str(context.shell_run_script.trim());
    script.push_str("'\n");
    script
}

fn choose_ssh_debug(connections: &[SshDebugConnection]) -> Option<&SshDebugConnection> {
    connections.choose(&mut rand::rng())
}

fn env_contents(
    service_config: &ServiceConfig,
    ssh_debug: Option<&SshDebugConnection>,
) -> String {
    let mut lines = vec![format!("ACTIONS_RUNNER_HOOK_JOB_STARTED={PRE_JOB_SCRIPT_PATH}")];
    if let Some(mirror) = &service_config.dockerhub_mirror {
        lines.push(format!("DOCKERHUB_MIRROR={mirror}"));
    }
    if let Some(proxy) = service_config
        .runner_proxy
        .as_ref()
        .and_then(|proxy| proxy.proxy_address())
    {
        lines.push(format!("http_proxy={proxy}"));
        lines.push(format!("https_proxy={proxy}"));
    }
    if let Some(debug) = ssh_debug {
        lines.push(format!("TMATE_SERVER_HOST={}", debug.host));
        lines.push(format!("TMATE_SERVER_PORT={}", debug.port));
        lines.push(format!("TMATE_SERVER_RSA_FINGERPRINT={}", debug.rsa_fingerprint));
        lines.push(format!(
            "TMATE_SERVER_ED25519_FINGERPRINT={}",
            debug.ed25519_fingerprint
        ));
    }
    let mut contents = lines.join("\n");
    contents.push('\n');
    contents
}

fn pre_job_contents(service_config: &ServiceConfig, repo_policy_token: Option<&str>) -> String {
    let mut script = String::from("#!/bin/bash\n");
    // The job-started hook records the pre-job metrics from the runner's
    // environment; the manager pulls this file before teardown.
    script.push_str(&format!(
        "cat > {METRICS_EXCHANGE_PATH}/pre-job-metrics.json <<EOF\n"
    ));
    script.push_str("{\n");
    script.push_str("  \"timestamp\": $(date +%s),\n");
    script.push_str("  \"workflow\": \"${GITHUB_WORKFLOW}\",\n");
    script.push_str("  \"workflow_run_id\": \"${GITHUB_RUN_ID}\",\n");
    script.push_str("  \"repository\": \"${GITHUB_REPOSITORY}\",\n");
    script.push_str("  \"event\": \"${GITHUB_EVENT_NAME}\"\n");
    script.push_str("}\n");
    script.push_str("EOF\n");
    match (repo_policy_token, &service_config.repo_policy_compliance) {
        (Some(token), Some(repo_policy)) => {
            script.push_str(&format!(
                "curl --fail -H 'Authorization: Bearer {token}' {}/check-run \\\n",
                repo_policy.url.trim_end_matches('/')
            ));
            script.push_str("  || { echo repo-policy-check-failure; exit 1; }\n");
        }
        _ => {
            script.push_str("# repo policy check disabled\n");
        }
    }
    script
}

fn aproxy_address(service_config: &ServiceConfig) -> Option<&str> {
    if !service_config.use_aproxy {
        return None;
    }
    service_config
        .runner_proxy
        .as_ref()
        .and_then(|proxy| proxy.proxy_address())
}

#[cfg(test)]
#[path = "cloud_init_tests.rs"]
mod tests;
