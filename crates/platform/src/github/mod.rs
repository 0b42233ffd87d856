// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! GitHub platform backend.

mod client;

pub use client::{parse_job_url, ApiRunner, GithubClient, GithubPath, JitConfig};

use crate::provider::{
    JobInfo, JobStatus, PlatformError, PlatformProvider, PlatformRunner, RunnersHealthResponse,
};
use async_trait::async_trait;
use rfm_core::{
    InstanceId, PlatformRunnerHealth, RunnerContext, RunnerIdentity, RunnerMetadata,
};
use std::collections::HashMap;
use tracing::warn;

/// Manage self-hosted runners on the GitHub side.
pub struct GithubPlatform {
    prefix: String,
    path: GithubPath,
    client: GithubClient,
}

impl GithubPlatform {
    pub fn new(prefix: impl Into<String>, path: GithubPath, client: GithubClient) -> Self {
        Self {
            prefix: prefix.into(),
            path,
            client,
        }
    }

    /// Health for a runner GitHub knows about.
    fn health_of(identity: &RunnerIdentity, runner: &ApiRunner) -> PlatformRunnerHealth {
        PlatformRunnerHealth {
            identity: identity.clone(),
            online: runner.online(),
            busy: runner.busy,
            deletable: false,
            runner_in_platform: true,
        }
    }

    /// Health for a runner GitHub has never seen or already dropped: safe
    /// to destroy.
    fn health_missing(identity: &RunnerIdentity) -> PlatformRunnerHealth {
        PlatformRunnerHealth {
            identity: identity.clone(),
            online: false,
            busy: false,
            deletable: true,
            runner_in_platform: false,
        }
    }

    fn parse_runner_id(identity: &RunnerIdentity) -> Option<i64> {
        identity.metadata.runner_id.as_deref()?.parse().ok()
    }
}

#[async_trait]
impl PlatformProvider for GithubPlatform {
    async fn get_runner_context(
        &self,
        metadata: &RunnerMetadata,
        instance_id: &InstanceId,
        labels: &[String],
    ) -> Result<(RunnerContext, PlatformRunner), PlatformError> {
        let jit = self
            .client
            .generate_jitconfig(&self.path, &instance_id.name(), labels)
            .await?;

        let context = RunnerContext {
            shell_run_script: format!("./run.sh --jitconfig {}", jit.encoded_jit_config),
            ingress_tcp_ports: Vec::new(),
        };
        let identity = RunnerIdentity::new(
            instance_id.clone(),
            RunnerMetadata {
                platform_name: metadata.platform_name.clone(),
                runner_id: Some(jit.runner.id.to_string()),
                url: metadata.url.clone(),
            },
        );
        let runner = PlatformRunner {
            id: jit.runner.id.to_string(),
            online: jit.runner.online(),
            busy: jit.runner.busy,
            labels: jit.runner.label_names(),
            identity,
        };
        Ok((context, runner))
    }

    async fn get_runner_health(
        &self,
        identity: &RunnerIdentity,
    ) -> Result<PlatformRunnerHealth, PlatformError> {
        if let Some(runner_id) = Self::parse_runner_id(identity) {
            return match self.client.get_runner(&self.path, runner_id).await {
                Ok(runner) => Ok(Self::health_of(identity, &runner)),
                Err(PlatformError::NotFound(_)) => Ok(Self::health_missing(identity)),
                Err(err) => Err(err),
            };
        }
        // No runner id recorded: fall back to a name lookup.
        let runners = self.client.list_runners(&self.path, &self.prefix).await?;
        let name = identity.instance_id.name();
        Ok(match runners.iter().find(|runner| runner.name == name) {
            Some(runner) => Self::health_of(identity, runner),
            None => Self::health_missing(identity),
        })
    }

    async fn get_runners_health(
        &self,
        requested: &[RunnerIdentity],
    ) -> Result<RunnersHealthResponse, PlatformError> {
        let runners = match self.client.list_runners(&self.path, &self.prefix).await {
            Ok(runners) => runners,
            Err(err) => {
                // Temporary platform failure: every requested runner goes
                // into the retry-later partition.
                warn!(error = %err, "github runner list failed");
                return Ok(RunnersHealthResponse {
                    failed_requested_runners: requested.to_vec(),
                    ..Default::default()
                });
            }
        };
        let by_name: HashMap<&str, &ApiRunner> = runners
            .iter()
            .map(|runner| (runner.name.as_str(), runner))
            .collect();

        let mut response = RunnersHealthResponse::default();
        for identity in requested {
            let name = identity.instance_id.name();
            match by_name.get(name.as_str()) {
                Some(runner) => response
                    .requested_runners
                    .push(Self::health_of(identity, runner)),
                None => response
                    .requested_runners
                    .push(Self::health_missing(identity)),
            }
        }

        let requested_names: Vec<String> = requested
            .iter()
            .map(|identity| identity.instance_id.name())
            .collect();
        for runner in &runners {
            if requested_names.iter().any(|name| name == &runner.name) {
                continue;
            }
            let Ok(instance_id) = InstanceId::parse(&self.prefix, &runner.name) else {
                continue;
            };
            response.non_requested_runners.push(RunnerIdentity::new(
                instance_id,
                RunnerMetadata::github().with_runner_id(runner.id.to_string()),
            ));
        }
        Ok(response)
    }

    async fn delete_runner(&self, identity: &RunnerIdentity) -> Result<(), PlatformError> {
        let Some(runner_id) = Self::parse_runner_id(identity) else {
            // Nothing registered under this identity; deletion is a no-op.
            return Ok(());
        };
        self.client.delete_runner(&self.path, runner_id).await
    }

    async fn check_job_been_picked_up(
        &self,
        _metadata: &RunnerMetadata,
        job_url: &str,
    ) -> Result<bool, PlatformError> {
        let (owner, repo, job_id) = parse_job_url(job_url)?;
        let job = self.client.get_job(&owner, &repo, job_id).await?;
        Ok(job_status(&job.status).picked_up())
    }

    async fn get_job_info(
        &self,
        _metadata: &RunnerMetadata,
        repository: &str,
        workflow_run_id: &str,
        _instance_id: &InstanceId,
    ) -> Result<JobInfo, PlatformError> {
        let mut parts = repository.splitn(2, '/');
        let (Some(owner), Some(repo)) = (parts.next(), parts.next()) else {
            return Err(PlatformError::Api(format!(
                "repository '{repository}' is not owner/repo"
            )));
        };
        let job_id: i64 = workflow_run_id.parse().map_err(|_| {
            PlatformError::Api(format!("workflow run id '{workflow_run_id}' is not numeric"))
        })?;
        let job = self.client.get_job(owner, repo, job_id).await?;
        Ok(JobInfo {
            status: job_status(&job.status),
            created_at: Some(job.created_at),
            started_at: job.started_at,
            conclusion: job.conclusion,
        })
    }
}

fn job_status(raw: &str) -> JobStatus {
    match raw {
        "in_progress" => JobStatus::InProgress,
        "completed" => JobStatus::Completed,
        "waiting" => JobStatus::Waiting,
        _ => JobStatus::Queued,
    }
}

#[cfg(test)]
#[path = "github_tests.rs"]
mod tests;
