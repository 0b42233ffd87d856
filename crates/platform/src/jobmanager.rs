// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job-manager platform backend: a token-authenticated REST service that
//! owns jobs and hands out builder-agent registration tokens.

use crate::http::check;
use crate::provider::{
    JobInfo, JobStatus, PlatformError, PlatformProvider, PlatformRunner, RunnersHealthResponse,
};
use async_trait::async_trait;
use rfm_core::{
    InstanceId, PlatformRunnerHealth, RunnerContext, RunnerIdentity, RunnerMetadata,
    PLATFORM_JOBMANAGER,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
struct RunnerRegistration {
    id: i64,
    token: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RunnerHealthRecord {
    status: String,
    #[serde(default)]
    deletable: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct JobRecord {
    status: String,
}

const STATUS_PENDING: &str = "PENDING";
const STATUS_COMPLETED: &str = "COMPLETED";

/// Parse a job-manager job URL: the path must be `/v1/jobs/<numeric id>`.
pub(crate) fn parse_job_id(job_url: &str) -> Result<i64, PlatformError> {
    let path = job_url.splitn(4, '/').nth(3).unwrap_or_default();
    let Some(raw_id) = path.strip_prefix("v1/jobs/") else {
        return Err(PlatformError::Api(format!(
            "job URL path of '{job_url}' does not start with /v1/jobs/"
        )));
    };
    raw_id.parse().map_err(|_| {
        PlatformError::Api(format!(
            "job URL '{job_url}' does not contain a valid job id after /v1/jobs/"
        ))
    })
}

/// Manage runners against a job-manager service.
pub struct JobManagerPlatform {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl JobManagerPlatform {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// The endpoint to talk to: per-runner url from metadata wins over the
    /// configured base.
    fn endpoint(&self, metadata: &RunnerMetadata) -> String {
        metadata
            .url
            .as_deref()
            .unwrap_or(&self.base_url)
            .trim_end_matches('/')
            .to_string()
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http.request(method, url).bearer_auth(&self.token)
    }

    fn health_from_record(
        identity: &RunnerIdentity,
        record: &RunnerHealthRecord,
    ) -> PlatformRunnerHealth {
        let finished_and_deletable = record.status == STATUS_COMPLETED && record.deletable;
        PlatformRunnerHealth {
            identity: identity.clone(),
            online: record.status != STATUS_PENDING,
            busy: !finished_and_deletable,
            deletable: finished_and_deletable,
            runner_in_platform: true,
        }
    }

    fn health_missing(identity: &RunnerIdentity) -> PlatformRunnerHealth {
        PlatformRunnerHealth {
            identity: identity.clone(),
            online: false,
            busy: false,
            deletable: true,
            runner_in_platform: false,
        }
    }

    fn runner_id(identity: &RunnerIdentity) -> Result<&str, PlatformError> {
        identity.metadata.runner_id.as_deref().ok_or_else(|| {
            PlatformError::Api(format!("runner {} has no job-manager id", identity))
        })
    }
}

#[async_trait]
impl PlatformProvider for JobManagerPlatform {
    async fn get_runner_context(
        &self,
        metadata: &RunnerMetadata,
        instance_id: &InstanceId,
        labels: &[String],
    ) -> Result<(RunnerContext, PlatformRunner), PlatformError> {
        let endpoint = self.endpoint(metadata);
        let response = self
            .request(reqwest::Method::POST, &format!("{endpoint}/v1/runners/register"))
            .json(&json!({"name": instance_id.name(), "labels": labels}))
            .send()
            .await?;
        let response = check(response, "register runner").await?;
        let registration: RunnerRegistration = response
            .json()
            .await
            .map_err(|err| PlatformError::Api(format!("malformed registration: {err}")))?;
        if registration.token.is_empty() {
            return Err(PlatformError::Api(
                "Empty token in job-manager registration".to_string(),
            ));
        }

        let context = RunnerContext {
            shell_run_script: format!(
                "builder-agent --jobmanager-url {endpoint} --token {}",
                registration.token
            ),
            ingress_tcp_ports: Vec::new(),
        };
        let identity = RunnerIdentity::new(
            instance_id.clone(),
            RunnerMetadata {
                platform_name: PLATFORM_JOBMANAGER.to_string(),
                runner_id: Some(registration.id.to_string()),
                url: metadata.url.clone(),
            },
        );
        let runner = PlatformRunner {
            id: registration.id.to_string(),
            identity,
            online: false,
            busy: false,
            labels: labels.to_vec(),
        };
        Ok((context, runner))
    }

    async fn get_runner_health(
        &self,
        identity: &RunnerIdentity,
    ) -> Result<PlatformRunnerHealth, PlatformError> {
        let runner_id = Self::runner_id(identity)?;
        let endpoint = self.endpoint(&identity.metadata);
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("{endpoint}/v1/runners/{runner_id}/health"),
            )
            .send()
            .await?;
        match check(response, "runner health").await {
            Ok(response) => {
                let record: RunnerHealthRecord = response
                    .json()
                    .await
                    .map_err(|err| PlatformError::Api(format!("malformed health: {err}")))?;
                Ok(Self::health_from_record(identity, &record))
            }
            Err(PlatformError::NotFound(_)) => Ok(Self::health_missing(identity)),
            Err(err) => Err(err),
        }
    }

    async fn get_runners_health(
        &self,
        requested: &[RunnerIdentity],
    ) -> Result<RunnersHealthResponse, PlatformError> {
        // The job-manager exposes no fleet listing; stray detection is not
        // possible here and non_requested stays empty.
        let mut response = RunnersHealthResponse::default();
        for identity in requested {
            match self.get_runner_health(identity).await {
                Ok(health) => response.requested_runners.push(health),
                Err(err) => {
                    warn!(runner = %identity, error = %err, "job-manager health failed");
                    response.failed_requested_runners.push(identity.clone());
                }
            }
        }
        Ok(response)
    }

    async fn delete_runner(&self, identity: &RunnerIdentity) -> Result<(), PlatformError> {
        let runner_id = Self::runner_id(identity)?;
        let endpoint = self.endpoint(&identity.metadata);
        let response = self
            .request(
                reqwest::Method::DELETE,
                &format!("{endpoint}/v1/runners/{runner_id}"),
            )
            .send()
            .await?;
        match check(response, "delete runner").await {
            Ok(_) | Err(PlatformError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn check_job_been_picked_up(
        &self,
        metadata: &RunnerMetadata,
        job_url: &str,
    ) -> Result<bool, PlatformError> {
        let job_id = parse_job_id(job_url)?;
        let endpoint = self.endpoint(metadata);
        let response = self
            .request(reqwest::Method::GET, &format!("{endpoint}/v1/jobs/{job_id}"))
            .send()
            .await?;
        let response = check(response, "get job").await?;
        let record: JobRecord = response
            .json()
            .await
            .map_err(|err| PlatformError::Api(format!("malformed job: {err}")))?;
        Ok(record.status != STATUS_PENDING)
    }

    async fn get_job_info(
        &self,
        metadata: &RunnerMetadata,
        _repository: &str,
        workflow_run_id: &str,
        _instance_id: &InstanceId,
    ) -> Result<JobInfo, PlatformError> {
        let endpoint = self.endpoint(metadata);
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("{endpoint}/v1/jobs/{workflow_run_id}"),
            )
            .send()
            .await?;
        let response = check(response, "get job").await?;
        let record: JobRecord = response
            .json()
            .await
            .map_err(|err| PlatformError::Api(format!("malformed job: {err}")))?;
        let status = match record.status.as_str() {
            STATUS_PENDING => JobStatus::Queued,
            STATUS_COMPLETED => JobStatus::Completed,
            _ => JobStatus::InProgress,
        };
        Ok(JobInfo {
            status,
            created_at: None,
            started_at: None,
            conclusion: None,
        })
    }
}

#[cfg(test)]
#[path = "jobmanager_tests.rs"]
mod tests;
