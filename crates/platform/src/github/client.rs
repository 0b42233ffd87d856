// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hand-rolled GitHub REST client covering the self-hosted runner surface:
//! runner listing, JIT registration, deletion and workflow job lookup.

use crate::http::check;
use crate::provider::PlatformError;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Public GitHub API endpoint.
const GITHUB_API_BASE: &str = "https://api.github.com";

/// GitHub requires a User-Agent on every request.
const USER_AGENT: &str = "runner-fleet-manager";

const PER_PAGE: u32 = 100;

/// Where runners are registered: an organization (with a runner group) or
/// a single repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GithubPath {
    Org { org: String, group: Option<String> },
    Repo { owner: String, repo: String },
}

impl GithubPath {
    /// Parse `owner/repo` or a bare organization name.
    pub fn parse(path: &str, group: Option<String>) -> Result<Self, PlatformError> {
        let parts: Vec<&str> = path.split('/').collect();
        match parts.as_slice() {
            [org] if !org.is_empty() => Ok(GithubPath::Org {
                org: org.to_string(),
                group,
            }),
            [owner, repo] if !owner.is_empty() && !repo.is_empty() => Ok(GithubPath::Repo {
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
            _ => Err(PlatformError::Api(format!(
                "'{path}' is neither an org nor an owner/repo path"
            ))),
        }
    }

    fn runners_base(&self) -> String {
        match self {
            GithubPath::Org { org, .. } => format!("/orgs/{org}/actions/runners"),
            GithubPath::Repo { owner, repo } => {
                format!("/repos/{owner}/{repo}/actions/runners")
            }
        }
    }
}

/// A self-hosted runner as GitHub reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiRunner {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub busy: bool,
    #[serde(default)]
    pub labels: Vec<ApiLabel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiLabel {
    pub name: String,
}

impl ApiRunner {
    pub fn online(&self) -> bool {
        self.status == "online"
    }

    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|label| label.name.clone()).collect()
    }
}

/// Result of JIT registration: the runner record plus the encoded config
/// the runner binary consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct JitConfig {
    pub runner: ApiRunner,
    pub encoded_jit_config: String,
}

/// A workflow job as GitHub reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiJob {
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// Parse a workflow job URL path into (owner, repo, job id).
///
/// The only accepted shape is
/// `https://<host>/repos/<owner>/<repo>/actions/jobs/<id>`.
pub fn parse_job_url(job_url: &str) -> Result<(String, String, i64), PlatformError> {
    let path = job_url
        .splitn(4, '/')
        .nth(3)
        .ok_or_else(|| PlatformError::Api(format!("job url '{job_url}' has no path")))?;
    let segments: Vec<&str> = path.split('/').collect();
    match segments.as_slice() {
        ["repos", owner, repo, "actions", "jobs", id] if !owner.is_empty() && !repo.is_empty() => {
            let job_id: i64 = id.parse().map_err(|_| {
                PlatformError::Api(format!("job url '{job_url}' has a non-numeric job id"))
            })?;
            Ok((owner.to_string(), repo.to_string(), job_id))
        }
        _ => Err(PlatformError::Api(format!(
            "job url '{job_url}' does not match /repos/<owner>/<repo>/actions/jobs/<id>"
        ))),
    }
}

/// Extract the `rel="next"` target from a Link header.
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, rel) = part.split_once(';')?;
        if !rel.trim().eq_ignore_ascii_case("rel=\"next\"") {
            return None;
        }
        Some(
            target
                .trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string(),
        )
    })
}

/// GitHub API client scoped to one token.
pub struct GithubClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

impl GithubClient {
    pub fn new(http: reqwest::Client, token: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
            base_url: GITHUB_API_BASE.to_string(),
        }
    }

    /// Point the client at a different API base (tests, GHES).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
    }

    /// List all self-hosted runners under the path whose names carry the
    /// prefix. Follows Link-header pagination.
    pub async fn list_runners(
        &self,
        path: &GithubPath,
        prefix: &str,
    ) -> Result<Vec<ApiRunner>, PlatformError> {
        let mut url = format!(
            "{}{}?per_page={PER_PAGE}",
            self.base_url,
            path.runners_base()
        );
        let mut runners = Vec::new();
        loop {
            let response = self.request(reqwest::Method::GET, &url).send().await?;
            let response = check(response, "list runners").await?;
            let next = response
                .headers()
                .get(reqwest::header::LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_next_link);

            #[derive(Deserialize)]
            struct Page {
                runners: Vec<ApiRunner>,
            }
            let page: Page = response
                .json()
                .await
                .map_err(|err| PlatformError::Api(format!("malformed runner list: {err}")))?;
            runners.extend(
                page.runners
                    .into_iter()
                    .filter(|runner| rfm_core::InstanceId::name_has_prefix(prefix, &runner.name)),
            );

            match next {
                Some(next_url) => url = next_url,
                None => break,
            }
        }
        debug!(count = runners.len(), "listed github runners");
        Ok(runners)
    }

    /// Fetch one runner by id. `NotFound` means GitHub no longer knows it.
    pub async fn get_runner(
        &self,
        path: &GithubPath,
        runner_id: i64,
    ) -> Result<ApiRunner, PlatformError> {
        let url = format!("{}{}/{runner_id}", self.base_url, path.runners_base());
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let response = check(response, "get runner").await?;
        response
            .json()
            .await
            .map_err(|err| PlatformError::Api(format!("malformed runner record: {err}")))
    }

    /// Register a runner via JIT config.
    pub async fn generate_jitconfig(
        &self,
        path: &GithubPath,
        name: &str,
        labels: &[String],
    ) -> Result<JitConfig, PlatformError> {
        let group_id = match path {
            GithubPath::Org { org, group } => match group {
                Some(group) => self.find_runner_group_id(org, group).await?,
                None => 1,
            },
            GithubPath::Repo { .. } => 1,
        };
        let url = format!(
            "{}{}/generate-jitconfig",
            self.base_url,
            path.runners_base()
        );
        let body = json!({
            "name": name,
            "labels": labels,
            "runner_group_id": group_id,
        });
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await?;
        let response = check(response, "generate jitconfig").await?;
        response
            .json()
            .await
            .map_err(|err| PlatformError::Api(format!("malformed jitconfig response: {err}")))
    }

    /// Delete a runner. A 404 counts as success: the runner is gone.
    pub async fn delete_runner(
        &self,
        path: &GithubPath,
        runner_id: i64,
    ) -> Result<(), PlatformError> {
        let url = format!("{}{}/{runner_id}", self.base_url, path.runners_base());
        let response = self.request(reqwest::Method::DELETE, &url).send().await?;
        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }
        if status.as_u16() == 422 {
            return Err(PlatformError::Deletion(format!(
                "runner {runner_id} is still busy"
            )));
        }
        Err(crate::http::map_status(status.as_u16(), "delete runner"))
    }

    /// Fetch one workflow job.
    pub async fn get_job(
        &self,
        owner: &str,
        repo: &str,
        job_id: i64,
    ) -> Result<ApiJob, PlatformError> {
        let url = format!(
            "{}/repos/{owner}/{repo}/actions/jobs/{job_id}",
            self.base_url
        );
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let response = check(response, "get job").await?;
        response
            .json()
            .await
            .map_err(|err| PlatformError::Api(format!("malformed job record: {err}")))
    }

    async fn find_runner_group_id(&self, org: &str, group: &str) -> Result<i64, PlatformError> {
        let url = format!(
            "{}/orgs/{org}/actions/runner-groups?per_page={PER_PAGE}",
            self.base_url
        );
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let response = check(response, "list runner groups").await?;

        #[derive(Deserialize)]
        struct Page {
            runner_groups: Vec<Group>,
        }
        #[derive(Deserialize)]
        struct Group {
            id: i64,
            name: String,
        }
        let page: Page = response
            .json()
            .await
            .map_err(|err| PlatformError::Api(format!("malformed runner group list: {err}")))?;
        page.runner_groups
            .into_iter()
            .find(|candidate| candidate.name == group)
            .map(|candidate| candidate.id)
            .ok_or_else(|| PlatformError::NotFound(format!("runner group {group}")))
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
