// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multiplexing platform provider: federates several backends behind one
//! interface, routing by the platform name carried in runner metadata.

use crate::provider::{
    JobInfo, PlatformError, PlatformProvider, PlatformRunner, RunnersHealthResponse,
};
use async_trait::async_trait;
use rfm_core::{
    InstanceId, PlatformRunnerHealth, RunnerContext, RunnerIdentity, RunnerMetadata,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Routes platform calls to the backend named in the request metadata.
pub struct MultiplexerPlatform {
    providers: HashMap<String, Arc<dyn PlatformProvider>>,
}

impl MultiplexerPlatform {
    /// Build from the configured backends. At least one is required.
    pub fn new(
        providers: HashMap<String, Arc<dyn PlatformProvider>>,
    ) -> Result<Self, PlatformError> {
        if providers.is_empty() {
            return Err(PlatformError::Api(
                "at least one platform backend must be configured".to_string(),
            ));
        }
        Ok(Self { providers })
    }

    fn provider(
        &self,
        metadata: &RunnerMetadata,
    ) -> Result<&Arc<dyn PlatformProvider>, PlatformError> {
        self.providers.get(&metadata.platform_name).ok_or_else(|| {
            PlatformError::Api(format!("unknown platform '{}'", metadata.platform_name))
        })
    }
}

#[async_trait]
impl PlatformProvider for MultiplexerPlatform {
    async fn get_runner_context(
        &self,
        metadata: &RunnerMetadata,
        instance_id: &InstanceId,
        labels: &[String],
    ) -> Result<(RunnerContext, PlatformRunner), PlatformError> {
        self.provider(metadata)?
            .get_runner_context(metadata, instance_id, labels)
            .await
    }

    async fn get_runner_health(
        &self,
        identity: &RunnerIdentity,
    ) -> Result<PlatformRunnerHealth, PlatformError> {
        self.provider(&identity.metadata)?
            .get_runner_health(identity)
            .await
    }

    async fn get_runners_health(
        &self,
        requested: &[RunnerIdentity],
    ) -> Result<RunnersHealthResponse, PlatformError> {
        let mut by_platform: HashMap<&str, Vec<RunnerIdentity>> = HashMap::new();
        let mut response = RunnersHealthResponse::default();
        for identity in requested {
            if self.providers.contains_key(&identity.metadata.platform_name) {
                by_platform
                    .entry(identity.metadata.platform_name.as_str())
                    .or_default()
                    .push(identity.clone());
            } else {
                warn!(runner = %identity, "runner references an unconfigured platform");
                response.failed_requested_runners.push(identity.clone());
            }
        }

        // Call every backend, with an empty request where needed: a backend
        // with nothing asked of it can still report strays.
        for (platform_name, provider) in &self.providers {
            let platform_requested = by_platform
                .remove(platform_name.as_str())
                .unwrap_or_default();
            match provider.get_runners_health(&platform_requested).await {
                Ok(platform_response) => response.append(platform_response),
                Err(err) => {
                    warn!(platform = %platform_name, error = %err, "bulk health failed");
                    response.failed_requested_runners.extend(platform_requested);
                }
            }
        }
        Ok(response)
    }

    async fn delete_runner(&self, identity: &RunnerIdentity) -> Result<(), PlatformError> {
        self.provider(&identity.metadata)?.delete_runner(identity).await
    }

    async fn check_job_been_picked_up(
        &self,
        metadata: &RunnerMetadata,
        job_url: &str,
    ) -> Result<bool, PlatformError> {
        self.provider(metadata)?
            .check_job_been_picked_up(metadata, job_url)
            .await
    }

    async fn get_job_info(
        &self,
        metadata: &RunnerMetadata,
        repository: &str,
        workflow_run_id: &str,
        instance_id: &InstanceId,
    ) -> Result<JobInfo, PlatformError> {
        self.provider(metadata)?
            .get_job_info(metadata, repository, workflow_run_id, instance_id)
            .await
    }
}

#[cfg(test)]
#[path = "multiplexer_tests.rs"]
mod tests;
