// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Assembly of the manager, scaler and reconciler from configuration.
//!
//! Construction order breaks the manager/reconciler/platform cycle: the
//! manager is built first, then handed by reference to the reconcilers;
//! nothing reaches back into the scaler façade.

use anyhow::{bail, Context};
use rfm_cloud::{
    CloudSettings, KeystoneAuth, OpenStackApi, OpenStackCloud, OpenStackVmProvider,
};
use rfm_core::{AppConfig, SystemClock, VmConfig, PLATFORM_GITHUB, PLATFORM_JOBMANAGER};
use rfm_manager::{
    PlannerClient, PressureReconciler, PressureReconcilerConfig, RunnerManager, RunnerScaler,
};
use rfm_platform::{
    GithubClient, GithubPath, GithubPlatform, JobManagerPlatform, MultiplexerPlatform,
    PlatformProvider,
};
use rfm_reactive::{ProcessManager, ReactiveRunners, SqliteQueue};
use rfm_storage::{EventLog, MetricsStorage};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Reconcile interval when no planner drives the schedule.
const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Labels every GitHub runner carries regardless of configuration; jobs
/// can target them so the consumer must accept them.
const SELF_HOSTED_ARCH_LABELS: [&str; 3] = ["self-hosted", "x64", "arm64"];

/// Filesystem layout for daemon-owned state.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub data_dir: PathBuf,
    pub metrics_log: PathBuf,
}

impl DataPaths {
    fn storage_dir(&self) -> PathBuf {
        self.data_dir.join("runner-fs")
    }

    fn quarantine_dir(&self) -> PathBuf {
        self.data_dir.join("runner-fs-quarantine")
    }

    fn reactive_log_dir(&self) -> PathBuf {
        self.data_dir.join("reactive-logs")
    }
}

type Manager = RunnerManager<OpenStackVmProvider, MultiplexerPlatform, SystemClock>;
type Scaler = RunnerScaler<OpenStackVmProvider, MultiplexerPlatform, SystemClock, ReactiveRunners>;

/// Everything the run loop needs.
pub struct App {
    pub manager: Arc<Manager>,
    pub scaler: Scaler,
    pub planner: Option<(PlannerClient, PressureReconcilerConfig)>,
}

/// All labels this manager's runners serve.
fn runner_labels(config: &AppConfig) -> Vec<String> {
    let mut labels = config.extra_labels.clone();
    if let Some(combination) = config.combination() {
        labels.extend(combination.image.labels.iter().cloned());
        labels.extend(combination.flavor.labels.iter().cloned());
    }
    labels
}

fn http_client(config: &AppConfig) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
    if let Some(proxy) = &config.service_config.proxy {
        let exclusions = proxy
            .no_proxy
            .as_deref()
            .and_then(reqwest::NoProxy::from_string);
        if let Some(http) = &proxy.http {
            builder = builder.proxy(reqwest::Proxy::http(http)?.no_proxy(exclusions.clone()));
        }
        if let Some(https) = &proxy.https {
            builder = builder.proxy(reqwest::Proxy::https(https)?.no_proxy(exclusions));
        }
    }
    Ok(builder.build()?)
}

fn build_platform(
    config: &AppConfig,
    http: &reqwest::Client,
) -> anyhow::Result<MultiplexerPlatform> {
    let mut providers: HashMap<String, Arc<dyn PlatformProvider>> = HashMap::new();
    let prefix = &config.openstack_configuration.vm_prefix;

    if let Some(github) = &config.github_config {
        let path = GithubPath::parse(&github.path, github.runner_group.clone())
            .map_err(|err| anyhow::anyhow!("github path: {err}"))?;
        let client = GithubClient::new(http.clone(), github.token.clone());
        providers.insert(
            PLATFORM_GITHUB.to_string(),
            Arc::new(GithubPlatform::new(prefix.clone(), path, client)),
        );
    }
    if let Some(jobmanager) = &config.jobmanager_config {
        providers.insert(
            PLATFORM_JOBMANAGER.to_string(),
            Arc::new(JobManagerPlatform::new(
                http.clone(),
                jobmanager.url.clone(),
                jobmanager.token.clone(),
            )),
        );
    }
    MultiplexerPlatform::new(providers).map_err(|err| anyhow::anyhow!("platform: {err}"))
}

fn build_cloud(config: &AppConfig, http: &reqwest::Client) -> OpenStackVmProvider {
    let openstack = &config.openstack_configuration;
    let auth = KeystoneAuth::new(http.clone(), openstack.credentials.clone());
    let api = OpenStackApi::new(http.clone(), auth);
    let cloud = OpenStackCloud::new(
        api,
        CloudSettings {
            prefix: openstack.vm_prefix.clone(),
            network: openstack.network.clone(),
            key_dir: openstack.key_dir.clone(),
            system_user: openstack.system_user.clone(),
            proxy_command: config.service_config.manager_proxy_command.clone(),
        },
    );

    let server_config = config.combination().map(|combination| VmConfig {
        image: combination.image.name.clone(),
        flavor: combination.flavor.name.clone(),
    });
    let repo_policy = config
        .service_config
        .repo_policy_compliance
        .clone()
        .map(|repo_policy| rfm_cloud::RepoPolicyClient::new(http.clone(), repo_policy));

    OpenStackVmProvider::new(cloud, server_config, config.service_config.clone(), repo_policy)
}

/// Build the manager and its collaborators from a validated configuration.
pub async fn build(
    config: AppConfig,
    paths: &DataPaths,
    config_path: &Path,
) -> anyhow::Result<App> {
    let http = http_client(&config)?;

    let platform = Arc::new(build_platform(&config, &http)?);
    let cloud = Arc::new(build_cloud(&config, &http));
    let storage = MetricsStorage::new(
        paths.storage_dir(),
        paths.quarantine_dir(),
        &config.openstack_configuration.vm_prefix,
    );
    let event_log = EventLog::new(&paths.metrics_log);

    let manager = Arc::new(RunnerManager::new(
        config.name.clone(),
        runner_labels(&config),
        cloud,
        Arc::clone(&platform),
        storage,
        event_log,
        SystemClock,
    ));

    let base_quantity = config
        .combination()
        .map(|combination| combination.base_virtual_machines as usize)
        .unwrap_or(0);

    let (reactive, max_quantity) = match &config.reactive_configuration {
        Some(reactive_config) => {
            let queue = SqliteQueue::connect(
                &reactive_config.queue.uri,
                &reactive_config.queue.queue_name,
            )
            .await
            .context("opening reactive queue")?;
            let program = std::env::current_exe().context("locating rfmd binary")?;
            let processes =
                ProcessManager::new(program, config_path, paths.reactive_log_dir());
            (
                Some(ReactiveRunners::new(Arc::new(queue), processes)),
                reactive_config.max_total_virtual_machines as usize,
            )
        }
        None => (None, 0),
    };

    let scaler = RunnerScaler::new(
        Arc::clone(&manager),
        reactive,
        base_quantity,
        max_quantity,
        SystemClock,
    );

    let planner = config.planner_configuration.clone().map(|planner| {
        (
            PlannerClient::new(http.clone(), planner.url.clone(), planner.token.clone()),
            PressureReconcilerConfig {
                flavor_name: config.name.clone(),
                reconcile_interval: Duration::from_secs(planner.reconcile_interval * 60),
                fallback_runners: planner.fallback_runners,
            },
        )
    });

    Ok(App {
        manager,
        scaler,
        planner,
    })
}

/// Run the reconciliation loops until the token is cancelled.
pub async fn run(app: App, cancel: CancellationToken) -> anyhow::Result<()> {
    let lock = Arc::new(tokio::sync::Mutex::new(()));
    let mut tasks = Vec::new();

    if let Some((planner, reconciler_config)) = app.planner {
        let reconciler = Arc::new(
            PressureReconciler::build(
                Arc::clone(&app.manager),
                planner,
                reconciler_config,
                Arc::clone(&lock),
                cancel.clone(),
            )
            .await,
        );
        info!("starting pressure reconciler loops");
        let create_side = Arc::clone(&reconciler);
        tasks.push(tokio::spawn(async move {
            create_side.run_create_loop().await;
        }));
        tasks.push(tokio::spawn(async move {
            reconciler.run_delete_loop().await;
        }));
    } else {
        info!("starting periodic reconcile loop");
        let scaler = app.scaler;
        let lock = Arc::clone(&lock);
        let loop_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                {
                    let _guard = lock.lock().await;
                    if let Err(err) = scaler.reconcile().await {
                        tracing::error!(error = %err, "reconcile failed");
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(DEFAULT_RECONCILE_INTERVAL) => {}
                    _ = loop_cancel.cancelled() => break,
                }
            }
        }));
    }

    cancel.cancelled().await;
    info!("shutdown requested, waiting for loops");
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

/// Run one consumer to completion: the `rfmd consume` entry point.
pub async fn consume(config: AppConfig, paths: &DataPaths) -> anyhow::Result<()> {
    let Some(reactive_config) = config.reactive_configuration.clone() else {
        bail!("consume requires reactive_configuration");
    };
    let http = http_client(&config)?;
    let platform = Arc::new(build_platform(&config, &http)?);
    let cloud = Arc::new(build_cloud(&config, &http));
    let manager = RunnerManager::new(
        config.name.clone(),
        runner_labels(&config),
        cloud,
        Arc::clone(&platform),
        MetricsStorage::new(
            paths.storage_dir(),
            paths.quarantine_dir(),
            &config.openstack_configuration.vm_prefix,
        ),
        EventLog::new(&paths.metrics_log),
        SystemClock,
    );
    let queue = SqliteQueue::connect(
        &reactive_config.queue.uri,
        &reactive_config.queue.queue_name,
    )
    .await
    .context("opening reactive queue")?;

    let mut supported_labels: HashSet<String> = runner_labels(&config).into_iter().collect();
    supported_labels.extend(SELF_HOSTED_ARCH_LABELS.iter().map(|label| label.to_string()));

    rfm_reactive::consume(&queue, &manager, platform.as_ref(), &supported_labels)
        .await
        .context("consuming reactive jobs")
}
