// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scaler façade: performs one reconciliation over the runner manager,
//! non-reactive (fixed base quantity) or reactive (consumer processes fed
//! by a queue), and emits the reconciliation metric event.

use crate::runner_manager::RunnerManager;
use async_trait::async_trait;
use rfm_cloud::{CloudError, VmProvider};
use rfm_core::{
    merge_stats, Clock, EventKind, EventStats, FlushMode, HealthState, MetricEvent,
    PlatformRunnerState, RunnerInstance, RunnerMetadata,
};
use rfm_platform::PlatformProvider;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Error from a reconcile pass.
#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("failed to reconcile runners: {0}")]
    Reconcile(String),
}

/// Error surfaced by the reactive fleet implementation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ReactiveFleetError(pub String);

/// The reactive side of the scaler: a durable queue plus a pool of
/// consumer processes. Implemented by the reactive crate and injected
/// here, so reconcilers never reach back into the reactive machinery.
#[async_trait]
pub trait ReactiveFleet: Send + Sync {
    /// Number of messages waiting in the queue.
    async fn queue_size(&self) -> Result<u64, ReactiveFleetError>;

    /// Reconcile the number of consumer processes to `target`. Returns the
    /// change in process count.
    async fn reconcile_processes(&self, target: usize) -> Result<i64, ReactiveFleetError>;

    /// Terminate every consumer process.
    async fn kill_all(&self) -> Result<(), ReactiveFleetError>;
}

/// Counts of runners by platform state, for operator introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerInfo {
    pub online: u64,
    pub busy: u64,
    pub offline: u64,
    pub unknown: u64,
    pub runners: Vec<String>,
    pub busy_runners: Vec<String>,
}

/// Drives reconciliation for one runner manager.
pub struct RunnerScaler<C, P, K, R> {
    manager: Arc<RunnerManager<C, P, K>>,
    reactive: Option<R>,
    base_quantity: usize,
    max_quantity: usize,
    clock: K,
}

impl<C, P, K, R> RunnerScaler<C, P, K, R>
where
    C: VmProvider,
    P: PlatformProvider,
    K: Clock,
    R: ReactiveFleet,
{
    pub fn new(
        manager: Arc<RunnerManager<C, P, K>>,
        reactive: Option<R>,
        base_quantity: usize,
        max_quantity: usize,
        clock: K,
    ) -> Self {
        Self {
            manager,
            reactive,
            base_quantity,
            max_quantity,
            clock,
        }
    }

    /// Summarize the fleet by platform state.
    pub async fn get_runner_info(&self) -> Result<RunnerInfo, ScalerError> {
        let runners = self
            .manager
            .get_runners()
            .await
            .map_err(|err| ScalerError::Reconcile(err.to_string()))?;
        let mut info = RunnerInfo {
            online: 0,
            busy: 0,
            offline: 0,
            unknown: 0,
            runners: Vec::new(),
            busy_runners: Vec::new(),
        };
        for runner in &runners {
            match runner.platform_state {
                Some(PlatformRunnerState::Busy) => {
                    info.online += 1;
                    info.busy += 1;
                    info.runners.push(runner.name.clone());
                    info.busy_runners.push(runner.name.clone());
                }
                Some(PlatformRunnerState::Idle) => {
                    info.online += 1;
                    info.runners.push(runner.name.clone());
                }
                Some(PlatformRunnerState::Offline) => info.offline += 1,
                None => info.unknown += 1,
            }
        }
        Ok(info)
    }

    /// Flush runners (and, in reactive mode, the consumer processes).
    /// Returns the number of runners stopped.
    pub async fn flush(&self, mode: FlushMode) -> Result<u64, ScalerError> {
        if let Some(reactive) = &self.reactive {
            if let Err(err) = reactive.kill_all().await {
                warn!(error = %err, "failed to kill reactive consumers");
            }
        }
        let cleanup_stats = self
            .manager
            .cleanup_runners()
            .await
            .map_err(|err| ScalerError::Reconcile(err.to_string()))?;
        let flush_stats = self
            .manager
            .flush_runners(mode)
            .await
            .map_err(|err| ScalerError::Reconcile(err.to_string()))?;
        let stats = merge_stats(cleanup_stats, flush_stats);
        Ok(stats.get(&EventKind::RunnerStop).copied().unwrap_or(0))
    }

    /// Run one reconciliation. Returns the change in runner count
    /// (non-reactive) or consumer process count (reactive).
    pub async fn reconcile(&self) -> Result<i64, ScalerError> {
        info!(
            base_quantity = self.base_quantity,
            max_quantity = self.max_quantity,
            "start reconcile"
        );
        let start = self.clock.now();
        let start_timestamp = self.clock.epoch_secs();

        let outcome = match &self.reactive {
            Some(reactive) => self.reconcile_reactive(reactive).await,
            None => self.reconcile_non_reactive().await,
        };

        // The reconciliation event is emitted whether or not the pass
        // failed, mirroring the runner states at the end of the pass.
        let (stats, expected) = match &outcome {
            Ok((_, stats)) => (
                stats.clone(),
                self.reactive.is_none().then_some(self.base_quantity as u64),
            ),
            Err(_) => (EventStats::new(), None),
        };
        let runner_list = self.manager.get_runners().await.unwrap_or_default();
        log_runners(&runner_list);
        let duration = self.clock.now().duration_since(start);
        self.emit_reconciliation(start_timestamp, duration.as_secs_f64(), &runner_list, stats, expected);

        match outcome {
            Ok((diff, _)) => {
                info!("finished reconciliation");
                Ok(diff)
            }
            Err(err) => {
                error!(error = %err, "failed to reconcile runners");
                Err(ScalerError::Reconcile(err.to_string()))
            }
        }
    }

    /// Non-reactive: cleanup, then move the fleet to the base quantity.
    async fn reconcile_non_reactive(&self) -> Result<(i64, EventStats), CloudError> {
        let mut stats = self.manager.cleanup_runners().await?;
        let runners = self.manager.get_runners().await?;
        let diff = self.base_quantity as i64 - runners.len() as i64;
        info!(current = runners.len(), expected = self.base_quantity, "reconcile runners");

        if diff > 0 {
            self.manager
                .create_runners(diff as usize, &RunnerMetadata::github(), false)
                .await;
        } else if diff < 0 {
            let delete_stats = self.manager.delete_runners((-diff) as usize).await?;
            stats = merge_stats(stats, delete_stats);
        } else {
            info!("no changes to the number of runners");
        }
        Ok((diff, stats))
    }

    /// Reactive: cleanup, flush idle runners on an empty queue, then size
    /// the consumer-process pool to the remaining capacity.
    async fn reconcile_reactive(&self, reactive: &R) -> Result<(i64, EventStats), CloudError> {
        let mut stats = self.manager.cleanup_runners().await?;

        match reactive.queue_size().await {
            Ok(0) => {
                info!("reactive reconcile: flushing idle runners on empty queue");
                let flush_stats = self.manager.flush_runners(FlushMode::Idle).await?;
                stats = merge_stats(stats, flush_stats);
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "queue size unavailable"),
        }

        // Count only platform-online runners so machines still in
        // construction are not counted and immediately re-killed.
        let runners = self.manager.get_runners().await?;
        let online = runners
            .iter()
            .filter(|runner| {
                matches!(
                    runner.platform_state,
                    Some(PlatformRunnerState::Idle) | Some(PlatformRunnerState::Busy)
                )
            })
            .count();

        let runner_diff = self.max_quantity as i64 - online as i64;
        let target = if runner_diff >= 0 {
            runner_diff as usize
        } else {
            let delete_stats = self.manager.delete_runners((-runner_diff) as usize).await?;
            stats = merge_stats(stats, delete_stats);
            0
        };

        let processes_diff = match reactive.reconcile_processes(target).await {
            Ok(diff) => diff,
            Err(err) => {
                warn!(error = %err, "consumer process reconcile failed");
                0
            }
        };
        Ok((processes_diff, stats))
    }

    fn emit_reconciliation(
        &self,
        timestamp: f64,
        duration: f64,
        runner_list: &[RunnerInstance],
        stats: EventStats,
        expected: Option<u64>,
    ) {
        let idle: Vec<&RunnerInstance> = runner_list
            .iter()
            .filter(|runner| runner.platform_state == Some(PlatformRunnerState::Idle))
            .collect();
        let offline_healthy = runner_list
            .iter()
            .filter(|runner| {
                runner.platform_state == Some(PlatformRunnerState::Offline)
                    && runner.health == HealthState::Healthy
            })
            .count();
        let active = runner_list
            .iter()
            .filter(|runner| runner.platform_state == Some(PlatformRunnerState::Busy))
            .count();

        let starts = stats.get(&EventKind::RunnerStart).copied().unwrap_or(0) as i64;
        let stops = stats.get(&EventKind::RunnerStop).copied().unwrap_or(0) as i64;

        self.manager.emit_event(&MetricEvent::Reconciliation {
            timestamp,
            flavor: self.manager.name().to_string(),
            crashed_runners: starts - stops,
            idle_runners: (idle.len() + offline_healthy) as u64,
            active_runners: active as u64,
            expected_runners: expected,
            duration,
        });
    }
}

fn log_runners(runner_list: &[RunnerInstance]) {
    let busy: Vec<&str> = runner_list
        .iter()
        .filter(|runner| runner.platform_state == Some(PlatformRunnerState::Busy))
        .map(|runner| runner.name.as_str())
        .collect();
    let idle: Vec<&str> = runner_list
        .iter()
        .filter(|runner| runner.platform_state == Some(PlatformRunnerState::Idle))
        .map(|runner| runner.name.as_str())
        .collect();
    let offline_healthy: Vec<&str> = runner_list
        .iter()
        .filter(|runner| {
            runner.platform_state == Some(PlatformRunnerState::Offline)
                && runner.health == HealthState::Healthy
        })
        .map(|runner| runner.name.as_str())
        .collect();
    let unhealthy: Vec<&str> = runner_list
        .iter()
        .filter(|runner| {
            matches!(runner.health, HealthState::Unhealthy | HealthState::Unknown)
        })
        .map(|runner| runner.name.as_str())
        .collect();
    info!(count = busy.len(), runners = ?busy, "busy runners");
    info!(count = idle.len(), runners = ?idle, "idle runners");
    info!(count = offline_healthy.len(), runners = ?offline_healthy, "offline healthy runners");
    info!(count = unhealthy.len(), runners = ?unhealthy, "unhealthy runners");
}

#[cfg(test)]
#[path = "scaler_tests.rs"]
mod tests;
