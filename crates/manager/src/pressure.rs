// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pressure-driven reconciliation.
//!
//! Two independent loops share one async mutex so they never mutate the
//! fleet concurrently: the create loop streams pressure updates and scales
//! up; the delete loop wakes on a timer, cleans up, then tops the fleet
//! back up. The timer loop never deletes healthy runners; scale-down
//! happens organically as cleanup collects finished and stuck ones.

use crate::planner::PlannerClient;
use crate::runner_manager::RunnerManager;
use parking_lot::Mutex;
use rfm_cloud::VmProvider;
use rfm_core::{Clock, RunnerMetadata};
use rfm_platform::PlatformProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backoff after a pressure stream failure before reconnecting.
const STREAM_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Configuration for pressure reconciliation.
#[derive(Debug, Clone)]
pub struct PressureReconcilerConfig {
    /// Planner flavor to reconcile.
    pub flavor_name: String,
    /// Interval between timer-driven cleanup reconciliations.
    pub reconcile_interval: Duration,
    /// Desired runner count while the planner is unreachable.
    pub fallback_runners: u32,
}

/// Desired runner total for a pressure value: `max(⌊pressure⌋, minimum, 0)`.
pub fn desired_total(pressure: f64, minimum_pressure: Option<i64>) -> usize {
    let mut base = pressure.floor() as i64;
    if let Some(minimum) = minimum_pressure {
        base = base.max(minimum);
    }
    base.max(0) as usize
}

/// Continuously reconciles the fleet size against planner pressure.
pub struct PressureReconciler<C, P, K> {
    manager: Arc<RunnerManager<C, P, K>>,
    planner: PlannerClient,
    config: PressureReconcilerConfig,
    /// Serializes fleet mutation between the two loops (and anything else
    /// holding the same lock).
    lock: Arc<tokio::sync::Mutex<()>>,
    cancel: CancellationToken,
    minimum_pressure: Option<i64>,
    last_pressure: Mutex<Option<f64>>,
}

impl<C, P, K> PressureReconciler<C, P, K>
where
    C: VmProvider,
    P: PlatformProvider,
    K: Clock,
{
    /// Build the reconciler, loading `minimum_pressure` from the flavor
    /// descriptor once. A planner failure here is tolerated: reconciliation
    /// proceeds without a minimum.
    pub async fn build(
        manager: Arc<RunnerManager<C, P, K>>,
        planner: PlannerClient,
        config: PressureReconcilerConfig,
        lock: Arc<tokio::sync::Mutex<()>>,
        cancel: CancellationToken,
    ) -> Self {
        let minimum_pressure = match planner.get_flavor(&config.flavor_name).await {
            Ok(flavor) => {
                info!(
                    flavor = %flavor.name,
                    minimum_pressure = ?flavor.minimum_pressure,
                    "planner flavor loaded"
                );
                flavor.minimum_pressure
            }
            Err(err) => {
                warn!(
                    flavor = %config.flavor_name,
                    error = %err,
                    "planner flavor unavailable, proceeding without minimum_pressure"
                );
                None
            }
        };
        Self {
            manager,
            planner,
            config,
            lock,
            cancel,
            minimum_pressure,
            last_pressure: Mutex::new(None),
        }
    }

    /// Stream pressure updates and scale up to match. On stream failure,
    /// fall back to the configured runner count, back off briefly and
    /// reconnect.
    pub async fn run_create_loop(&self) {
        while !self.cancel.is_cancelled() {
            match self.planner.stream_pressure(&self.config.flavor_name).await {
                Ok(mut stream) => loop {
                    let next = tokio::select! {
                        next = stream.next_pressure() => next,
                        _ = self.cancel.cancelled() => return,
                    };
                    match next {
                        Ok(Some(pressure)) => self.handle_create(pressure).await,
                        Ok(None) => {
                            warn!("pressure stream ended, reconnecting");
                            break;
                        }
                        Err(err) => {
                            warn!(error = %err, "pressure stream failed, reconnecting");
                            break;
                        }
                    }
                },
                Err(err) => {
                    warn!(error = %err, "unable to open pressure stream");
                }
            }

            if self.cancel.is_cancelled() {
                return;
            }
            self.handle_create(f64::from(self.config.fallback_runners))
                .await;
            tokio::select! {
                _ = tokio::time::sleep(STREAM_RETRY_BACKOFF) => {}
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    /// Timer-driven cleanup plus top-up using the last seen pressure.
    pub async fn run_delete_loop(&self) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconcile_interval) => {}
                _ = self.cancel.cancelled() => return,
            }
            let Some(pressure) = *self.last_pressure.lock() else {
                debug!("delete loop: no pressure seen yet, skipping tick");
                continue;
            };
            self.handle_timer_reconcile(pressure).await;
        }
    }

    /// Scale up when desired exceeds current. Remembers the pressure for
    /// the delete loop.
    pub(crate) async fn handle_create(&self, pressure: f64) {
        let desired = desired_total(pressure, self.minimum_pressure);
        *self.last_pressure.lock() = Some(pressure);

        let _guard = self.lock.lock().await;
        let current = match self.manager.get_runners().await {
            Ok(runners) => runners.len(),
            Err(err) => {
                warn!(error = %err, "create loop: unable to count runners");
                return;
            }
        };
        if desired <= current {
            debug!(desired, current, "create loop: nothing to do");
            return;
        }
        info!(desired, current, "create loop: creating runners");
        self.manager
            .create_runners(desired - current, &RunnerMetadata::github(), false)
            .await;
    }

    /// Clean up stale runners, then fill back to the desired count.
    pub(crate) async fn handle_timer_reconcile(&self, pressure: f64) {
        let desired = desired_total(pressure, self.minimum_pressure);

        let _guard = self.lock.lock().await;
        if let Err(err) = self.manager.cleanup_runners().await {
            warn!(error = %err, "delete loop: cleanup failed");
            return;
        }
        let current = match self.manager.get_runners().await {
            Ok(runners) => runners.len(),
            Err(err) => {
                warn!(error = %err, "delete loop: unable to count runners");
                return;
            }
        };
        if desired <= current {
            info!(desired, current, "delete loop: no changes");
            return;
        }
        info!(desired, current, "delete loop: creating runners");
        self.manager
            .create_runners(desired - current, &RunnerMetadata::github(), false)
            .await;
    }

    #[cfg(test)]
    fn last_pressure(&self) -> Option<f64> {
        *self.last_pressure.lock()
    }
}

#[cfg(test)]
#[path = "pressure_tests.rs"]
mod tests;
