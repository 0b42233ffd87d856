// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Fleet management: the runner manager, the scaler façade and the
//! pressure-driven reconciler.

mod metrics;
mod planner;
mod pressure;
mod runner_manager;
mod scaler;

pub use metrics::derive_runner_events;
pub use planner::{
    parse_pressure_line, FlavorInfo, PlannerClient, PlannerError, PressureStream,
};
pub use pressure::{desired_total, PressureReconciler, PressureReconcilerConfig};
pub use runner_manager::{RunnerManager, BUILD_MODE_TIMEOUT};
pub use scaler::{
    ReactiveFleet, ReactiveFleetError, RunnerInfo, RunnerScaler, ScalerError,
};
