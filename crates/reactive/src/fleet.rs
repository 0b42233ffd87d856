// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scaler-facing reactive fleet: a durable queue plus the consumer
//! process pool.

use crate::process_manager::ProcessManager;
use crate::queue::JobQueue;
use async_trait::async_trait;
use rfm_manager::{ReactiveFleet, ReactiveFleetError};
use std::sync::Arc;

/// Couples the queue and the consumer process pool behind the scaler's
/// [`ReactiveFleet`] seam.
pub struct ReactiveRunners {
    queue: Arc<dyn JobQueue>,
    processes: ProcessManager,
}

impl ReactiveRunners {
    pub fn new(queue: Arc<dyn JobQueue>, processes: ProcessManager) -> Self {
        Self { queue, processes }
    }
}

#[async_trait]
impl ReactiveFleet for ReactiveRunners {
    async fn queue_size(&self) -> Result<u64, ReactiveFleetError> {
        self.queue
            .size()
            .await
            .map_err(|err| ReactiveFleetError(err.to_string()))
    }

    async fn reconcile_processes(&self, target: usize) -> Result<i64, ReactiveFleetError> {
        self.processes
            .reconcile(target)
            .await
            .map_err(|err| ReactiveFleetError(err.to_string()))
    }

    async fn kill_all(&self) -> Result<(), ReactiveFleetError> {
        self.processes
            .kill_all()
            .await
            .map_err(|err| ReactiveFleetError(err.to_string()))
    }
}
