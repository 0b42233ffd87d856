// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manager of reactive consumer processes.
//!
//! Consumers run in separate OS processes so a crash never takes down the
//! reconciler. The pool is reconciled by counting live consumer processes
//! and spawning or SIGTERMing the difference; surplus processes are killed
//! newest-first.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Errors from consumer process management.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to list processes: {0}")]
    List(String),
    #[error("failed to spawn consumer: {0}")]
    Spawn(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Extract the PIDs of lines whose command starts with `needle`.
///
/// Expects `ps axo cmd:<width>,pid --no-headers --sort=-start_time`
/// output: newest process first, PID as the last column.
pub fn parse_consumer_pids(ps_output: &str, needle: &str) -> Vec<i32> {
    ps_output
        .lines()
        .filter(|line| line.starts_with(needle))
        .filter_map(|line| line.rsplit_once(' ').map(|(_, pid)| pid.trim()))
        .filter_map(|pid| pid.parse().ok())
        .collect()
}

/// Spawns and reaps `<program> consume --config <path>` processes.
pub struct ProcessManager {
    program: PathBuf,
    config_path: PathBuf,
    log_dir: PathBuf,
}

impl ProcessManager {
    pub fn new(
        program: impl Into<PathBuf>,
        config_path: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            config_path: config_path.into(),
            log_dir: log_dir.into(),
        }
    }

    /// The command-line prefix consumer processes are recognized by.
    fn needle(&self) -> String {
        format!("{} consume", self.program.display())
    }

    /// PIDs of live consumer processes, newest first.
    pub async fn current_pids(&self) -> Result<Vec<i32>, ProcessError> {
        let needle = self.needle();
        let output = Command::new("ps")
            .arg("axo")
            .arg(format!("cmd:{},pid", needle.len()))
            .arg("--no-headers")
            .arg("--sort=-start_time")
            .output()
            .await?;
        if !output.status.success() {
            return Err(ProcessError::List(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        Ok(parse_consumer_pids(
            &String::from_utf8_lossy(&output.stdout),
            &needle,
        ))
    }

    /// Reconcile the pool to `target` processes. Returns the change in
    /// process count (negative when killing).
    pub async fn reconcile(&self, target: usize) -> Result<i64, ProcessError> {
        let pids = self.current_pids().await?;
        let current = pids.len();
        info!(current, target, "reconciling consumer processes");

        let delta = target as i64 - current as i64;
        if delta > 0 {
            std::fs::create_dir_all(&self.log_dir)?;
            for _ in 0..delta {
                self.spawn_consumer().await?;
            }
        } else if delta < 0 {
            for pid in pids.iter().take((-delta) as usize) {
                self.terminate(*pid);
            }
        } else {
            debug!("consumer process count already correct");
        }
        Ok(delta)
    }

    /// SIGTERM every consumer process.
    pub async fn kill_all(&self) -> Result<(), ProcessError> {
        let pids = self.current_pids().await?;
        if pids.is_empty() {
            info!("no consumer processes to kill");
            return Ok(());
        }
        for pid in pids {
            self.terminate(pid);
        }
        Ok(())
    }

    async fn spawn_consumer(&self) -> Result<(), ProcessError> {
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let log_path = self.log_dir.join(format!("consumer-{stamp}.log"));
        let log_file = std::fs::File::create(&log_path)?;
        let err_file = log_file.try_clone()?;

        let child = Command::new(&self.program)
            .arg("consume")
            .arg("--config")
            .arg(&self.config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(err_file))
            .spawn()
            .map_err(|err| ProcessError::Spawn(err.to_string()))?;
        info!(pid = ?child.id(), log = %log_path.display(), "spawned consumer process");
        // The child outlives this handle; it is reaped via ps on the next
        // reconcile pass.
        drop(child);
        Ok(())
    }

    fn terminate(&self, pid: i32) {
        info!(pid, "terminating consumer process");
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => {}
            Err(nix::errno::Errno::ESRCH) => {
                // Already exited between listing and signalling.
                debug!(pid, "consumer process already gone");
            }
            Err(err) => warn!(pid, error = %err, "failed to terminate consumer process"),
        }
    }
}

#[cfg(test)]
#[path = "process_manager_tests.rs"]
mod tests;
