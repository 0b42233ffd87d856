// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSH access to runner VMs via the system `ssh`/`scp` binaries.
//!
//! Every command carries an explicit timeout; a timeout is a transient
//! failure the caller decides whether to retry.

use crate::error::SshError;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Default timeout for a single remote command.
pub const SSH_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP connect timeout handed to ssh itself.
const CONNECT_TIMEOUT_SECS: u32 = 10;

/// Remote user the runner images provision.
pub const SSH_USER: &str = "ubuntu";

/// Output of one remote command.
#[derive(Debug, Clone)]
pub struct SshOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl SshOutput {
    pub fn ok(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// An established connection to one address of a VM.
#[derive(Debug, Clone)]
pub struct SshConnection {
    pub host: String,
    pub key_path: PathBuf,
    pub user: String,
    pub proxy_command: Option<String>,
    pub timeout: Duration,
}

impl SshConnection {
    pub fn new(host: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            key_path: key_path.into(),
            user: SSH_USER.to_string(),
            proxy_command: None,
            timeout: SSH_COMMAND_TIMEOUT,
        }
    }

    pub fn with_proxy_command(mut self, proxy_command: Option<String>) -> Self {
        self.proxy_command = proxy_command;
        self
    }

    /// Common ssh/scp options.
    fn base_options(&self) -> Vec<String> {
        let mut options = vec![
            "-i".to_string(),
            self.key_path.display().to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}"),
        ];
        if let Some(proxy_command) = &self.proxy_command {
            options.push("-o".to_string());
            options.push(format!("ProxyCommand={proxy_command}"));
        }
        options
    }

    /// Arguments for running `remote_cmd` over ssh.
    pub fn ssh_args(&self, remote_cmd: &str) -> Vec<String> {
        let mut args = self.base_options();
        args.push(format!("{}@{}", self.user, self.host));
        args.push("--".to_string());
        args.push(remote_cmd.to_string());
        args
    }

    /// Arguments for copying `remote_path` to `local_path` over scp.
    pub fn scp_args(&self, remote_path: &str, local_path: &Path) -> Vec<String> {
        let mut args = self.base_options();
        args.push(format!("{}@{}:{}", self.user, self.host, remote_path));
        args.push(local_path.display().to_string());
        args
    }

    /// Run a command on the VM.
    pub async fn run(&self, remote_cmd: &str) -> Result<SshOutput, SshError> {
        self.execute("ssh", self.ssh_args(remote_cmd)).await
    }

    /// Verify the connection end to end: a random sentinel must echo back.
    pub async fn probe(&self) -> Result<(), SshError> {
        let sentinel: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        let output = self.run(&format!("echo {sentinel}")).await?;
        if output.ok() && output.stdout.contains(&sentinel) {
            return Ok(());
        }
        Err(SshError::ConnectFailed(self.host.clone()))
    }

    /// Copy a file off the VM, enforcing a size cap after the transfer.
    pub async fn pull_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        max_size: u64,
    ) -> Result<(), SshError> {
        let output = self.execute("scp", self.scp_args(remote_path, local_path)).await?;
        if !output.ok() {
            return Err(SshError::CommandFailed {
                host: self.host.clone(),
                message: format!("scp {remote_path}: {}", output.stderr.trim()),
            });
        }
        let size = std::fs::metadata(local_path)?.len();
        if size > max_size {
            let _ = std::fs::remove_file(local_path);
            return Err(SshError::FileTooLarge {
                path: local_path.to_path_buf(),
                size,
                limit: max_size,
            });
        }
        Ok(())
    }

    async fn execute(&self, program: &str, args: Vec<String>) -> Result<SshOutput, SshError> {
        if !self.key_path.is_file() {
            return Err(SshError::KeyfileMissing(self.key_path.clone()));
        }
        debug!(host = %self.host, program, "running remote command");
        let result = tokio::time::timeout(
            self.timeout,
            Command::new(program).args(&args).output(),
        )
        .await;
        match result {
            Err(_) => Err(SshError::Timeout {
                host: self.host.clone(),
                seconds: self.timeout.as_secs(),
            }),
            Ok(Err(err)) => Err(err.into()),
            Ok(Ok(output)) => Ok(SshOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
        }
    }
}

#[cfg(test)]
#[path = "ssh_tests.rs"]
mod tests;
