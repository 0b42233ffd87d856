// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the cloud layer

use std::path::PathBuf;
use thiserror::Error;

/// Errors from cloud operations.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("missing server configuration (image/flavor) to create runners")]
    MissingServerConfig,
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("cloud API error: {0}")]
    Api(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Ssh(#[from] SshError),
}

/// Errors from SSH access into a runner VM.
#[derive(Debug, Error)]
pub enum SshError {
    #[error("no key file for instance at {0}")]
    KeyfileMissing(PathBuf),
    #[error("unable to establish SSH connection to {0}")]
    ConnectFailed(String),
    #[error("SSH command failed on {host}: {message}")]
    CommandFailed { host: String, message: String },
    #[error("SSH command timed out on {host} after {seconds}s")]
    Timeout { host: String, seconds: u64 },
    #[error("pulled file {path} is {size} bytes, over the {limit} byte limit")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
