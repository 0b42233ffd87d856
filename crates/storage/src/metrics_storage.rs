// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-runner scratch directories for metric files.
//!
//! Each runner owns exactly one directory named after its instance id.
//! Corrupt directories are archived into the quarantine sibling so a human
//! can inspect them, then removed from the live tree.

use rfm_core::InstanceId;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors from metric storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("metrics storage for runner {0} already exists")]
    AlreadyExists(String),
    #[error("metrics storage for runner {0} not found")]
    NotFound(String),
    #[error("corrupt metrics for runner {instance}: {message}")]
    Corrupt { instance: String, message: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A runner's live metric directory.
#[derive(Debug, Clone)]
pub struct StorageEntry {
    pub path: PathBuf,
    pub instance_id: InstanceId,
}

/// Manager of per-runner metric directories under one base directory.
#[derive(Debug, Clone)]
pub struct MetricsStorage {
    base_dir: PathBuf,
    quarantine_dir: PathBuf,
    prefix: String,
}

impl MetricsStorage {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        quarantine_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            quarantine_dir: quarantine_dir.into(),
            prefix: prefix.into(),
        }
    }

    /// Create metric storage for a runner. Fails if the directory already
    /// exists: the previous owner of this instance id must be torn down or
    /// quarantined before the id is reused.
    pub fn create(&self, instance_id: &InstanceId) -> Result<StorageEntry, StorageError> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(&self.quarantine_dir)?;

        let path = self.entry_path(instance_id);
        match std::fs::create_dir(&path) {
            Ok(()) => Ok(StorageEntry {
                path,
                instance_id: instance_id.clone(),
            }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StorageError::AlreadyExists(instance_id.name()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Get the storage for a runner, failing if it does not exist.
    pub fn get(&self, instance_id: &InstanceId) -> Result<StorageEntry, StorageError> {
        let path = self.entry_path(instance_id);
        if !path.is_dir() {
            return Err(StorageError::NotFound(instance_id.name()));
        }
        Ok(StorageEntry {
            path,
            instance_id: instance_id.clone(),
        })
    }

    /// List all storages under the base directory. Directories whose names
    /// do not parse under this manager's prefix are skipped with a warning.
    pub fn list_all(&self) -> Result<Vec<StorageEntry>, StorageError> {
        if !self.base_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dir_entry in std::fs::read_dir(&self.base_dir)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            let name = dir_entry.file_name().to_string_lossy().to_string();
            match InstanceId::parse(&self.prefix, &name) {
                Ok(instance_id) => entries.push(StorageEntry {
                    path: dir_entry.path(),
                    instance_id,
                }),
                Err(err) => {
                    warn!(directory = %name, error = %err, "skipping foreign metrics directory");
                }
            }
        }
        Ok(entries)
    }

    /// Delete a runner's storage.
    pub fn delete(&self, instance_id: &InstanceId) -> Result<(), StorageError> {
        let path = self.entry_path(instance_id);
        if !path.is_dir() {
            return Err(StorageError::NotFound(instance_id.name()));
        }
        std::fs::remove_dir_all(&path)?;
        Ok(())
    }

    /// Archive a runner's storage into the quarantine directory, unchanged,
    /// then delete the live directory.
    pub fn move_to_quarantine(&self, instance_id: &InstanceId) -> Result<(), StorageError> {
        let entry = self.get(instance_id)?;
        std::fs::create_dir_all(&self.quarantine_dir)?;

        let archive_path = self
            .quarantine_dir
            .join(format!("{}.tar.gz", instance_id.name()));
        archive_dir(&entry.path, &archive_path, &instance_id.name())?;

        self.delete(instance_id)
    }

    fn entry_path(&self, instance_id: &InstanceId) -> PathBuf {
        self.base_dir.join(instance_id.name())
    }
}

fn archive_dir(source: &Path, archive_path: &Path, entry_name: &str) -> Result<(), StorageError> {
    let file = File::create(archive_path)?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(entry_name, source)?;
    let encoder = builder.into_inner()?;
    encoder.finish()?;
    Ok(())
}

#[cfg(test)]
#[path = "metrics_storage_tests.rs"]
mod tests;
