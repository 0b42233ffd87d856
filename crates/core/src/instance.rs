// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance identity: the stable identifier a VM carries in its cloud name.

use rand::distr::Alphanumeric;
use rand::Rng;
use std::fmt;
use thiserror::Error;

/// Length of the random suffix drawn for new instance ids.
const SUFFIX_LEN: usize = 8;

/// Errors from parsing a VM name back into an [`InstanceId`].
#[derive(Debug, Error)]
pub enum InstanceIdError {
    #[error("name '{name}' does not carry prefix '{prefix}'")]
    PrefixMismatch { prefix: String, name: String },
    #[error("name '{0}' has an empty or non-alphanumeric suffix")]
    InvalidSuffix(String),
}

/// Whether a runner was spawned by the reactive consumer.
///
/// `Unknown` covers VM names created before the reactive marker existed;
/// they parse and round-trip without a marker segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactiveMode {
    Reactive,
    NonReactive,
    Unknown,
}

impl ReactiveMode {
    fn marker(self) -> Option<&'static str> {
        match self {
            ReactiveMode::Reactive => Some("r"),
            ReactiveMode::NonReactive => Some("n"),
            ReactiveMode::Unknown => None,
        }
    }
}

/// The fleet's stable identifier for a VM.
///
/// Rendered as `{prefix}-r-{suffix}` (reactive), `{prefix}-n-{suffix}`
/// (non-reactive) or `{prefix}-{suffix}` (unknown). The rendered form is
/// the VM's cloud name; `parse` inverts `name` for a known prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId {
    pub prefix: String,
    pub reactive: ReactiveMode,
    pub suffix: String,
}

impl InstanceId {
    /// Create an id from explicit components. Intended for tests and
    /// parsing; production call sites go through [`InstanceId::generate`].
    pub fn new(
        prefix: impl Into<String>,
        reactive: ReactiveMode,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            reactive,
            suffix: suffix.into(),
        }
    }

    /// Draw a fresh id under `prefix` with a random alphanumeric suffix.
    pub fn generate(prefix: impl Into<String>, reactive: bool) -> Self {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(SUFFIX_LEN)
            .map(char::from)
            .collect::<String>()
            .to_lowercase();
        Self {
            prefix: prefix.into(),
            reactive: if reactive {
                ReactiveMode::Reactive
            } else {
                ReactiveMode::NonReactive
            },
            suffix,
        }
    }

    /// Parse a VM name back into an id, given the owning manager's prefix.
    pub fn parse(prefix: &str, name: &str) -> Result<Self, InstanceIdError> {
        let rest = name
            .strip_prefix(prefix)
            .and_then(|r| r.strip_prefix('-'))
            .ok_or_else(|| InstanceIdError::PrefixMismatch {
                prefix: prefix.to_string(),
                name: name.to_string(),
            })?;

        let (reactive, suffix) = if let Some(s) = rest.strip_prefix("r-") {
            (ReactiveMode::Reactive, s)
        } else if let Some(s) = rest.strip_prefix("n-") {
            (ReactiveMode::NonReactive, s)
        } else {
            (ReactiveMode::Unknown, rest)
        };

        if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(InstanceIdError::InvalidSuffix(name.to_string()));
        }

        Ok(Self {
            prefix: prefix.to_string(),
            reactive,
            suffix: suffix.to_string(),
        })
    }

    /// True when `name` belongs to this prefix's namespace.
    pub fn name_has_prefix(prefix: &str, name: &str) -> bool {
        name.strip_prefix(prefix)
            .map(|r| r.starts_with('-'))
            .unwrap_or(false)
    }

    /// The rendered VM name.
    pub fn name(&self) -> String {
        match self.reactive.marker() {
            Some(marker) => format!("{}-{}-{}", self.prefix, marker, self.suffix),
            None => format!("{}-{}", self.prefix, self.suffix),
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
