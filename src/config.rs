// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Kernel configuration

use crate::numeric::DEFAULT_TOLERANCE;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file looked up by [`KernelConfig::load`]
pub const CONFIG_FILE: &str = "paramkernel.toml";

/// Evaluation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Magnitude below which a value counts as zero during evaluation.
    ///
    /// Construction-time folding does not see this value: it evaluates
    /// constant subtrees with [`DEFAULT_TOLERANCE`] and keeps the node when
    /// that fails, so `x / 1e-13` stays a quotient and is decided here at
    /// evaluation time.
    pub tolerance: f64,
    /// Minimum batch width before columns are split across threads
    pub parallel_threshold: usize,
    /// Columns per parallel work item
    pub parallel_chunk_columns: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            parallel_threshold: 4096,
            parallel_chunk_columns: 1024,
        }
    }
}

impl KernelConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: KernelConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Load `paramkernel.toml` from the working directory if present, then
    /// apply `PARAMKERNEL_*` environment overrides
    pub fn load() -> Result<Self> {
        let mut config = if PathBuf::from(CONFIG_FILE).exists() {
            Self::from_file(CONFIG_FILE)?
        } else {
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Apply overrides from a variable lookup. Unparsable or out-of-range
    /// values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup("PARAMKERNEL_TOLERANCE") {
            match raw.trim().parse::<f64>() {
                Ok(tolerance) if tolerance.is_finite() && tolerance >= 0.0 => {
                    self.tolerance = tolerance
                }
                _ => tracing::warn!(value = %raw, "ignoring invalid PARAMKERNEL_TOLERANCE"),
            }
        }
        if let Some(raw) = lookup("PARAMKERNEL_PARALLEL_THRESHOLD") {
            match raw.trim().parse::<usize>() {
                Ok(threshold) => self.parallel_threshold = threshold,
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring invalid PARAMKERNEL_PARALLEL_THRESHOLD")
                }
            }
        }
        if let Some(raw) = lookup("PARAMKERNEL_CHUNK_COLUMNS") {
            match raw.trim().parse::<usize>() {
                Ok(columns) if columns > 0 => self.parallel_chunk_columns = columns,
                _ => tracing::warn!(value = %raw, "ignoring invalid PARAMKERNEL_CHUNK_COLUMNS"),
            }
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))?;
        Ok(())
    }
}
