// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Configuration persistence for k8map
//!
//! Stores user preferences like the selected cluster context in a config
//! file. All k8map data is stored under ~/.k8map/:
//! - ~/.k8map/config.json - user configuration
//! - ~/.k8map/log/ - rotated log files

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Get the base k8map directory (~/.k8map/)
pub fn base_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".k8map"))
        .context("Could not determine home directory")
}

fn default_poll_interval() -> u64 {
    10
}

fn default_metrics_interval() -> u64 {
    15
}

/// k8map configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Selected cluster context (used by default on startup)
    #[serde(default)]
    pub selected_context: Option<String>,
    /// Poll interval in seconds when a scope runs in polling mode
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Base metrics fetch interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
    /// Include pods in the topology by default
    #[serde(default)]
    pub graph_include_pods: bool,
    /// Include storage objects in the topology by default
    #[serde(default)]
    pub graph_include_storage: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            selected_context: None,
            poll_interval_secs: default_poll_interval(),
            metrics_interval_secs: default_metrics_interval(),
            graph_include_pods: false,
            graph_include_storage: false,
        }
    }
}

impl Config {
    /// Load config from disk, or return default if not found
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Get the config file path (~/.k8map/config.json)
    pub fn config_path() -> Result<PathBuf> {
        Ok(base_dir()?.join("config.json"))
    }

    /// Update the selected context and save
    pub fn set_selected_context(&mut self, context: Option<String>) -> Result<()> {
        self.selected_context = context;
        self.save()
    }
}
