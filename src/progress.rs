// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Progress reporting for long-running operations
//!
//! Lets the connection pool report lifecycle events during startup and
//! context switches, which the CLI displays on a spinner.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Create a spinner with consistent styling
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg} {elapsed:.dim}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Progress update message
#[derive(Clone, Debug)]
pub enum ProgressUpdate {
    /// Connecting to a cluster
    Connecting { cluster: String },
    /// Connected to a cluster
    Connected { cluster: String, elapsed_ms: u64 },
}

/// Global progress reporter
pub struct ProgressReporter {
    sender: broadcast::Sender<ProgressUpdate>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Subscribe to progress updates
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.sender.subscribe()
    }

    /// Report connecting to a cluster
    pub fn connecting(&self, cluster: &str) {
        let _ = self.sender.send(ProgressUpdate::Connecting {
            cluster: cluster.to_string(),
        });
    }

    /// Report connected to a cluster
    pub fn connected(&self, cluster: &str, elapsed_ms: u64) {
        let _ = self.sender.send(ProgressUpdate::Connected {
            cluster: cluster.to_string(),
            elapsed_ms,
        });
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle to progress reporter
pub type ProgressHandle = Arc<ProgressReporter>;

/// Create a new progress reporter handle
pub fn create_progress_handle() -> ProgressHandle {
    Arc::new(ProgressReporter::new())
}
