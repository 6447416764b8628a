// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Live synchronization of cluster resource state.
//!
//! Each subscribed (kind, namespace, context) scope gets its own in-memory
//! object store driven by a watch-first, poll-fallback synchronizer task.
//! Consumers subscribe through the [`registry::SubscriptionRegistry`] and
//! read immutable snapshots; all writes for a scope funnel through its
//! single synchronizer.

pub mod debounce;
pub mod metrics;
pub mod registry;
pub mod store;
pub mod synchronizer;

pub use metrics::{MetricsFetcher, MetricsOptions};
pub use registry::{SubscriptionHandle, SubscriptionRegistry};
pub use store::ObjectStore;
pub use synchronizer::SyncOptions;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One resource object as held in a scope's store.
///
/// `raw` carries the full JSON representation; `status` is the per-kind
/// health summary extracted at conversion time (see `kubernetes::kinds`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceObject {
    /// Unique id within a (kind, namespace) scope (the server-assigned UID)
    pub id: String,
    pub kind: String,
    /// None for cluster-scoped resources
    pub namespace: Option<String>,
    pub name: String,
    pub status: ResourceStatus,
    /// Opaque server revision (resourceVersion); used only to discard
    /// stale re-deliveries of the same id. Absent means "always apply".
    pub revision_marker: Option<String>,
    pub raw: serde_json::Value,
}

impl ResourceObject {
    /// Creation timestamp from the raw metadata, if present
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.raw
            .pointer("/metadata/creationTimestamp")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<DateTime<Utc>>().ok())
    }
}

/// Per-kind health summary extracted from a resource's raw state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceStatus {
    Healthy,
    Progressing,
    Degraded,
    Failed,
    Unknown,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceStatus::Healthy => "Healthy",
            ResourceStatus::Progressing => "Progressing",
            ResourceStatus::Degraded => "Degraded",
            ResourceStatus::Failed => "Failed",
            ResourceStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Incremental change notification for one object.
///
/// Events for the same id are applied in arrival order; ordering across
/// different ids is unconstrained.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Added(ResourceObject),
    Modified(ResourceObject),
    Deleted(ResourceObject),
}

impl ChangeEvent {
    /// The object the event is about, regardless of direction
    #[allow(dead_code)]
    pub fn object(&self) -> &ResourceObject {
        match self {
            ChangeEvent::Added(o) | ChangeEvent::Modified(o) | ChangeEvent::Deleted(o) => o,
        }
    }
}

/// The unit of subscription, caching, and teardown
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey {
    /// Canonical resource kind, e.g. "Pod"
    pub kind: String,
    /// None = all namespaces
    pub namespace: Option<String>,
    /// Kubeconfig context the scope is bound to
    pub context: String,
}

impl ScopeKey {
    pub fn new(
        kind: impl Into<String>,
        namespace: Option<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace,
            context: context.into(),
        }
    }

    /// Scope over all namespaces of a kind
    pub fn all(kind: impl Into<String>, context: impl Into<String>) -> Self {
        Self::new(kind, None, context)
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.context,
            self.kind,
            self.namespace.as_deref().unwrap_or("*")
        )
    }
}

/// Connection mode of a scope's synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Connecting,
    Watching,
    Polling,
    Error,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncPhase::Connecting => "Connecting",
            SyncPhase::Watching => "Real-time",
            SyncPhase::Polling => "Polling",
            SyncPhase::Error => "Failed to load",
        };
        f.write_str(s)
    }
}

/// Observable synchronization state of one scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// True once the first full snapshot has been received
    pub sync_complete: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Connecting,
            sync_complete: false,
            last_updated: None,
        }
    }
}

/// Numeric usage sample joined into views by (namespace, name)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub namespace: String,
    pub name: String,
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

/// Synchronization failure taxonomy.
///
/// Only `FetchFailed` with no prior successful sync surfaces to the user;
/// everything else degrades gracefully (poll fallback, stale data, missing
/// metrics).
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// The change-stream capability is absent for this scope. Expected for
    /// some resource kinds; triggers the poll fallback.
    #[error("change stream unavailable for {scope}: {reason}")]
    StreamUnavailable { scope: String, reason: String },

    /// A list or stream attempt failed. Transient; retried with backoff,
    /// last-good data is retained.
    #[error("failed to fetch {scope}: {reason}")]
    FetchFailed { scope: String, reason: String },

    /// Usage data is unavailable (404 or the metrics API is not installed).
    /// Swallowed and logged; never marks the owning scope as errored.
    #[error("metrics unavailable: {reason}")]
    MetricsUnavailable { reason: String },
}

impl SyncError {
    pub fn fetch_failed(scope: &ScopeKey, reason: impl std::fmt::Display) -> Self {
        SyncError::FetchFailed {
            scope: scope.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn stream_unavailable(scope: &ScopeKey, reason: impl std::fmt::Display) -> Self {
        SyncError::StreamUnavailable {
            scope: scope.to_string(),
            reason: reason.to_string(),
        }
    }
}
