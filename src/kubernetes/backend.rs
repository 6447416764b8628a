// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Transport-agnostic cluster capabilities.
//!
//! The sync and graph layers only need four things from a cluster: open a
//! change stream for a scope, list a scope, fetch usage metrics, and fetch
//! a topology payload. [`ClusterBackend`] is that seam; [`KubeBackend`]
//! implements it against the Kubernetes API with dynamic typing, and the
//! tests drive the engine through an in-memory fake instead.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use kube::api::{Api, DynamicObject, ListParams, WatchEvent, WatchParams};
use tracing::{debug, trace};

use crate::graph::{GraphOptions, TopologyGraph};
use crate::sync::{ChangeEvent, MetricSample, ResourceObject, ScopeKey, SyncError};

use super::client::ClientPool;
use super::kinds::{self, KindDef};
use super::topology;

/// Server-side watch timeout. Kept below the client read timeout so a
/// quiet stream ends cleanly and resumes from the last seen revision.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Result of listing one scope: the objects plus the collection revision
/// that seeds a change stream at exactly the list's point in time
#[derive(Debug, Clone, Default)]
pub struct ResourceList {
    pub objects: Vec<ResourceObject>,
    pub revision: Option<String>,
}

pub type ChangeStream = Pin<Box<dyn Stream<Item = Result<ChangeEvent, SyncError>> + Send>>;

/// The capabilities the engine consumes; the concrete transport is
/// irrelevant to everything above this trait.
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// Authoritative full list of a scope
    async fn list_resources(&self, scope: &ScopeKey) -> Result<ResourceList, SyncError>;

    /// Open an incremental change stream for a scope, optionally resuming
    /// from a list revision. Unavailability is a normal condition, not an
    /// exceptional one; callers fall back to polling.
    async fn open_change_stream(
        &self,
        scope: &ScopeKey,
        from_revision: Option<String>,
    ) -> Result<ChangeStream, SyncError>;

    /// Best-effort numeric usage samples for a scope (404 = unavailable)
    async fn fetch_metrics(&self, scope: &ScopeKey) -> Result<Vec<MetricSample>, SyncError>;

    /// Topology payload for a context. May be assembled here or arrive
    /// pre-computed; consumers only depend on the payload shape.
    async fn fetch_topology_graph(
        &self,
        context: &str,
        options: &GraphOptions,
    ) -> Result<TopologyGraph, SyncError>;
}

/// Kubernetes-backed implementation over dynamically-typed APIs
pub struct KubeBackend {
    pool: Arc<ClientPool>,
    graph_revision: AtomicU64,
}

impl KubeBackend {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self {
            pool,
            graph_revision: AtomicU64::new(0),
        }
    }

    #[allow(dead_code)]
    pub fn pool(&self) -> &Arc<ClientPool> {
        &self.pool
    }

    /// Resolve a scope to a dynamic API handle and its kind definition
    async fn api_for(&self, scope: &ScopeKey) -> Result<(Api<DynamicObject>, KindDef), SyncError> {
        let def = kinds::registry()
            .get(&scope.kind)
            .ok_or_else(|| SyncError::fetch_failed(scope, "unknown resource kind"))?
            .clone();

        let client = self
            .pool
            .client(&scope.context)
            .await
            .map_err(|e| SyncError::fetch_failed(scope, e))?;

        let ar = &def.api_resource;
        let api = if def.namespaced {
            match &scope.namespace {
                Some(ns) => Api::namespaced_with(client, ns, ar),
                None => Api::all_with(client, ar),
            }
        } else {
            Api::all_with(client, ar)
        };

        Ok((api, def))
    }

    fn stream_open_error(scope: &ScopeKey, err: kube::Error) -> SyncError {
        match &err {
            // 404/405: the kind does not support watch; poll instead
            kube::Error::Api(api_err) if matches!(api_err.code, 404 | 405) => {
                SyncError::stream_unavailable(scope, &err)
            }
            _ => SyncError::fetch_failed(scope, &err),
        }
    }
}

/// Convert a dynamically-typed object into the engine's envelope
pub fn to_resource_object(def: &KindDef, obj: DynamicObject) -> ResourceObject {
    let name = obj.metadata.name.clone().unwrap_or_default();
    let namespace = obj.metadata.namespace.clone();
    let revision_marker = obj.metadata.resource_version.clone();
    // UID is the id; a synthesized key keeps uniqueness if it is absent
    let id = obj
        .metadata
        .uid
        .clone()
        .unwrap_or_else(|| format!("{}/{}/{}", def.kind(), namespace.as_deref().unwrap_or(""), name));

    let raw = serde_json::to_value(&obj).unwrap_or(serde_json::Value::Null);
    let status = def.extract_status(&raw);

    ResourceObject {
        id,
        kind: def.kind().to_string(),
        namespace,
        name,
        status,
        revision_marker,
        raw,
    }
}

#[async_trait]
impl ClusterBackend for KubeBackend {
    async fn list_resources(&self, scope: &ScopeKey) -> Result<ResourceList, SyncError> {
        let (api, def) = self.api_for(scope).await?;
        let what = scope.to_string();

        let (items, revision) = self
            .pool
            .list_all_pages(&api, &ListParams::default(), &what)
            .await
            .map_err(|e| SyncError::fetch_failed(scope, e))?;

        let objects = items
            .into_iter()
            .map(|item| to_resource_object(&def, item))
            .collect();

        Ok(ResourceList { objects, revision })
    }

    async fn open_change_stream(
        &self,
        scope: &ScopeKey,
        from_revision: Option<String>,
    ) -> Result<ChangeStream, SyncError> {
        let (api, def) = self.api_for(scope).await?;
        if !def.watchable {
            return Err(SyncError::stream_unavailable(scope, "kind does not support watch"));
        }

        let wp = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        let mut revision = from_revision.unwrap_or_else(|| "0".to_string());

        // Connect before handing back the stream so unavailability is
        // visible at open time, not on first poll
        let initial = api
            .watch(&wp, &revision)
            .await
            .map_err(|e| Self::stream_open_error(scope, e))?;

        let scope = scope.clone();
        let events = stream! {
            let mut watch = initial.boxed();
            loop {
                match watch.try_next().await {
                    Ok(Some(WatchEvent::Added(obj))) => {
                        let res = to_resource_object(&def, obj);
                        if let Some(rv) = &res.revision_marker {
                            revision = rv.clone();
                        }
                        yield Ok(ChangeEvent::Added(res));
                    }
                    Ok(Some(WatchEvent::Modified(obj))) => {
                        let res = to_resource_object(&def, obj);
                        if let Some(rv) = &res.revision_marker {
                            revision = rv.clone();
                        }
                        yield Ok(ChangeEvent::Modified(res));
                    }
                    Ok(Some(WatchEvent::Deleted(obj))) => {
                        let res = to_resource_object(&def, obj);
                        yield Ok(ChangeEvent::Deleted(res));
                    }
                    Ok(Some(WatchEvent::Bookmark(bookmark))) => {
                        revision = bookmark.metadata.resource_version.clone();
                        trace!(scope = %scope, revision = %revision, "bookmark");
                    }
                    Ok(Some(WatchEvent::Error(status))) => {
                        // 410 Gone: resume window expired; the caller
                        // re-seeds from a fresh list
                        yield Err(SyncError::fetch_failed(
                            &scope,
                            format!("watch error {}: {}", status.code, status.message),
                        ));
                        break;
                    }
                    Ok(None) => {
                        // Server-side timeout; resume from the last seen
                        // revision without re-listing
                        debug!(scope = %scope, revision = %revision, "watch expired, resuming");
                        match api.watch(&wp, &revision).await {
                            Ok(next) => watch = next.boxed(),
                            Err(e) => {
                                yield Err(SyncError::fetch_failed(&scope, e));
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(SyncError::fetch_failed(&scope, e));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(events))
    }

    async fn fetch_metrics(&self, scope: &ScopeKey) -> Result<Vec<MetricSample>, SyncError> {
        let client = self
            .pool
            .client(&scope.context)
            .await
            .map_err(|e| SyncError::MetricsUnavailable {
                reason: e.to_string(),
            })?;

        let ar = kube::discovery::ApiResource {
            group: "metrics.k8s.io".to_string(),
            version: "v1beta1".to_string(),
            api_version: "metrics.k8s.io/v1beta1".to_string(),
            kind: "PodMetrics".to_string(),
            plural: "pods".to_string(),
        };
        let api: Api<DynamicObject> = match &scope.namespace {
            Some(ns) => Api::namespaced_with(client, ns, &ar),
            None => Api::all_with(client, &ar),
        };

        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| SyncError::MetricsUnavailable {
                reason: e.to_string(),
            })?;

        let samples = list
            .items
            .into_iter()
            .filter_map(|item| {
                let name = item.metadata.name.clone()?;
                let namespace = item.metadata.namespace.clone().unwrap_or_default();
                let raw = serde_json::to_value(&item).ok()?;
                let containers = raw.pointer("/containers")?.as_array()?;

                let mut cpu_millis = 0u64;
                let mut memory_bytes = 0u64;
                for container in containers {
                    if let Some(cpu) = container.pointer("/usage/cpu").and_then(|v| v.as_str()) {
                        cpu_millis += parse_cpu_millis(cpu).unwrap_or(0);
                    }
                    if let Some(mem) = container.pointer("/usage/memory").and_then(|v| v.as_str()) {
                        memory_bytes += parse_memory_bytes(mem).unwrap_or(0);
                    }
                }

                Some(MetricSample {
                    namespace,
                    name,
                    cpu_millis,
                    memory_bytes,
                })
            })
            .collect();

        Ok(samples)
    }

    async fn fetch_topology_graph(
        &self,
        context: &str,
        options: &GraphOptions,
    ) -> Result<TopologyGraph, SyncError> {
        let revision = self.graph_revision.fetch_add(1, Ordering::Relaxed) + 1;
        topology::assemble(self, context, options, revision).await
    }
}

/// Parse a Kubernetes CPU quantity ("250m", "2", "1500000n") to millicores
pub fn parse_cpu_millis(quantity: &str) -> Option<u64> {
    let q = quantity.trim();
    if q.is_empty() {
        return None;
    }
    let (value, scale): (&str, f64) = if let Some(v) = q.strip_suffix('n') {
        (v, 1e-6)
    } else if let Some(v) = q.strip_suffix('u') {
        (v, 1e-3)
    } else if let Some(v) = q.strip_suffix('m') {
        (v, 1.0)
    } else {
        (q, 1000.0)
    };
    let parsed: f64 = value.parse().ok()?;
    Some((parsed * scale).round() as u64)
}

/// Parse a Kubernetes memory quantity ("128Mi", "1Gi", "2000k") to bytes
pub fn parse_memory_bytes(quantity: &str) -> Option<u64> {
    const BINARY: &[(&str, u64)] = &[
        ("Ei", 1 << 60),
        ("Pi", 1 << 50),
        ("Ti", 1 << 40),
        ("Gi", 1 << 30),
        ("Mi", 1 << 20),
        ("Ki", 1 << 10),
    ];
    const DECIMAL: &[(&str, u64)] = &[
        ("E", 1_000_000_000_000_000_000),
        ("P", 1_000_000_000_000_000),
        ("T", 1_000_000_000_000),
        ("G", 1_000_000_000),
        ("M", 1_000_000),
        ("k", 1_000),
    ];

    let q = quantity.trim();
    if q.is_empty() {
        return None;
    }
    for (suffix, mult) in BINARY.iter().chain(DECIMAL) {
        if let Some(v) = q.strip_suffix(suffix) {
            let parsed: f64 = v.parse().ok()?;
            return Some((parsed * *mult as f64).round() as u64);
        }
    }
    let parsed: f64 = q.parse().ok()?;
    Some(parsed.round() as u64)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_quantities() {
        assert_eq!(parse_cpu_millis("250m"), Some(250));
        assert_eq!(parse_cpu_millis("2"), Some(2000));
        assert_eq!(parse_cpu_millis("0.5"), Some(500));
        assert_eq!(parse_cpu_millis("1500000n"), Some(2));
        assert_eq!(parse_cpu_millis("500000n"), Some(1));
        assert_eq!(parse_cpu_millis("1500u"), Some(2));
        assert_eq!(parse_cpu_millis(""), None);
        assert_eq!(parse_cpu_millis("garbage"), None);
    }

    #[test]
    fn test_parse_memory_quantities() {
        assert_eq!(parse_memory_bytes("128Mi"), Some(128 * 1024 * 1024));
        assert_eq!(parse_memory_bytes("1Gi"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory_bytes("512Ki"), Some(512 * 1024));
        assert_eq!(parse_memory_bytes("2000k"), Some(2_000_000));
        assert_eq!(parse_memory_bytes("1M"), Some(1_000_000));
        assert_eq!(parse_memory_bytes("1048576"), Some(1_048_576));
        assert_eq!(parse_memory_bytes("bad"), None);
    }

    #[test]
    fn test_to_resource_object_synthesizes_id_without_uid() {
        let def = kinds::registry().get("Pod").unwrap().clone();
        let mut obj = DynamicObject::new("web-1", &def.api_resource);
        obj.metadata.namespace = Some("default".to_string());

        let res = to_resource_object(&def, obj);
        assert_eq!(res.id, "Pod/default/web-1");
        assert_eq!(res.kind, "Pod");
        assert_eq!(res.name, "web-1");
        assert!(res.revision_marker.is_none());
    }

    #[test]
    fn test_to_resource_object_prefers_uid() {
        let def = kinds::registry().get("Pod").unwrap().clone();
        let mut obj = DynamicObject::new("web-1", &def.api_resource);
        obj.metadata.uid = Some("abc-123".to_string());
        obj.metadata.resource_version = Some("42".to_string());

        let res = to_resource_object(&def, obj);
        assert_eq!(res.id, "abc-123");
        assert_eq!(res.revision_marker.as_deref(), Some("42"));
    }
}
