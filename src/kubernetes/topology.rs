// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Client-side topology payload assembly.
//!
//! Lists the selected kinds concurrently and derives the relationship
//! edges from the raw objects: ownerReferences become `Owns`, service
//! label selectors become `Selects`, ingress backends become `RoutesTo`,
//! and PVC volume mounts become `Mounts`. A kind whose list fails is
//! skipped with a warning; the payload is the best graph the remaining
//! kinds allow.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::graph::{EdgeRelation, GraphOptions, TopologyEdge, TopologyGraph, TopologyNode};
use crate::sync::{ResourceObject, ScopeKey, SyncError};

use super::backend::ClusterBackend;

/// Kinds always present in the payload
const BASE_KINDS: &[&str] = &["Deployment", "StatefulSet", "DaemonSet", "Service", "Node"];

/// Assemble a topology payload for one context.
///
/// `revision` is the producing fetch counter; together with the generated
/// timestamp it forms the snapshot identity the display memo keys on.
pub async fn assemble(
    backend: &dyn ClusterBackend,
    context: &str,
    options: &GraphOptions,
    revision: u64,
) -> Result<TopologyGraph, SyncError> {
    let mut wanted: Vec<&str> = BASE_KINDS.to_vec();
    if options.include_pods {
        wanted.push("Pod");
    }
    if options.include_replicasets {
        wanted.push("ReplicaSet");
    }
    if options.include_jobs {
        wanted.push("Job");
        wanted.push("CronJob");
    }
    if options.include_storage {
        wanted.push("PersistentVolumeClaim");
        wanted.push("PersistentVolume");
    }
    if options.include_ingress {
        wanted.push("Ingress");
    }

    // ReplicaSets are still fetched when excluded from the payload, so pod
    // ownership can be resolved through them to the owning Deployment
    let resolve_replicasets = options.include_pods && !options.include_replicasets;
    let mut fetched: Vec<&str> = wanted.clone();
    if resolve_replicasets {
        fetched.push("ReplicaSet");
    }

    let scopes: Vec<ScopeKey> = fetched
        .iter()
        .map(|kind| ScopeKey::all(*kind, context))
        .collect();
    let results = join_all(scopes.iter().map(|scope| backend.list_resources(scope))).await;

    let mut objects: Vec<ResourceObject> = Vec::new();
    let mut resolver: HashMap<String, Vec<String>> = HashMap::new();
    let mut failures = 0usize;
    let mut first_error: Option<SyncError> = None;

    for (kind, result) in fetched.iter().zip(results) {
        match result {
            Ok(list) => {
                if *kind == "ReplicaSet" && resolve_replicasets {
                    // Resolver only: uid -> owning uids
                    for rs in &list.objects {
                        resolver.insert(rs.id.clone(), owner_uids(&rs.raw));
                    }
                } else {
                    objects.extend(list.objects);
                }
            }
            Err(e) => {
                warn!(context = %context, kind = %kind, error = %e, "Skipping kind in topology");
                failures += 1;
                first_error.get_or_insert(e);
            }
        }
    }

    if failures == fetched.len()
        && let Some(e) = first_error
    {
        return Err(e);
    }

    let nodes: Vec<TopologyNode> = objects
        .iter()
        .map(|o| TopologyNode {
            id: o.id.clone(),
            kind: o.kind.clone(),
            namespace: o.namespace.clone(),
            name: o.name.clone(),
            status: o.status,
        })
        .collect();

    let edges = derive_edges(&objects, &resolver);

    debug!(
        context = %context,
        nodes = nodes.len(),
        edges = edges.len(),
        "Assembled topology payload"
    );

    Ok(TopologyGraph {
        nodes,
        edges,
        generated_at: Utc::now(),
        revision,
    })
}

fn owner_uids(raw: &Value) -> Vec<String> {
    raw.pointer("/metadata/ownerReferences")
        .and_then(|v| v.as_array())
        .map(|refs| {
            refs.iter()
                .filter_map(|r| r.get("uid").and_then(|u| u.as_str()))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn derive_edges(
    objects: &[ResourceObject],
    resolver: &HashMap<String, Vec<String>>,
) -> Vec<TopologyEdge> {
    let ids: HashSet<&str> = objects.iter().map(|o| o.id.as_str()).collect();
    let by_ref: HashMap<(&str, &str, &str), &str> = objects
        .iter()
        .map(|o| {
            (
                (
                    o.kind.as_str(),
                    o.namespace.as_deref().unwrap_or(""),
                    o.name.as_str(),
                ),
                o.id.as_str(),
            )
        })
        .collect();

    let mut pods_by_namespace: HashMap<&str, Vec<&ResourceObject>> = HashMap::new();
    for obj in objects.iter().filter(|o| o.kind == "Pod") {
        pods_by_namespace
            .entry(obj.namespace.as_deref().unwrap_or(""))
            .or_default()
            .push(obj);
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut edges: Vec<TopologyEdge> = Vec::new();
    let mut push = |edges: &mut Vec<TopologyEdge>, from: &str, to: &str, relation: EdgeRelation| {
        let edge = TopologyEdge::new(from, to, relation);
        if seen.insert(edge.id.clone()) {
            edges.push(edge);
        }
    };

    for obj in objects {
        // Ownership, resolved through excluded intermediaries
        for owner in owner_uids(&obj.raw) {
            if ids.contains(owner.as_str()) {
                push(&mut edges, &owner, &obj.id, EdgeRelation::Owns);
            } else if let Some(grandparents) = resolver.get(&owner) {
                for gp in grandparents {
                    if ids.contains(gp.as_str()) {
                        push(&mut edges, gp, &obj.id, EdgeRelation::Owns);
                    }
                }
            }
        }

        match obj.kind.as_str() {
            "Service" => {
                let Some(selector) = obj
                    .raw
                    .pointer("/spec/selector")
                    .and_then(|v| v.as_object())
                else {
                    continue;
                };
                if selector.is_empty() {
                    continue;
                }
                let ns = obj.namespace.as_deref().unwrap_or("");
                for pod in pods_by_namespace.get(ns).into_iter().flatten() {
                    if selector_matches(selector, &pod.raw) {
                        push(&mut edges, &obj.id, &pod.id, EdgeRelation::Selects);
                    }
                }
            }
            "Ingress" => {
                let ns = obj.namespace.as_deref().unwrap_or("");
                for service in backend_services(&obj.raw) {
                    if let Some(svc_id) = by_ref.get(&("Service", ns, service.as_str())) {
                        push(&mut edges, &obj.id, svc_id, EdgeRelation::RoutesTo);
                    }
                }
            }
            "Pod" => {
                let ns = obj.namespace.as_deref().unwrap_or("");
                for claim in claimed_volumes(&obj.raw) {
                    if let Some(pvc_id) =
                        by_ref.get(&("PersistentVolumeClaim", ns, claim.as_str()))
                    {
                        push(&mut edges, &obj.id, pvc_id, EdgeRelation::Mounts);
                    }
                }
            }
            _ => {}
        }
    }

    edges
}

/// Whether a pod's labels satisfy a service selector (subset match)
fn selector_matches(selector: &serde_json::Map<String, Value>, pod_raw: &Value) -> bool {
    let Some(labels) = pod_raw
        .pointer("/metadata/labels")
        .and_then(|v| v.as_object())
    else {
        return false;
    };
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|lv| lv == v))
}

/// Service names referenced by an ingress (rules plus default backend)
fn backend_services(raw: &Value) -> Vec<String> {
    let mut services = Vec::new();
    if let Some(name) = raw
        .pointer("/spec/defaultBackend/service/name")
        .and_then(|v| v.as_str())
    {
        services.push(name.to_string());
    }
    if let Some(rules) = raw.pointer("/spec/rules").and_then(|v| v.as_array()) {
        for rule in rules {
            if let Some(paths) = rule.pointer("/http/paths").and_then(|v| v.as_array()) {
                for path in paths {
                    if let Some(name) = path
                        .pointer("/backend/service/name")
                        .and_then(|v| v.as_str())
                    {
                        services.push(name.to_string());
                    }
                }
            }
        }
    }
    services
}

/// PVC names a pod mounts
fn claimed_volumes(raw: &Value) -> Vec<String> {
    raw.pointer("/spec/volumes")
        .and_then(|v| v.as_array())
        .map(|volumes| {
            volumes
                .iter()
                .filter_map(|v| {
                    v.pointer("/persistentVolumeClaim/claimName")
                        .and_then(|c| c.as_str())
                })
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::backend::testing::FakeBackend;
    use crate::sync::ResourceStatus;
    use serde_json::json;

    fn obj(kind: &str, id: &str, name: &str, raw: Value) -> ResourceObject {
        ResourceObject {
            id: id.to_string(),
            kind: kind.to_string(),
            namespace: Some("default".to_string()),
            name: name.to_string(),
            status: ResourceStatus::Healthy,
            revision_marker: None,
            raw,
        }
    }

    fn options(pods: bool, replicasets: bool) -> GraphOptions {
        GraphOptions {
            include_pods: pods,
            include_storage: true,
            include_jobs: false,
            include_replicasets: replicasets,
            include_ingress: true,
        }
    }

    #[tokio::test]
    async fn test_owns_edges_from_owner_references() {
        let fake = FakeBackend::new();
        fake.set_objects(
            &ScopeKey::all("Deployment", "test"),
            vec![obj("Deployment", "d1", "api", json!({}))],
        );
        fake.set_objects(
            &ScopeKey::all("ReplicaSet", "test"),
            vec![obj(
                "ReplicaSet",
                "r1",
                "api-5c7",
                json!({"metadata": {"ownerReferences": [{"uid": "d1", "kind": "Deployment"}]}}),
            )],
        );
        fake.set_objects(
            &ScopeKey::all("Pod", "test"),
            vec![obj(
                "Pod",
                "p1",
                "api-5c7-x",
                json!({"metadata": {"ownerReferences": [{"uid": "r1", "kind": "ReplicaSet"}]}}),
            )],
        );

        let graph = assemble(&*fake, "test", &options(true, true), 1)
            .await
            .unwrap();

        assert_eq!(graph.nodes.len(), 3);
        let owns: Vec<(&str, &str)> = graph
            .edges
            .iter()
            .filter(|e| e.relation == EdgeRelation::Owns)
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        assert!(owns.contains(&("d1", "r1")));
        assert!(owns.contains(&("r1", "p1")));
    }

    #[tokio::test]
    async fn test_ownership_resolves_through_excluded_replicasets() {
        let fake = FakeBackend::new();
        fake.set_objects(
            &ScopeKey::all("Deployment", "test"),
            vec![obj("Deployment", "d1", "api", json!({}))],
        );
        fake.set_objects(
            &ScopeKey::all("ReplicaSet", "test"),
            vec![obj(
                "ReplicaSet",
                "r1",
                "api-5c7",
                json!({"metadata": {"ownerReferences": [{"uid": "d1", "kind": "Deployment"}]}}),
            )],
        );
        fake.set_objects(
            &ScopeKey::all("Pod", "test"),
            vec![obj(
                "Pod",
                "p1",
                "api-5c7-x",
                json!({"metadata": {"ownerReferences": [{"uid": "r1", "kind": "ReplicaSet"}]}}),
            )],
        );

        let graph = assemble(&*fake, "test", &options(true, false), 1)
            .await
            .unwrap();

        // No ReplicaSet node, but the Deployment owns the Pod directly
        assert!(graph.nodes.iter().all(|n| n.kind != "ReplicaSet"));
        let owns: Vec<(&str, &str)> = graph
            .edges
            .iter()
            .filter(|e| e.relation == EdgeRelation::Owns)
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        assert_eq!(owns, vec![("d1", "p1")]);
    }

    #[tokio::test]
    async fn test_service_selector_edges() {
        let fake = FakeBackend::new();
        fake.set_objects(
            &ScopeKey::all("Service", "test"),
            vec![obj(
                "Service",
                "s1",
                "web",
                json!({"spec": {"selector": {"app": "web"}}}),
            )],
        );
        fake.set_objects(
            &ScopeKey::all("Pod", "test"),
            vec![
                obj(
                    "Pod",
                    "p1",
                    "web-1",
                    json!({"metadata": {"labels": {"app": "web", "extra": "y"}}}),
                ),
                obj(
                    "Pod",
                    "p2",
                    "cache-1",
                    json!({"metadata": {"labels": {"app": "cache"}}}),
                ),
            ],
        );

        let graph = assemble(&*fake, "test", &options(true, true), 1)
            .await
            .unwrap();

        let selects: Vec<(&str, &str)> = graph
            .edges
            .iter()
            .filter(|e| e.relation == EdgeRelation::Selects)
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        assert_eq!(selects, vec![("s1", "p1")]);
    }

    #[tokio::test]
    async fn test_ingress_and_pvc_edges() {
        let fake = FakeBackend::new();
        fake.set_objects(
            &ScopeKey::all("Service", "test"),
            vec![obj("Service", "s1", "web", json!({}))],
        );
        fake.set_objects(
            &ScopeKey::all("Ingress", "test"),
            vec![obj(
                "Ingress",
                "i1",
                "web",
                json!({"spec": {"rules": [
                    {"http": {"paths": [{"backend": {"service": {"name": "web"}}}]}}
                ]}}),
            )],
        );
        fake.set_objects(
            &ScopeKey::all("PersistentVolumeClaim", "test"),
            vec![obj("PersistentVolumeClaim", "c1", "data", json!({}))],
        );
        fake.set_objects(
            &ScopeKey::all("Pod", "test"),
            vec![obj(
                "Pod",
                "p1",
                "db-0",
                json!({"spec": {"volumes": [
                    {"persistentVolumeClaim": {"claimName": "data"}}
                ]}}),
            )],
        );

        let graph = assemble(&*fake, "test", &options(true, true), 1)
            .await
            .unwrap();

        assert!(graph
            .edges
            .iter()
            .any(|e| e.relation == EdgeRelation::RoutesTo && e.from == "i1" && e.to == "s1"));
        assert!(graph
            .edges
            .iter()
            .any(|e| e.relation == EdgeRelation::Mounts && e.from == "p1" && e.to == "c1"));
    }

    #[tokio::test]
    async fn test_duplicate_backend_references_deduped() {
        let fake = FakeBackend::new();
        fake.set_objects(
            &ScopeKey::all("Service", "test"),
            vec![obj("Service", "s1", "web", json!({}))],
        );
        fake.set_objects(
            &ScopeKey::all("Ingress", "test"),
            vec![obj(
                "Ingress",
                "i1",
                "web",
                json!({"spec": {
                    "defaultBackend": {"service": {"name": "web"}},
                    "rules": [
                        {"http": {"paths": [
                            {"backend": {"service": {"name": "web"}}},
                            {"backend": {"service": {"name": "web"}}}
                        ]}}
                    ]
                }}),
            )],
        );

        let graph = assemble(&*fake, "test", &options(false, false), 1)
            .await
            .unwrap();

        let routes: Vec<_> = graph
            .edges
            .iter()
            .filter(|e| e.relation == EdgeRelation::RoutesTo)
            .collect();
        assert_eq!(routes.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_cluster_yields_empty_payload() {
        let fake = FakeBackend::new();
        let graph = assemble(&*fake, "test", &GraphOptions::default(), 7)
            .await
            .unwrap();
        assert!(graph.nodes.is_empty());
        assert!(graph.edges.is_empty());
        assert_eq!(graph.revision, 7);
    }
}
