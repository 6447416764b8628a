// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Static registry of the resource kinds the dashboard handles.
//!
//! Built from compile-time k8s-openapi type metadata, so it automatically
//! stays in sync with the Kubernetes API version we build against. Each
//! kind carries the flags the sync and graph layers need (scope, controller,
//! watchability, topology layer) plus a registered status-extraction
//! function over the raw JSON. Heterogeneous kinds stay in one tagged
//! envelope; there is no per-kind type hierarchy.

use kube::discovery::ApiResource;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::sync::ResourceStatus;

/// Topology layer indices, ingress-to-node left-to-right
pub const LAYER_INGRESS: u8 = 0;
pub const LAYER_SERVICE: u8 = 1;
pub const LAYER_CONTROLLER: u8 = 2;
pub const LAYER_POD: u8 = 3;
pub const LAYER_STORAGE: u8 = 4;
pub const LAYER_NODE: u8 = 5;
pub const LAYER_OTHER: u8 = 6;

type StatusFn = fn(&Value) -> ResourceStatus;

/// Everything the engine needs to know about one resource kind
#[derive(Clone)]
pub struct KindDef {
    pub api_resource: ApiResource,
    pub namespaced: bool,
    /// Controller kinds own other objects and participate in collapse
    pub controller: bool,
    /// Whether a change stream can be opened for this kind
    pub watchable: bool,
    /// Topology layer hint for the layered layout
    pub layer: u8,
    pub aliases: &'static [&'static str],
    status: StatusFn,
}

impl std::fmt::Debug for KindDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindDef")
            .field("kind", &self.api_resource.kind)
            .field("namespaced", &self.namespaced)
            .field("controller", &self.controller)
            .field("layer", &self.layer)
            .finish()
    }
}

impl KindDef {
    pub fn kind(&self) -> &str {
        &self.api_resource.kind
    }

    /// Extract the health summary for an object of this kind
    pub fn extract_status(&self, raw: &Value) -> ResourceStatus {
        (self.status)(raw)
    }
}

/// Registry of handled kinds, looked up by kind name or alias
#[derive(Debug, Default)]
pub struct KindRegistry {
    by_kind: HashMap<String, KindDef>,
    alias_map: HashMap<String, String>,
}

impl KindRegistry {
    fn add(&mut self, def: KindDef) {
        for alias in def.aliases {
            self.alias_map
                .insert(alias.to_string(), def.kind().to_string());
        }
        self.alias_map
            .insert(def.kind().to_lowercase(), def.kind().to_string());
        self.by_kind.insert(def.kind().to_string(), def);
    }

    /// Look up by canonical kind name or alias (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&KindDef> {
        if let Some(def) = self.by_kind.get(name) {
            return Some(def);
        }
        let kind = self.alias_map.get(&name.to_lowercase())?;
        self.by_kind.get(kind)
    }

    /// All registered kinds, sorted by kind name
    pub fn list(&self) -> Vec<&KindDef> {
        let mut defs: Vec<_> = self.by_kind.values().collect();
        defs.sort_by(|a, b| a.kind().cmp(b.kind()));
        defs
    }
}

/// The global kind registry
pub fn registry() -> &'static KindRegistry {
    static REGISTRY: OnceLock<KindRegistry> = OnceLock::new();
    REGISTRY.get_or_init(build_registry)
}

/// Whether `kind` is a controller kind (owns other objects)
pub fn is_controller_kind(kind: &str) -> bool {
    registry().get(kind).is_some_and(|d| d.controller)
}

/// Topology layer for `kind`; unknown kinds land in the "other" layer
pub fn topology_layer(kind: &str) -> u8 {
    registry().get(kind).map_or(LAYER_OTHER, |d| d.layer)
}

fn build_registry() -> KindRegistry {
    use k8s_openapi::api::{
        apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
        batch::v1::{CronJob, Job},
        core::v1::{
            ConfigMap, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod, Secret,
            Service,
        },
        networking::v1::Ingress,
    };
    use kube::Resource;

    let mut registry = KindRegistry::default();

    // Build an ApiResource from compile-time type info via kube::Resource.
    // Scope is stated explicitly since the trait keeps it as an associated
    // type.
    macro_rules! add_kind {
        ($type:ty, namespaced, $controller:expr, $layer:expr, [$($alias:expr),* $(,)?]) => {
            add_kind!(@inner $type, true, $controller, $layer, [$($alias),*])
        };
        ($type:ty, cluster, $controller:expr, $layer:expr, [$($alias:expr),* $(,)?]) => {
            add_kind!(@inner $type, false, $controller, $layer, [$($alias),*])
        };
        (@inner $type:ty, $namespaced:expr, $controller:expr, $layer:expr, [$($alias:expr),* $(,)?]) => {{
            let ar = ApiResource {
                group: <$type>::group(&()).to_string(),
                version: <$type>::version(&()).to_string(),
                api_version: <$type>::api_version(&()).to_string(),
                kind: <$type>::kind(&()).to_string(),
                plural: <$type>::plural(&()).to_string(),
            };
            registry.add(KindDef {
                api_resource: ar,
                namespaced: $namespaced,
                controller: $controller,
                watchable: true,
                layer: $layer,
                aliases: &[$($alias),*],
                status: status_fn_for(<$type>::kind(&()).as_ref()),
            });
        }};
    }

    add_kind!(Pod, namespaced, false, LAYER_POD, ["po", "pods"]);
    add_kind!(Deployment, namespaced, true, LAYER_CONTROLLER, ["deploy", "deployments"]);
    add_kind!(ReplicaSet, namespaced, true, LAYER_CONTROLLER, ["rs", "replicasets"]);
    add_kind!(StatefulSet, namespaced, true, LAYER_CONTROLLER, ["sts", "statefulsets"]);
    add_kind!(DaemonSet, namespaced, true, LAYER_CONTROLLER, ["ds", "daemonsets"]);
    add_kind!(Job, namespaced, true, LAYER_CONTROLLER, ["jobs"]);
    add_kind!(CronJob, namespaced, true, LAYER_CONTROLLER, ["cj", "cronjobs"]);
    add_kind!(Service, namespaced, false, LAYER_SERVICE, ["svc", "services"]);
    add_kind!(Ingress, namespaced, false, LAYER_INGRESS, ["ing", "ingresses"]);
    add_kind!(ConfigMap, namespaced, false, LAYER_OTHER, ["cm", "configmaps"]);
    add_kind!(Secret, namespaced, false, LAYER_OTHER, ["secrets"]);
    add_kind!(
        PersistentVolumeClaim,
        namespaced,
        false,
        LAYER_STORAGE,
        ["pvc", "pvcs", "persistentvolumeclaims"]
    );
    add_kind!(
        PersistentVolume,
        cluster,
        false,
        LAYER_STORAGE,
        ["pv", "pvs", "persistentvolumes"]
    );
    add_kind!(Node, cluster, false, LAYER_NODE, ["no", "nodes"]);
    add_kind!(Namespace, cluster, false, LAYER_OTHER, ["ns", "namespaces"]);

    registry
}

fn status_fn_for(kind: &str) -> StatusFn {
    match kind {
        "Pod" => pod_status,
        "Deployment" | "StatefulSet" | "ReplicaSet" => replicated_status,
        "DaemonSet" => daemonset_status,
        "Job" => job_status,
        "CronJob" => cronjob_status,
        "PersistentVolumeClaim" => pvc_status,
        "PersistentVolume" => pv_status,
        "Node" => node_status,
        _ => exists_status,
    }
}

fn str_at<'a>(raw: &'a Value, pointer: &str) -> Option<&'a str> {
    raw.pointer(pointer).and_then(|v| v.as_str())
}

fn int_at(raw: &Value, pointer: &str) -> i64 {
    raw.pointer(pointer).and_then(|v| v.as_i64()).unwrap_or(0)
}

fn pod_status(raw: &Value) -> ResourceStatus {
    // A waiting container in a crash loop trumps the phase
    if let Some(statuses) = raw
        .pointer("/status/containerStatuses")
        .and_then(|v| v.as_array())
    {
        for cs in statuses {
            if let Some(reason) = str_at(cs, "/state/waiting/reason")
                && matches!(reason, "CrashLoopBackOff" | "ImagePullBackOff" | "ErrImagePull")
            {
                return ResourceStatus::Degraded;
            }
        }
    }

    match str_at(raw, "/status/phase") {
        Some("Running") | Some("Succeeded") => ResourceStatus::Healthy,
        Some("Pending") => ResourceStatus::Progressing,
        Some("Failed") => ResourceStatus::Failed,
        _ => ResourceStatus::Unknown,
    }
}

fn replicated_status(raw: &Value) -> ResourceStatus {
    let desired = raw
        .pointer("/spec/replicas")
        .and_then(|v| v.as_i64())
        .unwrap_or(1);
    let ready = int_at(raw, "/status/readyReplicas");
    if ready >= desired {
        ResourceStatus::Healthy
    } else if ready == 0 && desired > 0 {
        ResourceStatus::Degraded
    } else {
        ResourceStatus::Progressing
    }
}

fn daemonset_status(raw: &Value) -> ResourceStatus {
    let desired = int_at(raw, "/status/desiredNumberScheduled");
    let ready = int_at(raw, "/status/numberReady");
    if ready >= desired {
        ResourceStatus::Healthy
    } else if ready == 0 && desired > 0 {
        ResourceStatus::Degraded
    } else {
        ResourceStatus::Progressing
    }
}

fn job_status(raw: &Value) -> ResourceStatus {
    if int_at(raw, "/status/failed") > 0 {
        return ResourceStatus::Failed;
    }
    let completions = raw
        .pointer("/spec/completions")
        .and_then(|v| v.as_i64())
        .unwrap_or(1);
    if int_at(raw, "/status/succeeded") >= completions {
        ResourceStatus::Healthy
    } else {
        ResourceStatus::Progressing
    }
}

fn cronjob_status(raw: &Value) -> ResourceStatus {
    if raw
        .pointer("/spec/suspend")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        ResourceStatus::Degraded
    } else {
        ResourceStatus::Healthy
    }
}

fn pvc_status(raw: &Value) -> ResourceStatus {
    match str_at(raw, "/status/phase") {
        Some("Bound") => ResourceStatus::Healthy,
        Some("Pending") => ResourceStatus::Progressing,
        Some("Lost") => ResourceStatus::Failed,
        _ => ResourceStatus::Unknown,
    }
}

fn pv_status(raw: &Value) -> ResourceStatus {
    match str_at(raw, "/status/phase") {
        Some("Bound") | Some("Available") => ResourceStatus::Healthy,
        Some("Released") => ResourceStatus::Degraded,
        Some("Failed") => ResourceStatus::Failed,
        _ => ResourceStatus::Unknown,
    }
}

fn node_status(raw: &Value) -> ResourceStatus {
    if let Some(conditions) = raw.pointer("/status/conditions").and_then(|v| v.as_array()) {
        for cond in conditions {
            if str_at(cond, "/type") == Some("Ready") {
                return if str_at(cond, "/status") == Some("True") {
                    ResourceStatus::Healthy
                } else {
                    ResourceStatus::Degraded
                };
            }
        }
    }
    ResourceStatus::Unknown
}

/// Kinds with no meaningful runtime state are healthy by existing
fn exists_status(_raw: &Value) -> ResourceStatus {
    ResourceStatus::Healthy
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_lookup_by_kind_and_alias() {
        let reg = registry();
        assert_eq!(reg.get("Pod").unwrap().kind(), "Pod");
        assert_eq!(reg.get("pods").unwrap().kind(), "Pod");
        assert_eq!(reg.get("po").unwrap().kind(), "Pod");
        assert_eq!(reg.get("deploy").unwrap().kind(), "Deployment");
        assert!(reg.get("certificates").is_none());
    }

    #[test]
    fn test_api_resource_metadata() {
        let deploy = registry().get("Deployment").unwrap();
        assert_eq!(deploy.api_resource.group, "apps");
        assert_eq!(deploy.api_resource.version, "v1");
        assert_eq!(deploy.api_resource.plural, "deployments");

        let pod = registry().get("Pod").unwrap();
        assert_eq!(pod.api_resource.group, "");
        assert_eq!(pod.api_resource.api_version, "v1");
    }

    #[test]
    fn test_controller_flags() {
        assert!(is_controller_kind("Deployment"));
        assert!(is_controller_kind("ReplicaSet"));
        assert!(is_controller_kind("CronJob"));
        assert!(!is_controller_kind("Pod"));
        assert!(!is_controller_kind("Service"));
        assert!(!is_controller_kind("SomeUnknownKind"));
    }

    #[test]
    fn test_topology_layers() {
        assert_eq!(topology_layer("Ingress"), LAYER_INGRESS);
        assert_eq!(topology_layer("Service"), LAYER_SERVICE);
        assert_eq!(topology_layer("Deployment"), LAYER_CONTROLLER);
        assert_eq!(topology_layer("Pod"), LAYER_POD);
        assert_eq!(topology_layer("PersistentVolumeClaim"), LAYER_STORAGE);
        assert_eq!(topology_layer("Node"), LAYER_NODE);
        assert_eq!(topology_layer("ConfigMap"), LAYER_OTHER);
        assert_eq!(topology_layer("SomeCustomResource"), LAYER_OTHER);
    }

    #[test]
    fn test_cluster_scoped_kinds() {
        assert!(!registry().get("Node").unwrap().namespaced);
        assert!(!registry().get("PersistentVolume").unwrap().namespaced);
        assert!(registry().get("Pod").unwrap().namespaced);
    }

    #[test]
    fn test_pod_status_phases() {
        let def = registry().get("Pod").unwrap();
        let running = json!({"status": {"phase": "Running"}});
        let pending = json!({"status": {"phase": "Pending"}});
        let failed = json!({"status": {"phase": "Failed"}});
        assert_eq!(def.extract_status(&running), ResourceStatus::Healthy);
        assert_eq!(def.extract_status(&pending), ResourceStatus::Progressing);
        assert_eq!(def.extract_status(&failed), ResourceStatus::Failed);
        assert_eq!(def.extract_status(&json!({})), ResourceStatus::Unknown);
    }

    #[test]
    fn test_pod_crashloop_trumps_phase() {
        let def = registry().get("Pod").unwrap();
        let crashing = json!({
            "status": {
                "phase": "Running",
                "containerStatuses": [
                    {"state": {"waiting": {"reason": "CrashLoopBackOff"}}}
                ]
            }
        });
        assert_eq!(def.extract_status(&crashing), ResourceStatus::Degraded);
    }

    #[test]
    fn test_deployment_status_replicas() {
        let def = registry().get("Deployment").unwrap();
        let healthy = json!({"spec": {"replicas": 3}, "status": {"readyReplicas": 3}});
        let progressing = json!({"spec": {"replicas": 3}, "status": {"readyReplicas": 1}});
        let degraded = json!({"spec": {"replicas": 3}, "status": {}});
        assert_eq!(def.extract_status(&healthy), ResourceStatus::Healthy);
        assert_eq!(def.extract_status(&progressing), ResourceStatus::Progressing);
        assert_eq!(def.extract_status(&degraded), ResourceStatus::Degraded);
    }

    #[test]
    fn test_job_and_cronjob_status() {
        let job = registry().get("Job").unwrap();
        let done = json!({"spec": {"completions": 1}, "status": {"succeeded": 1}});
        let failed = json!({"status": {"failed": 2}});
        assert_eq!(job.extract_status(&done), ResourceStatus::Healthy);
        assert_eq!(job.extract_status(&failed), ResourceStatus::Failed);

        let cron = registry().get("CronJob").unwrap();
        let suspended = json!({"spec": {"suspend": true}});
        assert_eq!(cron.extract_status(&suspended), ResourceStatus::Degraded);
        assert_eq!(cron.extract_status(&json!({})), ResourceStatus::Healthy);
    }

    #[test]
    fn test_node_ready_condition() {
        let def = registry().get("Node").unwrap();
        let ready = json!({"status": {"conditions": [
            {"type": "MemoryPressure", "status": "False"},
            {"type": "Ready", "status": "True"}
        ]}});
        let not_ready = json!({"status": {"conditions": [
            {"type": "Ready", "status": "False"}
        ]}});
        assert_eq!(def.extract_status(&ready), ResourceStatus::Healthy);
        assert_eq!(def.extract_status(&not_ready), ResourceStatus::Degraded);
    }

    #[test]
    fn test_config_kinds_healthy_by_existence() {
        let cm = registry().get("ConfigMap").unwrap();
        assert_eq!(cm.extract_status(&json!({})), ResourceStatus::Healthy);
    }
}
