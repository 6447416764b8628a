// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Topology graph payload model and the deterministic display pipeline.
//!
//! The payload ({nodes, edges, generated_at}) may be assembled client-side
//! from cached scopes or arrive pre-computed from a server; the builder only
//! depends on its shape. `builder::compute` turns a payload plus a
//! [`filter::FilterConfig`] into a positioned, decorated [`DisplayGraph`].

pub mod builder;
pub mod filter;
pub mod layout;
pub mod spotlight;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::ResourceStatus;

/// One node of the topology payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub status: ResourceStatus,
}

/// Relationship classes between topology nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeRelation {
    /// Controller to owned object (ownerReferences)
    Owns,
    /// Ingress to backing service
    RoutesTo,
    /// Service to the pods its selector matches
    Selects,
    /// Pod to a persistent volume claim it mounts
    Mounts,
}

impl std::fmt::Display for EdgeRelation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EdgeRelation::Owns => "owns",
            EdgeRelation::RoutesTo => "routesTo",
            EdgeRelation::Selects => "selects",
            EdgeRelation::Mounts => "mounts",
        };
        f.write_str(s)
    }
}

/// One directed edge of the topology payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    pub relation: EdgeRelation,
}

impl TopologyEdge {
    pub fn new(from: &str, to: &str, relation: EdgeRelation) -> Self {
        Self {
            id: format!("{}-{}-{}", relation, from, to),
            from: from.to_string(),
            to: to.to_string(),
            relation,
        }
    }
}

/// The raw topology payload, before any filtering or layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyGraph {
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<TopologyEdge>,
    pub generated_at: DateTime<Utc>,
    /// Producing fetch counter; paired with `generated_at` as the snapshot
    /// identity for memoized recomputation
    pub revision: u64,
}

/// Which optional kinds to include when assembling or requesting a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphOptions {
    pub include_pods: bool,
    pub include_storage: bool,
    pub include_jobs: bool,
    pub include_replicasets: bool,
    pub include_ingress: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            include_pods: true,
            include_storage: false,
            include_jobs: false,
            include_replicasets: false,
            include_ingress: true,
        }
    }
}
