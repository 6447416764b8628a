// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Deterministic topology display pipeline.
//!
//! `compute` is a pure function of (payload, filter config): kind and
//! namespace filtering, search matching, controller collapse, layering,
//! layout, and decoration, in that order. Identical inputs always produce
//! identical output, including node positions. [`GraphComputer`] memoizes
//! the result on the snapshot identity plus the config so steady-state
//! watch churn only recomputes when the payload actually changed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::kubernetes::kinds;

use super::filter::FilterConfig;
use super::layout;
use super::{EdgeRelation, TopologyEdge, TopologyGraph, TopologyNode};

/// A visible node with its assigned position and decorations
#[derive(Debug, Clone, PartialEq)]
pub struct PositionedNode {
    pub node: TopologyNode,
    pub x: f64,
    pub y: f64,
    pub layer: u8,
    /// True when a search is active and this node matches it
    pub matched: bool,
    /// Badge: direct owned children hidden by controller collapse
    pub hidden_children: usize,
    /// Whether the node offers a collapse/expand affordance
    pub expandable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeStyle {
    Solid,
    Dashed,
    Dotted,
}

impl EdgeStyle {
    fn for_relation(relation: EdgeRelation) -> Self {
        match relation {
            EdgeRelation::Owns => EdgeStyle::Solid,
            EdgeRelation::RoutesTo | EdgeRelation::Selects => EdgeStyle::Dashed,
            EdgeRelation::Mounts => EdgeStyle::Dotted,
        }
    }
}

/// An edge between two visible nodes, styled for rendering
#[derive(Debug, Clone, PartialEq)]
pub struct StyledEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    pub relation: EdgeRelation,
    pub style: EdgeStyle,
    /// True when a search is active and neither endpoint matches
    pub dimmed: bool,
}

/// The filtered, positioned, decorated graph ready for rendering.
/// Always rebuilt from (payload, config); never mutated in place.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DisplayGraph {
    pub nodes: Vec<PositionedNode>,
    pub edges: Vec<StyledEdge>,
}

#[allow(dead_code)]
impl DisplayGraph {
    pub fn visible_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.node.id.as_str()).collect()
    }

    pub fn node(&self, id: &str) -> Option<&PositionedNode> {
        self.nodes.iter().find(|n| n.node.id == id)
    }
}

/// Build the display graph from a payload and a filter configuration
pub fn compute(graph: &TopologyGraph, cfg: &FilterConfig) -> DisplayGraph {
    let by_id: HashMap<&str, &TopologyNode> =
        graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    // Step 1: kind and namespace filters
    let mut visible: HashSet<&str> = graph
        .nodes
        .iter()
        .filter(|n| cfg.admits(n))
        .map(|n| n.id.as_str())
        .collect();

    // Step 2: search match set
    let matches: HashSet<&str> = if cfg.search.is_empty() {
        HashSet::new()
    } else {
        graph
            .nodes
            .iter()
            .filter(|n| cfg.matches_search(n))
            .map(|n| n.id.as_str())
            .collect()
    };

    // Edges with both endpoints present in the payload; anything dangling
    // is dropped here and never reaches layout
    let mut dropped = 0usize;
    let valid_edges: Vec<&TopologyEdge> = graph
        .edges
        .iter()
        .filter(|e| {
            let ok = by_id.contains_key(e.from.as_str()) && by_id.contains_key(e.to.as_str());
            if !ok {
                dropped += 1;
            }
            ok
        })
        .collect();
    if dropped > 0 {
        trace!(dropped, "dropped dangling edges");
    }

    // Step 3: controller collapse, to a fixpoint so a controller hidden by
    // its own owner stops hiding its children
    let mut owns: Vec<(&str, &str)> = valid_edges
        .iter()
        .filter(|e| e.relation == EdgeRelation::Owns)
        .map(|e| (e.from.as_str(), e.to.as_str()))
        .collect();
    owns.sort_unstable();

    let collapses = |id: &str, hidden: &HashSet<&str>| -> bool {
        visible.contains(id)
            && !hidden.contains(id)
            && by_id
                .get(id)
                .is_some_and(|n| kinds::is_controller_kind(&n.kind))
            && !cfg.expanded_controllers.contains(id)
    };

    let mut hidden: HashSet<&str> = HashSet::new();
    let mut badges: HashMap<&str, usize> = HashMap::new();
    if cfg.group_controllers {
        for _ in 0..=graph.nodes.len() {
            let mut next: HashSet<&str> = HashSet::new();
            for &(c, t) in &owns {
                if collapses(c, &hidden) && visible.contains(t) {
                    next.insert(t);
                }
            }
            if next == hidden {
                break;
            }
            hidden = next;
        }
        for &(c, t) in &owns {
            if hidden.contains(t) && collapses(c, &hidden) {
                *badges.entry(c).or_insert(0) += 1;
            }
        }
        visible.retain(|id| !hidden.contains(id));
    }

    // Step 4: hideNonMatches intersects with the match set
    if cfg.hide_non_matches && !cfg.search.is_empty() {
        visible.retain(|id| matches.contains(id));
    }

    // Steps 5-6: layer assignment and layout, over a deterministic node
    // order so coordinates are stable for identical inputs
    let mut ordered: Vec<&TopologyNode> = visible.iter().map(|id| by_id[id]).collect();
    ordered.sort_by(|a, b| {
        (
            kinds::topology_layer(&a.kind),
            a.kind.as_str(),
            a.namespace.as_deref(),
            a.name.as_str(),
            a.id.as_str(),
        )
            .cmp(&(
                kinds::topology_layer(&b.kind),
                b.kind.as_str(),
                b.namespace.as_deref(),
                b.name.as_str(),
                b.id.as_str(),
            ))
    });

    let index_of: HashMap<&str, usize> = ordered
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();
    let layers: Vec<u8> = ordered
        .iter()
        .map(|n| kinds::topology_layer(&n.kind))
        .collect();
    let layout_edges: Vec<(usize, usize)> = valid_edges
        .iter()
        .filter_map(|e| {
            Some((
                *index_of.get(e.from.as_str())?,
                *index_of.get(e.to.as_str())?,
            ))
        })
        .collect();
    let coords = layout::layered_layout(&layers, &layout_edges);

    // Controllers with any direct owned child in the payload offer the
    // collapse/expand affordance
    let has_owned_children: HashSet<&str> = owns.iter().map(|&(c, _)| c).collect();

    // Step 7: decoration
    let nodes: Vec<PositionedNode> = ordered
        .iter()
        .enumerate()
        .map(|(i, n)| PositionedNode {
            node: (*n).clone(),
            x: coords[i].0,
            y: coords[i].1,
            layer: layers[i],
            matched: !cfg.search.is_empty() && matches.contains(n.id.as_str()),
            hidden_children: badges.get(n.id.as_str()).copied().unwrap_or(0),
            expandable: cfg.group_controllers
                && kinds::is_controller_kind(&n.kind)
                && has_owned_children.contains(n.id.as_str()),
        })
        .collect();

    let edges: Vec<StyledEdge> = valid_edges
        .iter()
        .filter(|e| index_of.contains_key(e.from.as_str()) && index_of.contains_key(e.to.as_str()))
        .map(|e| StyledEdge {
            id: e.id.clone(),
            from: e.from.clone(),
            to: e.to.clone(),
            relation: e.relation,
            style: EdgeStyle::for_relation(e.relation),
            dimmed: !cfg.search.is_empty()
                && !matches.contains(e.from.as_str())
                && !matches.contains(e.to.as_str()),
        })
        .collect();

    DisplayGraph { nodes, edges }
}

struct MemoEntry {
    revision: u64,
    generated_at: DateTime<Utc>,
    cfg: FilterConfig,
    result: Arc<DisplayGraph>,
}

/// Memoizing wrapper around [`compute`].
///
/// Under steady-state watch churn the renderer asks for the display graph
/// every tick; the memo keys on (snapshot identity, config) so identical
/// requests return the cached `Arc` without recomputing.
#[derive(Default)]
pub struct GraphComputer {
    memo: Mutex<Option<MemoEntry>>,
    computations: AtomicUsize,
}

// One per open view; the one-shot CLI calls compute() directly
#[allow(dead_code)]
impl GraphComputer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&self, graph: &TopologyGraph, cfg: &FilterConfig) -> Arc<DisplayGraph> {
        {
            let memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = memo.as_ref()
                && entry.revision == graph.revision
                && entry.generated_at == graph.generated_at
                && entry.cfg == *cfg
            {
                return Arc::clone(&entry.result);
            }
        }

        self.computations.fetch_add(1, Ordering::Relaxed);
        let result = Arc::new(compute(graph, cfg));
        let mut memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
        *memo = Some(MemoEntry {
            revision: graph.revision,
            generated_at: graph.generated_at,
            cfg: cfg.clone(),
            result: Arc::clone(&result),
        });
        result
    }

    /// Number of actual recomputations performed
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ResourceStatus;
    use std::collections::BTreeSet;

    fn node(id: &str, kind: &str, name: &str) -> TopologyNode {
        TopologyNode {
            id: id.to_string(),
            kind: kind.to_string(),
            namespace: Some("default".to_string()),
            name: name.to_string(),
            status: ResourceStatus::Healthy,
        }
    }

    fn payload(nodes: Vec<TopologyNode>, edges: Vec<TopologyEdge>) -> TopologyGraph {
        TopologyGraph {
            nodes,
            edges,
            generated_at: "2025-06-01T00:00:00Z".parse().unwrap(),
            revision: 1,
        }
    }

    #[test]
    fn test_compute_is_deterministic() {
        let graph = payload(
            vec![
                node("d1", "Deployment", "api"),
                node("p1", "Pod", "api-1"),
                node("p2", "Pod", "api-2"),
                node("s1", "Service", "api"),
            ],
            vec![
                TopologyEdge::new("d1", "p1", EdgeRelation::Owns),
                TopologyEdge::new("d1", "p2", EdgeRelation::Owns),
                TopologyEdge::new("s1", "p1", EdgeRelation::Selects),
            ],
        );
        let cfg = FilterConfig::default();

        let a = compute(&graph, &cfg);
        let b = compute(&graph, &cfg);
        assert_eq!(a, b);
        assert_eq!(a.visible_ids(), b.visible_ids());
    }

    #[test]
    fn test_kind_filter_drops_nodes_and_edges() {
        let graph = payload(
            vec![node("d1", "Deployment", "api"), node("p1", "Pod", "api-1")],
            vec![TopologyEdge::new("d1", "p1", EdgeRelation::Owns)],
        );
        let mut cfg = FilterConfig::default();
        cfg.hide_kind("Pod");

        let display = compute(&graph, &cfg);
        assert_eq!(display.visible_ids(), vec!["d1"]);
        assert!(display.edges.is_empty());
    }

    #[test]
    fn test_controller_collapse_scenario() {
        // The canonical scenario: a Deployment owning a Pod collapses to
        // just the Deployment with a badge of 1; expanding it restores
        // the Pod.
        let graph = payload(
            vec![node("d1", "Deployment", "api"), node("p1", "Pod", "api-1")],
            vec![TopologyEdge::new("d1", "p1", EdgeRelation::Owns)],
        );
        let cfg = FilterConfig {
            group_controllers: true,
            ..Default::default()
        };

        let collapsed = compute(&graph, &cfg);
        assert_eq!(collapsed.visible_ids(), vec!["d1"]);
        let d1 = collapsed.node("d1").unwrap();
        assert_eq!(d1.hidden_children, 1);
        assert!(d1.expandable);

        let expanded_cfg = FilterConfig {
            group_controllers: true,
            expanded_controllers: BTreeSet::from(["d1".to_string()]),
            ..Default::default()
        };
        let expanded = compute(&graph, &expanded_cfg);
        let mut ids = expanded.visible_ids();
        ids.sort();
        assert_eq!(ids, vec!["d1", "p1"]);
        assert_eq!(expanded.node("d1").unwrap().hidden_children, 0);
    }

    #[test]
    fn test_collapse_off_restores_everything() {
        let graph = payload(
            vec![node("d1", "Deployment", "api"), node("p1", "Pod", "api-1")],
            vec![TopologyEdge::new("d1", "p1", EdgeRelation::Owns)],
        );
        let cfg = FilterConfig::default();
        let display = compute(&graph, &cfg);
        assert_eq!(display.nodes.len(), 2);
    }

    #[test]
    fn test_collapse_chain_fixpoint() {
        // Deployment owns ReplicaSet owns Pod. The ReplicaSet collapses
        // into the Deployment; once hidden it no longer hides its own
        // Pod (its owner is not visible anymore).
        let graph = payload(
            vec![
                node("d1", "Deployment", "api"),
                node("r1", "ReplicaSet", "api-5c7"),
                node("p1", "Pod", "api-5c7-x"),
            ],
            vec![
                TopologyEdge::new("d1", "r1", EdgeRelation::Owns),
                TopologyEdge::new("r1", "p1", EdgeRelation::Owns),
            ],
        );
        let cfg = FilterConfig {
            group_controllers: true,
            ..Default::default()
        };

        let display = compute(&graph, &cfg);
        let mut ids = display.visible_ids();
        ids.sort();
        assert_eq!(ids, vec!["d1", "p1"]);
        assert_eq!(display.node("d1").unwrap().hidden_children, 1);
    }

    #[test]
    fn test_search_filter_scenario() {
        let graph = payload(
            vec![
                node("n1", "Pod", "web-frontend"),
                node("n2", "Pod", "cache-redis"),
            ],
            vec![],
        );
        let cfg = FilterConfig {
            search: "web".to_string(),
            hide_non_matches: true,
            ..Default::default()
        };

        let display = compute(&graph, &cfg);
        assert_eq!(display.visible_ids(), vec!["n1"]);
        assert!(display.node("n1").unwrap().matched);
    }

    #[test]
    fn test_search_without_hiding_dims_edges() {
        let graph = payload(
            vec![
                node("s1", "Service", "web"),
                node("p1", "Pod", "web-1"),
                node("p2", "Pod", "cache-1"),
            ],
            vec![
                TopologyEdge::new("s1", "p1", EdgeRelation::Selects),
                TopologyEdge::new("s1", "p2", EdgeRelation::Selects),
            ],
        );
        let cfg = FilterConfig {
            search: "zzz-no-match".to_string(),
            ..Default::default()
        };

        let display = compute(&graph, &cfg);
        assert_eq!(display.nodes.len(), 3);
        assert!(display.nodes.iter().all(|n| !n.matched));
        assert!(display.edges.iter().all(|e| e.dimmed));
    }

    #[test]
    fn test_dangling_edge_dropped_silently() {
        let graph = payload(
            vec![node("p1", "Pod", "web-1")],
            vec![TopologyEdge::new("p1", "ghost", EdgeRelation::Owns)],
        );
        let display = compute(&graph, &FilterConfig::default());
        assert_eq!(display.nodes.len(), 1);
        assert!(display.edges.is_empty());
    }

    #[test]
    fn test_layering_left_to_right() {
        let graph = payload(
            vec![
                node("i1", "Ingress", "web"),
                node("s1", "Service", "web"),
                node("d1", "Deployment", "web"),
                node("p1", "Pod", "web-1"),
            ],
            vec![
                TopologyEdge::new("i1", "s1", EdgeRelation::RoutesTo),
                TopologyEdge::new("s1", "p1", EdgeRelation::Selects),
                TopologyEdge::new("d1", "p1", EdgeRelation::Owns),
            ],
        );
        let display = compute(&graph, &FilterConfig::default());

        let x = |id: &str| display.node(id).unwrap().x;
        assert!(x("i1") < x("s1"));
        assert!(x("s1") < x("d1"));
        assert!(x("d1") < x("p1"));
    }

    #[test]
    fn test_edge_styles_by_relation() {
        let graph = payload(
            vec![
                node("d1", "Deployment", "api"),
                node("p1", "Pod", "api-1"),
                node("c1", "PersistentVolumeClaim", "data"),
            ],
            vec![
                TopologyEdge::new("d1", "p1", EdgeRelation::Owns),
                TopologyEdge::new("p1", "c1", EdgeRelation::Mounts),
            ],
        );
        let display = compute(&graph, &FilterConfig::default());
        let style = |rel: EdgeRelation| {
            display
                .edges
                .iter()
                .find(|e| e.relation == rel)
                .unwrap()
                .style
        };
        assert_eq!(style(EdgeRelation::Owns), EdgeStyle::Solid);
        assert_eq!(style(EdgeRelation::Mounts), EdgeStyle::Dotted);
    }

    #[test]
    fn test_memoized_recompute_only_on_change() {
        let graph = payload(
            vec![node("p1", "Pod", "web-1")],
            vec![],
        );
        let cfg = FilterConfig::default();
        let computer = GraphComputer::new();

        let a = computer.compute(&graph, &cfg);
        let b = computer.compute(&graph, &cfg);
        assert_eq!(computer.computations(), 1);
        assert!(Arc::ptr_eq(&a, &b));

        // New snapshot identity: recompute
        let mut changed = graph.clone();
        changed.revision = 2;
        computer.compute(&changed, &cfg);
        assert_eq!(computer.computations(), 2);

        // Different config against the same snapshot: recompute
        let mut other_cfg = cfg.clone();
        other_cfg.search = "web".to_string();
        computer.compute(&changed, &other_cfg);
        assert_eq!(computer.computations(), 3);
    }
}
