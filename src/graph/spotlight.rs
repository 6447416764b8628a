// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Spotlight quick-search over the unfiltered node set.
//!
//! Deliberately decoupled from the main filter pipeline: the overlay
//! searches everything the engine knows about, ignoring kind toggles and
//! collapse state. A plain linear scan is fast enough at cluster scale;
//! the result cap is applied before any formatting work.

use super::TopologyNode;

/// Maximum results returned by one query
pub const RESULT_LIMIT: usize = 100;

/// Case-insensitive substring search against name, kind, and namespace.
/// Returns at most [`RESULT_LIMIT`] hits in node order; an empty query
/// returns nothing.
pub fn search<'a>(nodes: &'a [TopologyNode], query: &str) -> Vec<&'a TopologyNode> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    nodes
        .iter()
        .filter(|n| {
            n.name.to_lowercase().contains(&needle)
                || n.kind.to_lowercase().contains(&needle)
                || n.namespace
                    .as_deref()
                    .is_some_and(|ns| ns.to_lowercase().contains(&needle))
        })
        .take(RESULT_LIMIT)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ResourceStatus;

    fn node(id: &str, kind: &str, namespace: Option<&str>, name: &str) -> TopologyNode {
        TopologyNode {
            id: id.to_string(),
            kind: kind.to_string(),
            namespace: namespace.map(String::from),
            name: name.to_string(),
            status: ResourceStatus::Healthy,
        }
    }

    #[test]
    fn test_search_by_name_case_insensitive() {
        let nodes = vec![
            node("1", "Pod", Some("default"), "web-frontend"),
            node("2", "Pod", Some("default"), "cache-redis"),
        ];
        let hits = search(&nodes, "WEB");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "web-frontend");
    }

    #[test]
    fn test_search_by_kind_and_namespace() {
        let nodes = vec![
            node("1", "Deployment", Some("prod"), "api"),
            node("2", "Pod", Some("kube-system"), "coredns"),
        ];
        assert_eq!(search(&nodes, "deployment").len(), 1);
        assert_eq!(search(&nodes, "kube-sys").len(), 1);
    }

    #[test]
    fn test_empty_and_whitespace_query() {
        let nodes = vec![node("1", "Pod", None, "web")];
        assert!(search(&nodes, "").is_empty());
        assert!(search(&nodes, "   ").is_empty());
    }

    #[test]
    fn test_result_cap() {
        let nodes: Vec<TopologyNode> = (0..500)
            .map(|i| node(&i.to_string(), "Pod", Some("default"), &format!("web-{i}")))
            .collect();
        let hits = search(&nodes, "web");
        assert_eq!(hits.len(), RESULT_LIMIT);
        // First hits come in node order
        assert_eq!(hits[0].name, "web-0");
    }

    #[test]
    fn test_no_matches() {
        let nodes = vec![node("1", "Pod", Some("default"), "web")];
        assert!(search(&nodes, "database").is_empty());
    }
}
