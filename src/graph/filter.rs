// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Filter and grouping configuration for the display pipeline.
//!
//! Hashable so it can key the recompute memo together with the snapshot
//! identity; ordered collections keep the hash stable.

use std::collections::BTreeSet;

use super::TopologyNode;

/// View configuration applied on every recompute
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FilterConfig {
    /// Kinds toggled off in the view
    pub hidden_kinds: BTreeSet<String>,
    /// Restrict to one namespace; None shows all
    pub namespace: Option<String>,
    /// Free-text search, matched case-insensitively against
    /// name/kind/namespace (already debounced by the caller)
    pub search: String,
    /// When set (and the search string is non-empty), non-matching nodes
    /// are removed from the visible set entirely
    pub hide_non_matches: bool,
    /// Collapse objects owned by controller nodes into their controller
    pub group_controllers: bool,
    /// Controllers the user has expanded back open
    pub expanded_controllers: BTreeSet<String>,
}

impl FilterConfig {
    pub fn kind_visible(&self, kind: &str) -> bool {
        !self.hidden_kinds.contains(kind)
    }

    #[allow(dead_code)]
    pub fn hide_kind(&mut self, kind: impl Into<String>) {
        self.hidden_kinds.insert(kind.into());
    }

    #[allow(dead_code)]
    pub fn show_kind(&mut self, kind: &str) {
        self.hidden_kinds.remove(kind);
    }

    #[allow(dead_code)]
    pub fn toggle_expanded(&mut self, id: &str) {
        if !self.expanded_controllers.remove(id) {
            self.expanded_controllers.insert(id.to_string());
        }
    }

    /// Whether `node` passes the kind and namespace filters
    pub(crate) fn admits(&self, node: &TopologyNode) -> bool {
        if !self.kind_visible(&node.kind) {
            return false;
        }
        match (&self.namespace, &node.namespace) {
            (Some(wanted), Some(ns)) => wanted == ns,
            // Cluster-scoped nodes stay visible under a namespace filter
            (Some(_), None) => true,
            (None, _) => true,
        }
    }

    /// Case-insensitive substring match against name, kind, and namespace
    pub(crate) fn matches_search(&self, node: &TopologyNode) -> bool {
        if self.search.is_empty() {
            return true;
        }
        let needle = self.search.to_lowercase();
        node.name.to_lowercase().contains(&needle)
            || node.kind.to_lowercase().contains(&needle)
            || node
                .namespace
                .as_deref()
                .is_some_and(|ns| ns.to_lowercase().contains(&needle))
    }
}
