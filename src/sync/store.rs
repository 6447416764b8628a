// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! In-memory object store for one scope.
//!
//! Pure data structure: no I/O, no timers. All writes for a scope funnel
//! through its synchronizer; reads hand out `Arc` clones so concurrent
//! iteration never observes a torn state. The store tracks a revision
//! counter bumped on every effective mutation, which downstream consumers
//! use both for change notification and as the snapshot identity of the
//! graph memo.

use std::collections::HashMap;
use std::sync::Arc;

use super::{ChangeEvent, ResourceObject};

/// Keyed collection of resource objects for one scope
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: HashMap<String, Arc<ResourceObject>>,
    revision: u64,
}

/// Whether an incoming revision marker supersedes the existing one.
///
/// Absence of a marker on either side means "always apply". Markers that
/// parse as integers are ordered numerically (the common case); otherwise
/// any differing marker is treated as newer and an equal marker as a
/// replay.
fn marker_is_newer(incoming: Option<&str>, existing: Option<&str>) -> bool {
    match (incoming, existing) {
        (Some(inc), Some(cur)) => {
            if inc == cur {
                return false;
            }
            match (inc.parse::<u64>(), cur.parse::<u64>()) {
                (Ok(i), Ok(c)) => i > c,
                _ => true,
            }
        }
        _ => true,
    }
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one change event. Returns true if the store was modified.
    ///
    /// Upserts are idempotent: a replayed event whose revision marker is
    /// not newer than the stored one is a no-op. Deleting an absent id is
    /// a no-op, not an error.
    pub fn apply(&mut self, event: ChangeEvent) -> bool {
        match event {
            ChangeEvent::Added(obj) | ChangeEvent::Modified(obj) => {
                if let Some(existing) = self.objects.get(&obj.id)
                    && !marker_is_newer(
                        obj.revision_marker.as_deref(),
                        existing.revision_marker.as_deref(),
                    )
                {
                    return false;
                }
                self.objects.insert(obj.id.clone(), Arc::new(obj));
                self.revision += 1;
                true
            }
            ChangeEvent::Deleted(obj) => {
                if self.objects.remove(&obj.id).is_some() {
                    self.revision += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Reconcile the store to an authoritative full list.
    ///
    /// Any id present in the store but absent from `objects` is removed;
    /// this is the mechanism that heals missed watch events.
    pub fn replace_all(&mut self, objects: Vec<ResourceObject>) {
        self.objects = objects
            .into_iter()
            .map(|o| (o.id.clone(), Arc::new(o)))
            .collect();
        self.revision += 1;
    }

    /// Immutable snapshot, ordered by (namespace, name, id) for stable
    /// display and deterministic downstream computation
    pub fn snapshot(&self) -> Vec<Arc<ResourceObject>> {
        let mut objects: Vec<_> = self.objects.values().cloned().collect();
        objects.sort_by(|a, b| {
            (a.namespace.as_deref(), a.name.as_str(), a.id.as_str()).cmp(&(
                b.namespace.as_deref(),
                b.name.as_str(),
                b.id.as_str(),
            ))
        });
        objects
    }

    #[allow(dead_code)]
    pub fn get(&self, id: &str) -> Option<Arc<ResourceObject>> {
        self.objects.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Monotonic counter bumped on every effective mutation
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn clear(&mut self) {
        if !self.objects.is_empty() {
            self.objects.clear();
            self.revision += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ResourceStatus;

    fn obj(id: &str, name: &str, marker: Option<&str>) -> ResourceObject {
        ResourceObject {
            id: id.to_string(),
            kind: "Pod".to_string(),
            namespace: Some("default".to_string()),
            name: name.to_string(),
            status: ResourceStatus::Healthy,
            revision_marker: marker.map(String::from),
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_apply_added_upserts() {
        let mut store = ObjectStore::new();
        assert!(store.apply(ChangeEvent::Added(obj("a", "web-1", None))));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().name, "web-1");
    }

    #[test]
    fn test_apply_modified_replaces_by_id() {
        let mut store = ObjectStore::new();
        store.apply(ChangeEvent::Added(obj("a", "web-1", Some("1"))));
        store.apply(ChangeEvent::Modified(obj("a", "web-1b", Some("2"))));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().name, "web-1b");
    }

    #[test]
    fn test_stale_marker_is_dropped() {
        let mut store = ObjectStore::new();
        store.apply(ChangeEvent::Added(obj("a", "new", Some("10"))));
        let rev = store.revision();

        // Older numeric marker: no-op
        assert!(!store.apply(ChangeEvent::Modified(obj("a", "old", Some("9")))));
        assert_eq!(store.get("a").unwrap().name, "new");
        assert_eq!(store.revision(), rev);
    }

    #[test]
    fn test_idempotent_replay() {
        let mut store = ObjectStore::new();
        store.apply(ChangeEvent::Modified(obj("a", "web", Some("5"))));
        let rev = store.revision();

        // Applying the exact same event twice produces the same state
        assert!(!store.apply(ChangeEvent::Modified(obj("a", "web", Some("5")))));
        assert_eq!(store.len(), 1);
        assert_eq!(store.revision(), rev);
    }

    #[test]
    fn test_missing_marker_always_applies() {
        let mut store = ObjectStore::new();
        store.apply(ChangeEvent::Added(obj("a", "first", Some("10"))));
        assert!(store.apply(ChangeEvent::Modified(obj("a", "second", None))));
        assert_eq!(store.get("a").unwrap().name, "second");
    }

    #[test]
    fn test_opaque_markers_apply_when_different() {
        assert!(marker_is_newer(Some("abc"), Some("def")));
        assert!(!marker_is_newer(Some("abc"), Some("abc")));
        assert!(marker_is_newer(Some("11"), Some("9")));
        assert!(!marker_is_newer(Some("9"), Some("11")));
        assert!(marker_is_newer(None, Some("5")));
        assert!(marker_is_newer(Some("5"), None));
    }

    #[test]
    fn test_delete_removes_and_absent_is_noop() {
        let mut store = ObjectStore::new();
        store.apply(ChangeEvent::Added(obj("a", "web", None)));
        assert!(store.apply(ChangeEvent::Deleted(obj("a", "web", None))));
        assert!(store.is_empty());

        let rev = store.revision();
        assert!(!store.apply(ChangeEvent::Deleted(obj("a", "web", None))));
        assert_eq!(store.revision(), rev);
    }

    #[test]
    fn test_replace_all_reconciles() {
        let mut store = ObjectStore::new();
        store.replace_all(vec![obj("a", "web-a", None), obj("b", "web-b", None)]);
        assert_eq!(store.len(), 2);

        // "b" absent from the authoritative list: removed
        store.replace_all(vec![obj("a", "web-a", None)]);
        assert_eq!(store.len(), 1);
        assert!(store.get("b").is_none());
    }

    #[test]
    fn test_convergence_last_write_per_id_wins() {
        // The net effect of an event sequence is independent of chunking
        let events = vec![
            ChangeEvent::Added(obj("a", "a-1", Some("1"))),
            ChangeEvent::Added(obj("b", "b-1", Some("1"))),
            ChangeEvent::Modified(obj("a", "a-2", Some("2"))),
            ChangeEvent::Deleted(obj("b", "b-1", None)),
            ChangeEvent::Modified(obj("a", "a-3", Some("3"))),
        ];

        let mut one_shot = ObjectStore::new();
        for ev in events.clone() {
            one_shot.apply(ev);
        }

        let mut chunked = ObjectStore::new();
        let (first, rest) = events.split_at(2);
        for ev in first.iter().cloned() {
            chunked.apply(ev);
        }
        for ev in rest.iter().cloned() {
            chunked.apply(ev);
        }

        let a = one_shot.snapshot();
        let b = chunked.snapshot();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].name, "a-3");
        assert_eq!(b[0].name, "a-3");
    }

    #[test]
    fn test_snapshot_is_sorted_and_detached() {
        let mut store = ObjectStore::new();
        store.apply(ChangeEvent::Added(obj("z", "zeta", None)));
        store.apply(ChangeEvent::Added(obj("m", "alpha", None)));

        let snap = store.snapshot();
        assert_eq!(snap[0].name, "alpha");
        assert_eq!(snap[1].name, "zeta");

        // Mutating the store does not disturb a taken snapshot
        store.apply(ChangeEvent::Deleted(obj("m", "alpha", None)));
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn test_revision_bumps_only_on_effective_mutation() {
        let mut store = ObjectStore::new();
        assert_eq!(store.revision(), 0);

        store.apply(ChangeEvent::Added(obj("a", "web", Some("1"))));
        assert_eq!(store.revision(), 1);

        // Stale replay: revision unchanged
        store.apply(ChangeEvent::Modified(obj("a", "web", Some("1"))));
        assert_eq!(store.revision(), 1);

        store.replace_all(vec![]);
        assert_eq!(store.revision(), 2);

        // Clearing an already-empty store is a no-op
        store.clear();
        assert_eq!(store.revision(), 2);
    }
}
