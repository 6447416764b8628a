// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Subscription registry: one live synchronizer per scope, shared by
//! reference counting.
//!
//! The first subscriber to a scope spawns its synchronizer; the last
//! unsubscribe (or a context switch) tears it down and clears the store.
//! Teardown bumps the scope generation and cancels the task before the
//! store is cleared, so no event from a cancelled synchronizer can land
//! afterwards. A reload broadcast makes every live scope resync
//! immediately, bypassing its normal interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::kubernetes::backend::ClusterBackend;

use super::store::ObjectStore;
use super::synchronizer::{SyncOptions, Synchronizer};
use super::{ChangeEvent, ResourceObject, ScopeKey, SyncPhase, SyncStatus};

/// Shared state of one live scope: the store, its observable status, and
/// the generation guard. The synchronizer is the only writer; handles
/// read snapshots and watch the revision/status channels.
pub(crate) struct ScopeState {
    scope: ScopeKey,
    store: RwLock<ObjectStore>,
    status_tx: watch::Sender<SyncStatus>,
    revision_tx: watch::Sender<u64>,
    generation: AtomicU64,
}

impl ScopeState {
    pub(crate) fn new(scope: ScopeKey) -> Arc<Self> {
        let (status_tx, _) = watch::channel(SyncStatus::default());
        let (revision_tx, _) = watch::channel(0u64);
        Arc::new(Self {
            scope,
            store: RwLock::new(ObjectStore::new()),
            status_tx,
            revision_tx,
            generation: AtomicU64::new(0),
        })
    }

    pub(crate) fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Invalidate all in-flight writes; the first step of teardown
    pub(crate) fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<ResourceObject>> {
        self.store.read().unwrap().snapshot()
    }

    pub(crate) fn object_count(&self) -> usize {
        self.store.read().unwrap().len()
    }

    pub(crate) fn status(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    pub(crate) fn subscribe_revision(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }

    pub(crate) fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Apply one event if `generation` is still current. Returns false
    /// when the write was dropped because teardown has begun.
    pub(crate) fn apply(&self, generation: u64, event: ChangeEvent) -> bool {
        if self.generation() != generation {
            return false;
        }
        let effective = {
            let mut store = self.store.write().unwrap();
            store.apply(event).then(|| store.revision())
        };
        if let Some(revision) = effective {
            self.revision_tx.send_replace(revision);
            self.status_tx
                .send_modify(|s| s.last_updated = Some(Utc::now()));
        }
        true
    }

    /// Reconcile to an authoritative list if `generation` is still current
    pub(crate) fn replace_all(&self, generation: u64, objects: Vec<ResourceObject>) -> bool {
        if self.generation() != generation {
            return false;
        }
        let revision = {
            let mut store = self.store.write().unwrap();
            store.replace_all(objects);
            store.revision()
        };
        self.revision_tx.send_replace(revision);
        true
    }

    pub(crate) fn mark_synced(&self, generation: u64) -> bool {
        if self.generation() != generation {
            return false;
        }
        self.status_tx.send_modify(|s| {
            s.sync_complete = true;
            s.last_updated = Some(Utc::now());
        });
        true
    }

    pub(crate) fn set_phase(&self, generation: u64, phase: SyncPhase) -> bool {
        if self.generation() != generation {
            return false;
        }
        self.status_tx.send_modify(|s| s.phase = phase);
        true
    }

    pub(crate) fn clear(&self) {
        let revision = {
            let mut store = self.store.write().unwrap();
            store.clear();
            store.revision()
        };
        self.revision_tx.send_replace(revision);
    }
}

struct ScopeEntry {
    refcount: usize,
    state: Arc<ScopeState>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Deduplicates synchronizers across concurrent consumers
pub struct SubscriptionRegistry {
    backend: Arc<dyn ClusterBackend>,
    options: SyncOptions,
    scopes: Mutex<HashMap<ScopeKey, ScopeEntry>>,
    reload_tx: broadcast::Sender<()>,
}

impl SubscriptionRegistry {
    pub fn new(backend: Arc<dyn ClusterBackend>, options: SyncOptions) -> Arc<Self> {
        let (reload_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            backend,
            options,
            scopes: Mutex::new(HashMap::new()),
            reload_tx,
        })
    }

    /// Subscribe to a scope. The first subscriber starts its synchronizer;
    /// further subscribers share the same live stream and store.
    pub fn subscribe(self: &Arc<Self>, scope: ScopeKey) -> SubscriptionHandle {
        let mut scopes = self.scopes.lock().unwrap();
        let entry = scopes.entry(scope.clone()).or_insert_with(|| {
            debug!(scope = %scope, "Starting synchronizer");
            let state = ScopeState::new(scope.clone());
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let task = Synchronizer::spawn(
                Arc::clone(&self.backend),
                Arc::clone(&state),
                self.options.clone(),
                self.reload_tx.subscribe(),
                shutdown_rx,
            );
            ScopeEntry {
                refcount: 0,
                state,
                shutdown_tx,
                task,
            }
        });
        entry.refcount += 1;

        SubscriptionHandle {
            scope,
            state: Arc::clone(&entry.state),
            registry: Arc::clone(self),
            active: true,
        }
    }

    /// Force every live scope to resync immediately (watch re-subscribe or
    /// out-of-interval poll). Called after external mutations.
    #[allow(dead_code)]
    pub fn reload(&self) {
        let _ = self.reload_tx.send(());
    }

    /// Tear down every scope bound to a context other than `context`.
    /// All affected stores are cleared before this returns, so nothing
    /// from the old context stays visible once new-context data arrives.
    #[allow(dead_code)]
    pub fn switch_context(&self, context: &str) {
        let removed: Vec<ScopeEntry> = {
            let mut scopes = self.scopes.lock().unwrap();
            let keys: Vec<ScopeKey> = scopes
                .keys()
                .filter(|k| k.context != context)
                .cloned()
                .collect();
            keys.iter().filter_map(|k| scopes.remove(k)).collect()
        };
        if !removed.is_empty() {
            info!(context = %context, scopes = removed.len(), "Tearing down old-context scopes");
        }
        for entry in removed {
            Self::teardown(entry);
        }
    }

    #[allow(dead_code)]
    pub fn active_scopes(&self) -> Vec<ScopeKey> {
        let scopes = self.scopes.lock().unwrap();
        let mut keys: Vec<ScopeKey> = scopes.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Stop every synchronizer and clear every store
    pub fn shutdown(&self) {
        let removed: Vec<ScopeEntry> = {
            let mut scopes = self.scopes.lock().unwrap();
            scopes.drain().map(|(_, entry)| entry).collect()
        };
        for entry in removed {
            Self::teardown(entry);
        }
    }

    fn release(&self, scope: &ScopeKey) {
        let removed = {
            let mut scopes = self.scopes.lock().unwrap();
            match scopes.get_mut(scope) {
                Some(entry) => {
                    entry.refcount -= 1;
                    if entry.refcount == 0 {
                        scopes.remove(scope)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        if let Some(entry) = removed {
            debug!(scope = %scope, "Last subscriber gone, stopping synchronizer");
            Self::teardown(entry);
        }
    }

    /// Ordering matters: invalidate the generation and cancel the task
    /// before clearing the store, so no late event can repopulate it
    fn teardown(entry: ScopeEntry) {
        entry.state.bump_generation();
        let _ = entry.shutdown_tx.send(true);
        entry.task.abort();
        entry.state.clear();
    }
}

/// A consumer's handle on one subscribed scope. Dropping it unsubscribes.
pub struct SubscriptionHandle {
    scope: ScopeKey,
    state: Arc<ScopeState>,
    registry: Arc<SubscriptionRegistry>,
    active: bool,
}

impl SubscriptionHandle {
    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    /// Immutable snapshot of the scope's objects
    pub fn snapshot(&self) -> Vec<Arc<ResourceObject>> {
        self.state.snapshot()
    }

    pub fn object_count(&self) -> usize {
        self.state.object_count()
    }

    pub fn status(&self) -> SyncStatus {
        self.state.status()
    }

    /// Store-revision channel. High-churn scopes coalesce: the channel
    /// only ever holds the latest revision, so a consumer wakes at most
    /// once per batch it is behind.
    pub fn changed(&self) -> watch::Receiver<u64> {
        self.state.subscribe_revision()
    }

    /// Status channel (phase transitions, sync completion)
    pub fn status_changed(&self) -> watch::Receiver<SyncStatus> {
        self.state.subscribe_status()
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.active {
            self.active = false;
            self.registry.release(&self.scope);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}
