// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Best-effort usage metrics sidecar.
//!
//! Polls numeric usage samples for a scope on its own low-priority cadence
//! and joins them into consumer views at read time, keyed by
//! (namespace, name). Samples are never written into the object store. A
//! missing or broken metrics API is "no data", logged at debug; it can
//! never mark the owning scope as errored. The poll stretches while the
//! primary synchronizer is watching (usage churns less urgently than
//! object state) and pauses entirely while the view is hidden.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::kubernetes::backend::ClusterBackend;

use super::registry::SubscriptionHandle;
use super::{MetricSample, ResourceObject, ScopeKey, SyncPhase};

/// Multiplier applied to the poll interval while the primary scope is in
/// real-time watch mode
const WATCHING_STRETCH: u32 = 3;

#[derive(Debug, Clone)]
pub struct MetricsOptions {
    pub base_interval: Duration,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(15),
        }
    }
}

/// How long to sleep between fetches given the primary scope's mode
fn interval_for(base: Duration, primary_watching: bool) -> Duration {
    if primary_watching {
        base * WATCHING_STRETCH
    } else {
        base
    }
}

#[derive(Default)]
struct MetricsCache {
    samples: RwLock<HashMap<(String, String), MetricSample>>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
}

/// Handle on a running metrics poll task
pub struct MetricsFetcher {
    cache: Arc<MetricsCache>,
    visible_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MetricsFetcher {
    /// Spawn the poll task for one scope. When `primary` is given, its
    /// watch/poll mode steers the fetch cadence; the fetcher also keeps
    /// that subscription alive for as long as it runs.
    pub fn spawn(
        backend: Arc<dyn ClusterBackend>,
        scope: ScopeKey,
        primary: Option<SubscriptionHandle>,
        options: MetricsOptions,
    ) -> Self {
        let cache = Arc::new(MetricsCache::default());
        let (visible_tx, visible_rx) = watch::channel(true);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run(
            backend,
            scope,
            primary,
            options,
            Arc::clone(&cache),
            visible_rx,
            shutdown_rx,
        ));

        Self {
            cache,
            visible_tx,
            shutdown_tx,
            task,
        }
    }

    /// Read-time join key lookup
    pub fn usage_for(&self, namespace: &str, name: &str) -> Option<MetricSample> {
        self.cache
            .samples
            .read()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Join usage samples onto a snapshot by (namespace, name)
    #[allow(dead_code)]
    pub fn join(
        &self,
        objects: &[Arc<ResourceObject>],
    ) -> Vec<(Arc<ResourceObject>, Option<MetricSample>)> {
        let samples = self.cache.samples.read().unwrap();
        objects
            .iter()
            .map(|obj| {
                let key = (
                    obj.namespace.clone().unwrap_or_default(),
                    obj.name.clone(),
                );
                (Arc::clone(obj), samples.get(&key).cloned())
            })
            .collect()
    }

    #[allow(dead_code)]
    pub fn sample_count(&self) -> usize {
        self.cache.samples.read().unwrap().len()
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.cache.last_refresh.read().unwrap()
    }

    /// Pause (or resume) polling while the owning view is hidden
    #[allow(dead_code)]
    pub fn set_visible(&self, visible: bool) {
        let _ = self.visible_tx.send(visible);
    }

    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.task.abort();
    }
}

async fn run(
    backend: Arc<dyn ClusterBackend>,
    scope: ScopeKey,
    primary: Option<SubscriptionHandle>,
    options: MetricsOptions,
    cache: Arc<MetricsCache>,
    mut visible_rx: watch::Receiver<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(scope = %scope, "Metrics fetcher started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        if !*visible_rx.borrow() {
            // Hidden view: no fetches at all until it comes back
            tokio::select! {
                biased;
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                result = visible_rx.changed() => {
                    if result.is_err() {
                        break;
                    }
                }
            }
            continue;
        }

        match backend.fetch_metrics(&scope).await {
            Ok(samples) => {
                let mut map = cache.samples.write().unwrap();
                map.clear();
                for sample in samples {
                    map.insert((sample.namespace.clone(), sample.name.clone()), sample);
                }
                drop(map);
                *cache.last_refresh.write().unwrap() = Some(Utc::now());
            }
            // No data, not an error; the owning scope stays untouched
            Err(e) => debug!(scope = %scope, error = %e, "Metrics fetch skipped"),
        }

        let watching = primary
            .as_ref()
            .is_some_and(|h| h.status().phase == SyncPhase::Watching);
        let interval = interval_for(options.base_interval, watching);

        tokio::select! {
            biased;
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            result = visible_rx.changed() => {
                if result.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!(scope = %scope, "Metrics fetcher stopped");
}
