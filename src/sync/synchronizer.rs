// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Per-scope synchronization task.
//!
//! Drives one scope's object store through a watch-first, poll-fallback
//! state machine: Connecting, then Watching (list-seeded change stream) or
//! Polling (periodic reconciliation) when the stream is unavailable or has
//! exhausted its reconnect budget. Polling periodically re-probes the
//! stream for promotion back to Watching. A reload broadcast forces an
//! immediate resync in either mode. Every store write is guarded by the
//! scope generation so nothing lands after teardown begins.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::kubernetes::backend::ClusterBackend;

use super::registry::ScopeState;
use super::{ScopeKey, SyncError, SyncPhase};

/// Ceiling for the reconnect backoff
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// A watch that survived this long resets the reconnect budget
const STABLE_WATCH_RESET: Duration = Duration::from_secs(60);

/// Tunables for the synchronizer state machine
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Fixed re-fetch interval in polling mode
    pub poll_interval: Duration,
    /// Base delay for watch reconnect backoff (doubles per attempt)
    pub watch_retry_base: Duration,
    /// Reconnect attempts before degrading to polling
    pub watch_retry_attempts: u32,
    /// Poll cycles between watch promotion probes
    pub promote_after_polls: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            watch_retry_base: Duration::from_millis(500),
            watch_retry_attempts: 5,
            promote_after_polls: 6,
        }
    }
}

enum WatchOutcome {
    Shutdown,
    /// The stream capability is absent; fall back to polling
    Unavailable,
    /// The stream ended or errored after being established
    Lost,
    /// The seeding list failed
    ListFailed,
    /// A reload broadcast asked for a fresh list + stream
    Reload,
}

enum PollOutcome {
    Shutdown,
    /// Time to probe the stream for promotion back to watching
    Promote,
}

pub(crate) struct Synchronizer {
    scope: ScopeKey,
    backend: Arc<dyn ClusterBackend>,
    state: Arc<ScopeState>,
    /// Generation captured at spawn; store writes with a stale generation
    /// are dropped
    generation: u64,
    options: SyncOptions,
    reload_rx: broadcast::Receiver<()>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Synchronizer {
    pub(crate) fn spawn(
        backend: Arc<dyn ClusterBackend>,
        state: Arc<ScopeState>,
        options: SyncOptions,
        reload_rx: broadcast::Receiver<()>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let sync = Self {
            scope: state.scope().clone(),
            generation: state.generation(),
            backend,
            state,
            options,
            reload_rx,
            shutdown_rx,
        };
        tokio::spawn(sync.run())
    }

    async fn run(mut self) {
        debug!(scope = %self.scope, "Synchronizer started");

        loop {
            let mut attempts = 0u32;
            loop {
                if self.shutting_down() {
                    return self.finish();
                }
                self.state.set_phase(self.generation, SyncPhase::Connecting);

                let started = Instant::now();
                match self.watch_cycle().await {
                    WatchOutcome::Shutdown => return self.finish(),
                    WatchOutcome::Reload => {
                        attempts = 0;
                        continue;
                    }
                    WatchOutcome::Unavailable => break,
                    WatchOutcome::Lost | WatchOutcome::ListFailed => {
                        if started.elapsed() >= STABLE_WATCH_RESET {
                            attempts = 0;
                        }
                        attempts += 1;
                        if attempts > self.options.watch_retry_attempts {
                            warn!(
                                scope = %self.scope,
                                attempts,
                                "Watch reconnect budget exhausted, degrading to polling"
                            );
                            break;
                        }
                        let delay = self.backoff(attempts);
                        debug!(
                            scope = %self.scope,
                            attempt = attempts,
                            delay_ms = delay.as_millis(),
                            "Watch lost, backing off before reconnect"
                        );
                        if !self.sleep_interruptible(delay).await {
                            return self.finish();
                        }
                    }
                }
            }

            match self.poll_cycle().await {
                PollOutcome::Shutdown => return self.finish(),
                PollOutcome::Promote => {
                    debug!(scope = %self.scope, "Probing change stream for promotion");
                }
            }
        }
    }

    /// One watch session: authoritative list seed, then incremental events
    /// until the stream ends, a reload arrives, or teardown begins
    async fn watch_cycle(&mut self) -> WatchOutcome {
        let list = tokio::select! {
            biased;
            _ = self.shutdown_rx.changed() => return WatchOutcome::Shutdown,
            result = self.backend.list_resources(&self.scope) => result,
        };

        let revision = match list {
            Ok(list) => {
                let revision = list.revision.clone();
                if !self.state.replace_all(self.generation, list.objects) {
                    return WatchOutcome::Shutdown;
                }
                self.state.mark_synced(self.generation);
                revision
            }
            Err(e) => {
                self.note_fetch_failure(&e);
                return WatchOutcome::ListFailed;
            }
        };

        let opened = tokio::select! {
            biased;
            _ = self.shutdown_rx.changed() => return WatchOutcome::Shutdown,
            result = self.backend.open_change_stream(&self.scope, revision) => result,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(SyncError::StreamUnavailable { reason, .. }) => {
                debug!(scope = %self.scope, reason = %reason, "Change stream unavailable");
                return WatchOutcome::Unavailable;
            }
            Err(e) => {
                self.note_fetch_failure(&e);
                return WatchOutcome::Lost;
            }
        };

        self.state.set_phase(self.generation, SyncPhase::Watching);
        info!(scope = %self.scope, "Watching");

        use futures::StreamExt;
        loop {
            tokio::select! {
                biased;
                result = self.shutdown_rx.changed() => {
                    if result.is_err() || *self.shutdown_rx.borrow() {
                        return WatchOutcome::Shutdown;
                    }
                }
                _ = self.reload_rx.recv() => {
                    debug!(scope = %self.scope, "Reload requested, re-subscribing");
                    return WatchOutcome::Reload;
                }
                event = stream.next() => match event {
                    Some(Ok(event)) => {
                        if !self.state.apply(self.generation, event) {
                            return WatchOutcome::Shutdown;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(scope = %self.scope, error = %e, "Change stream error");
                        return WatchOutcome::Lost;
                    }
                    None => {
                        debug!(scope = %self.scope, "Change stream ended");
                        return WatchOutcome::Lost;
                    }
                },
            }
        }
    }

    /// Polling mode: periodic full-list reconciliation until promotion is
    /// due or teardown begins
    async fn poll_cycle(&mut self) -> PollOutcome {
        // Degraded with last-good data still counts as Polling; without
        // any successful sync the phase stays Connecting/Error until the
        // first fetch resolves it
        if self.state.status().sync_complete {
            self.state.set_phase(self.generation, SyncPhase::Polling);
        }

        let mut polls = 0u32;
        loop {
            if self.shutting_down() {
                return PollOutcome::Shutdown;
            }

            let list = tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => return PollOutcome::Shutdown,
                result = self.backend.list_resources(&self.scope) => result,
            };

            match list {
                Ok(list) => {
                    if !self.state.replace_all(self.generation, list.objects) {
                        return PollOutcome::Shutdown;
                    }
                    self.state.mark_synced(self.generation);
                    self.state.set_phase(self.generation, SyncPhase::Polling);
                }
                Err(e) => self.note_fetch_failure(&e),
            }

            polls += 1;
            if polls >= self.options.promote_after_polls {
                return PollOutcome::Promote;
            }

            tokio::select! {
                biased;
                result = self.shutdown_rx.changed() => {
                    if result.is_err() || *self.shutdown_rx.borrow() {
                        return PollOutcome::Shutdown;
                    }
                }
                _ = self.reload_rx.recv() => {
                    debug!(scope = %self.scope, "Reload requested, re-fetching now");
                }
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }
    }

    /// A failed fetch never clears the snapshot. Error phase is reserved
    /// for scopes with no successful sync at all.
    fn note_fetch_failure(&self, err: &SyncError) {
        if self.state.status().sync_complete {
            warn!(
                scope = %self.scope,
                error = %err,
                "Fetch failed; keeping last-good snapshot"
            );
        } else {
            warn!(scope = %self.scope, error = %err, "Fetch failed before first sync");
            self.state.set_phase(self.generation, SyncPhase::Error);
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(6);
        (self.options.watch_retry_base * 2u32.pow(exp)).min(MAX_BACKOFF)
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Sleep that wakes early on shutdown (false) or reload (true)
    async fn sleep_interruptible(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            result = self.shutdown_rx.changed() => {
                !(result.is_err() || *self.shutdown_rx.borrow())
            }
            _ = self.reload_rx.recv() => true,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn finish(&self) {
        debug!(scope = %self.scope, "Synchronizer stopped");
    }
}
