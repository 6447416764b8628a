// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Debounced delivery of search input.
//!
//! Keystrokes arrive faster than a graph recompute is worth; the debouncer
//! emits the latest value once the input has been quiet for the configured
//! window. Intermediate values are coalesced away and a new update cancels
//! the pending timer, so at most one recompute trigger fires per quiet
//! period. Dropping the debouncer cancels everything.

// Wired up by the interactive frontend; the engine only provides it
#![allow(dead_code)]

use std::time::Duration;

use tokio::sync::{mpsc, watch};

/// Default quiet window for search input
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(250);

/// Input side: feed raw values as they are typed
pub struct Debouncer {
    input_tx: watch::Sender<(u64, String)>,
    sequence: u64,
}

/// Output side: receives one settled value per quiet period
pub struct Debounced {
    rx: mpsc::UnboundedReceiver<String>,
}

impl Debounced {
    /// Next settled value; None once the debouncer is dropped
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

impl Debouncer {
    pub fn new(window: Duration) -> (Self, Debounced) {
        let (input_tx, mut input_rx) = watch::channel((0u64, String::new()));
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                // Wait for the first update of a burst; channel closure
                // means the debouncer is gone
                if input_rx.changed().await.is_err() {
                    return;
                }
                let mut latest = input_rx.borrow_and_update().1.clone();

                // Restart the timer on every further update in the burst
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(window) => {
                            let _ = out_tx.send(latest);
                            break;
                        }
                        changed = input_rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                            latest = input_rx.borrow_and_update().1.clone();
                        }
                    }
                }
            }
        });

        (
            Self {
                input_tx,
                sequence: 0,
            },
            Debounced { rx: out_rx },
        )
    }

    /// Record a new input value, resetting the quiet window.
    /// The sequence number makes repeated identical values count as
    /// fresh activity.
    pub fn update(&mut self, value: impl Into<String>) {
        self.sequence += 1;
        let _ = self.input_tx.send((self.sequence, value.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(30);

    #[tokio::test]
    async fn test_emits_latest_after_quiet_period() {
        let (mut debouncer, mut out) = Debouncer::new(WINDOW);

        debouncer.update("w");
        debouncer.update("we");
        debouncer.update("web");

        let settled = out.recv().await.unwrap();
        assert_eq!(settled, "web");
        // Intermediate values were coalesced away
        assert!(out.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_new_burst_emits_again() {
        let (mut debouncer, mut out) = Debouncer::new(WINDOW);

        debouncer.update("web");
        assert_eq!(out.recv().await.unwrap(), "web");

        debouncer.update("redis");
        assert_eq!(out.recv().await.unwrap(), "redis");
    }

    #[tokio::test]
    async fn test_updates_inside_window_restart_timer() {
        let (mut debouncer, mut out) = Debouncer::new(WINDOW);

        debouncer.update("a");
        tokio::time::sleep(WINDOW / 2).await;
        debouncer.update("ab");
        tokio::time::sleep(WINDOW / 2).await;
        // Still inside the restarted window: nothing emitted yet
        assert!(out.try_recv().is_none());

        assert_eq!(out.recv().await.unwrap(), "ab");
    }

    #[tokio::test]
    async fn test_drop_cancels_pending_emit() {
        let (mut debouncer, mut out) = Debouncer::new(WINDOW);
        debouncer.update("pending");
        drop(debouncer);

        // The channel closes without delivering the cancelled value
        assert!(out.recv().await.is_none());
    }
}
