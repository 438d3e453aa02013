// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host-lifecycle signals the embedding environment feeds into the core.
//!
//! The pipeline assumes no particular platform event model; the embedder
//! maps whatever it has (page visibility, app lifecycle callbacks, network
//! reachability probes) onto [`HostSignal`]s and emits them here.

use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    /// The host is about to become hidden; unsent data should be flushed
    /// through the unload-safe transport.
    Hidden,
    /// The host is about to terminate. Same handling as `Hidden`.
    Terminating,
    ConnectivityLost,
    /// Connectivity is back; triggers a replay cycle.
    ConnectivityRestored,
}

/// Broadcast channel pair the embedder emits on and the orchestrator
/// subscribes to.
#[derive(Clone)]
pub struct HostSignals {
    tx: broadcast::Sender<HostSignal>,
}

impl HostSignals {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(16);
        Self { tx }
    }

    pub fn emit(&self, signal: HostSignal) {
        let _ = self.tx.send(signal);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostSignal> {
        self.tx.subscribe()
    }
}

impl Default for HostSignals {
    fn default() -> Self {
        Self::new()
    }
}
