// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pub/sub notifications for statistics and lifecycle observers.
//!
//! Events are observational only; nothing in the pipeline reacts to its own
//! events. Subscribers get a broadcast receiver; dropping it unsubscribes.

use std::time::Duration;

use tokio::sync::broadcast;

/// Why records left the pipeline without a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Not admitted by the sampler. Intentional, not a failure.
    Sampling,
    /// Discarded by the queue overflow policy.
    Overflow,
    /// A transform stage aborted the chain for this batch.
    TransformAborted,
    /// A stored record exceeded its TTL or replay retry budget.
    Expired,
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    FlushSucceeded {
        records: usize,
        bytes: usize,
        elapsed: Duration,
    },
    FlushFailed {
        records: usize,
        retryable: bool,
    },
    RecordsDropped {
        count: usize,
        reason: DropReason,
    },
    CircuitOpened,
    CircuitClosed,
    ReplayCompleted {
        delivered: usize,
        expired: usize,
    },
    ShutdownComplete,
}

/// Broadcast fan-out for [`PipelineEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Publish to all current subscribers. A send with no subscribers is
    /// not an error.
    pub fn publish(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
