// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Drains the durable store back through the delivery path.
//!
//! The manager owns the store-facing half of a replay cycle: collecting due
//! records, expiring those over their retry budget, and bookkeeping after
//! the orchestrator's delivery attempt. The transport half stays in the
//! orchestrator so there is exactly one delivery path.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error};

use telemetry_store::{DurableStore, NewRecord, StoredRecord};

use crate::error::PipelineError;
use crate::record::{now_ms, RecordKind, ReportRecord};

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Records pulled per replay cycle.
    pub batch_limit: usize,
    /// Delivery attempts before a stored record expires.
    pub max_attempts: u32,
    /// Delay before re-running replay after a failed cycle.
    pub retry_delay: Duration,
    /// Period of the replay timer that runs while offline.
    pub replay_interval: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            max_attempts: 5,
            retry_delay: Duration::from_secs(30),
            replay_interval: Duration::from_secs(60),
        }
    }
}

/// Records due for redelivery in one cycle, after expiry filtering.
#[derive(Debug)]
pub struct ReplayPlan {
    pub records: Vec<StoredRecord>,
    /// Records deleted this cycle because they exhausted their budget.
    pub expired: usize,
}

/// Error records replay ahead of everything else.
fn priority_for(kind: RecordKind) -> i32 {
    match kind {
        RecordKind::Error => 1,
        _ => 0,
    }
}

pub struct ReplayManager {
    store: Arc<dyn DurableStore>,
    config: ReplayConfig,
    in_flight: bool,
}

impl ReplayManager {
    pub fn new(store: Arc<dyn DurableStore>, config: ReplayConfig) -> Self {
        Self {
            store,
            config,
            in_flight: false,
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Reentrancy guard: at most one replay cycle runs at a time.
    pub fn try_begin(&mut self) -> bool {
        if self.in_flight {
            debug!("Replay cycle already in flight, skipping");
            return false;
        }
        self.in_flight = true;
        true
    }

    pub fn finish(&mut self) {
        self.in_flight = false;
    }

    /// Persist a fresh record. Durability is best-effort: persistence
    /// errors are logged and swallowed.
    pub fn enqueue(&self, kind: RecordKind, data: Value, priority: i32) {
        let result = self.store.save(NewRecord {
            kind,
            data,
            timestamp_ms: now_ms(),
            priority,
        });
        if let Err(e) = result {
            error!("Failed to persist record: {e}");
        }
    }

    /// Persist a failed batch, keeping each record's original timestamp.
    /// Runs a cleanup pass afterwards so the store stays within its caps.
    pub fn persist_batch(&self, records: &[ReportRecord]) {
        let items: Vec<NewRecord> = records
            .iter()
            .filter_map(|record| {
                match serde_json::to_value(record) {
                    Ok(data) => Some(NewRecord {
                        kind: record.kind,
                        data,
                        timestamp_ms: record.timestamp_ms,
                        priority: priority_for(record.kind),
                    }),
                    Err(e) => {
                        error!("Failed to encode record for persistence: {e}");
                        None
                    }
                }
            })
            .collect();

        if items.is_empty() {
            return;
        }
        let count = items.len();
        if let Err(e) = self.store.save_batch(items) {
            error!("Failed to persist {count} records: {e}");
            return;
        }
        debug!("Persisted {count} undelivered records");
        if let Err(e) = self.store.cleanup() {
            error!("Store cleanup failed: {e}");
        }
    }

    /// Pull the next batch of stored records, deleting any that already
    /// reached the retry budget.
    pub fn collect(&self) -> Result<ReplayPlan, PipelineError> {
        let all = self.store.get_all(Some(self.config.batch_limit))?;

        let (expired, records): (Vec<StoredRecord>, Vec<StoredRecord>) = all
            .into_iter()
            .partition(|r| r.retry_count >= self.config.max_attempts);

        if !expired.is_empty() {
            let ids: Vec<String> = expired.iter().map(|r| r.id.clone()).collect();
            for record in &expired {
                debug!(
                    "{}",
                    PipelineError::RecordExpired {
                        id: record.id.clone()
                    }
                );
            }
            self.store.delete_batch(&ids)?;
        }

        Ok(ReplayPlan {
            records,
            expired: expired.len(),
        })
    }

    /// Delete successfully redelivered records.
    pub fn complete(&self, records: &[StoredRecord]) {
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        if let Err(e) = self.store.delete_batch(&ids) {
            error!("Failed to delete {} replayed records: {e}", ids.len());
        }
    }

    /// Bump the retry count of every record in a failed cycle.
    pub fn record_failure(&self, records: &[StoredRecord]) {
        for record in records {
            if let Err(e) = self.store.increment_retry(&record.id) {
                error!("Failed to increment retry count for {}: {e}", record.id);
            }
        }
    }
}
