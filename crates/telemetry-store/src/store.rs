// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::error::StoreError;
use crate::record::{NewRecord, StoredRecord};

/// Retention limits enforced by [`DurableStore::cleanup`].
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Maximum number of records the store may hold after a cleanup pass.
    pub max_items: usize,
    /// Age limit measured from a record's event timestamp, not from when it
    /// was persisted. Records past it are purged regardless of capacity.
    pub ttl: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_items: 1000,
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Host-local persistent buffer for undelivered records.
///
/// Implementations are synchronous; operations are local and fast. The
/// pipeline is the only writer, so implementations only need interior
/// mutability, not multi-writer coordination.
pub trait DurableStore: Send + Sync {
    /// Persist one record, returning its assigned id.
    fn save(&self, record: NewRecord) -> Result<String, StoreError>;

    /// Persist a batch of records in one transaction, returning the ids in
    /// input order.
    fn save_batch(&self, records: Vec<NewRecord>) -> Result<Vec<String>, StoreError>;

    /// Read up to `limit` records (all when `None`), sorted by priority
    /// descending then timestamp ascending; equal keys come back in
    /// admission order.
    fn get_all(&self, limit: Option<usize>) -> Result<Vec<StoredRecord>, StoreError>;

    fn delete(&self, id: &str) -> Result<(), StoreError>;

    fn delete_batch(&self, ids: &[String]) -> Result<(), StoreError>;

    /// Bump the retry count for one record. Counts never decrease.
    fn increment_retry(&self, id: &str) -> Result<(), StoreError>;

    fn count(&self) -> Result<usize, StoreError>;

    /// Purge TTL-expired records first, then the oldest records beyond
    /// `max_items`. Returns the number of records removed.
    fn cleanup(&self) -> Result<usize, StoreError>;
}
