// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable buffering for undelivered telemetry.
//!
//! When a batch cannot be delivered (transport exhausted its retries, the
//! circuit is open, or the host is offline), the pipeline hands the records
//! to a [`DurableStore`]. The store keeps them across process restarts and
//! serves them back to the replay manager in priority-then-age order.
//!
//! The crate ships one concrete engine, [`SqliteStore`], backed by a local
//! SQLite file (or an in-memory database for tests). The pipeline depends
//! only on the [`DurableStore`] trait, so embedders targeting a platform
//! without SQLite can supply their own engine.

mod error;
mod record;
mod sqlite;
mod store;

pub use error::StoreError;
pub use record::{NewRecord, RecordKind, StoredRecord};
pub use sqlite::SqliteStore;
pub use store::{DurableStore, RetentionConfig};
