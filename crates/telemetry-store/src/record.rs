// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Category of a telemetry record.
///
/// Shared between the live pipeline and the durable store so a replayed
/// record keeps the category it was admitted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Performance,
    Error,
    Behavior,
    Api,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Performance => "performance",
            RecordKind::Error => "error",
            RecordKind::Behavior => "behavior",
            RecordKind::Api => "api",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "performance" => Ok(RecordKind::Performance),
            "error" => Ok(RecordKind::Error),
            "behavior" => Ok(RecordKind::Behavior),
            "api" => Ok(RecordKind::Api),
            other => Err(StoreError::UnknownKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record about to be persisted. The store assigns the id and starts the
/// retry count at zero.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub kind: RecordKind,
    pub data: serde_json::Value,
    pub timestamp_ms: i64,
    pub priority: i32,
}

/// A persisted record as read back from the store.
///
/// Replay ordering invariant: priority descending, then timestamp ascending.
/// `retry_count` only ever increases for a given id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub kind: RecordKind,
    pub data: serde_json::Value,
    pub timestamp_ms: i64,
    pub retry_count: u32,
    pub priority: i32,
}
