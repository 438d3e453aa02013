// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use telemetry_store::RecordKind;

/// One observational event produced by the host SDK.
///
/// Immutable once created. The producer owns the record until it is handed
/// to [`crate::reporter::Reporter::report`]; from then on the pipeline owns
/// it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub data: Value,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub context: Value,
}

impl ReportRecord {
    /// Create a record stamped with the current wall-clock time.
    pub fn new(kind: RecordKind, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp_ms: now_ms(),
            context: Value::Null,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
