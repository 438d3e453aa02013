// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use serde::Serialize;

use crate::record::now_ms;

/// Monotonic delivery counters, mutated only by the orchestrator.
///
/// `total_sends` counts delivery attempts handed to a transport, including
/// unload-safe sends whose outcome is never observed; those never credit
/// `success_count`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryStats {
    pub total_sends: u64,
    pub success_count: u64,
    pub failed_count: u64,
    pub dropped_count: u64,
    pub total_bytes: u64,
    pub avg_response_time_ms: f64,
    pub last_send_unix_ms: Option<i64>,
}

impl DeliveryStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_sends == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_sends as f64
    }

    pub(crate) fn record_attempt(&mut self, bytes: usize) {
        self.total_sends += 1;
        self.total_bytes += bytes as u64;
        self.last_send_unix_ms = Some(now_ms());
    }

    pub(crate) fn record_success(&mut self, elapsed: Duration) {
        self.success_count += 1;
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        // incremental rolling average over confirmed responses
        self.avg_response_time_ms +=
            (elapsed_ms - self.avg_response_time_ms) / self.success_count as f64;
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed_count += 1;
    }

    pub(crate) fn record_dropped(&mut self, count: usize) {
        self.dropped_count += count as u64;
    }
}
