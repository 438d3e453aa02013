// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use telemetry_store::StoreError;

/// How a transport attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// Connection-level failure (refused, reset, DNS).
    Network,
    /// The request did not complete within the transport timeout.
    Timeout,
    /// The collector answered with a non-2xx status.
    Status(u16),
}

impl TransportFailure {
    /// 408, 429, and any 5xx are worth retrying; other 4xx are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportFailure::Network | TransportFailure::Timeout => true,
            TransportFailure::Status(code) => {
                *code == 408 || *code == 429 || (500..600).contains(code)
            }
        }
    }
}

/// Errors raised inside the delivery pipeline.
///
/// Sampling drops and overflow drops are intentional outcomes, not errors;
/// they surface as events and stat counters instead. Nothing in this enum
/// ever crosses the `report()` ingress boundary.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("transport failure ({failure:?}): {message}")]
    Transport {
        failure: TransportFailure,
        message: String,
    },

    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("transform stage '{stage}' aborted the chain: {reason}")]
    StageAborted { stage: String, reason: String },

    #[error("transform stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("stored record {id} exceeded its retry budget")]
    RecordExpired { id: String },

    #[error("pipeline channel closed")]
    ChannelClosed,
}

impl PipelineError {
    /// Whether the retry executor should attempt the operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Transport { failure, .. } => failure.is_retryable(),
            _ => false,
        }
    }

    pub(crate) fn transport(failure: TransportFailure, message: impl Into<String>) -> Self {
        PipelineError::Transport {
            failure,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_status_codes() {
        assert!(TransportFailure::Status(500).is_retryable());
        assert!(TransportFailure::Status(503).is_retryable());
        assert!(TransportFailure::Status(408).is_retryable());
        assert!(TransportFailure::Status(429).is_retryable());
        assert!(!TransportFailure::Status(400).is_retryable());
        assert!(!TransportFailure::Status(404).is_retryable());
        assert!(!TransportFailure::Status(413).is_retryable());
    }

    #[test]
    fn test_network_and_timeout_are_retryable() {
        assert!(TransportFailure::Network.is_retryable());
        assert!(TransportFailure::Timeout.is_retryable());
    }

    #[test]
    fn test_circuit_open_is_not_retryable() {
        assert!(!PipelineError::CircuitOpen.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let error = PipelineError::StageAborted {
            stage: "scrub_pii".to_string(),
            reason: "payload rejected".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "transform stage 'scrub_pii' aborted the chain: payload rejected"
        );
    }
}
