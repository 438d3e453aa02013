// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fail-fast isolation after sustained transport failure.
//!
//! The breaker wraps the retry executor's final outcome: it counts "the
//! retried operation ultimately failed", never individual retry attempts.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// How long an open circuit rejects calls before permitting a trial.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Gate one operation. `Err(CircuitOpen)` means the wrapped operation
    /// must not be invoked. An open circuit whose reset timeout has elapsed
    /// moves to half-open and lets the call through as a trial.
    pub fn try_acquire(&mut self) -> Result<(), PipelineError> {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let cooled_down = self
                    .last_failure
                    .is_some_and(|at| at.elapsed() >= self.config.reset_timeout);
                if cooled_down {
                    debug!("Circuit breaker half-open, permitting a trial call");
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    Ok(())
                } else {
                    Err(PipelineError::CircuitOpen)
                }
            }
        }
    }

    /// Record a final success. Returns true when this closed the circuit.
    pub fn record_success(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
                false
            }
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    debug!(
                        "Circuit breaker closed after {} trial successes",
                        self.success_count
                    );
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                    return true;
                }
                false
            }
            CircuitState::Open => false,
        }
    }

    /// Record a final failure. Returns true when this opened the circuit.
    pub fn record_failure(&mut self) -> bool {
        self.last_failure = Some(Instant::now());
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker opened after {} consecutive failures",
                        self.failure_count
                    );
                    self.state = CircuitState::Open;
                    return true;
                }
                false
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker reopened: trial call failed");
                self.state = CircuitState::Open;
                true
            }
            CircuitState::Open => false,
        }
    }
}
