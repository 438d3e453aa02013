// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tracing::warn;

use crate::batcher::BatchConfig;
use crate::breaker::BreakerConfig;
use crate::error::PipelineError;
use crate::replay::ReplayConfig;
use crate::retry::RetryPolicy;
use crate::sampler::SamplingConfig;
use crate::transform::ErrorStrategy;

#[derive(Debug, Clone)]
pub struct TransformConfig {
    /// Budget for each stage execution; a slower stage counts as failed.
    pub stage_timeout: Duration,
    pub error_strategy: ErrorStrategy,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(1),
            error_strategy: ErrorStrategy::Continue,
        }
    }
}

/// Configuration for the whole delivery pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The DSN: where batches are POSTed.
    pub endpoint: String,
    /// Per-request timeout on the standard transport.
    pub transport_timeout: Duration,
    /// Gzip request bodies (`Content-Encoding: gzip`).
    pub compress: bool,
    pub sampling: SamplingConfig,
    pub batch: BatchConfig,
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    pub transform: TransformConfig,
    pub replay: ReplayConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            transport_timeout: Duration::from_secs(10),
            compress: false,
            sampling: SamplingConfig::default(),
            batch: BatchConfig::default(),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            transform: TransformConfig::default(),
            replay: ReplayConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration. Sampling rates are checked here, eagerly,
    /// so an out-of-range rate never reaches sampling time.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.endpoint.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "endpoint cannot be empty".to_string(),
            ));
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(PipelineError::InvalidConfig(format!(
                "endpoint '{}' is not an http(s) URL",
                self.endpoint
            )));
        }

        for rate in self.sampling.rates() {
            if !(0.0..=1.0).contains(&rate) {
                return Err(PipelineError::InvalidConfig(format!(
                    "sampling rate {rate} is outside [0, 1]"
                )));
            }
        }

        if self.batch.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.batch.max_queue_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_queue_size must be greater than 0".to_string(),
            ));
        }
        // With max_queue_size < batch_size the queue can never reach
        // batch_size, so only the interval timer ever flushes. Accepted
        // as configured, but worth flagging.
        if self.batch.max_queue_size < self.batch.batch_size {
            warn!(
                "max_queue_size ({}) is smaller than batch_size ({}); \
                 size-triggered flushes will never fire",
                self.batch.max_queue_size, self.batch.batch_size
            );
        }

        if self.retry.backoff_factor < 1.0 {
            return Err(PipelineError::InvalidConfig(
                "backoff_factor must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(PipelineError::InvalidConfig(format!(
                "jitter {} is outside [0, 1]",
                self.retry.jitter
            )));
        }

        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            return Err(PipelineError::InvalidConfig(
                "breaker thresholds must be greater than 0".to_string(),
            ));
        }

        if self.replay.batch_limit == 0 {
            return Err(PipelineError::InvalidConfig(
                "replay batch_limit must be greater than 0".to_string(),
            ));
        }
        if self.replay.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "replay max_attempts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig::new("https://collector.example.com/v1/intake")
    }

    #[test]
    fn test_default_config_with_endpoint_is_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_empty_endpoint_is_rejected() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_http_endpoint_is_rejected() {
        let config = PipelineConfig::new("udp://collector:8125");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_sample_rate_fails_eagerly() {
        let mut config = config();
        config.sampling.sample_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = self::config();
        config.sampling.error_rate = Some(-0.1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let mut config = config();
        config.batch.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_queue_smaller_than_batch_is_accepted_with_warning() {
        let mut config = config();
        config.batch.batch_size = 10;
        config.batch.max_queue_size = 5;
        assert!(config.validate().is_ok());
        assert!(logs_contain("size-triggered flushes will never fire"));
    }

    #[test]
    fn test_invalid_retry_settings_are_rejected() {
        let mut config = config();
        config.retry.backoff_factor = 0.5;
        assert!(config.validate().is_err());

        let mut config = self::config();
        config.retry.jitter = 2.0;
        assert!(config.validate().is_err());
    }
}
