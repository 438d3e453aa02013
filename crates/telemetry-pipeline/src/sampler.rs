// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Probabilistic admission control.
//!
//! Sampling happens once per record, before the record ever reaches the
//! batcher. A dropped record is never persisted and never counted as a
//! delivery failure.

use std::collections::HashMap;

use crate::record::{RecordKind, ReportRecord};

/// Custom admission predicate. When supplied it takes full precedence over
/// the configured rates and sees the whole record.
pub type SamplePredicate = dyn Fn(&ReportRecord) -> bool + Send + Sync;

/// Sampling rates, all in `[0, 1]`. Resolution order for a record of kind
/// `k`: `kind_rates[k]` > category rate (`error_rate` for errors,
/// `performance_rate` for performance records) > `sample_rate`.
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    pub sample_rate: f64,
    pub error_rate: Option<f64>,
    pub performance_rate: Option<f64>,
    pub kind_rates: HashMap<RecordKind, f64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1.0,
            error_rate: None,
            performance_rate: None,
            kind_rates: HashMap::new(),
        }
    }
}

impl SamplingConfig {
    /// All configured rates, for eager validation.
    pub(crate) fn rates(&self) -> impl Iterator<Item = f64> + '_ {
        std::iter::once(self.sample_rate)
            .chain(self.error_rate)
            .chain(self.performance_rate)
            .chain(self.kind_rates.values().copied())
    }

    fn resolve(&self, kind: RecordKind) -> f64 {
        if let Some(rate) = self.kind_rates.get(&kind) {
            return *rate;
        }
        match kind {
            RecordKind::Error => self.error_rate.unwrap_or(self.sample_rate),
            RecordKind::Performance => self.performance_rate.unwrap_or(self.sample_rate),
            _ => self.sample_rate,
        }
    }
}

/// Stateless sampler. No state is retained between calls; every decision is
/// an independent uniform draw.
pub struct Sampler {
    config: SamplingConfig,
    predicate: Option<Box<SamplePredicate>>,
}

impl Sampler {
    pub fn new(config: SamplingConfig) -> Self {
        Self {
            config,
            predicate: None,
        }
    }

    pub fn with_predicate(config: SamplingConfig, predicate: Box<SamplePredicate>) -> Self {
        Self {
            config,
            predicate: Some(predicate),
        }
    }

    /// Decide whether `record` is admitted into the pipeline.
    pub fn should_sample(&self, record: &ReportRecord) -> bool {
        if let Some(predicate) = &self.predicate {
            return predicate(record);
        }
        let rate = self.config.resolve(record.kind);
        rand::random::<f64>() < rate
    }
}
