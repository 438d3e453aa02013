// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client-embedded telemetry delivery pipeline.
//!
//! Records enter through [`reporter::Reporter::report`], pass the sampler,
//! accumulate in the batcher, and leave through a transform chain and a
//! retry-wrapped, circuit-breaker-gated transport. Batches that cannot be
//! delivered are persisted to a durable store and replayed later.
//!
//! The pipeline is host-agnostic: identity, host lifecycle signals, and the
//! durable store are injected at construction time.

pub mod batcher;
pub mod breaker;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod record;
pub mod replay;
pub mod reporter;
pub mod retry;
pub mod sampler;
pub mod signals;
pub mod stats;
pub mod transform;
pub mod transport;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use record::{RecordKind, ReportRecord};
pub use reporter::{Reporter, ReporterConfig};
