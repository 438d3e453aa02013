// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ordered, abortable transform chain applied to a batch payload before it
//! reaches the transport.
//!
//! Stages run in ascending priority order. A stage may rewrite the payload,
//! abort the whole chain, or fail; a failing stage is handled per the
//! configured [`ErrorStrategy`]. Each stage execution races a timeout and a
//! timed-out stage counts as a failed one.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::PipelineError;

/// Mutable envelope threaded through one chain pass.
pub struct TransformContext {
    /// Snapshot of the payload as it entered the chain. Stages must not
    /// rely on it reflecting earlier stages' edits.
    pub original: Value,
    pub data: Value,
    pub aborted: bool,
    pub abort_reason: Option<String>,
    pub metadata: std::collections::HashMap<String, String>,
    pub started: Instant,
}

impl TransformContext {
    pub fn new(data: Value) -> Self {
        Self {
            original: data.clone(),
            data,
            aborted: false,
            abort_reason: None,
            metadata: std::collections::HashMap::new(),
            started: Instant::now(),
        }
    }

    /// Stop the chain after this stage.
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.aborted = true;
        self.abort_reason = Some(reason.into());
    }
}

pub type StageFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;
pub type StageHandler =
    Box<dyn for<'a> Fn(&'a mut TransformContext) -> StageFuture<'a> + Send + Sync>;

/// Wrap a synchronous stage function into a [`StageHandler`].
pub fn sync_stage<F>(f: F) -> StageHandler
where
    F: Fn(&mut TransformContext) -> Result<(), String> + Send + Sync + 'static,
{
    Box::new(move |ctx| {
        let result = f(ctx);
        Box::pin(async move { result })
    })
}

pub struct TransformStage {
    pub name: String,
    /// Lower priority runs earlier.
    pub priority: i32,
    pub handler: StageHandler,
}

impl TransformStage {
    pub fn new(name: impl Into<String>, priority: i32, handler: StageHandler) -> Self {
        Self {
            name: name.into(),
            priority,
            handler,
        }
    }
}

/// What to do when a stage fails (returns an error or times out).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorStrategy {
    /// Skip the failing stage and keep going.
    #[default]
    Continue,
    /// Stop the chain and mark it aborted.
    Abort,
    /// Propagate the failure to the chain's caller.
    Throw,
}

#[derive(Debug, Clone)]
pub struct StageError {
    pub stage: String,
    pub message: String,
}

/// Result of one chain pass. `data` is `None` whenever the chain aborted.
#[derive(Debug)]
pub struct TransformOutcome {
    pub success: bool,
    pub data: Option<Value>,
    pub aborted: bool,
    pub abort_reason: Option<String>,
    pub duration: Duration,
    pub executed: Vec<String>,
    pub errors: Vec<StageError>,
}

pub struct TransformChain {
    stages: Vec<TransformStage>,
    stage_timeout: Duration,
    error_strategy: ErrorStrategy,
}

impl TransformChain {
    pub fn new(stage_timeout: Duration, error_strategy: ErrorStrategy) -> Self {
        Self {
            stages: Vec::new(),
            stage_timeout,
            error_strategy,
        }
    }

    /// Register a stage. Names are unique; priority decides execution order
    /// (ascending), with registration order breaking ties.
    pub fn register(&mut self, stage: TransformStage) -> Result<(), PipelineError> {
        if self.stages.iter().any(|s| s.name == stage.name) {
            return Err(PipelineError::InvalidConfig(format!(
                "duplicate transform stage '{}'",
                stage.name
            )));
        }
        let at = self
            .stages
            .partition_point(|s| s.priority <= stage.priority);
        self.stages.insert(at, stage);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage over `data`.
    ///
    /// Only the `Throw` strategy makes this return `Err`; aborts and
    /// continued-past failures are reported inside the outcome.
    pub async fn run(&self, data: Value) -> Result<TransformOutcome, PipelineError> {
        let started = Instant::now();
        let mut ctx = TransformContext::new(data);
        let mut executed = Vec::new();
        let mut errors = Vec::new();

        for stage in &self.stages {
            let result = tokio::time::timeout(self.stage_timeout, (stage.handler)(&mut ctx)).await;
            let failure = match result {
                Ok(Ok(())) => {
                    executed.push(stage.name.clone());
                    if ctx.aborted {
                        debug!(
                            "Transform chain aborted by stage '{}': {:?}",
                            stage.name, ctx.abort_reason
                        );
                        break;
                    }
                    continue;
                }
                Ok(Err(message)) => message,
                Err(_) => format!("timed out after {:?}", self.stage_timeout),
            };

            warn!("Transform stage '{}' failed: {failure}", stage.name);
            errors.push(StageError {
                stage: stage.name.clone(),
                message: failure.clone(),
            });

            match self.error_strategy {
                ErrorStrategy::Continue => continue,
                ErrorStrategy::Abort => {
                    ctx.abort(format!("stage '{}' failed: {failure}", stage.name));
                    break;
                }
                ErrorStrategy::Throw => {
                    return Err(PipelineError::StageFailed {
                        stage: stage.name.clone(),
                        message: failure,
                    });
                }
            }
        }

        Ok(TransformOutcome {
            success: !ctx.aborted && errors.is_empty(),
            data: if ctx.aborted { None } else { Some(ctx.data) },
            aborted: ctx.aborted,
            abort_reason: ctx.abort_reason,
            duration: started.elapsed(),
            executed,
            errors,
        })
    }
}
