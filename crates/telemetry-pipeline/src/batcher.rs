// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded in-memory aggregation with size- and time-triggered flushes.
//!
//! The queue and its interval timer are owned exclusively by the batcher
//! service task; everything else talks to it through [`BatcherHandle`]
//! commands. Flushed batches are emitted to the delivery loop over an mpsc
//! channel.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::events::DropReason;
use crate::record::ReportRecord;

/// What to do with an incoming record when the queue is already at
/// `max_queue_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the head of the queue and admit the new record.
    #[default]
    DropOldest,
    /// Silently discard the incoming record.
    DropNewest,
    /// Discard the incoming record and log a warning; the queue is unchanged.
    Reject,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Queue length that triggers a synchronous flush inside `add`.
    pub batch_size: usize,
    /// Hard cap on queued records; overflow is resolved by `overflow_policy`.
    pub max_queue_size: usize,
    /// Interval flush period; a non-empty queue is flushed at every tick.
    pub batch_interval: Duration,
    pub overflow_policy: OverflowPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_queue_size: 100,
            batch_interval: Duration::from_secs(10),
            overflow_policy: OverflowPolicy::DropOldest,
        }
    }
}

/// Outcome of one `add` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Admitted after evicting the oldest queued record.
    EvictedOldest,
    /// The incoming record was discarded.
    Discarded,
}

/// The pure queue behind the batcher service. FIFO by admission time.
#[derive(Debug)]
pub struct BatchQueue {
    records: VecDeque<ReportRecord>,
    config: BatchConfig,
}

impl BatchQueue {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            records: VecDeque::with_capacity(config.batch_size),
            config,
        }
    }

    /// Admit one record. Returns the admission outcome and, when the queue
    /// reached `batch_size`, the flushed batch.
    pub fn add(&mut self, record: ReportRecord) -> (Admission, Option<Vec<ReportRecord>>) {
        let admission = if self.records.len() >= self.config.max_queue_size {
            match self.config.overflow_policy {
                OverflowPolicy::DropOldest => {
                    self.records.pop_front();
                    self.records.push_back(record);
                    Admission::EvictedOldest
                }
                OverflowPolicy::DropNewest => return (Admission::Discarded, None),
                OverflowPolicy::Reject => {
                    warn!(
                        "Record rejected: queue is at capacity ({})",
                        self.config.max_queue_size
                    );
                    return (Admission::Discarded, None);
                }
            }
        } else {
            self.records.push_back(record);
            Admission::Admitted
        };

        let batch = if self.records.len() >= self.config.batch_size {
            Some(self.flush())
        } else {
            None
        };
        (admission, batch)
    }

    /// Drain every queued record, preserving admission order.
    pub fn flush(&mut self) -> Vec<ReportRecord> {
        self.records.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[derive(Debug)]
pub enum BatcherCommand {
    Add(ReportRecord),
    /// Drain the queue and hand the records back to the caller.
    Flush(oneshot::Sender<Vec<ReportRecord>>),
    Len(oneshot::Sender<usize>),
    Clear,
    Shutdown,
}

/// Batches and overflow notifications emitted to the delivery loop.
#[derive(Debug)]
pub enum BatchOutput {
    Batch(Vec<ReportRecord>),
    Dropped { count: usize, reason: DropReason },
}

#[derive(Clone)]
pub struct BatcherHandle {
    tx: mpsc::UnboundedSender<BatcherCommand>,
}

impl BatcherHandle {
    /// Enqueue one record. Fails only after shutdown.
    pub fn add(&self, record: ReportRecord) -> Result<(), PipelineError> {
        self.tx
            .send(BatcherCommand::Add(record))
            .map_err(|_| PipelineError::ChannelClosed)
    }

    /// Drain the queue immediately, resetting the interval timer.
    pub async fn flush(&self) -> Result<Vec<ReportRecord>, PipelineError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(BatcherCommand::Flush(response_tx))
            .map_err(|_| PipelineError::ChannelClosed)?;
        response_rx.await.map_err(|_| PipelineError::ChannelClosed)
    }

    pub async fn len(&self) -> Result<usize, PipelineError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(BatcherCommand::Len(response_tx))
            .map_err(|_| PipelineError::ChannelClosed)?;
        response_rx.await.map_err(|_| PipelineError::ChannelClosed)
    }

    pub fn clear(&self) -> Result<(), PipelineError> {
        self.tx
            .send(BatcherCommand::Clear)
            .map_err(|_| PipelineError::ChannelClosed)
    }

    pub fn shutdown(&self) -> Result<(), PipelineError> {
        self.tx
            .send(BatcherCommand::Shutdown)
            .map_err(|_| PipelineError::ChannelClosed)
    }
}

pub struct BatcherService {
    queue: BatchQueue,
    rx: mpsc::UnboundedReceiver<BatcherCommand>,
    batch_tx: mpsc::UnboundedSender<BatchOutput>,
    interval: Duration,
}

impl BatcherService {
    pub fn new(
        config: BatchConfig,
        batch_tx: mpsc::UnboundedSender<BatchOutput>,
    ) -> (Self, BatcherHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let interval = config.batch_interval;
        let service = Self {
            queue: BatchQueue::new(config),
            rx,
            batch_tx,
            interval,
        };
        (service, BatcherHandle { tx })
    }

    pub async fn run(mut self) {
        debug!("Batcher service started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() fires immediately; skip the initial tick
        ticker.tick().await;

        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    match command {
                        Some(BatcherCommand::Add(record)) => {
                            let (admission, batch) = self.queue.add(record);
                            if admission == Admission::Discarded
                                || admission == Admission::EvictedOldest
                            {
                                let _ = self.batch_tx.send(BatchOutput::Dropped {
                                    count: 1,
                                    reason: DropReason::Overflow,
                                });
                            }
                            if let Some(batch) = batch {
                                self.emit(batch);
                                ticker.reset();
                            }
                        }
                        Some(BatcherCommand::Flush(response_tx)) => {
                            let records = self.queue.flush();
                            ticker.reset();
                            if response_tx.send(records).is_err() {
                                debug!("Flush response receiver dropped");
                            }
                        }
                        Some(BatcherCommand::Len(response_tx)) => {
                            let _ = response_tx.send(self.queue.len());
                        }
                        Some(BatcherCommand::Clear) => self.queue.clear(),
                        Some(BatcherCommand::Shutdown) | None => {
                            if !self.queue.is_empty() {
                                let batch = self.queue.flush();
                                self.emit(batch);
                            }
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !self.queue.is_empty() {
                        let batch = self.queue.flush();
                        self.emit(batch);
                    }
                }
            }
        }

        debug!("Batcher service stopped");
    }

    fn emit(&self, batch: Vec<ReportRecord>) {
        if self.batch_tx.send(BatchOutput::Batch(batch)).is_err() {
            debug!("Batch receiver dropped; records discarded");
        }
    }
}
