// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The orchestrator wiring ingress to egress.
//!
//! `report()` is the single ingress for producers: it samples, stamps
//! identity context, and hands the record to the batcher. Flushed batches
//! run through the transform chain and then the circuit-breaker-gated,
//! retry-wrapped transport; batches that ultimately fail delivery are
//! persisted for replay. Host signals force unload-safe flushes and
//! trigger replay cycles.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use telemetry_store::DurableStore;

use crate::batcher::{BatchOutput, BatcherHandle, BatcherService};
use crate::breaker::CircuitBreaker;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::events::{DropReason, EventBus, PipelineEvent};
use crate::identity::IdentityProvider;
use crate::record::ReportRecord;
use crate::replay::ReplayManager;
use crate::retry::RetryExecutor;
use crate::sampler::{SamplePredicate, Sampler};
use crate::signals::{HostSignal, HostSignals};
use crate::stats::DeliveryStats;
use crate::transform::TransformChain;
use crate::transport::{HttpTransport, Transport, UnloadTransport};

/// Everything the orchestrator needs at construction time. Capabilities
/// (store, identity, signals, transports) are injected here; the pipeline
/// never reaches into ambient state for them.
pub struct ReporterConfig {
    pub pipeline: PipelineConfig,
    pub store: Arc<dyn DurableStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub signals: HostSignals,
    pub chain: TransformChain,
    /// Custom sampling predicate; takes precedence over configured rates.
    pub sampler_predicate: Option<Box<SamplePredicate>>,
    /// Override the standard transport (defaults to [`HttpTransport`]).
    pub transport: Option<Arc<dyn Transport>>,
    /// Override the unload-safe transport (defaults to [`UnloadTransport`]).
    pub unload_transport: Option<Arc<dyn Transport>>,
}

impl ReporterConfig {
    pub fn new(
        pipeline: PipelineConfig,
        store: Arc<dyn DurableStore>,
        identity: Arc<dyn IdentityProvider>,
        signals: HostSignals,
        chain: TransformChain,
    ) -> Self {
        Self {
            pipeline,
            store,
            identity,
            signals,
            chain,
            sampler_predicate: None,
            transport: None,
            unload_transport: None,
        }
    }
}

/// Public handle to the delivery pipeline.
pub struct Reporter {
    sampler: Sampler,
    identity: Arc<dyn IdentityProvider>,
    batcher: BatcherHandle,
    batch_tx: mpsc::UnboundedSender<BatchOutput>,
    events: EventBus,
    stats: Arc<Mutex<DeliveryStats>>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Reporter {
    pub fn new(config: ReporterConfig) -> Result<Self, PipelineError> {
        config.pipeline.validate()?;

        let transport: Arc<dyn Transport> = match config.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                config.pipeline.endpoint.clone(),
                config.pipeline.transport_timeout,
                config.pipeline.compress,
            )?),
        };
        let unload_transport: Arc<dyn Transport> = match config.unload_transport {
            Some(transport) => transport,
            None => Arc::new(UnloadTransport::new(config.pipeline.endpoint.clone())?),
        };

        let sampler = match config.sampler_predicate {
            Some(predicate) => {
                Sampler::with_predicate(config.pipeline.sampling.clone(), predicate)
            }
            None => Sampler::new(config.pipeline.sampling.clone()),
        };

        let events = EventBus::default();
        let stats = Arc::new(Mutex::new(DeliveryStats::default()));
        let cancel = CancellationToken::new();

        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let (batcher_service, batcher) =
            BatcherService::new(config.pipeline.batch.clone(), batch_tx.clone());
        tokio::spawn(batcher_service.run());

        let signals_rx = config.signals.subscribe();
        let worker = DeliveryWorker {
            chain: config.chain,
            transport,
            unload_transport,
            retry: RetryExecutor::new(config.pipeline.retry.clone()),
            breaker: CircuitBreaker::new(config.pipeline.breaker.clone()),
            replay: ReplayManager::new(
                Arc::clone(&config.store),
                config.pipeline.replay.clone(),
            ),
            batcher: batcher.clone(),
            events: events.clone(),
            stats: Arc::clone(&stats),
            cancel: cancel.clone(),
            online: true,
            next_replay_at: None,
        };
        let worker_handle = tokio::spawn(worker.run(batch_rx, signals_rx));

        Ok(Self {
            sampler,
            identity: config.identity,
            batcher,
            batch_tx,
            events,
            stats,
            cancel,
            worker: Mutex::new(Some(worker_handle)),
        })
    }

    /// Ingress for producers. Fire-and-forget: never blocks, never fails.
    pub fn report(&self, mut record: ReportRecord) {
        if !self.sampler.should_sample(&record) {
            self.lock_stats().record_dropped(1);
            self.events.publish(PipelineEvent::RecordsDropped {
                count: 1,
                reason: DropReason::Sampling,
            });
            return;
        }

        if record.context.is_null() {
            record.context = self.identity.context();
        }

        if self.batcher.add(record).is_err() {
            debug!("Pipeline is shut down; record discarded");
        }
    }

    /// Drain the batcher and queue the records for immediate delivery.
    pub async fn flush(&self) -> Result<(), PipelineError> {
        let records = self.batcher.flush().await?;
        if records.is_empty() {
            return Ok(());
        }
        self.batch_tx
            .send(BatchOutput::Batch(records))
            .map_err(|_| PipelineError::ChannelClosed)
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> DeliveryStats {
        self.lock_stats().clone()
    }

    /// Subscribe to statistics/lifecycle events. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// The single teardown path: flushes outstanding data, stops the
    /// batcher and delivery tasks, and detaches signal subscriptions.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.worker.lock().expect("lock poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Delivery worker did not shut down cleanly: {e}");
            }
        }
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, DeliveryStats> {
        self.stats.lock().expect("lock poisoned")
    }
}

struct DeliveryWorker {
    chain: TransformChain,
    transport: Arc<dyn Transport>,
    unload_transport: Arc<dyn Transport>,
    retry: RetryExecutor,
    breaker: CircuitBreaker,
    replay: ReplayManager,
    batcher: BatcherHandle,
    events: EventBus,
    stats: Arc<Mutex<DeliveryStats>>,
    cancel: CancellationToken,
    online: bool,
    next_replay_at: Option<Instant>,
}

impl DeliveryWorker {
    async fn run(
        mut self,
        mut batch_rx: mpsc::UnboundedReceiver<BatchOutput>,
        mut signals_rx: broadcast::Receiver<HostSignal>,
    ) {
        debug!("Delivery worker started");

        let cancel = self.cancel.clone();
        let mut replay_tick = tokio::time::interval(self.replay.config().replay_interval);
        replay_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        replay_tick.tick().await; // discard the immediate first tick
        let mut signals_open = true;

        loop {
            let pending_retry = self.next_replay_at;
            tokio::select! {
                output = batch_rx.recv() => match output {
                    Some(BatchOutput::Batch(records)) => self.deliver_batch(records).await,
                    Some(BatchOutput::Dropped { count, reason }) => {
                        self.note_dropped(count, reason);
                    }
                    None => break,
                },
                signal = signals_rx.recv(), if signals_open => match signal {
                    Ok(HostSignal::Hidden) | Ok(HostSignal::Terminating) => {
                        self.flush_for_unload().await;
                    }
                    Ok(HostSignal::ConnectivityLost) => {
                        debug!("Host reports connectivity lost; buffering to store");
                        self.online = false;
                    }
                    Ok(HostSignal::ConnectivityRestored) => {
                        debug!("Host reports connectivity restored; replaying");
                        self.online = true;
                        self.run_replay().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Missed {skipped} host signals");
                    }
                    Err(broadcast::error::RecvError::Closed) => signals_open = false,
                },
                _ = replay_tick.tick(), if !self.online => self.run_replay().await,
                _ = async {
                    match pending_retry {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                }, if pending_retry.is_some() => {
                    self.next_replay_at = None;
                    self.run_replay().await;
                }
                _ = cancel.cancelled() => {
                    self.final_flush(&mut batch_rx).await;
                    break;
                }
            }
        }

        self.events.publish(PipelineEvent::ShutdownComplete);
        debug!("Delivery worker stopped");
    }

    /// Deliver one live batch; persist it on ultimate failure.
    async fn deliver_batch(&mut self, records: Vec<ReportRecord>) {
        if records.is_empty() {
            return;
        }

        if !self.online {
            debug!("Offline: persisting {} records without attempt", records.len());
            self.replay.persist_batch(&records);
            return;
        }

        let payload = match serde_json::to_value(&records) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize batch: {e}");
                self.note_dropped(records.len(), DropReason::TransformAborted);
                return;
            }
        };

        let Some(body) = self.transform_payload(payload, records.len()).await else {
            return;
        };

        debug!("Flushing {} records ({} bytes)", records.len(), body.len());
        let started = Instant::now();
        match self.send_guarded(body.clone()).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                self.lock_stats().record_success(elapsed);
                self.events.publish(PipelineEvent::FlushSucceeded {
                    records: records.len(),
                    bytes: body.len(),
                    elapsed,
                });
            }
            Err(e) => {
                warn!("Batch delivery failed, persisting for replay: {e}");
                self.lock_stats().record_failure();
                self.events.publish(PipelineEvent::FlushFailed {
                    records: records.len(),
                    retryable: e.is_retryable(),
                });
                self.replay.persist_batch(&records);
            }
        }
    }

    /// Run the transform chain over a batch payload. Returns the wire body,
    /// or `None` when the chain aborted or threw and the batch was dropped.
    async fn transform_payload(&mut self, payload: Value, record_count: usize) -> Option<Bytes> {
        let outcome = match self.chain.run(payload).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Transform chain error, dropping batch: {e}");
                self.note_dropped(record_count, DropReason::TransformAborted);
                return None;
            }
        };

        if outcome.aborted {
            debug!(
                "Transform chain aborted batch: {:?}",
                outcome.abort_reason
            );
            self.note_dropped(record_count, DropReason::TransformAborted);
            return None;
        }

        let data = outcome.data?;
        match serde_json::to_vec(&data) {
            Ok(body) => Some(Bytes::from(body)),
            Err(e) => {
                error!("Failed to serialize transformed batch: {e}");
                self.note_dropped(record_count, DropReason::TransformAborted);
                None
            }
        }
    }

    /// One gated delivery attempt: circuit breaker first, then the retry
    /// executor around the standard transport. The breaker counts only the
    /// final, retry-exhausted outcome.
    async fn send_guarded(&mut self, body: Bytes) -> Result<(), PipelineError> {
        self.breaker.try_acquire()?;
        self.lock_stats().record_attempt(body.len());

        let transport = Arc::clone(&self.transport);
        let result = self
            .retry
            .execute(|| {
                let transport = Arc::clone(&transport);
                let body = body.clone();
                async move { transport.send(body).await }
            })
            .await;

        match &result {
            Ok(()) => {
                if self.breaker.record_success() {
                    self.events.publish(PipelineEvent::CircuitClosed);
                }
            }
            Err(_) => {
                if self.breaker.record_failure() {
                    self.events.publish(PipelineEvent::CircuitOpened);
                }
            }
        }
        result
    }

    /// Forced flush while the host is going away: one-way, no retries, no
    /// confirmation. Attempts count toward `total_sends` but never credit
    /// `success_count`.
    async fn flush_for_unload(&mut self) {
        let records = match self.batcher.flush().await {
            Ok(records) => records,
            Err(_) => return,
        };
        if records.is_empty() {
            return;
        }

        let payload = match serde_json::to_value(&records) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize unload batch: {e}");
                return;
            }
        };
        let Some(body) = self.transform_payload(payload, records.len()).await else {
            return;
        };

        debug!("Unload flush of {} records", records.len());
        self.lock_stats().record_attempt(body.len());
        if let Err(e) = self.unload_transport.send(body).await {
            // still best-effort: the records were already drained
            warn!("Unload transport refused batch: {e}");
        }
    }

    /// One replay cycle: collect due records, redeliver them through the
    /// same transform/transport path, and settle the store bookkeeping.
    async fn run_replay(&mut self) {
        if !self.replay.try_begin() {
            return;
        }

        let plan = match self.replay.collect() {
            Ok(plan) => plan,
            Err(e) => {
                error!("Replay collection failed: {e}");
                self.replay.finish();
                return;
            }
        };

        if plan.expired > 0 {
            self.note_dropped(plan.expired, DropReason::Expired);
        }
        if plan.records.is_empty() {
            if plan.expired > 0 {
                self.events.publish(PipelineEvent::ReplayCompleted {
                    delivered: 0,
                    expired: plan.expired,
                });
            }
            self.replay.finish();
            return;
        }

        debug!("Replaying {} stored records", plan.records.len());
        let payload = Value::Array(plan.records.iter().map(|r| r.data.clone()).collect());
        let Some(body) = self.transform_payload(payload, plan.records.len()).await else {
            // the chain rejected these records; do not retry them forever
            self.replay.complete(&plan.records);
            self.replay.finish();
            return;
        };

        let started = Instant::now();
        match self.send_guarded(body).await {
            Ok(()) => {
                self.lock_stats().record_success(started.elapsed());
                self.replay.complete(&plan.records);
                self.online = true;
                self.events.publish(PipelineEvent::ReplayCompleted {
                    delivered: plan.records.len(),
                    expired: plan.expired,
                });
            }
            Err(e) => {
                debug!("Replay cycle failed, will retry later: {e}");
                self.lock_stats().record_failure();
                self.replay.record_failure(&plan.records);
                self.next_replay_at =
                    Some(Instant::now() + self.replay.config().retry_delay);
                self.events.publish(PipelineEvent::FlushFailed {
                    records: plan.records.len(),
                    retryable: e.is_retryable(),
                });
            }
        }
        self.replay.finish();
    }

    /// Teardown: drain the batcher and anything still queued, then stop.
    async fn final_flush(&mut self, batch_rx: &mut mpsc::UnboundedReceiver<BatchOutput>) {
        if let Ok(records) = self.batcher.flush().await {
            self.deliver_batch(records).await;
        }
        let _ = self.batcher.shutdown();

        while let Ok(output) = batch_rx.try_recv() {
            match output {
                BatchOutput::Batch(records) => self.deliver_batch(records).await,
                BatchOutput::Dropped { count, reason } => self.note_dropped(count, reason),
            }
        }
    }

    fn note_dropped(&self, count: usize, reason: DropReason) {
        self.lock_stats().record_dropped(count);
        self.events
            .publish(PipelineEvent::RecordsDropped { count, reason });
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, DeliveryStats> {
        self.stats.lock().expect("lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::{BatchConfig, OverflowPolicy};
    use crate::identity::StaticIdentity;
    use crate::record::RecordKind;
    use crate::retry::RetryPolicy;
    use crate::sampler::SamplingConfig;
    use crate::transform::{sync_stage, ErrorStrategy, TransformStage};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use telemetry_store::{RetentionConfig, SqliteStore};

    /// Transport double that counts attempts and fails on demand.
    struct FakeTransport {
        attempts: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    impl FakeTransport {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                attempts: AtomicUsize::new(0),
                fail: std::sync::atomic::AtomicBool::new(fail),
            })
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, _body: Bytes) -> Result<(), PipelineError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(PipelineError::transport(
                    crate::error::TransportFailure::Network,
                    "injected failure",
                ))
            } else {
                Ok(())
            }
        }
    }

    fn store() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::open_in_memory(RetentionConfig::default()).unwrap())
    }

    fn pipeline_config() -> PipelineConfig {
        let mut config = PipelineConfig::new("http://localhost:0/intake");
        config.batch = BatchConfig {
            batch_size: 5,
            max_queue_size: 1000,
            batch_interval: Duration::from_secs(3600),
            overflow_policy: OverflowPolicy::DropOldest,
        };
        config.retry = RetryPolicy {
            max_retries: 0,
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };
        config
    }

    fn reporter_with(
        config: PipelineConfig,
        store: Arc<SqliteStore>,
        signals: HostSignals,
        transport: Arc<FakeTransport>,
        unload: Arc<FakeTransport>,
    ) -> Reporter {
        let chain = TransformChain::new(Duration::from_secs(1), ErrorStrategy::Continue);
        let mut reporter_config = ReporterConfig::new(
            config,
            store,
            Arc::new(StaticIdentity::anonymous()),
            signals,
            chain,
        );
        reporter_config.transport = Some(transport);
        reporter_config.unload_transport = Some(unload);
        Reporter::new(reporter_config).unwrap()
    }

    fn record() -> ReportRecord {
        ReportRecord::new(RecordKind::Behavior, json!({"click": "#cta"}))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_sampled_out_records_never_touch_the_network() {
        let mut config = pipeline_config();
        config.sampling = SamplingConfig {
            sample_rate: 0.0,
            ..Default::default()
        };
        let transport = FakeTransport::new(false);
        let unload = FakeTransport::new(false);
        let reporter = reporter_with(
            config,
            store(),
            HostSignals::new(),
            Arc::clone(&transport),
            Arc::clone(&unload),
        );

        let n = 100_000;
        for _ in 0..n {
            reporter.report(record());
        }
        reporter.flush().await.unwrap();
        settle().await;

        let stats = reporter.stats();
        assert_eq!(stats.dropped_count, n);
        assert_eq!(stats.total_sends, 0);
        assert_eq!(transport.attempts(), 0);
        assert_eq!(unload.attempts(), 0);

        reporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_size_triggered_batch_is_delivered() {
        let transport = FakeTransport::new(false);
        let reporter = reporter_with(
            pipeline_config(),
            store(),
            HostSignals::new(),
            Arc::clone(&transport),
            FakeTransport::new(false),
        );

        for _ in 0..5 {
            reporter.report(record());
        }
        settle().await;

        assert_eq!(transport.attempts(), 1);
        let stats = reporter.stats();
        assert_eq!(stats.success_count, 1);
        assert!(stats.total_bytes > 0);
        assert!((stats.success_rate() - 1.0).abs() < f64::EPSILON);

        reporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_batch_is_persisted_for_replay() {
        let transport = FakeTransport::new(true);
        let store = store();
        let reporter = reporter_with(
            pipeline_config(),
            Arc::clone(&store),
            HostSignals::new(),
            Arc::clone(&transport),
            FakeTransport::new(false),
        );

        for _ in 0..5 {
            reporter.report(record());
        }
        settle().await;

        assert_eq!(transport.attempts(), 1);
        assert_eq!(reporter.stats().failed_count, 1);
        assert_eq!(telemetry_store::DurableStore::count(&*store).unwrap(), 5);

        reporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_offline_batches_skip_transport_entirely() {
        let transport = FakeTransport::new(false);
        let store = store();
        let signals = HostSignals::new();
        let reporter = reporter_with(
            pipeline_config(),
            Arc::clone(&store),
            signals.clone(),
            Arc::clone(&transport),
            FakeTransport::new(false),
        );

        signals.emit(HostSignal::ConnectivityLost);
        settle().await;

        for _ in 0..5 {
            reporter.report(record());
        }
        settle().await;

        assert_eq!(transport.attempts(), 0);
        assert_eq!(telemetry_store::DurableStore::count(&*store).unwrap(), 5);

        reporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_connectivity_restored_replays_stored_records() {
        let transport = FakeTransport::new(false);
        let store = store();
        let signals = HostSignals::new();
        let reporter = reporter_with(
            pipeline_config(),
            Arc::clone(&store),
            signals.clone(),
            Arc::clone(&transport),
            FakeTransport::new(false),
        );

        signals.emit(HostSignal::ConnectivityLost);
        settle().await;
        for _ in 0..5 {
            reporter.report(record());
        }
        settle().await;
        assert_eq!(telemetry_store::DurableStore::count(&*store).unwrap(), 5);

        signals.emit(HostSignal::ConnectivityRestored);
        settle().await;

        assert_eq!(transport.attempts(), 1);
        assert_eq!(telemetry_store::DurableStore::count(&*store).unwrap(), 0);

        reporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_hidden_signal_flushes_through_unload_transport() {
        let transport = FakeTransport::new(false);
        let unload = FakeTransport::new(false);
        let signals = HostSignals::new();
        let reporter = reporter_with(
            pipeline_config(),
            store(),
            signals.clone(),
            Arc::clone(&transport),
            Arc::clone(&unload),
        );

        // fewer than batch_size, so nothing flushes on its own
        reporter.report(record());
        reporter.report(record());

        signals.emit(HostSignal::Hidden);
        settle().await;

        assert_eq!(unload.attempts(), 1);
        assert_eq!(transport.attempts(), 0);

        // attempted but never confirmed
        let stats = reporter.stats();
        assert_eq!(stats.total_sends, 1);
        assert_eq!(stats.success_count, 0);

        reporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_circuit_opens_and_fails_fast() {
        let mut config = pipeline_config();
        config.breaker.failure_threshold = 3;
        let transport = FakeTransport::new(true);
        let reporter = reporter_with(
            config,
            store(),
            HostSignals::new(),
            Arc::clone(&transport),
            FakeTransport::new(false),
        );
        let mut events = reporter.subscribe();

        for _ in 0..4 {
            for _ in 0..5 {
                reporter.report(record());
            }
            settle().await;
        }

        // the 4th flush was rejected by the open circuit without a call
        assert_eq!(transport.attempts(), 3);
        assert_eq!(reporter.stats().failed_count, 4);

        let mut saw_open = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, PipelineEvent::CircuitOpened) {
                saw_open = true;
            }
        }
        assert!(saw_open);

        reporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_transform_abort_drops_batch_without_send() {
        let transport = FakeTransport::new(false);
        let mut chain = TransformChain::new(Duration::from_secs(1), ErrorStrategy::Continue);
        chain
            .register(TransformStage::new(
                "gate",
                1,
                sync_stage(|ctx| {
                    ctx.abort("batch rejected");
                    Ok(())
                }),
            ))
            .unwrap();

        let mut reporter_config = ReporterConfig::new(
            pipeline_config(),
            store(),
            Arc::new(StaticIdentity::anonymous()),
            HostSignals::new(),
            chain,
        );
        reporter_config.transport = Some(transport.clone() as Arc<dyn Transport>);
        reporter_config.unload_transport = Some(FakeTransport::new(false));
        let reporter = Reporter::new(reporter_config).unwrap();

        for _ in 0..5 {
            reporter.report(record());
        }
        settle().await;

        assert_eq!(transport.attempts(), 0);
        assert_eq!(reporter.stats().dropped_count, 5);

        reporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_records_are_stamped_with_identity_context() {
        let transport = FakeTransport::new(true);
        let store = store();
        let mut reporter_config = ReporterConfig::new(
            pipeline_config(),
            store.clone() as Arc<dyn DurableStore>,
            Arc::new(StaticIdentity::new(json!({"session": "s-42"}))),
            HostSignals::new(),
            TransformChain::new(Duration::from_secs(1), ErrorStrategy::Continue),
        );
        reporter_config.transport = Some(transport.clone() as Arc<dyn Transport>);
        reporter_config.unload_transport = Some(FakeTransport::new(false));
        let reporter = Reporter::new(reporter_config).unwrap();

        for _ in 0..5 {
            reporter.report(record());
        }
        settle().await;

        // delivery failed, so the stamped records are in the store
        let stored = telemetry_store::DurableStore::get_all(&*store, None).unwrap();
        assert_eq!(stored.len(), 5);
        assert_eq!(stored[0].data["context"]["session"], "s-42");

        reporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_flushes_outstanding_records() {
        let transport = FakeTransport::new(false);
        let reporter = reporter_with(
            pipeline_config(),
            store(),
            HostSignals::new(),
            Arc::clone(&transport),
            FakeTransport::new(false),
        );

        reporter.report(record());
        reporter.report(record());
        reporter.shutdown().await;

        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn test_report_after_shutdown_is_silently_ignored() {
        let reporter = reporter_with(
            pipeline_config(),
            store(),
            HostSignals::new(),
            FakeTransport::new(false),
            FakeTransport::new(false),
        );
        reporter.shutdown().await;
        reporter.report(record());
        reporter.report(record());
    }
}
