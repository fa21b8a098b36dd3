// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The serve loop: source -> per-key ingest workers -> dispatch pool.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use buildscribe_accumulator::{AccumulatorRegistry, PolicySet};
use buildscribe_bus::EventBus;
use buildscribe_config::model::BuildscribeConfig;
use buildscribe_context::{ContextAssembler, InstructionTemplate};
use buildscribe_core::types::{BuildKey, Delivery};
use buildscribe_core::{AnalysisProvider, BuildscribeError, ConversationStore, EventSource, LogEvent};
use buildscribe_dispatch::{AnalysisDispatcher, Backoff, DispatchPool, DispatchSettings};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ingest::IngestPipeline;
use crate::maintenance::{Maintenance, MaintenanceSettings};

/// Buffered deliveries per ingest worker.
const WORKER_QUEUE: usize = 64;

/// Every component of a running engine, wired from configuration.
pub struct Engine {
    store: Arc<dyn ConversationStore>,
    registry: Arc<AccumulatorRegistry>,
    dispatcher: Arc<AnalysisDispatcher>,
    pool: Arc<DispatchPool>,
    pipeline: Arc<IngestPipeline>,
    maintenance: Arc<Maintenance>,
    bus: EventBus,
    ingest_workers: usize,
}

impl Engine {
    /// Loads the instruction template and wires the engine.
    ///
    /// The store must already be initialized. Must be called from within a
    /// Tokio runtime, since the dispatch pool starts immediately.
    pub async fn new(
        config: &BuildscribeConfig,
        store: Arc<dyn ConversationStore>,
        provider: Arc<dyn AnalysisProvider>,
        bus: EventBus,
    ) -> Result<Self, BuildscribeError> {
        let instructions = InstructionTemplate::load(&config.context).await?;
        Ok(Self::with_instructions(
            config,
            store,
            provider,
            bus,
            instructions,
        ))
    }

    pub fn with_instructions(
        config: &BuildscribeConfig,
        store: Arc<dyn ConversationStore>,
        provider: Arc<dyn AnalysisProvider>,
        bus: EventBus,
        instructions: InstructionTemplate,
    ) -> Self {
        let registry = Arc::new(AccumulatorRegistry::new(PolicySet::from_config(
            &config.completeness,
        )));
        let assembler =
            ContextAssembler::new(store.clone(), instructions, config.context.window_size);
        let dispatcher = Arc::new(AnalysisDispatcher::new(
            store.clone(),
            provider,
            assembler,
            registry.clone(),
            bus.clone(),
            DispatchSettings::from_config(&config.dispatch),
        ));
        let pool = Arc::new(DispatchPool::start(
            dispatcher.clone(),
            config.dispatch.workers,
            config.dispatch.queue_capacity,
        ));
        let pipeline = Arc::new(IngestPipeline::new(
            store.clone(),
            registry.clone(),
            pool.clone(),
            bus.clone(),
        ));
        let maintenance = Arc::new(Maintenance::new(
            store.clone(),
            registry.clone(),
            pipeline.clone(),
            bus.clone(),
            MaintenanceSettings::from_config(&config.retention, &config.completeness),
        ));

        info!(
            engine = %config.engine.name,
            ingest_workers = config.ingest.workers,
            dispatch_workers = config.dispatch.workers,
            window_size = config.context.window_size,
            "engine initialized"
        );

        Self {
            store,
            registry,
            dispatcher,
            pool,
            pipeline,
            maintenance,
            bus,
            ingest_workers: config.ingest.workers.max(1),
        }
    }

    /// Runs until `cancel` fires or the source is exhausted, then drains the
    /// ingest workers and the dispatch pool.
    ///
    /// Deliveries of one build always go to the same worker, so its events
    /// are appended in arrival order. A delivery is acked only after its
    /// event was durably appended or rejected; retryable failures are nacked.
    pub async fn run(
        &self,
        source: Arc<dyn EventSource>,
        cancel: CancellationToken,
    ) -> Result<(), BuildscribeError> {
        info!(source = source.name(), workers = self.ingest_workers, "engine running");

        let maintenance_cancel = cancel.child_token();
        let maintenance = {
            let maintenance = self.maintenance.clone();
            let token = maintenance_cancel.clone();
            tokio::spawn(async move { maintenance.run(token).await })
        };

        let mut senders = Vec::with_capacity(self.ingest_workers);
        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(self.ingest_workers);
        for id in 0..self.ingest_workers {
            let (tx, rx) = mpsc::channel(WORKER_QUEUE);
            senders.push(tx);
            workers.push(tokio::spawn(ingest_worker(
                id,
                rx,
                self.pipeline.clone(),
                source.clone(),
            )));
        }

        let mut result = Ok(());
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown signal received, stopping intake");
                    break;
                }
                received = source.receive() => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    let event = match self.pipeline.validate(&delivery.payload) {
                        Ok(event) => event,
                        Err(_) => {
                            // Dead-lettered: rejected events are never redelivered.
                            settle(source.as_ref(), &delivery, true).await;
                            continue;
                        }
                    };
                    let worker = route(&event.key(), senders.len());
                    if senders[worker].send((delivery, event)).await.is_err() {
                        error!(worker, "ingest worker stopped unexpectedly");
                        result = Err(BuildscribeError::Internal(format!(
                            "ingest worker {worker} stopped"
                        )));
                        break;
                    }
                }
                Ok(None) => {
                    info!("source exhausted");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "source receive failed");
                    result = Err(e);
                    break;
                }
            }
        }

        drop(senders);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "ingest worker panicked");
            }
        }
        debug!("ingest workers drained");

        maintenance_cancel.cancel();
        if let Err(e) = maintenance.await {
            error!(error = %e, "maintenance task panicked");
        }

        self.pool.shutdown().await;
        if let Err(e) = source.shutdown().await {
            warn!(error = %e, "source shutdown failed");
        }

        info!(tracked_builds = self.registry.len(), "engine stopped");
        result
    }

    /// Waits for every queued and in-flight analysis, then stops the pool.
    pub async fn drain(&self) {
        self.pool.shutdown().await;
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<AccumulatorRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<AnalysisDispatcher> {
        &self.dispatcher
    }

    pub fn pool(&self) -> &Arc<DispatchPool> {
        &self.pool
    }

    pub fn pipeline(&self) -> &Arc<IngestPipeline> {
        &self.pipeline
    }

    pub fn maintenance(&self) -> &Arc<Maintenance> {
        &self.maintenance
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

/// Worker index owning `key`.
///
/// `DefaultHasher` is only stable within one process, so the key-to-worker
/// mapping is not preserved across restarts. Only per-run ordering relies on it.
pub(crate) fn route(key: &BuildKey, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % workers.max(1) as u64) as usize
}

async fn ingest_worker(
    id: usize,
    mut deliveries: mpsc::Receiver<(Delivery, LogEvent)>,
    pipeline: Arc<IngestPipeline>,
    source: Arc<dyn EventSource>,
) {
    let redelivery_backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(5));

    while let Some((delivery, event)) = deliveries.recv().await {
        if delivery.attempt > 1 {
            tokio::time::sleep(redelivery_backoff.delay(delivery.attempt - 1)).await;
        }
        match pipeline.ingest_event(&event).await {
            Ok(outcome) => {
                debug!(worker = id, delivery = delivery.id, ?outcome, "event ingested");
                settle(source.as_ref(), &delivery, true).await;
            }
            Err(e) if e.is_retryable() => {
                warn!(worker = id, delivery = delivery.id, error = %e, "ingest failed, nacking");
                settle(source.as_ref(), &delivery, false).await;
            }
            Err(e) => {
                error!(worker = id, delivery = delivery.id, error = %e, "ingest failed permanently");
                settle(source.as_ref(), &delivery, true).await;
            }
        }
    }
    debug!(worker = id, "ingest worker stopped");
}

async fn settle(source: &dyn EventSource, delivery: &Delivery, ack: bool) {
    let result = if ack {
        source.ack(delivery).await
    } else {
        source.nack(delivery).await
    };
    if let Err(e) = result {
        warn!(delivery = delivery.id, ack, error = %e, "failed to settle delivery");
    }
}
