// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded dispatch pool.
//!
//! A bounded queue in front of at most `workers` concurrent analyses. The
//! pool is separate from ingestion: a slow analysis service backs up this
//! queue, never the ingest workers.

use std::sync::Arc;

use buildscribe_core::BuildscribeError;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::dispatcher::{AnalysisDispatcher, DispatchJob};

pub struct DispatchPool {
    sender: mpsc::Sender<DispatchJob>,
    capacity: usize,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchPool {
    /// Starts the pool. Must be called from within a Tokio runtime.
    pub fn start(dispatcher: Arc<AnalysisDispatcher>, workers: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let driver = tokio::spawn(drive(
            receiver,
            dispatcher,
            Arc::new(Semaphore::new(workers.max(1))),
            cancel.clone(),
        ));
        info!(workers, capacity, "dispatch pool started");
        Self {
            sender,
            capacity,
            cancel,
            driver: Mutex::new(Some(driver)),
        }
    }

    /// Queues a READY build without waiting.
    ///
    /// A full queue returns [`BuildscribeError::DispatchSaturated`]; the
    /// build stays READY and must be resubmitted later.
    pub fn submit(&self, job: DispatchJob) -> Result<(), BuildscribeError> {
        match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                debug!(build = %job.key, "dispatch queue full");
                #[cfg(feature = "prometheus")]
                buildscribe_prometheus::record_dispatch_saturated();
                Err(BuildscribeError::DispatchSaturated {
                    capacity: self.capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BuildscribeError::Internal(
                "dispatch pool is shut down".to_string(),
            )),
        }
    }

    /// Jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.capacity.saturating_sub(self.sender.capacity())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stops accepting jobs, runs everything already queued and waits for
    /// in-flight analyses. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.driver.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(error = %e, "dispatch pool driver panicked");
        }
    }
}

async fn drive(
    mut receiver: mpsc::Receiver<DispatchJob>,
    dispatcher: Arc<AnalysisDispatcher>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let tracker = TaskTracker::new();

    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = receiver.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        run(job, &dispatcher, &semaphore, &tracker).await;
    }

    receiver.close();
    let mut drained = 0usize;
    while let Some(job) = receiver.recv().await {
        drained += 1;
        run(job, &dispatcher, &semaphore, &tracker).await;
    }

    tracker.close();
    info!(drained, in_flight = tracker.len(), "dispatch pool draining");
    tracker.wait().await;
    info!("dispatch pool stopped");
}

async fn run(
    job: DispatchJob,
    dispatcher: &Arc<AnalysisDispatcher>,
    semaphore: &Arc<Semaphore>,
    tracker: &TaskTracker,
) {
    let Ok(permit) = Arc::clone(semaphore).acquire_owned().await else {
        return;
    };
    let dispatcher = Arc::clone(dispatcher);
    tracker.spawn(async move {
        let _permit = permit;
        let key = job.key.clone();
        match dispatcher.dispatch(job).await {
            Ok(outcome) => debug!(build = %key, ?outcome, "dispatch finished"),
            Err(e) => error!(build = %key, error = %e, "dispatch aborted"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use buildscribe_accumulator::{AccumulatorRegistry, Completeness, CompletenessPolicy, PolicySet};
    use buildscribe_bus::EventBus;
    use buildscribe_config::model::StorageConfig;
    use buildscribe_context::{ContextAssembler, InstructionTemplate};
    use buildscribe_core::types::{
        AccumulatorState, AdapterType, AnalysisRequest, AnalysisResponse, HealthStatus, NewMessage,
    };
    use buildscribe_core::{AnalysisProvider, ConversationStore, LogEvent, PluginAdapter};
    use buildscribe_storage::SqliteStore;

    use crate::dispatcher::DispatchSettings;
    use crate::retry::Backoff;

    /// Answers `{}` after a fixed delay, tracking peak concurrency.
    struct Slow {
        delay: Duration,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl PluginAdapter for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn version(&self) -> semver::Version {
            semver::Version::new(0, 1, 0)
        }
        fn adapter_type(&self) -> AdapterType {
            AdapterType::Provider
        }
        async fn health_check(&self) -> Result<HealthStatus, BuildscribeError> {
            Ok(HealthStatus::Healthy)
        }
        async fn shutdown(&self) -> Result<(), BuildscribeError> {
            Ok(())
        }
    }

    #[async_trait]
    impl AnalysisProvider for Slow {
        async fn analyze(
            &self,
            _request: AnalysisRequest,
        ) -> Result<AnalysisResponse, BuildscribeError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(AnalysisResponse {
                content: "{}".into(),
                model: "slow-1".into(),
                usage: None,
            })
        }
    }

    async fn setup(
        delay: Duration,
    ) -> (
        Arc<dyn ConversationStore>,
        Arc<AccumulatorRegistry>,
        Arc<Slow>,
        Arc<AnalysisDispatcher>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(StorageConfig {
            database_path: dir.path().join("pool.db").display().to_string(),
            wal_mode: true,
        });
        store.initialize().await.unwrap();
        let store: Arc<dyn ConversationStore> = Arc::new(store);
        let policy = CompletenessPolicy::new(
            [("build-log".to_string(), 1)].into_iter().collect(),
            Vec::new(),
            "build-log",
            "phase",
            "final",
        );
        let registry = Arc::new(AccumulatorRegistry::new(PolicySet::uniform(policy)));
        let provider = Arc::new(Slow {
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let dispatcher = Arc::new(AnalysisDispatcher::new(
            store.clone(),
            provider.clone(),
            ContextAssembler::new(store.clone(), InstructionTemplate::default(), 10),
            registry.clone(),
            EventBus::default(),
            DispatchSettings {
                timeout: Duration::from_secs(5),
                max_attempts: 1,
                backoff: Backoff::new(Duration::ZERO, Duration::ZERO),
            },
        ));
        (store, registry, provider, dispatcher, dir)
    }

    async fn ready_job(
        store: &Arc<dyn ConversationStore>,
        registry: &AccumulatorRegistry,
        build: u64,
    ) -> DispatchJob {
        let raw = format!(r#"{{"category":"build-log","job_name":"api","build_number":{build}}}"#);
        let event = LogEvent::parse(&raw).unwrap();
        let trigger = store.append(&NewMessage::source(&event)).await.unwrap();
        assert_eq!(registry.record(&event), Completeness::BecameReady);
        DispatchJob {
            key: event.key(),
            trigger,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_bounded_by_workers() {
        let (store, registry, provider, dispatcher, _dir) = setup(Duration::from_millis(50)).await;
        let pool = DispatchPool::start(dispatcher, 2, 16);

        let mut keys = Vec::new();
        for build in 1..=6 {
            let job = ready_job(&store, &registry, build).await;
            keys.push(job.key.clone());
            pool.submit(job).unwrap();
        }
        pool.shutdown().await;

        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
        for key in keys {
            assert_eq!(registry.state(&key), Some(AccumulatorState::Complete));
        }
    }

    #[tokio::test]
    async fn full_queue_reports_saturation() {
        let (store, registry, _provider, dispatcher, _dir) = setup(Duration::from_secs(1)).await;
        // Build the pool by hand so no driver drains the queue.
        let (sender, _receiver) = mpsc::channel(1);
        let pool = DispatchPool {
            sender,
            capacity: 1,
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
        };
        drop(dispatcher);

        pool.submit(ready_job(&store, &registry, 1).await).unwrap();
        assert_eq!(pool.queued(), 1);

        let second = ready_job(&store, &registry, 2).await;
        let key = second.key.clone();
        let err = pool.submit(second).unwrap_err();
        assert!(matches!(err, BuildscribeError::DispatchSaturated { capacity: 1 }));
        assert!(err.is_retryable());
        assert_eq!(registry.state(&key), Some(AccumulatorState::Ready));
    }

    #[tokio::test]
    async fn submit_after_shutdown_fails() {
        let (store, registry, _provider, dispatcher, _dir) = setup(Duration::ZERO).await;
        let pool = DispatchPool::start(dispatcher, 1, 4);
        pool.shutdown().await;
        pool.shutdown().await;

        let err = pool.submit(ready_job(&store, &registry, 1).await).unwrap_err();
        assert!(matches!(err, BuildscribeError::Internal(_)));
    }
}
