// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! validate -> append `SOURCE` -> record -> submit when READY.

use std::sync::Arc;

use buildscribe_accumulator::{AccumulatorRegistry, Completeness};
use buildscribe_bus::{EngineEvent, EventBus};
use buildscribe_core::types::{AccumulatorState, BuildKey, Message, NewMessage, Role};
use buildscribe_core::{BuildscribeError, ConversationStore, LogEvent};
use buildscribe_dispatch::{DispatchJob, DispatchPool};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::source::excerpt;

/// What happened to one ingested event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Stored and counted; the build is still incomplete.
    Accumulating { received: u32, expected: u32 },
    /// A redelivery of an event already counted; nothing stored.
    Duplicate,
    /// The build is (or already was) handed to the dispatch pool.
    Dispatched,
    /// The build is COMPLETE or FAILED. A new event is stored, a redelivery
    /// is not; neither triggers another analysis.
    Settled(AccumulatorState),
    /// The build is READY but the dispatch queue was full.
    Deferred,
}

impl IngestOutcome {
    /// Metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            IngestOutcome::Accumulating { .. } => "accumulating",
            IngestOutcome::Duplicate => "duplicate",
            IngestOutcome::Dispatched => "dispatched",
            IngestOutcome::Settled(_) => "settled",
            IngestOutcome::Deferred => "deferred",
        }
    }
}

/// Applies inbound events to the store and the accumulator registry.
///
/// Events of one build must be ingested sequentially; the engine guarantees
/// this by routing each key to a single worker.
pub struct IngestPipeline {
    store: Arc<dyn ConversationStore>,
    registry: Arc<AccumulatorRegistry>,
    pool: Arc<DispatchPool>,
    bus: EventBus,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        registry: Arc<AccumulatorRegistry>,
        pool: Arc<DispatchPool>,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            registry,
            pool,
            bus,
        }
    }

    /// Validates and ingests one raw event.
    ///
    /// A malformed event is published as rejected and returned as a
    /// permanent [`BuildscribeError::MalformedEvent`]; storage failures are
    /// retryable and leave nothing recorded.
    pub async fn ingest(&self, raw: &str) -> Result<IngestOutcome, BuildscribeError> {
        let event = self.validate(raw)?;
        self.ingest_event(&event).await
    }

    /// Boundary validation. Rejections are logged, counted and published.
    pub fn validate(&self, raw: &str) -> Result<LogEvent, BuildscribeError> {
        LogEvent::parse(raw).inspect_err(|e| self.reject(raw, e))
    }

    /// Ingests one already validated event.
    pub async fn ingest_event(&self, event: &LogEvent) -> Result<IngestOutcome, BuildscribeError> {
        let key = event.key();
        if !self.registry.contains(&key) {
            self.restore_settled(&key).await?;
        }

        if let Some(state) = self.registry.state(&key)
            && state.is_terminal()
        {
            if self.registry.has_seen(event) {
                debug!(build = %key, %state, category = %event.category, "redelivery for settled build skipped");
            } else {
                self.store.append(&NewMessage::source(event)).await?;
                self.registry.record(event);
                debug!(build = %key, %state, category = %event.category, "late event stored for settled build");
            }
            return Ok(self.counted(IngestOutcome::Settled(state)));
        }

        if self.registry.has_seen(event) {
            debug!(build = %key, category = %event.category, "duplicate event");
            if self.registry.state(&key) == Some(AccumulatorState::Ready) {
                self.resubmit(&key).await?;
            }
            return Ok(self.counted(IngestOutcome::Duplicate));
        }

        // Write-ahead: the event is durable before it can complete the build.
        let stored = self.store.append(&NewMessage::source(event)).await?;

        let outcome = match self.registry.record(event) {
            Completeness::Pending { received, expected } => {
                debug!(build = %key, category = %event.category, received, expected, "event accumulated");
                IngestOutcome::Accumulating { received, expected }
            }
            Completeness::BecameReady => {
                info!(build = %key, trigger = stored.id, "build complete, ready for analysis");
                #[cfg(feature = "prometheus")]
                buildscribe_prometheus::record_build_ready();
                self.bus.publish(EngineEvent::BuildReady {
                    conversation_id: key.conversation_id.clone(),
                    build_number: key.build_number,
                });
                self.submit(&key, stored)
            }
            Completeness::Late(AccumulatorState::Ready) => self.submit(&key, stored),
            Completeness::Late(_) => IngestOutcome::Dispatched,
            Completeness::Duplicate => IngestOutcome::Duplicate,
            Completeness::Settled(state) => IngestOutcome::Settled(state),
        };
        Ok(self.counted(outcome))
    }

    /// Re-queues a READY build using its latest `SOURCE` message as trigger.
    pub async fn resubmit(&self, key: &BuildKey) -> Result<IngestOutcome, BuildscribeError> {
        let messages = self.store.messages_for_build(key).await?;
        let trigger = messages
            .into_iter()
            .rev()
            .find(|m| m.role == Role::Source)
            .ok_or_else(|| BuildscribeError::NotFound(format!("no source messages for {key}")))?;
        Ok(self.submit(key, trigger))
    }

    pub fn registry(&self) -> &Arc<AccumulatorRegistry> {
        &self.registry
    }

    fn submit(&self, key: &BuildKey, trigger: Message) -> IngestOutcome {
        let job = DispatchJob {
            key: key.clone(),
            trigger,
        };
        match self.pool.submit(job) {
            Ok(()) => IngestOutcome::Dispatched,
            Err(e) => {
                warn!(build = %key, error = %e, "dispatch deferred, build stays READY");
                IngestOutcome::Deferred
            }
        }
    }

    /// Reinstates a tombstone for a build settled by an earlier run, so that
    /// replays after a restart do not analyze it again.
    async fn restore_settled(&self, key: &BuildKey) -> Result<(), BuildscribeError> {
        let recorded = self.store.build_outcome(key).await?.map(|o| o.state);
        let messages = self.store.messages_for_build(key).await?;
        // A verdict written just before a crash has no outcome row.
        let state = recorded.or_else(|| {
            messages
                .iter()
                .any(|m| m.role == Role::Analysis)
                .then_some(AccumulatorState::Complete)
        });
        let Some(state) = state else {
            return Ok(());
        };

        let fingerprints = messages
            .iter()
            .filter(|m| m.role == Role::Source)
            .filter_map(|m| m.metadata.extensions.get("fingerprint"))
            .filter_map(|v| v.as_str().map(str::to_string));
        if self.registry.restore_settled(key, state, Utc::now(), fingerprints) {
            info!(build = %key, %state, "restored settled build");
        }
        Ok(())
    }

    fn reject(&self, raw: &str, error: &BuildscribeError) {
        warn!(error = %error, excerpt = excerpt(raw), "event rejected");
        #[cfg(feature = "prometheus")]
        buildscribe_prometheus::record_event("rejected");
        self.bus.publish(EngineEvent::EventRejected {
            reason: error.to_string(),
            excerpt: excerpt(raw),
        });
    }

    fn counted(&self, outcome: IngestOutcome) -> IngestOutcome {
        #[cfg(feature = "prometheus")]
        buildscribe_prometheus::record_event(outcome.label());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, full_build, raw_event};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn complete_build_dispatches_exactly_once() {
        let fx = Fixture::new(|_| {}).await;
        let pipeline = fx.engine.pipeline();
        let events = full_build("build-x", 42);

        for raw in &events[..12] {
            let outcome = pipeline.ingest(raw).await.unwrap();
            assert!(matches!(outcome, IngestOutcome::Accumulating { .. }), "{outcome:?}");
        }
        assert_eq!(
            pipeline.ingest(&events[12]).await.unwrap(),
            IngestOutcome::Dispatched
        );
        fx.engine.drain().await;

        let key = BuildKey::new("build-x", 42);
        assert_eq!(pipeline.registry().state(&key), Some(AccumulatorState::Complete));
        assert_eq!(fx.analyses("build-x").await, 1);
        assert_eq!(fx.provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.store.count("build-x").await.unwrap(), 14);
    }

    #[tokio::test]
    async fn duplicates_are_neither_stored_nor_counted() {
        let fx = Fixture::new(|_| {}).await;
        let pipeline = fx.engine.pipeline();
        let raw = raw_event("api", 1, "secret-scan", serde_json::json!({"hits": 0}));

        assert!(matches!(
            pipeline.ingest(&raw).await.unwrap(),
            IngestOutcome::Accumulating { received: 1, .. }
        ));
        assert_eq!(pipeline.ingest(&raw).await.unwrap(), IngestOutcome::Duplicate);
        assert_eq!(fx.store.count("api").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_events_are_rejected_and_published() {
        let fx = Fixture::new(|_| {}).await;
        let mut events = fx.bus.subscribe();

        let err = fx
            .engine
            .pipeline()
            .ingest(r#"{"category":"build-log","build_number":3}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildscribeError::MalformedEvent { .. }));
        assert!(!err.is_retryable());
        assert!(fx.store.list_conversations().await.unwrap().is_empty());

        let published = events.recv().await.unwrap();
        assert_eq!(published.event.kind(), "event_rejected");
    }

    #[tokio::test]
    async fn replay_of_complete_build_adds_nothing() {
        let fx = Fixture::new(|_| {}).await;
        let pipeline = fx.engine.pipeline();
        for raw in full_build("api", 9) {
            pipeline.ingest(&raw).await.unwrap();
        }
        fx.engine.drain().await;
        let stored = fx.store.count("api").await.unwrap();

        for raw in full_build("api", 9) {
            assert_eq!(
                pipeline.ingest(&raw).await.unwrap(),
                IngestOutcome::Settled(AccumulatorState::Complete)
            );
        }
        assert_eq!(fx.store.count("api").await.unwrap(), stored);
        assert_eq!(fx.analyses("api").await, 1);
    }

    #[tokio::test]
    async fn late_events_for_complete_build_are_stored_without_reanalysis() {
        let fx = Fixture::new(|_| {}).await;
        let pipeline = fx.engine.pipeline();
        for raw in full_build("api", 3) {
            pipeline.ingest(&raw).await.unwrap();
        }
        fx.engine.drain().await;
        let before = fx.store.count("api").await.unwrap();

        let late = raw_event("api", 3, "deploy-log", serde_json::json!({"target": "staging"}));
        assert_eq!(
            pipeline.ingest(&late).await.unwrap(),
            IngestOutcome::Settled(AccumulatorState::Complete)
        );
        assert_eq!(fx.store.count("api").await.unwrap(), before + 1);

        // A redelivery of the late event is not stored twice.
        assert_eq!(
            pipeline.ingest(&late).await.unwrap(),
            IngestOutcome::Settled(AccumulatorState::Complete)
        );
        assert_eq!(fx.store.count("api").await.unwrap(), before + 1);
        assert_eq!(fx.analyses("api").await, 1);
        assert_eq!(fx.provider.calls.load(Ordering::SeqCst), 1);

        let stored = fx.store.messages_for_build(&BuildKey::new("api", 3)).await.unwrap();
        assert!(stored.iter().any(|m| m.content.category == "deploy-log"));
    }

    #[tokio::test]
    async fn settled_builds_survive_restart() {
        let fx = Fixture::new(|_| {}).await;
        for raw in full_build("api", 5) {
            fx.engine.pipeline().ingest(&raw).await.unwrap();
        }
        fx.engine.drain().await;
        fx.store.close().await.unwrap();
        let dir = fx.dir;

        let restarted = Fixture::in_dir(dir, |_| {}).await;
        for raw in full_build("api", 5) {
            assert_eq!(
                restarted.engine.pipeline().ingest(&raw).await.unwrap(),
                IngestOutcome::Settled(AccumulatorState::Complete)
            );
        }
        restarted.engine.drain().await;
        assert_eq!(restarted.analyses("api").await, 1);
        assert_eq!(restarted.provider.calls.load(Ordering::SeqCst), 0);
        // Stored fingerprints keep the replay out of the history.
        assert_eq!(restarted.store.count("api").await.unwrap(), 14);
    }

    #[tokio::test]
    async fn ready_build_is_deferred_when_pool_is_closed() {
        let fx = Fixture::new(|_| {}).await;
        fx.engine.drain().await;

        let pipeline = fx.engine.pipeline();
        let events = full_build("api", 2);
        for raw in &events[..12] {
            pipeline.ingest(raw).await.unwrap();
        }
        assert_eq!(pipeline.ingest(&events[12]).await.unwrap(), IngestOutcome::Deferred);
        assert_eq!(
            pipeline.registry().state(&BuildKey::new("api", 2)),
            Some(AccumulatorState::Ready)
        );
    }
}
