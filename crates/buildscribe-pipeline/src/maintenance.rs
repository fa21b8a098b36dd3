// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic retention and accumulator housekeeping.

use std::sync::Arc;
use std::time::Duration;

use buildscribe_accumulator::{AccumulatorRegistry, StaleBuild};
use buildscribe_bus::{EngineEvent, EventBus};
use buildscribe_config::model::{CompletenessConfig, RetentionConfig};
use buildscribe_core::ConversationStore;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ingest::{IngestOutcome, IngestPipeline};

#[derive(Debug, Clone, Copy)]
pub struct MaintenanceSettings {
    pub keep_per_conversation: usize,
    pub prune_interval: Duration,
    pub sweep_interval: Duration,
    pub stale_after: chrono::Duration,
    pub settled_retention: chrono::Duration,
}

impl MaintenanceSettings {
    pub fn from_config(retention: &RetentionConfig, completeness: &CompletenessConfig) -> Self {
        Self {
            keep_per_conversation: retention.keep_per_conversation,
            prune_interval: Duration::from_secs(retention.prune_interval_secs.max(1)),
            sweep_interval: Duration::from_secs(retention.maintenance_interval_secs.max(1)),
            stale_after: chrono::Duration::seconds(completeness.stale_after_secs as i64),
            settled_retention: chrono::Duration::seconds(
                completeness.settled_retention_secs as i64,
            ),
        }
    }
}

/// Result of one prune pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub conversations: usize,
    pub removed: u64,
    pub failed: Vec<String>,
}

/// Result of one accumulator sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub stale: Vec<StaleBuild>,
    pub resubmitted: usize,
    pub deferred: usize,
    pub swept: usize,
}

pub struct Maintenance {
    store: Arc<dyn ConversationStore>,
    registry: Arc<AccumulatorRegistry>,
    pipeline: Arc<IngestPipeline>,
    bus: EventBus,
    settings: MaintenanceSettings,
}

impl Maintenance {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        registry: Arc<AccumulatorRegistry>,
        pipeline: Arc<IngestPipeline>,
        bus: EventBus,
        settings: MaintenanceSettings,
    ) -> Self {
        Self {
            store,
            registry,
            pipeline,
            bus,
            settings,
        }
    }

    /// Prunes every conversation down to `keep_per_conversation` messages.
    ///
    /// A failure on one conversation does not stop the pass; it is retried
    /// on the next one.
    pub async fn prune_pass(&self) -> PruneReport {
        let mut report = PruneReport::default();
        let conversations = match self.store.list_conversations().await {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!(error = %e, "prune pass skipped, cannot list conversations");
                return report;
            }
        };

        for conversation_id in conversations {
            report.conversations += 1;
            match self
                .store
                .prune(&conversation_id, self.settings.keep_per_conversation)
                .await
            {
                Ok(0) => {}
                Ok(removed) => {
                    report.removed += removed;
                    info!(conversation_id = %conversation_id, removed, "conversation pruned");
                    #[cfg(feature = "prometheus")]
                    buildscribe_prometheus::record_pruned(removed);
                    self.bus.publish(EngineEvent::ConversationPruned {
                        conversation_id,
                        removed,
                    });
                }
                Err(e) => {
                    warn!(conversation_id = %conversation_id, error = %e, "prune failed");
                    self.bus.publish(EngineEvent::PruneFailed {
                        conversation_id: conversation_id.clone(),
                        error: e.to_string(),
                    });
                    report.failed.push(conversation_id);
                }
            }
        }
        report
    }

    /// Reports stale builds, resubmits deferred READY builds and drops old
    /// tombstones.
    pub async fn sweep(&self) -> SweepReport {
        let now = Utc::now();
        let mut report = SweepReport {
            stale: self.registry.stale(now, self.settings.stale_after),
            ..SweepReport::default()
        };

        for stale in &report.stale {
            warn!(
                build = %stale.key,
                received = stale.received,
                expected = stale.expected,
                missing = ?stale.missing,
                silent_secs = stale.silent_for.num_seconds(),
                "build is stale"
            );
            self.bus.publish(EngineEvent::BuildStale {
                conversation_id: stale.key.conversation_id.clone(),
                build_number: stale.key.build_number,
                received: stale.received,
                expected: stale.expected,
                missing: stale.missing.clone(),
            });
        }

        for key in self.registry.ready_keys() {
            match self.pipeline.resubmit(&key).await {
                Ok(IngestOutcome::Dispatched) => report.resubmitted += 1,
                Ok(_) => report.deferred += 1,
                Err(e) => {
                    warn!(build = %key, error = %e, "resubmission failed");
                    report.deferred += 1;
                }
            }
        }

        report.swept = self
            .registry
            .sweep_settled(now, self.settings.settled_retention);

        #[cfg(feature = "prometheus")]
        {
            buildscribe_prometheus::set_stale_builds(report.stale.len());
            buildscribe_prometheus::set_tracked_builds(self.registry.len());
        }

        debug!(
            stale = report.stale.len(),
            resubmitted = report.resubmitted,
            deferred = report.deferred,
            swept = report.swept,
            tracked = self.registry.len(),
            "accumulator sweep finished"
        );
        report
    }

    /// Runs both loops until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut prune = tokio::time::interval(self.settings.prune_interval);
        let mut sweep = tokio::time::interval(self.settings.sweep_interval);
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = prune.tick() => {
                    self.prune_pass().await;
                }
                _ = sweep.tick() => {
                    self.sweep().await;
                }
            }
        }
        debug!("maintenance stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, full_build, raw_event};
    use buildscribe_core::types::{AccumulatorState, BuildKey};

    #[tokio::test]
    async fn prune_pass_trims_every_conversation() {
        let fx = Fixture::new(|config| {
            config.context.window_size = 3;
            config.retention.keep_per_conversation = 5;
        })
        .await;
        let mut events = fx.bus.subscribe();
        for build in 1..=8 {
            let raw = raw_event("job-y", build, "secret-scan", serde_json::json!({"n": build}));
            fx.engine.pipeline().ingest(&raw).await.unwrap();
        }
        let raw = raw_event("api", 1, "secret-scan", serde_json::json!({}));
        fx.engine.pipeline().ingest(&raw).await.unwrap();

        let report = fx.engine.maintenance().prune_pass().await;
        assert_eq!(report.conversations, 2);
        assert_eq!(report.removed, 3);
        assert!(report.failed.is_empty());
        assert_eq!(fx.store.count("job-y").await.unwrap(), 5);
        assert_eq!(fx.store.count("api").await.unwrap(), 1);

        let published = events.recv().await.unwrap();
        assert_eq!(published.event.kind(), "conversation_pruned");

        // Already at the bound: nothing more to remove.
        assert_eq!(fx.engine.maintenance().prune_pass().await.removed, 0);
    }

    #[tokio::test]
    async fn stale_builds_are_reported_once() {
        let fx = Fixture::new(|config| config.completeness.stale_after_secs = 0).await;
        let mut events = fx.bus.subscribe();
        let raw = raw_event("api", 4, "system-info", serde_json::json!({}));
        fx.engine.pipeline().ingest(&raw).await.unwrap();

        let report = fx.engine.maintenance().sweep().await;
        assert_eq!(report.stale.len(), 1);
        assert_eq!(report.stale[0].key, BuildKey::new("api", 4));
        assert_eq!(report.stale[0].received, 1);
        assert_eq!(report.stale[0].expected, 13);
        assert!(report.stale[0].missing.contains(&"build-log".to_string()));
        assert_eq!(events.recv().await.unwrap().event.kind(), "build_stale");

        assert!(fx.engine.maintenance().sweep().await.stale.is_empty());
    }

    #[tokio::test]
    async fn sweep_drops_old_tombstones() {
        let fx = Fixture::new(|config| config.completeness.settled_retention_secs = 0).await;
        for raw in full_build("api", 1) {
            fx.engine.pipeline().ingest(&raw).await.unwrap();
        }
        fx.engine.drain().await;
        let key = BuildKey::new("api", 1);
        assert_eq!(fx.engine.registry().state(&key), Some(AccumulatorState::Complete));

        let report = fx.engine.maintenance().sweep().await;
        assert_eq!(report.swept, 1);
        assert!(!fx.engine.registry().contains(&key));

        // The persisted outcome still guards against a replay.
        let replay = fx.engine.pipeline().ingest(&full_build("api", 1)[0]).await.unwrap();
        assert_eq!(replay, IngestOutcome::Settled(AccumulatorState::Complete));
    }

    #[tokio::test]
    async fn deferred_ready_builds_are_counted() {
        let fx = Fixture::new(|_| {}).await;
        fx.engine.drain().await;
        for raw in full_build("api", 6) {
            fx.engine.pipeline().ingest(&raw).await.unwrap();
        }

        let report = fx.engine.maintenance().sweep().await;
        assert_eq!(report.resubmitted, 0);
        assert_eq!(report.deferred, 1);
        assert_eq!(
            fx.engine.registry().state(&BuildKey::new("api", 6)),
            Some(AccumulatorState::Ready)
        );
    }
}
