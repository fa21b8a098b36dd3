// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles a complete engine with a scripted analyst over a
//! temp SQLite database. Tests drive it through `ingest()` and inspect the
//! store afterwards.

use std::sync::Arc;

use buildscribe_bus::EventBus;
use buildscribe_config::model::{BuildscribeConfig, StorageConfig};
use buildscribe_context::InstructionTemplate;
use buildscribe_core::types::{Message, Role};
use buildscribe_core::{BuildscribeError, ConversationStore};
use buildscribe_pipeline::{Engine, IngestOutcome};
use buildscribe_storage::SqliteStore;
use tempfile::TempDir;

use crate::mock_analyst::{MockAnalyst, MockStep};

type ConfigTweak = Box<dyn FnOnce(&mut BuildscribeConfig) + Send>;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    steps: Vec<MockStep>,
    tweaks: Vec<ConfigTweak>,
    dir: Option<TempDir>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            steps: Vec::new(),
            tweaks: Vec::new(),
            dir: None,
        }
    }

    /// Set the analyst script.
    pub fn with_steps(mut self, steps: Vec<MockStep>) -> Self {
        self.steps = steps;
        self
    }

    /// Adjust the configuration before the engine is wired.
    pub fn with_config(mut self, tweak: impl FnOnce(&mut BuildscribeConfig) + Send + 'static) -> Self {
        self.tweaks.push(Box::new(tweak));
        self
    }

    /// Reuse the database in `dir`, as after a restart.
    pub fn in_dir(mut self, dir: TempDir) -> Self {
        self.dir = Some(dir);
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, BuildscribeError> {
        let dir = match self.dir {
            Some(dir) => dir,
            None => TempDir::new().map_err(|e| BuildscribeError::Storage { source: e.into() })?,
        };

        let mut config = BuildscribeConfig::default();
        config.storage = StorageConfig {
            database_path: dir.path().join("test.db").to_string_lossy().to_string(),
            wal_mode: true,
        };
        config.dispatch.backoff_initial_ms = 1;
        config.dispatch.backoff_max_ms = 5;
        for tweak in self.tweaks {
            tweak(&mut config);
        }

        let store = SqliteStore::new(config.storage.clone());
        store.initialize().await?;
        let store: Arc<dyn ConversationStore> = Arc::new(store);

        let analyst = Arc::new(MockAnalyst::with_steps(self.steps));
        let bus = EventBus::new(1024);
        let engine = Engine::with_instructions(
            &config,
            store.clone(),
            analyst.clone(),
            bus.clone(),
            InstructionTemplate::default(),
        );

        Ok(TestHarness {
            engine,
            store,
            analyst,
            bus,
            config,
            temp_dir: dir,
        })
    }
}

/// Complete engine stack for integration tests.
pub struct TestHarness {
    pub engine: Engine,
    pub store: Arc<dyn ConversationStore>,
    pub analyst: Arc<MockAnalyst>,
    pub bus: EventBus,
    pub config: BuildscribeConfig,
    temp_dir: TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Ingests one raw event through the pipeline.
    pub async fn ingest(&self, raw: &str) -> Result<IngestOutcome, BuildscribeError> {
        self.engine.pipeline().ingest(raw).await
    }

    /// Ingests every event in order, collecting the outcomes.
    pub async fn ingest_all<I, S>(&self, events: I) -> Result<Vec<IngestOutcome>, BuildscribeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut outcomes = Vec::new();
        for raw in events {
            outcomes.push(self.ingest(raw.as_ref()).await?);
        }
        Ok(outcomes)
    }

    /// Waits for every queued and in-flight analysis. The pool accepts no
    /// work afterwards.
    pub async fn drain(&self) {
        self.engine.drain().await;
    }

    /// Every stored message of `job`, oldest first.
    pub async fn messages(&self, job: &str) -> Result<Vec<Message>, BuildscribeError> {
        self.store.recent(job, usize::MAX).await
    }

    /// Stored `ANALYSIS` messages of `job`, oldest first.
    pub async fn analyses(&self, job: &str) -> Result<Vec<Message>, BuildscribeError> {
        Ok(self
            .messages(job)
            .await?
            .into_iter()
            .filter(|m| m.role == Role::Analysis)
            .collect())
    }

    /// Drains, closes the store and hands back the directory for a restart.
    pub async fn shutdown(self) -> Result<TempDir, BuildscribeError> {
        self.drain().await;
        self.store.close().await?;
        Ok(self.temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::full_build;

    #[tokio::test]
    async fn harness_runs_a_build_end_to_end() {
        let harness = TestHarness::builder().build().await.unwrap();
        let outcomes = harness.ingest_all(full_build("api", 1)).await.unwrap();
        assert_eq!(outcomes.last(), Some(&IngestOutcome::Dispatched));
        harness.drain().await;

        assert_eq!(harness.analyses("api").await.unwrap().len(), 1);
        assert_eq!(harness.messages("api").await.unwrap().len(), 14);
        assert_eq!(harness.analyst.calls().await, 1);
    }

    #[tokio::test]
    async fn config_tweaks_apply() {
        let harness = TestHarness::builder()
            .with_config(|config| config.context.window_size = 7)
            .build()
            .await
            .unwrap();
        assert_eq!(harness.config.context.window_size, 7);
    }
}
