// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared fixtures for the pipeline unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use buildscribe_bus::EventBus;
use buildscribe_config::model::{BuildscribeConfig, StorageConfig};
use buildscribe_context::InstructionTemplate;
use buildscribe_core::types::{AdapterType, AnalysisRequest, AnalysisResponse, HealthStatus, Role};
use buildscribe_core::{AnalysisProvider, BuildscribeError, ConversationStore, PluginAdapter};
use buildscribe_storage::SqliteStore;

use crate::engine::Engine;

/// Answers every request with a minimal verdict.
#[derive(Default)]
pub(crate) struct Echo {
    pub calls: AtomicUsize,
}

#[async_trait]
impl PluginAdapter for Echo {
    fn name(&self) -> &str {
        "echo"
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
impl AnalysisProvider for Echo {
    async fn analyze(&self, _request: AnalysisRequest) -> Result<AnalysisResponse, BuildscribeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AnalysisResponse {
            content: r#"{"summary": "ok"}"#.to_string(),
            model: "echo-1".to_string(),
            usage: None,
        })
    }
}

pub(crate) struct Fixture {
    pub engine: Engine,
    pub store: Arc<dyn ConversationStore>,
    pub provider: Arc<Echo>,
    pub bus: EventBus,
    pub dir: tempfile::TempDir,
}

impl Fixture {
    pub async fn new(tweak: impl FnOnce(&mut BuildscribeConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::in_dir(dir, tweak).await
    }

    /// A fresh engine over the store in `dir`, as after a restart.
    pub async fn in_dir(dir: tempfile::TempDir, tweak: impl FnOnce(&mut BuildscribeConfig)) -> Self {
        let mut config = BuildscribeConfig::default();
        config.storage = StorageConfig {
            database_path: dir.path().join("engine.db").display().to_string(),
            wal_mode: true,
        };
        config.dispatch.backoff_initial_ms = 1;
        config.dispatch.backoff_max_ms = 2;
        tweak(&mut config);

        let store = SqliteStore::new(config.storage.clone());
        store.initialize().await.unwrap();
        let store: Arc<dyn ConversationStore> = Arc::new(store);
        let provider = Arc::new(Echo::default());
        let bus = EventBus::new(256);
        let engine = Engine::with_instructions(
            &config,
            store.clone(),
            provider.clone(),
            bus.clone(),
            InstructionTemplate::default(),
        );
        Self {
            engine,
            store,
            provider,
            bus,
            dir,
        }
    }

    pub async fn analyses(&self, job: &str) -> usize {
        self.store
            .recent(job, 10_000)
            .await
            .unwrap()
            .iter()
            .filter(|m| m.role == Role::Analysis)
            .count()
    }
}

pub(crate) fn raw_event(job: &str, build: u64, category: &str, payload: serde_json::Value) -> String {
    serde_json::json!({
        "category": category,
        "job_name": job,
        "build_number": build,
        "timestamp": "2026-03-01T10:00:00Z",
        "payload": payload,
    })
    .to_string()
}

/// The 13 events of a complete build under the default policy, final log last.
pub(crate) fn full_build(job: &str, build: u64) -> Vec<String> {
    let mut events = vec![raw_event(
        job,
        build,
        "build-log",
        serde_json::json!({"phase": "initial"}),
    )];
    for category in [
        "secret-scan",
        "dependency-check",
        "static-analysis",
        "system-info",
        "test-results",
        "code-coverage",
        "container-scan",
        "license-check",
        "git-metadata",
        "artifact-manifest",
        "performance",
    ] {
        events.push(raw_event(job, build, category, serde_json::json!({"ok": true})));
    }
    events.push(raw_event(
        job,
        build,
        "build-log",
        serde_json::json!({"phase": "final"}),
    ));
    events
}
