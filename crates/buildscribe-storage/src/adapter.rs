// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the [`ConversationStore`] trait.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use buildscribe_config::model::StorageConfig;
use buildscribe_core::types::{BuildKey, BuildOutcome, Message, NewMessage};
use buildscribe_core::{
    AdapterType, BuildscribeError, ConversationStore, HealthStatus, PluginAdapter,
};

use crate::database::{Database, checkpoint, map_tr_err};
use crate::queries;

/// SQLite-backed conversation store.
///
/// Wraps a [`Database`] handle and delegates to the typed query modules. The
/// database is opened on the first call to [`ConversationStore::initialize`].
pub struct SqliteStore {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStore {
    /// Create a new store; nothing is opened until `initialize`.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    fn db(&self) -> Result<&Database, BuildscribeError> {
        self.db.get().ok_or_else(|| BuildscribeError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }
}

#[async_trait]
impl PluginAdapter for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, BuildscribeError> {
        self.db()?
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), BuildscribeError> {
        if let Some(db) = self.db.get() {
            checkpoint(db.connection()).await?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn initialize(&self) -> Result<(), BuildscribeError> {
        let db = Database::open(&self.config.database_path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| BuildscribeError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite conversation store initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), BuildscribeError> {
        checkpoint(self.db()?.connection()).await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    async fn append(&self, message: &NewMessage) -> Result<Message, BuildscribeError> {
        queries::messages::append(self.db()?, message).await
    }

    async fn recent(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, BuildscribeError> {
        queries::messages::recent(self.db()?, conversation_id, limit).await
    }

    async fn prune(&self, conversation_id: &str, keep: usize) -> Result<u64, BuildscribeError> {
        queries::messages::prune(self.db()?, conversation_id, keep).await
    }

    async fn list_conversations(&self) -> Result<Vec<String>, BuildscribeError> {
        queries::messages::list_conversations(self.db()?).await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<u64, BuildscribeError> {
        queries::messages::delete_conversation(self.db()?, conversation_id).await
    }

    async fn count(&self, conversation_id: &str) -> Result<u64, BuildscribeError> {
        queries::messages::count(self.db()?, conversation_id).await
    }

    async fn messages_for_build(&self, key: &BuildKey) -> Result<Vec<Message>, BuildscribeError> {
        queries::messages::for_build(self.db()?, key).await
    }

    async fn record_outcome(&self, outcome: &BuildOutcome) -> Result<(), BuildscribeError> {
        queries::outcomes::record(self.db()?, outcome).await
    }

    async fn build_outcome(
        &self,
        key: &BuildKey,
    ) -> Result<Option<BuildOutcome>, BuildscribeError> {
        queries::outcomes::get(self.db()?, key).await
    }

    async fn failed_builds(&self) -> Result<Vec<BuildOutcome>, BuildscribeError> {
        queries::outcomes::failed(self.db()?).await
    }
}
