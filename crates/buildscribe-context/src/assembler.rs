// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Context window assembly: the most recent slice of a conversation with the
//! pending message appended last.

use std::sync::Arc;

use buildscribe_core::types::{AnalysisRequest, BuildKey, ContextMessage};
use buildscribe_core::{BuildscribeError, ConversationStore};
use tracing::debug;

use crate::instructions::InstructionTemplate;

/// Builds bounded analysis requests from stored history.
#[derive(Clone)]
pub struct ContextAssembler {
    store: Arc<dyn ConversationStore>,
    instructions: InstructionTemplate,
    window_size: usize,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        instructions: InstructionTemplate,
        window_size: usize,
    ) -> Self {
        Self {
            store,
            instructions,
            window_size,
        }
    }

    /// `recent(conversation_id, window_size)` followed by `pending`.
    ///
    /// A history entry with the same store id as `pending` is dropped so the
    /// pending message appears exactly once, at the end. Older entries are
    /// cut, never summarized.
    pub async fn assemble(
        &self,
        conversation_id: &str,
        window_size: usize,
        pending: &ContextMessage,
    ) -> Result<Vec<ContextMessage>, BuildscribeError> {
        let history = self.store.recent(conversation_id, window_size).await?;
        let mut window: Vec<ContextMessage> = history
            .iter()
            .filter(|msg| pending.id != Some(msg.id))
            .map(ContextMessage::from)
            .collect();

        debug!(
            conversation_id,
            window_size,
            history_len = window.len(),
            "assembled context window"
        );

        window.push(pending.clone());
        Ok(window)
    }

    /// Assembles the window with the configured size and wraps it with the
    /// instruction template.
    pub async fn request(
        &self,
        key: &BuildKey,
        pending: &ContextMessage,
    ) -> Result<AnalysisRequest, BuildscribeError> {
        let messages = self
            .assemble(&key.conversation_id, self.window_size, pending)
            .await?;
        Ok(AnalysisRequest {
            key: key.clone(),
            instructions: self.instructions.text().to_string(),
            messages,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildscribe_config::model::StorageConfig;
    use buildscribe_core::types::{MessageContent, MessageMetadata, NewMessage, Role, parse_timestamp};
    use buildscribe_storage::SqliteStore;

    async fn store() -> (Arc<dyn ConversationStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(StorageConfig {
            database_path: dir.path().join("ctx.db").display().to_string(),
            wal_mode: true,
        });
        store.initialize().await.unwrap();
        (Arc::new(store), dir)
    }

    fn source(build: u64, seq: u64) -> NewMessage {
        NewMessage {
            conversation_id: "job".to_string(),
            build_number: build,
            role: Role::Source,
            content: MessageContent {
                category: "build-log".to_string(),
                payload: serde_json::json!({ "seq": seq }),
            },
            metadata: MessageMetadata::new(build),
            created_at: parse_timestamp("2026-03-01T10:00:00Z").unwrap(),
        }
    }

    #[tokio::test]
    async fn persisted_pending_appears_once_at_the_end() {
        let (store, _dir) = store().await;
        let mut last = None;
        for seq in 0..4 {
            last = Some(store.append(&source(1, seq)).await.unwrap());
        }
        let pending = ContextMessage::from(&last.unwrap());

        let assembler = ContextAssembler::new(store, InstructionTemplate::default(), 10);
        let window = assembler.assemble("job", 10, &pending).await.unwrap();

        assert_eq!(window.len(), 4);
        assert_eq!(window.last(), Some(&pending));
        assert_eq!(window.iter().filter(|m| m.id == pending.id).count(), 1);
    }

    #[tokio::test]
    async fn window_is_bounded_to_most_recent() {
        let (store, _dir) = store().await;
        let mut ids = Vec::new();
        for seq in 0..6 {
            ids.push(store.append(&source(1 + seq / 3, seq)).await.unwrap().id);
        }
        let pending = ContextMessage::from(&source(3, 99));

        let assembler = ContextAssembler::new(store, InstructionTemplate::default(), 3);
        let window = assembler.assemble("job", 3, &pending).await.unwrap();

        let got: Vec<Option<i64>> = window.iter().map(|m| m.id).collect();
        assert_eq!(got, vec![Some(ids[3]), Some(ids[4]), Some(ids[5]), None]);
    }

    #[tokio::test]
    async fn pending_older_than_window_is_not_duplicated() {
        let (store, _dir) = store().await;
        let first = store.append(&source(1, 0)).await.unwrap();
        for seq in 1..5 {
            store.append(&source(2, seq)).await.unwrap();
        }
        let pending = ContextMessage::from(&first);

        let assembler = ContextAssembler::new(store, InstructionTemplate::default(), 2);
        let window = assembler.assemble("job", 2, &pending).await.unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[2].id, Some(first.id));
    }

    #[tokio::test]
    async fn empty_history_yields_only_pending() {
        let (store, _dir) = store().await;
        let pending = ContextMessage::from(&source(1, 0));
        let assembler = ContextAssembler::new(store, InstructionTemplate::new("Analyse."), 5);

        let request = assembler
            .request(&BuildKey::new("job", 1), &pending)
            .await
            .unwrap();
        assert_eq!(request.messages, vec![pending]);
        assert_eq!(request.instructions, "Analyse.");
        assert_eq!(request.key, BuildKey::new("job", 1));
    }
}
