// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation store trait for persistence backends.

use async_trait::async_trait;

use crate::error::BuildscribeError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{BuildKey, BuildOutcome, Message, NewMessage};

/// Durable, append-only, per-conversation message log.
///
/// Ordering everywhere is `logged_at` ascending with the store id as
/// tie-break. Messages are never updated; they only leave the store through
/// [`prune`](ConversationStore::prune) or
/// [`delete_conversation`](ConversationStore::delete_conversation).
#[async_trait]
pub trait ConversationStore: PluginAdapter {
    /// Initializes the backend (migrations, connection, etc.).
    async fn initialize(&self) -> Result<(), BuildscribeError>;

    /// Closes the backend, flushing pending writes.
    async fn close(&self) -> Result<(), BuildscribeError>;

    /// Durably appends one message and returns it with its id and `logged_at`.
    async fn append(&self, message: &NewMessage) -> Result<Message, BuildscribeError>;

    /// Returns at most `limit` most recent messages, oldest first. Pure read.
    async fn recent(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, BuildscribeError>;

    /// Deletes everything except the `keep` most recent messages.
    /// Returns the number of messages removed.
    async fn prune(&self, conversation_id: &str, keep: usize) -> Result<u64, BuildscribeError>;

    /// Lists every conversation that has at least one message.
    async fn list_conversations(&self) -> Result<Vec<String>, BuildscribeError>;

    /// Irreversibly removes a conversation. Must not run concurrently with an
    /// in-flight dispatch for the same conversation.
    async fn delete_conversation(&self, conversation_id: &str) -> Result<u64, BuildscribeError>;

    /// Number of messages currently stored for a conversation.
    async fn count(&self, conversation_id: &str) -> Result<u64, BuildscribeError>;

    /// All messages of one build, oldest first.
    async fn messages_for_build(&self, key: &BuildKey) -> Result<Vec<Message>, BuildscribeError>;

    /// Inserts or replaces the terminal audit row of a build.
    async fn record_outcome(&self, outcome: &BuildOutcome) -> Result<(), BuildscribeError>;

    /// Reads the terminal audit row of a build, if any.
    async fn build_outcome(&self, key: &BuildKey)
    -> Result<Option<BuildOutcome>, BuildscribeError>;

    /// Lists builds whose terminal state is FAILED, most recent first.
    async fn failed_builds(&self) -> Result<Vec<BuildOutcome>, BuildscribeError>;
}
