// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message log operations.
//!
//! Every read orders by `logged_at` then `id`. `logged_at` is assigned inside
//! the insert transaction and never goes backwards within a conversation,
//! even when the wall clock does.

use std::str::FromStr;

use buildscribe_core::BuildscribeError;
use buildscribe_core::types::{BuildKey, Message, NewMessage, Role, format_timestamp};
use chrono::Utc;
use rusqlite::params;
use rusqlite::types::Type;

use crate::database::{Database, map_tr_err};
use crate::queries::{timestamp_column, u64_column};

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, build_number, role, content, metadata, created_at, logged_at";

/// Append one message and return it as persisted.
pub async fn append(db: &Database, msg: &NewMessage) -> Result<Message, BuildscribeError> {
    let content = serde_json::to_string(&msg.content).map_err(storage_err)?;
    let metadata = serde_json::to_string(&msg.metadata).map_err(storage_err)?;
    let created_at = format_timestamp(&msg.created_at);
    let conversation_id = msg.conversation_id.clone();
    let build_number = to_sql_int(msg.build_number)?;
    let role = msg.role.to_string();

    let (id, logged_at) = db
        .connection()
        .call(move |conn| -> Result<(i64, String), rusqlite::Error> {
            let tx = conn.transaction()?;
            let last: Option<String> = tx.query_row(
                "SELECT MAX(logged_at) FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;
            let now = format_timestamp(&Utc::now());
            let logged_at = match last {
                Some(last) if last > now => last,
                _ => now,
            };
            tx.execute(
                "INSERT INTO messages
                     (conversation_id, build_number, role, content, metadata, created_at, logged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    conversation_id,
                    build_number,
                    role,
                    content,
                    metadata,
                    created_at,
                    logged_at
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok((id, logged_at))
        })
        .await
        .map_err(map_tr_err)?;

    Ok(Message {
        id,
        conversation_id: msg.conversation_id.clone(),
        build_number: msg.build_number,
        role: msg.role,
        content: msg.content.clone(),
        metadata: msg.metadata.clone(),
        created_at: msg.created_at,
        logged_at: timestamp_column(7, &logged_at).map_err(storage_err)?,
    })
}

/// At most `limit` most recent messages of a conversation, oldest first.
pub async fn recent(
    db: &Database,
    conversation_id: &str,
    limit: usize,
) -> Result<Vec<Message>, BuildscribeError> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let conversation_id = conversation_id.to_string();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| -> Result<Vec<Message>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM (
                     SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY logged_at DESC, id DESC
                     LIMIT ?2
                 ) ORDER BY logged_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![conversation_id, limit], row_to_message)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// All messages of one build, oldest first.
pub async fn for_build(db: &Database, key: &BuildKey) -> Result<Vec<Message>, BuildscribeError> {
    let conversation_id = key.conversation_id.clone();
    let build_number = to_sql_int(key.build_number)?;
    db.connection()
        .call(move |conn| -> Result<Vec<Message>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1 AND build_number = ?2
                 ORDER BY logged_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![conversation_id, build_number], row_to_message)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Delete all but the `keep` most recent messages of a conversation.
///
/// One statement, so concurrent readers see either the old or the new window.
pub async fn prune(
    db: &Database,
    conversation_id: &str,
    keep: usize,
) -> Result<u64, BuildscribeError> {
    let conversation_id = conversation_id.to_string();
    let keep = i64::try_from(keep).unwrap_or(i64::MAX);
    let removed = db
        .connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "DELETE FROM messages
                 WHERE conversation_id = ?1
                   AND id NOT IN (
                       SELECT id FROM messages
                       WHERE conversation_id = ?1
                       ORDER BY logged_at DESC, id DESC
                       LIMIT ?2
                   )",
                params![conversation_id, keep],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(removed as u64)
}

/// Conversations with at least one stored message, sorted by id.
pub async fn list_conversations(db: &Database) -> Result<Vec<String>, BuildscribeError> {
    db.connection()
        .call(|conn| -> Result<Vec<String>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT conversation_id FROM messages ORDER BY conversation_id",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Remove a conversation's messages and outcome rows. Returns messages removed.
pub async fn delete_conversation(
    db: &Database,
    conversation_id: &str,
) -> Result<u64, BuildscribeError> {
    let conversation_id = conversation_id.to_string();
    let removed = db
        .connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
            )?;
            tx.execute(
                "DELETE FROM build_outcomes WHERE conversation_id = ?1",
                params![conversation_id],
            )?;
            tx.commit()?;
            Ok(removed)
        })
        .await
        .map_err(map_tr_err)?;
    Ok(removed as u64)
}

/// Number of stored messages for a conversation.
pub async fn count(db: &Database, conversation_id: &str) -> Result<u64, BuildscribeError> {
    let conversation_id = conversation_id.to_string();
    db.connection()
        .call(move |conn| -> Result<u64, rusqlite::Error> {
            conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
                |row| u64_column(row, 0),
            )
        })
        .await
        .map_err(map_tr_err)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(3)?;
    let content: String = row.get(4)?;
    let metadata: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    let logged_at: String = row.get(7)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        build_number: u64_column(row, 2)?,
        role: Role::from_str(&role).map_err(|e| conversion(3, e))?,
        content: serde_json::from_str(&content).map_err(|e| conversion(4, e))?,
        metadata: serde_json::from_str(&metadata).map_err(|e| conversion(5, e))?,
        created_at: timestamp_column(6, &created_at)?,
        logged_at: timestamp_column(7, &logged_at)?,
    })
}

fn conversion<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn to_sql_int(value: u64) -> Result<i64, BuildscribeError> {
    i64::try_from(value).map_err(storage_err)
}

fn storage_err<E>(e: E) -> BuildscribeError
where
    E: std::error::Error + Send + Sync + 'static,
{
    BuildscribeError::Storage {
        source: Box::new(e),
    }
}
