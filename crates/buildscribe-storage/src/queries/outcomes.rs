// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Terminal audit rows for builds.

use std::str::FromStr;

use buildscribe_core::BuildscribeError;
use buildscribe_core::types::{AccumulatorState, BuildKey, BuildOutcome, format_timestamp};
use rusqlite::{OptionalExtension, params};
use rusqlite::types::Type;

use crate::database::{Database, map_tr_err};
use crate::queries::messages::to_sql_int;
use crate::queries::{timestamp_column, u64_column};

/// Insert or replace the outcome row of a build.
pub async fn record(db: &Database, outcome: &BuildOutcome) -> Result<(), BuildscribeError> {
    let conversation_id = outcome.key.conversation_id.clone();
    let build_number = to_sql_int(outcome.key.build_number)?;
    let state = outcome.state.to_string();
    let attempts = outcome.attempts;
    let detail = outcome.detail.clone();
    let updated_at = format_timestamp(&outcome.updated_at);
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO build_outcomes
                     (conversation_id, build_number, state, attempts, detail, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (conversation_id, build_number) DO UPDATE SET
                     state = excluded.state,
                     attempts = excluded.attempts,
                     detail = excluded.detail,
                     updated_at = excluded.updated_at",
                params![conversation_id, build_number, state, attempts, detail, updated_at],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Read the outcome row of a build.
pub async fn get(db: &Database, key: &BuildKey) -> Result<Option<BuildOutcome>, BuildscribeError> {
    let conversation_id = key.conversation_id.clone();
    let build_number = to_sql_int(key.build_number)?;
    db.connection()
        .call(move |conn| -> Result<Option<BuildOutcome>, rusqlite::Error> {
            conn.query_row(
                "SELECT conversation_id, build_number, state, attempts, detail, updated_at
                 FROM build_outcomes WHERE conversation_id = ?1 AND build_number = ?2",
                params![conversation_id, build_number],
                row_to_outcome,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// All FAILED builds, most recently updated first.
pub async fn failed(db: &Database) -> Result<Vec<BuildOutcome>, BuildscribeError> {
    db.connection()
        .call(|conn| -> Result<Vec<BuildOutcome>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT conversation_id, build_number, state, attempts, detail, updated_at
                 FROM build_outcomes WHERE state = 'FAILED'
                 ORDER BY updated_at DESC, conversation_id, build_number",
            )?;
            let rows = stmt.query_map([], row_to_outcome)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

fn row_to_outcome(row: &rusqlite::Row<'_>) -> rusqlite::Result<BuildOutcome> {
    let state: String = row.get(2)?;
    let updated_at: String = row.get(5)?;
    Ok(BuildOutcome {
        key: BuildKey::new(row.get::<_, String>(0)?, u64_column(row, 1)?),
        state: AccumulatorState::from_str(&state)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?,
        attempts: row.get(3)?,
        detail: row.get(4)?,
        updated_at: timestamp_column(5, &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("outcomes.db");
        let db = Database::open(db_path.to_str().unwrap(), true).await.unwrap();
        (db, dir)
    }

    fn outcome(job: &str, build: u64, state: AccumulatorState, age_secs: i64) -> BuildOutcome {
        BuildOutcome {
            key: BuildKey::new(job, build),
            state,
            attempts: 3,
            detail: Some("timed out".to_string()),
            updated_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn record_then_get() {
        let (db, _dir) = setup_db().await;
        let failed_row = outcome("job", 7, AccumulatorState::Failed, 0);
        record(&db, &failed_row).await.unwrap();

        let stored = get(&db, &BuildKey::new("job", 7)).await.unwrap().unwrap();
        assert_eq!(stored.state, AccumulatorState::Failed);
        assert_eq!(stored.attempts, 3);
        assert_eq!(stored.detail.as_deref(), Some("timed out"));
        assert!(get(&db, &BuildKey::new("job", 8)).await.unwrap().is_none());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn record_replaces_existing_row() {
        let (db, _dir) = setup_db().await;
        record(&db, &outcome("job", 7, AccumulatorState::Failed, 10)).await.unwrap();
        let mut complete = outcome("job", 7, AccumulatorState::Complete, 0);
        complete.detail = Some("42".to_string());
        record(&db, &complete).await.unwrap();

        let stored = get(&db, &BuildKey::new("job", 7)).await.unwrap().unwrap();
        assert_eq!(stored.state, AccumulatorState::Complete);
        assert!(failed(&db).await.unwrap().is_empty());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn failed_lists_most_recent_first() {
        let (db, _dir) = setup_db().await;
        record(&db, &outcome("a", 1, AccumulatorState::Failed, 60)).await.unwrap();
        record(&db, &outcome("b", 2, AccumulatorState::Failed, 5)).await.unwrap();
        record(&db, &outcome("c", 3, AccumulatorState::Complete, 0)).await.unwrap();

        let rows = failed(&db).await.unwrap();
        let keys: Vec<String> = rows.iter().map(|o| o.key.to_string()).collect();
        assert_eq!(keys, vec!["b#2", "a#1"]);
        db.close().await.unwrap();
    }
}
