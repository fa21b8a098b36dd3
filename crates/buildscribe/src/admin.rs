// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Maintenance commands: conversations, failed builds and configuration.
//!
//! Each command returns its rendered output so the caller decides where it
//! goes.

use std::fmt::Write as _;

use buildscribe_config::model::BuildscribeConfig;
use buildscribe_core::types::{BuildKey, Message};
use buildscribe_core::{BuildscribeError, ConversationStore};
use buildscribe_dispatch::AnalysisOutcome;
use buildscribe_pipeline::Engine;
use tracing::info;

/// Characters of payload shown per message in text mode.
const PREVIEW_CHARS: usize = 96;

pub async fn list_conversations(store: &dyn ConversationStore) -> Result<String, BuildscribeError> {
    let conversations = store.list_conversations().await?;
    if conversations.is_empty() {
        return Ok("no conversations\n".to_string());
    }
    let mut out = String::new();
    for id in conversations {
        let count = store.count(&id).await?;
        let _ = writeln!(out, "{id}\t{count} messages");
    }
    Ok(out)
}

pub async fn show_conversation(
    store: &dyn ConversationStore,
    id: &str,
    limit: usize,
    json: bool,
) -> Result<String, BuildscribeError> {
    let messages = store.recent(id, limit).await?;
    if json {
        let rendered = serde_json::to_string_pretty(&messages)
            .map_err(|e| BuildscribeError::Internal(format!("failed to render messages: {e}")))?;
        return Ok(rendered + "\n");
    }
    if messages.is_empty() {
        return Err(BuildscribeError::NotFound(format!("conversation `{id}`")));
    }
    Ok(messages.iter().map(format_message).collect())
}

pub async fn prune_conversation(
    store: &dyn ConversationStore,
    id: &str,
    keep: usize,
) -> Result<String, BuildscribeError> {
    let removed = store.prune(id, keep).await?;
    info!(conversation_id = %id, keep, removed, "conversation pruned");
    Ok(format!("pruned {removed} messages from {id}, kept at most {keep}\n"))
}

/// Deletes a conversation. Refuses unless `confirmed`.
pub async fn delete_conversation(
    store: &dyn ConversationStore,
    id: &str,
    confirmed: bool,
) -> Result<String, BuildscribeError> {
    if !confirmed {
        return Err(BuildscribeError::Config(format!(
            "refusing to delete `{id}` without --yes"
        )));
    }
    let removed = store.delete_conversation(id).await?;
    info!(conversation_id = %id, removed, "conversation deleted");
    Ok(format!("deleted {id} ({removed} messages)\n"))
}

pub async fn failed_builds(store: &dyn ConversationStore) -> Result<String, BuildscribeError> {
    let failed = store.failed_builds().await?;
    if failed.is_empty() {
        return Ok("no failed builds\n".to_string());
    }
    let mut out = String::new();
    for outcome in failed {
        let _ = writeln!(
            out,
            "{}\t{} attempts\t{}\t{}",
            outcome.key,
            outcome.attempts,
            outcome.updated_at.to_rfc3339(),
            outcome.detail.as_deref().unwrap_or("-"),
        );
    }
    Ok(out)
}

/// Resets a failed build to READY and analyses it once more.
pub async fn redispatch(engine: &Engine, job: &str, build: u64) -> Result<String, BuildscribeError> {
    let key = BuildKey::new(job, build);
    match engine.dispatcher().redispatch(&key).await? {
        AnalysisOutcome::Completed {
            message_id,
            attempts,
        } => Ok(format!(
            "{key}: analysis stored as message {message_id} after {attempts} attempt(s)\n"
        )),
        AnalysisOutcome::Failed { attempts, error } => Err(BuildscribeError::Internal(format!(
            "{key}: analysis failed again after {attempts} attempt(s): {error}"
        ))),
        AnalysisOutcome::Skipped { state } => Ok(format!(
            "{key}: nothing to do, build is {}\n",
            state.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string())
        )),
    }
}

/// Effective configuration as TOML, with the API key redacted.
pub fn render_config(config: &BuildscribeConfig) -> Result<String, BuildscribeError> {
    let mut shown = config.clone();
    if shown.openai.api_key.is_some() {
        shown.openai.api_key = Some("<redacted>".to_string());
    }
    toml::to_string_pretty(&shown)
        .map_err(|e| BuildscribeError::Internal(format!("failed to render configuration: {e}")))
}

fn format_message(message: &Message) -> String {
    let payload = message.content.payload.to_string();
    let mut preview: String = payload.chars().take(PREVIEW_CHARS).collect();
    if payload.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    format!(
        "#{:<6} build {:<6} {:<8} {:<18} {} {}\n",
        message.id,
        message.build_number,
        message.role,
        message.content.category,
        message.logged_at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        preview,
    )
}
