// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the store, accumulator, dispatcher and pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Timestamp layout used for persisted timestamps.
///
/// Fixed width with microseconds so that lexicographic order equals
/// chronological order inside SQLite.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Formats a UTC timestamp in the persisted layout.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// Identifies one build of one job: the unit of completeness tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildKey {
    /// Conversation id, i.e. the CI job name.
    pub conversation_id: String,
    /// Build number within the job (>= 1).
    pub build_number: u64,
}

impl BuildKey {
    pub fn new(conversation_id: impl Into<String>, build_number: u64) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            build_number,
        }
    }
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.conversation_id, self.build_number)
    }
}

/// Who produced a stored message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// An ingested log chunk.
    Source,
    /// A verdict produced by the analysis service.
    Analysis,
}

/// Structured message body: a category tag plus the category-specific document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    pub category: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Message metadata.
///
/// `build_number` is always present so a record can be found by build
/// without parsing its content. `extensions` holds optional extra tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub build_number: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl MessageMetadata {
    pub fn new(build_number: u64) -> Self {
        Self {
            build_number,
            extensions: BTreeMap::new(),
        }
    }

    /// Adds an extension tag, replacing any previous value for `key`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }
}

/// A message that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub conversation_id: String,
    pub build_number: u64,
    pub role: Role,
    pub content: MessageContent,
    pub metadata: MessageMetadata,
    /// When the underlying event happened (event timestamp for sources).
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    /// Builds the `SOURCE` record for an ingested log event.
    pub fn source(event: &crate::event::LogEvent) -> Self {
        let mut metadata = MessageMetadata::new(event.build_number)
            .with("fingerprint", event.fingerprint());
        if let Some(ref event_id) = event.event_id {
            metadata = metadata.with("event_id", event_id.clone());
        }
        Self {
            conversation_id: event.job_name.clone(),
            build_number: event.build_number,
            role: Role::Source,
            content: MessageContent {
                category: event.category.clone(),
                payload: event.payload.clone(),
            },
            metadata,
            created_at: event.timestamp,
        }
    }

    /// Builds the `ANALYSIS` record for a verdict.
    pub fn analysis(key: &BuildKey, verdict: serde_json::Value, metadata: MessageMetadata) -> Self {
        Self {
            conversation_id: key.conversation_id.clone(),
            build_number: key.build_number,
            role: Role::Analysis,
            content: MessageContent {
                category: ANALYSIS_CATEGORY.to_string(),
                payload: verdict,
            },
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// Category tag used for persisted verdicts.
pub const ANALYSIS_CATEGORY: &str = "analysis";

/// A persisted, immutable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned monotonic id.
    pub id: i64,
    pub conversation_id: String,
    pub build_number: u64,
    pub role: Role,
    pub content: MessageContent,
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
    /// Store-assigned, non-decreasing within a conversation.
    pub logged_at: DateTime<Utc>,
}

impl Message {
    pub fn key(&self) -> BuildKey {
        BuildKey::new(self.conversation_id.clone(), self.build_number)
    }
}

/// Lifecycle state of a build accumulator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AccumulatorState {
    Accumulating,
    Ready,
    Dispatching,
    Complete,
    Failed,
}

impl AccumulatorState {
    /// COMPLETE and FAILED are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, AccumulatorState::Complete | AccumulatorState::Failed)
    }
}

/// Persisted terminal record of a build, kept for audit and restart-safe idempotency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub key: BuildKey,
    pub state: AccumulatorState,
    /// Number of analysis attempts made.
    pub attempts: u32,
    /// Message id of the verdict (COMPLETE) or the last error text (FAILED).
    pub detail: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of the context window handed to the analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    /// Store id when the message is persisted.
    pub id: Option<i64>,
    pub role: Role,
    pub build_number: u64,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for ContextMessage {
    fn from(msg: &Message) -> Self {
        Self {
            id: Some(msg.id),
            role: msg.role,
            build_number: msg.build_number,
            content: msg.content.clone(),
            created_at: msg.created_at,
        }
    }
}

impl From<&NewMessage> for ContextMessage {
    fn from(msg: &NewMessage) -> Self {
        Self {
            id: None,
            role: msg.role,
            build_number: msg.build_number,
            content: msg.content.clone(),
            created_at: msg.created_at,
        }
    }
}

/// Request handed to an [`AnalysisProvider`](crate::AnalysisProvider).
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub key: BuildKey,
    /// Fixed instruction template (system prompt).
    pub instructions: String,
    /// Bounded history window, oldest first, trigger last.
    pub messages: Vec<ContextMessage>,
}

/// Token accounting reported by the analysis service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Raw answer of the analysis service, before cleanup.
#[derive(Debug, Clone)]
pub struct AnalysisResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Source,
    Provider,
    Storage,
    Observability,
}

/// One delivery handed out by an [`EventSource`](crate::EventSource).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Source-local delivery id, used for ack/nack.
    pub id: u64,
    /// Raw event text.
    pub payload: String,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u32,
}
