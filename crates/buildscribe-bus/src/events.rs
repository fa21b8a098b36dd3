// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event types carried by the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope wrapping every published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    /// Unique event id (UUID v4).
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event: EngineEvent,
}

impl BusEvent {
    pub fn new(event: EngineEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Signals observable outside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// An inbound event failed validation and was dead-lettered.
    EventRejected {
        reason: String,
        /// First bytes of the raw payload, for diagnosis.
        excerpt: String,
    },
    /// A build reached READY.
    BuildReady {
        conversation_id: String,
        build_number: u64,
    },
    /// A verdict was persisted.
    AnalysisCompleted {
        conversation_id: String,
        build_number: u64,
        message_id: i64,
        attempts: u32,
    },
    /// Analysis attempts were exhausted; the build is FAILED.
    AnalysisFailed {
        conversation_id: String,
        build_number: u64,
        attempts: u32,
        error: String,
    },
    /// An accumulating build has been silent past the staleness window.
    BuildStale {
        conversation_id: String,
        build_number: u64,
        received: u32,
        expected: u32,
        missing: Vec<String>,
    },
    /// Old messages were pruned from a conversation.
    ConversationPruned {
        conversation_id: String,
        removed: u64,
    },
    /// A prune pass failed for one conversation; retried next pass.
    PruneFailed {
        conversation_id: String,
        error: String,
    },
}

impl EngineEvent {
    /// Short name used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::EventRejected { .. } => "event_rejected",
            EngineEvent::BuildReady { .. } => "build_ready",
            EngineEvent::AnalysisCompleted { .. } => "analysis_completed",
            EngineEvent::AnalysisFailed { .. } => "analysis_failed",
            EngineEvent::BuildStale { .. } => "build_stale",
            EngineEvent::ConversationPruned { .. } => "conversation_pruned",
            EngineEvent::PruneFailed { .. } => "prune_failed",
        }
    }
}
