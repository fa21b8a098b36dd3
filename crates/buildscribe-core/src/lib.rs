// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the buildscribe engine.
//!
//! Provides the trait definitions, error type, inbound event model and common
//! types shared by the store, accumulator, dispatcher and ingest pipeline.

pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use error::BuildscribeError;
pub use event::LogEvent;
pub use types::{
    AccumulatorState, AdapterType, BuildKey, BuildOutcome, HealthStatus, Message,
    MessageContent, MessageMetadata, NewMessage, Role,
};

pub use traits::{AnalysisProvider, ConversationStore, EventSource, PluginAdapter};
