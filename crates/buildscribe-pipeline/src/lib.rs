// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingest pipeline, serve loop and maintenance for the buildscribe engine.
//!
//! The [`Engine`] is the central coordinator that:
//! - Receives raw events from an [`EventSource`](buildscribe_core::EventSource)
//! - Routes them by build key to ingest workers
//! - Appends every valid event to the conversation store before counting it
//! - Hands READY builds to the dispatch pool
//! - Prunes conversations and sweeps accumulators in the background
//! - Handles graceful shutdown

pub mod engine;
pub mod ingest;
pub mod maintenance;
pub mod shutdown;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::Engine;
pub use ingest::{IngestOutcome, IngestPipeline};
pub use maintenance::{Maintenance, MaintenanceSettings, PruneReport, SweepReport};
pub use shutdown::install_signal_handler;
pub use source::NdjsonSource;
