// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for buildscribe integration tests.
//!
//! Provides a scripted analysis provider, event fixtures and a harness that
//! wires a complete engine over a temporary SQLite store, for fast,
//! deterministic tests without external services.
//!
//! # Components
//!
//! - [`MockAnalyst`] - Analysis provider with scripted answers, failures and hangs
//! - [`fixtures`] - Raw NDJSON events for complete and partial builds
//! - [`TestHarness`] - Engine, store and bus over a temp directory

pub mod fixtures;
pub mod harness;
pub mod mock_analyst;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_analyst::{MockAnalyst, MockStep};
