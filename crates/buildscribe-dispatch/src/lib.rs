// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Analysis dispatch for READY builds.
//!
//! [`AnalysisDispatcher`] runs one build through context assembly, the remote
//! call and verdict persistence, with bounded retries. [`DispatchPool`] runs
//! dispatches on a bounded worker pool fed by a bounded queue.

pub mod dispatcher;
pub mod pool;
pub mod retry;
pub mod verdict;

pub use dispatcher::{AnalysisDispatcher, AnalysisOutcome, DispatchJob, DispatchSettings};
pub use pool::DispatchPool;
pub use retry::Backoff;
pub use verdict::{AnalysisVerdict, normalize_json};
