// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-build completeness tracking.
//!
//! A [`BuildAccumulator`] counts the log categories received for one build
//! and decides when the build is complete. The [`AccumulatorRegistry`] holds
//! every live accumulator and serializes mutation per key.

pub mod accumulator;
pub mod policy;
pub mod registry;

pub use accumulator::{BuildAccumulator, Completeness};
pub use policy::{CompletenessPolicy, PolicySet};
pub use registry::{AccumulatorRegistry, StaleBuild};
