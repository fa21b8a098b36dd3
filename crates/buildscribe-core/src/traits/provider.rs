// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Analysis provider trait for the remote analysis service.

use async_trait::async_trait;

use crate::error::BuildscribeError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{AnalysisRequest, AnalysisResponse};

/// Adapter for the remote analysis service.
///
/// One call per attempt; the dispatcher owns timeouts, retries and response
/// cleanup, so implementations should return the raw answer text untouched.
#[async_trait]
pub trait AnalysisProvider: PluginAdapter {
    /// Sends the instruction template and context window, returning the raw answer.
    async fn analyze(&self, request: AnalysisRequest)
    -> Result<AnalysisResponse, BuildscribeError>;
}
