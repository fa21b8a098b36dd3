// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock analysis provider for deterministic testing.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use buildscribe_core::types::{
    AdapterType, AnalysisRequest, AnalysisResponse, HealthStatus, TokenUsage,
};
use buildscribe_core::{AnalysisProvider, BuildscribeError, PluginAdapter};

/// Answer returned when the script is exhausted.
pub const DEFAULT_VERDICT: &str =
    r#"{"summary": "mock verdict", "build_metadata": {"status": "success"}, "regression": false}"#;

/// One scripted reaction to an analysis request.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Answer with this raw text.
    Answer(String),
    /// Fail with a transient provider error.
    Fail(String),
    /// Never answer; the caller's timeout must fire.
    Hang,
}

/// A mock analysis provider that plays a FIFO script and records every
/// request it receives.
pub struct MockAnalyst {
    steps: Mutex<VecDeque<MockStep>>,
    requests: Mutex<Vec<AnalysisRequest>>,
}

impl MockAnalyst {
    pub fn new() -> Self {
        Self::with_steps(Vec::new())
    }

    pub fn with_steps(steps: Vec<MockStep>) -> Self {
        Self {
            steps: Mutex::new(VecDeque::from(steps)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Appends a step to the script.
    pub async fn push(&self, step: MockStep) {
        self.steps.lock().await.push_back(step);
    }

    /// Number of requests received so far.
    pub async fn calls(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Every request received so far, oldest first.
    pub async fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().await.clone()
    }
}

impl Default for MockAnalyst {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockAnalyst {
    fn name(&self) -> &str {
        "mock-analyst"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, BuildscribeError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), BuildscribeError> {
        Ok(())
    }
}

#[async_trait]
impl AnalysisProvider for MockAnalyst {
    async fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> Result<AnalysisResponse, BuildscribeError> {
        self.requests.lock().await.push(request);
        let step = self.steps.lock().await.pop_front();
        match step.unwrap_or_else(|| MockStep::Answer(DEFAULT_VERDICT.to_string())) {
            MockStep::Answer(content) => Ok(AnalysisResponse {
                content,
                model: "mock-model".to_string(),
                usage: Some(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                }),
            }),
            MockStep::Fail(message) => Err(BuildscribeError::Provider {
                message,
                source: None,
            }),
            MockStep::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                Err(BuildscribeError::Internal("mock hang elapsed".to_string()))
            }
        }
    }
}
