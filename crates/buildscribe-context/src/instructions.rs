// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The fixed instruction template sent as the system message of every
//! analysis request.

use buildscribe_config::model::ContextConfig;
use buildscribe_core::BuildscribeError;
use tracing::{info, warn};

/// Built-in template used when none is configured.
pub const DEFAULT_INSTRUCTIONS: &str = r#"You are a CI build analyst. You receive the log events of one build, preceded by earlier builds of the same job and your previous verdicts for them.

Answer with a single JSON object and nothing else, using exactly these fields:
{
  "job_name": string,
  "build_number": integer,
  "build_metadata": {"status": string, "duration_ms": integer, "started_at": string, "finished_at": string},
  "summary": string,
  "risk_score": {"current": integer 0-100, "previous": integer 0-100, "delta": integer},
  "findings": [{"category": string, "severity": "critical"|"high"|"medium"|"low"|"info", "description": string, "detail": string, "remediation": string}],
  "processed_logs": [{"category": string, "description": string}],
  "regression": boolean,
  "insights": {"trends": [string], "critical_issues": [string], "dependency_notes": [string], "recommendations": [string]}
}

Take "previous" from your last verdict for this job when one exists. Set "regression" when the risk score rose or a previously passing check now fails. Never invent findings that are not supported by the logs."#;

/// Loaded instruction template.
#[derive(Debug, Clone)]
pub struct InstructionTemplate {
    text: String,
}

impl InstructionTemplate {
    /// Loads the template: `instructions_file` first, then `instructions`,
    /// then [`DEFAULT_INSTRUCTIONS`].
    ///
    /// An unreadable file is an error; an empty one falls through.
    pub async fn load(config: &ContextConfig) -> Result<Self, BuildscribeError> {
        if let Some(ref path) = config.instructions_file {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                BuildscribeError::Config(format!("cannot read instructions file `{path}`: {e}"))
            })?;
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                info!(path = path.as_str(), "loaded instructions from file");
                return Ok(Self::new(trimmed));
            }
            warn!(path = path.as_str(), "instructions file is empty, falling back");
        }

        if let Some(ref inline) = config.instructions
            && !inline.trim().is_empty()
        {
            return Ok(Self::new(inline.trim()));
        }

        Ok(Self::default())
    }

    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Default for InstructionTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUCTIONS)
    }
}
