// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Verdict cleanup: strips non-JSON wrapping, fills defaults and pins the
//! build identity.

use buildscribe_core::BuildscribeError;
use buildscribe_core::types::BuildKey;
use serde::{Deserialize, Serialize};

/// Normalized analysis verdict. Every field is present after parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisVerdict {
    pub job_name: String,
    pub build_number: u64,
    pub build_metadata: BuildMetadata,
    pub summary: String,
    pub risk_score: RiskScore,
    pub findings: Vec<Finding>,
    pub processed_logs: Vec<ProcessedLog>,
    pub regression: bool,
    pub insights: Insights,
}

impl Default for AnalysisVerdict {
    fn default() -> Self {
        Self {
            job_name: String::new(),
            build_number: 0,
            build_metadata: BuildMetadata::default(),
            summary: "No summary provided.".to_string(),
            risk_score: RiskScore::default(),
            findings: Vec::new(),
            processed_logs: Vec::new(),
            regression: false,
            insights: Insights::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildMetadata {
    pub status: String,
    pub duration_ms: Option<u64>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl Default for BuildMetadata {
    fn default() -> Self {
        Self {
            status: "unknown".to_string(),
            duration_ms: None,
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskScore {
    pub current: f64,
    pub previous: Option<f64>,
    pub delta: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Finding {
    pub category: String,
    pub severity: String,
    pub description: String,
    pub detail: String,
    pub remediation: String,
}

impl Default for Finding {
    fn default() -> Self {
        Self {
            category: "unknown".to_string(),
            severity: "info".to_string(),
            description: String::new(),
            detail: String::new(),
            remediation: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessedLog {
    pub category: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Insights {
    pub trends: Vec<String>,
    pub critical_issues: Vec<String>,
    pub dependency_notes: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Returns the substring from the first `{` to the last `}`.
pub fn normalize_json(raw: &str) -> Result<&str, BuildscribeError> {
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => Ok(&raw[start..=end]),
        _ => Err(BuildscribeError::MalformedResponse {
            message: "no JSON object in response".to_string(),
        }),
    }
}

impl AnalysisVerdict {
    /// Parses a raw service answer into a verdict for `key`.
    ///
    /// `job_name` and `build_number` always come from the key, whatever the
    /// service claimed; its own values are dropped before typing so a
    /// stringly-typed build number does not fail the parse.
    pub fn parse(raw: &str, key: &BuildKey) -> Result<Self, BuildscribeError> {
        let json = normalize_json(raw)?;
        let mut value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| BuildscribeError::MalformedResponse {
                message: format!("invalid verdict JSON: {e}"),
            })?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| BuildscribeError::MalformedResponse {
                message: "verdict is not a JSON object".to_string(),
            })?;
        object.remove("job_name");
        object.remove("build_number");

        let mut verdict: AnalysisVerdict =
            serde_json::from_value(value).map_err(|e| BuildscribeError::MalformedResponse {
                message: format!("verdict does not match schema: {e}"),
            })?;
        verdict.job_name = key.conversation_id.clone();
        verdict.build_number = key.build_number;
        Ok(verdict)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, BuildscribeError> {
        serde_json::to_value(self).map_err(|e| BuildscribeError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> BuildKey {
        BuildKey::new("build-x", 42)
    }

    #[test]
    fn strips_markdown_fences() {
        let raw = "Here you go:\n```json\n{\"summary\": \"ok\"}\n```\n";
        assert_eq!(normalize_json(raw).unwrap(), "{\"summary\": \"ok\"}");
    }

    #[test]
    fn rejects_text_without_object() {
        assert!(matches!(
            normalize_json("I could not analyze this build."),
            Err(BuildscribeError::MalformedResponse { .. })
        ));
        assert!(normalize_json("} backwards {").is_err());
    }

    #[test]
    fn fills_defaults_for_missing_fields() {
        let verdict = AnalysisVerdict::parse(r#"{"regression": true}"#, &key()).unwrap();
        assert!(verdict.regression);
        assert_eq!(verdict.build_metadata.status, "unknown");
        assert_eq!(verdict.summary, "No summary provided.");
        assert!(verdict.findings.is_empty());

        let json = verdict.to_value().unwrap();
        for field in [
            "job_name",
            "build_number",
            "build_metadata",
            "summary",
            "risk_score",
            "findings",
            "processed_logs",
            "regression",
            "insights",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn key_overrides_claimed_identity() {
        let raw = r#"{"job_name": "other", "build_number": "41", "summary": "fine"}"#;
        let verdict = AnalysisVerdict::parse(raw, &key()).unwrap();
        assert_eq!(verdict.job_name, "build-x");
        assert_eq!(verdict.build_number, 42);
        assert_eq!(verdict.summary, "fine");
    }

    #[test]
    fn partial_findings_get_conservative_defaults() {
        let raw = r#"{"findings": [{"description": "leaked token"}], "risk_score": {"current": 80}}"#;
        let verdict = AnalysisVerdict::parse(raw, &key()).unwrap();
        assert_eq!(verdict.findings[0].severity, "info");
        assert_eq!(verdict.findings[0].category, "unknown");
        assert_eq!(verdict.risk_score.current, 80.0);
        assert!(verdict.risk_score.previous.is_none());
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = AnalysisVerdict::parse(r#"{"a": [1, 2}"#, &key()).unwrap_err();
        assert!(matches!(err, BuildscribeError::MalformedResponse { .. }));
    }
}
