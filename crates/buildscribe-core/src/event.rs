// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound log events and their boundary validation.
//!
//! Events arrive as JSON documents from the message source. Anything missing a
//! job, build or category is rejected here and never reaches the accumulator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::BuildscribeError;
use crate::types::{BuildKey, parse_timestamp};

/// Wire shape of an inbound event. Every field is optional so that
/// validation can report precisely what is missing.
#[derive(Debug, Deserialize)]
struct RawLogEvent {
    category: Option<String>,
    job_name: Option<String>,
    build_number: Option<serde_json::Value>,
    timestamp: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
    event_id: Option<String>,
}

/// A validated inbound log event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub category: String,
    pub job_name: String,
    pub build_number: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    /// Source-assigned delivery identity, when the producer provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl LogEvent {
    /// Parses and validates one raw event.
    ///
    /// `build_number` may be a JSON integer or a numeric string. A missing
    /// timestamp defaults to the time of ingestion; a present but unparsable
    /// one is rejected.
    pub fn parse(raw: &str) -> Result<Self, BuildscribeError> {
        let raw: RawLogEvent =
            serde_json::from_str(raw).map_err(|e| BuildscribeError::MalformedEvent {
                reason: format!("invalid JSON: {e}"),
            })?;

        let category = required_text(raw.category, "category")?;
        let job_name = required_text(raw.job_name, "job_name")?;
        let build_number = match raw.build_number {
            None | Some(serde_json::Value::Null) => return Err(missing("build_number")),
            Some(value) => parse_build_number(&value)?,
        };
        let timestamp = match raw.timestamp {
            None => Utc::now(),
            Some(ts) => parse_timestamp(&ts).map_err(|e| BuildscribeError::MalformedEvent {
                reason: format!("invalid timestamp `{ts}`: {e}"),
            })?,
        };

        Ok(Self {
            category,
            job_name,
            build_number,
            timestamp,
            payload: raw.payload,
            event_id: raw.event_id.filter(|id| !id.trim().is_empty()),
        })
    }

    pub fn key(&self) -> BuildKey {
        BuildKey::new(self.job_name.clone(), self.build_number)
    }

    /// Identity used to recognise a redelivery of the same event.
    ///
    /// The source-assigned `event_id` wins; otherwise a SHA-256 over the
    /// category and the serialized payload.
    pub fn fingerprint(&self) -> String {
        if let Some(ref id) = self.event_id {
            return format!("id:{id}");
        }
        let mut hasher = Sha256::new();
        hasher.update(self.category.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.payload.to_string().as_bytes());
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }

    /// Returns a top-level string field of the payload, if present.
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(|v| v.as_str())
    }
}

fn missing(field: &str) -> BuildscribeError {
    BuildscribeError::MalformedEvent {
        reason: format!("missing required field `{field}`"),
    }
}

fn required_text(value: Option<String>, field: &str) -> Result<String, BuildscribeError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(missing(field)),
    }
}

fn parse_build_number(value: &serde_json::Value) -> Result<u64, BuildscribeError> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match parsed {
        // Stored as a signed SQLite integer.
        Some(n) if n > i64::MAX as u64 => Err(BuildscribeError::MalformedEvent {
            reason: format!("build_number {n} is out of range"),
        }),
        Some(n) if n >= 1 => Ok(n),
        _ => Err(BuildscribeError::MalformedEvent {
            reason: format!("build_number must be a positive integer, got {value}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(err: BuildscribeError) -> String {
        match err {
            BuildscribeError::MalformedEvent { reason } => reason,
            other => panic!("expected MalformedEvent, got {other:?}"),
        }
    }

    #[test]
    fn parses_complete_event() {
        let raw = r#"{"category":"build-log","job_name":"build-x","build_number":42,
            "timestamp":"2026-03-01T10:00:00Z","payload":{"phase":"final","lines":["ok"]}}"#;
        let event = LogEvent::parse(raw).unwrap();
        assert_eq!(event.key(), BuildKey::new("build-x", 42));
        assert_eq!(event.payload_str("phase"), Some("final"));
        assert!(event.event_id.is_none());
    }

    #[test]
    fn accepts_numeric_string_build_number() {
        let raw = r#"{"category":"system-info","job_name":"api","build_number":"17"}"#;
        assert_eq!(LogEvent::parse(raw).unwrap().build_number, 17);
    }

    #[test]
    fn rejects_missing_job_name() {
        let raw = r#"{"category":"build-log","build_number":1}"#;
        assert!(reason(LogEvent::parse(raw).unwrap_err()).contains("job_name"));
    }

    #[test]
    fn rejects_blank_category() {
        let raw = r#"{"category":"  ","job_name":"api","build_number":1}"#;
        assert!(reason(LogEvent::parse(raw).unwrap_err()).contains("category"));
    }

    #[test]
    fn rejects_zero_build_number() {
        let raw = r#"{"category":"build-log","job_name":"api","build_number":0}"#;
        assert!(reason(LogEvent::parse(raw).unwrap_err()).contains("positive integer"));
    }

    #[test]
    fn rejects_build_number_beyond_storage_range() {
        let raw = r#"{"category":"build-log","job_name":"api","build_number":9223372036854775808}"#;
        let err = LogEvent::parse(raw).unwrap_err();
        assert!(!err.is_retryable());
        assert!(reason(err).contains("out of range"));

        let text = r#"{"category":"build-log","job_name":"api","build_number":"18446744073709551615"}"#;
        assert!(reason(LogEvent::parse(text).unwrap_err()).contains("out of range"));

        let max = format!(
            r#"{{"category":"build-log","job_name":"api","build_number":{}}}"#,
            i64::MAX
        );
        assert_eq!(LogEvent::parse(&max).unwrap().build_number, i64::MAX as u64);
    }

    #[test]
    fn rejects_bad_timestamp() {
        let raw = r#"{"category":"build-log","job_name":"api","build_number":3,"timestamp":"yesterday"}"#;
        assert!(reason(LogEvent::parse(raw).unwrap_err()).contains("timestamp"));
    }

    #[test]
    fn rejects_non_json() {
        assert!(reason(LogEvent::parse("not json").unwrap_err()).contains("invalid JSON"));
    }

    #[test]
    fn fingerprint_is_stable_for_redelivery() {
        let raw = r#"{"category":"dependency-check","job_name":"api","build_number":3,"payload":{"a":1,"b":2}}"#;
        let first = LogEvent::parse(raw).unwrap();
        let again = LogEvent::parse(raw).unwrap();
        assert_eq!(first.fingerprint(), again.fingerprint());
        assert!(first.fingerprint().starts_with("sha256:"));
    }

    #[test]
    fn fingerprint_prefers_event_id() {
        let raw = r#"{"category":"build-log","job_name":"api","build_number":3,"event_id":"evt-9"}"#;
        assert_eq!(LogEvent::parse(raw).unwrap().fingerprint(), "id:evt-9");
    }

    #[test]
    fn different_payloads_fingerprint_differently() {
        let initial = r#"{"category":"build-log","job_name":"api","build_number":3,"payload":{"phase":"initial"}}"#;
        let last = r#"{"category":"build-log","job_name":"api","build_number":3,"payload":{"phase":"final"}}"#;
        assert_ne!(
            LogEvent::parse(initial).unwrap().fingerprint(),
            LogEvent::parse(last).unwrap().fingerprint()
        );
    }
}
