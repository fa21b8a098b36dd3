// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes: non-empty paths, pool bounds, and the consistency of the
//! completeness policy.

use std::collections::{BTreeMap, HashSet};

use crate::diagnostic::ConfigError;
use crate::model::BuildscribeConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns all collected validation errors; does not fail fast.
pub fn validate_config(config: &BuildscribeConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::validation(
            "storage.database_path must not be empty",
        ));
    }

    if !matches!(
        config.engine.log_level.as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        errors.push(ConfigError::validation(format!(
            "engine.log_level must be one of trace, debug, info, warn, error; got `{}`",
            config.engine.log_level
        )));
    }

    if config.openai.base_url.trim().is_empty() {
        errors.push(ConfigError::validation("openai.base_url must not be empty"));
    }
    if config.openai.model.trim().is_empty() {
        errors.push(ConfigError::validation("openai.model must not be empty"));
    }

    if config.context.window_size == 0 {
        errors.push(ConfigError::validation(
            "context.window_size must be at least 1",
        ));
    }

    at_least_one(&mut errors, "dispatch.workers", config.dispatch.workers);
    at_least_one(
        &mut errors,
        "dispatch.queue_capacity",
        config.dispatch.queue_capacity,
    );
    at_least_one(
        &mut errors,
        "dispatch.max_attempts",
        config.dispatch.max_attempts as usize,
    );
    at_least_one(
        &mut errors,
        "dispatch.timeout_secs",
        config.dispatch.timeout_secs as usize,
    );
    if config.dispatch.backoff_initial_ms > config.dispatch.backoff_max_ms {
        errors.push(ConfigError::validation(format!(
            "dispatch.backoff_initial_ms ({}) must not exceed dispatch.backoff_max_ms ({})",
            config.dispatch.backoff_initial_ms, config.dispatch.backoff_max_ms
        )));
    }
    at_least_one(&mut errors, "ingest.workers", config.ingest.workers);

    if config.retention.keep_per_conversation < config.context.window_size {
        errors.push(ConfigError::validation(format!(
            "retention.keep_per_conversation ({}) must be at least context.window_size ({})",
            config.retention.keep_per_conversation, config.context.window_size
        )));
    }
    at_least_one(
        &mut errors,
        "retention.prune_interval_secs",
        config.retention.prune_interval_secs as usize,
    );
    at_least_one(
        &mut errors,
        "retention.maintenance_interval_secs",
        config.retention.maintenance_interval_secs as usize,
    );

    let completeness = &config.completeness;
    check_policy(
        &mut errors,
        "completeness",
        &completeness.expected,
        &completeness.required,
        &completeness.terminal_category,
    );
    if completeness.terminal_field.trim().is_empty() {
        errors.push(ConfigError::validation(
            "completeness.terminal_field must not be empty",
        ));
    }

    let mut seen_jobs = HashSet::new();
    for (i, job) in completeness.jobs.iter().enumerate() {
        if job.job_name.trim().is_empty() {
            errors.push(ConfigError::validation(format!(
                "completeness.jobs[{i}].job_name must not be empty"
            )));
        } else if !seen_jobs.insert(job.job_name.as_str()) {
            errors.push(ConfigError::validation(format!(
                "duplicate job `{}` in [[completeness.jobs]]",
                job.job_name
            )));
        }
        check_policy(
            &mut errors,
            &format!("completeness.jobs[{i}]"),
            job.expected.as_ref().unwrap_or(&completeness.expected),
            job.required.as_ref().unwrap_or(&completeness.required),
            job.terminal_category
                .as_ref()
                .unwrap_or(&completeness.terminal_category),
        );
    }

    if config.prometheus.enabled
        && config
            .prometheus
            .listen_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ConfigError::validation(format!(
            "prometheus.listen_address `{}` is not a valid socket address",
            config.prometheus.listen_address
        )));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn at_least_one(errors: &mut Vec<ConfigError>, key: &str, value: usize) {
    if value == 0 {
        errors.push(ConfigError::validation(format!("{key} must be at least 1")));
    }
}

fn check_policy(
    errors: &mut Vec<ConfigError>,
    scope: &str,
    expected: &BTreeMap<String, u32>,
    required: &[String],
    terminal_category: &str,
) {
    if expected.is_empty() {
        errors.push(ConfigError::validation(format!(
            "{scope}.expected must name at least one category"
        )));
    }
    for (category, count) in expected {
        if *count == 0 {
            errors.push(ConfigError::validation(format!(
                "{scope}.expected.{category} must be at least 1"
            )));
        }
    }
    if !expected.contains_key(terminal_category) {
        errors.push(ConfigError::validation(format!(
            "{scope}.terminal_category `{terminal_category}` is not in the expected categories"
        )));
    }
    for category in required {
        if !expected.contains_key(category) {
            errors.push(ConfigError::validation(format!(
                "{scope}.required category `{category}` is not in the expected categories"
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobCompletenessConfig;

    fn has_error(errors: &[ConfigError], needle: &str) -> bool {
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains(needle)))
    }

    #[test]
    fn default_config_validates() {
        assert!(validate_config(&BuildscribeConfig::default()).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = BuildscribeConfig::default();
        config.storage.database_path = " ".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "database_path"));
    }

    #[test]
    fn keep_smaller_than_window_fails_validation() {
        let mut config = BuildscribeConfig::default();
        config.context.window_size = 50;
        config.retention.keep_per_conversation = 10;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "keep_per_conversation"));
    }

    #[test]
    fn terminal_category_must_be_expected() {
        let mut config = BuildscribeConfig::default();
        config.completeness.terminal_category = "deploy-log".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "deploy-log"));
    }

    #[test]
    fn zero_counts_and_workers_are_all_reported() {
        let mut config = BuildscribeConfig::default();
        config.dispatch.workers = 0;
        config.ingest.workers = 0;
        config
            .completeness
            .expected
            .insert("performance".to_string(), 0);
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "dispatch.workers"));
        assert!(has_error(&errors, "ingest.workers"));
        assert!(has_error(&errors, "expected.performance"));
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn duplicate_job_override_fails_validation() {
        let mut config = BuildscribeConfig::default();
        let job = JobCompletenessConfig {
            job_name: "api".to_string(),
            ..Default::default()
        };
        config.completeness.jobs = vec![job.clone(), job];
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "duplicate job `api`"));
    }

    #[test]
    fn job_override_required_checked_against_its_own_expected() {
        let mut config = BuildscribeConfig::default();
        config.completeness.jobs = vec![JobCompletenessConfig {
            job_name: "docs".to_string(),
            expected: Some(BTreeMap::from([("build-log".to_string(), 2)])),
            ..Default::default()
        }];
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "completeness.jobs[0].required category `system-info`"));
    }

    #[test]
    fn invalid_prometheus_address_only_checked_when_enabled() {
        let mut config = BuildscribeConfig::default();
        config.prometheus.listen_address = "nowhere".to_string();
        assert!(validate_config(&config).is_ok());
        config.prometheus.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "listen_address"));
    }
}
