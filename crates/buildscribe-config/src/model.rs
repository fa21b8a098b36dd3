// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the buildscribe engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level buildscribe configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BuildscribeConfig {
    /// Engine identity and logging.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Remote analysis service settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Context window settings.
    #[serde(default)]
    pub context: ContextConfig,

    /// Analysis dispatch pool settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Ingestion worker settings.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Build completeness policy.
    #[serde(default)]
    pub completeness: CompletenessConfig,

    /// Conversation retention and maintenance cadence.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

/// Engine identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Instance name, used in logs.
    #[serde(default = "default_engine_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_engine_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_engine_name() -> String {
    "buildscribe".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("buildscribe").join("buildscribe.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("buildscribe.db"))
        .to_string_lossy()
        .to_string()
}

fn default_wal_mode() -> bool {
    true
}

/// OpenAI-compatible analysis service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAiConfig {
    /// API key. `None` falls back to the `OPENAI_API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of the chat completions API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for analysis requests.
    #[serde(default = "default_model")]
    pub model: String,

    /// Upper bound on completion tokens per verdict.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Transport-level retries for 429/5xx inside a single attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_retries() -> u32 {
    1
}

/// Context window configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContextConfig {
    /// Number of most recent stored messages handed to the analysis service.
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Inline instruction template. Overridden by `instructions_file` if both set.
    #[serde(default)]
    pub instructions: Option<String>,

    /// Path to a file containing the instruction template.
    #[serde(default)]
    pub instructions_file: Option<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            instructions: None,
            instructions_file: None,
        }
    }
}

fn default_window_size() -> usize {
    100
}

/// Analysis dispatch pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    /// Maximum concurrent analysis calls.
    #[serde(default = "default_dispatch_workers")]
    pub workers: usize,

    /// Capacity of the queue in front of the pool.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Timeout for one analysis call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempt budget per build before it is marked FAILED.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay, doubled after each failed attempt.
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Backoff ceiling.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_dispatch_workers(),
            queue_capacity: default_queue_capacity(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

fn default_dispatch_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_initial_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

/// Ingestion worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    /// Number of ingestion workers; each build key is owned by exactly one.
    #[serde(default = "default_ingest_workers")]
    pub workers: usize,

    /// Redeliveries of a nacked event before it is dead-lettered.
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_ingest_workers(),
            max_redeliveries: default_max_redeliveries(),
        }
    }
}

fn default_ingest_workers() -> usize {
    4
}

fn default_max_redeliveries() -> u32 {
    5
}

/// Build completeness policy.
///
/// A build is complete when the clamped count of received categories reaches
/// the sum of `expected`, or when the terminal event has arrived and every
/// category in `required` has been seen.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CompletenessConfig {
    /// Expected multiset: category -> number of events of that category.
    #[serde(default = "default_expected")]
    pub expected: BTreeMap<String, u32>,

    /// Categories that must be present before the terminal event completes a build.
    #[serde(default = "default_required")]
    pub required: Vec<String>,

    /// Category of the terminal event.
    #[serde(default = "default_terminal_category")]
    pub terminal_category: String,

    /// Payload field that discriminates the terminal event.
    #[serde(default = "default_terminal_field")]
    pub terminal_field: String,

    /// Value of `terminal_field` that marks the terminal event.
    #[serde(default = "default_terminal_value")]
    pub terminal_value: String,

    /// Seconds an accumulating build may stay silent before it is reported stale.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Seconds a settled build is remembered in memory.
    #[serde(default = "default_settled_retention_secs")]
    pub settled_retention_secs: u64,

    /// Per-job overrides.
    #[serde(default)]
    pub jobs: Vec<JobCompletenessConfig>,
}

impl Default for CompletenessConfig {
    fn default() -> Self {
        Self {
            expected: default_expected(),
            required: default_required(),
            terminal_category: default_terminal_category(),
            terminal_field: default_terminal_field(),
            terminal_value: default_terminal_value(),
            stale_after_secs: default_stale_after_secs(),
            settled_retention_secs: default_settled_retention_secs(),
            jobs: Vec::new(),
        }
    }
}

fn default_expected() -> BTreeMap<String, u32> {
    [
        ("build-log", 2),
        ("secret-scan", 1),
        ("dependency-check", 1),
        ("static-analysis", 1),
        ("system-info", 1),
        ("test-results", 1),
        ("code-coverage", 1),
        ("container-scan", 1),
        ("license-check", 1),
        ("git-metadata", 1),
        ("artifact-manifest", 1),
        ("performance", 1),
    ]
    .into_iter()
    .map(|(category, count)| (category.to_string(), count))
    .collect()
}

fn default_required() -> Vec<String> {
    vec!["build-log".to_string(), "system-info".to_string()]
}

fn default_terminal_category() -> String {
    "build-log".to_string()
}

fn default_terminal_field() -> String {
    "phase".to_string()
}

fn default_terminal_value() -> String {
    "final".to_string()
}

fn default_stale_after_secs() -> u64 {
    1_800
}

fn default_settled_retention_secs() -> u64 {
    86_400
}

/// Completeness override for one job. Unset fields inherit the global policy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct JobCompletenessConfig {
    /// Job name (conversation id) this override applies to.
    pub job_name: String,

    #[serde(default)]
    pub expected: Option<BTreeMap<String, u32>>,

    #[serde(default)]
    pub required: Option<Vec<String>>,

    #[serde(default)]
    pub terminal_category: Option<String>,

    #[serde(default)]
    pub terminal_field: Option<String>,

    #[serde(default)]
    pub terminal_value: Option<String>,
}

/// Conversation retention and maintenance cadence.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Messages kept per conversation by the prune pass.
    #[serde(default = "default_keep_per_conversation")]
    pub keep_per_conversation: usize,

    /// Seconds between prune passes.
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,

    /// Seconds between accumulator sweeps (stale report, READY resubmission).
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_per_conversation: default_keep_per_conversation(),
            prune_interval_secs: default_prune_interval_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

fn default_keep_per_conversation() -> usize {
    100
}

fn default_prune_interval_secs() -> u64 {
    300
}

fn default_maintenance_interval_secs() -> u64 {
    30
}

/// Prometheus metrics exporter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PrometheusConfig {
    /// Install the Prometheus recorder and HTTP listener.
    #[serde(default)]
    pub enabled: bool,

    /// Socket address of the scrape endpoint.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: default_listen_address(),
        }
    }
}

fn default_listen_address() -> String {
    "127.0.0.1:9464".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_expected_multiset_has_thirteen_events() {
        let config = CompletenessConfig::default();
        let total: u32 = config.expected.values().sum();
        assert_eq!(total, 13);
        assert_eq!(config.expected.get("build-log"), Some(&2));
    }

    #[test]
    fn default_database_path_ends_with_db_file() {
        assert!(StorageConfig::default().database_path.ends_with("buildscribe.db"));
    }

    #[test]
    fn default_retention_covers_window() {
        let config = BuildscribeConfig::default();
        assert!(config.retention.keep_per_conversation >= config.context.window_size);
    }
}
