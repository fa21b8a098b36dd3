// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Completeness policies: what a finished build looks like.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use buildscribe_config::model::{CompletenessConfig, JobCompletenessConfig};

/// Expected multiset of categories plus the terminal-event rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletenessPolicy {
    expected: BTreeMap<String, u32>,
    required: BTreeSet<String>,
    terminal_category: String,
    terminal_field: String,
    terminal_value: String,
}

impl CompletenessPolicy {
    pub fn new(
        expected: BTreeMap<String, u32>,
        required: impl IntoIterator<Item = String>,
        terminal_category: impl Into<String>,
        terminal_field: impl Into<String>,
        terminal_value: impl Into<String>,
    ) -> Self {
        Self {
            expected,
            required: required.into_iter().collect(),
            terminal_category: terminal_category.into(),
            terminal_field: terminal_field.into(),
            terminal_value: terminal_value.into(),
        }
    }

    /// Global policy from the `[completeness]` section.
    pub fn from_config(config: &CompletenessConfig) -> Self {
        Self::new(
            config.expected.clone(),
            config.required.iter().cloned(),
            config.terminal_category.clone(),
            config.terminal_field.clone(),
            config.terminal_value.clone(),
        )
    }

    /// This policy with a job override applied; unset override fields inherit.
    pub fn with_override(&self, job: &JobCompletenessConfig) -> Self {
        Self {
            expected: job.expected.clone().unwrap_or_else(|| self.expected.clone()),
            required: job
                .required
                .as_ref()
                .map(|r| r.iter().cloned().collect())
                .unwrap_or_else(|| self.required.clone()),
            terminal_category: job
                .terminal_category
                .clone()
                .unwrap_or_else(|| self.terminal_category.clone()),
            terminal_field: job
                .terminal_field
                .clone()
                .unwrap_or_else(|| self.terminal_field.clone()),
            terminal_value: job
                .terminal_value
                .clone()
                .unwrap_or_else(|| self.terminal_value.clone()),
        }
    }

    /// Multiplicity of a category, `None` when the category is not expected.
    pub fn expected_count(&self, category: &str) -> Option<u32> {
        self.expected.get(category).copied()
    }

    /// Size of the expected multiset.
    pub fn expected_total(&self) -> u32 {
        self.expected.values().sum()
    }

    pub fn expected(&self) -> &BTreeMap<String, u32> {
        &self.expected
    }

    pub fn required(&self) -> &BTreeSet<String> {
        &self.required
    }

    /// True when the event is the build's terminal event.
    pub fn is_terminal(&self, category: &str, payload: &serde_json::Value) -> bool {
        category == self.terminal_category
            && payload
                .get(&self.terminal_field)
                .and_then(|v| v.as_str())
                .is_some_and(|v| v == self.terminal_value)
    }
}

impl Default for CompletenessPolicy {
    fn default() -> Self {
        Self::from_config(&CompletenessConfig::default())
    }
}

/// The global policy plus per-job overrides.
#[derive(Debug, Clone)]
pub struct PolicySet {
    default: Arc<CompletenessPolicy>,
    jobs: HashMap<String, Arc<CompletenessPolicy>>,
}

impl PolicySet {
    pub fn from_config(config: &CompletenessConfig) -> Self {
        let default = CompletenessPolicy::from_config(config);
        let jobs = config
            .jobs
            .iter()
            .map(|job| (job.job_name.clone(), Arc::new(default.with_override(job))))
            .collect();
        Self {
            default: Arc::new(default),
            jobs,
        }
    }

    /// Every job uses the same policy.
    pub fn uniform(policy: CompletenessPolicy) -> Self {
        Self {
            default: Arc::new(policy),
            jobs: HashMap::new(),
        }
    }

    pub fn for_job(&self, job_name: &str) -> Arc<CompletenessPolicy> {
        self.jobs
            .get(job_name)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::uniform(CompletenessPolicy::default())
    }
}
