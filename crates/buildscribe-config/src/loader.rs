// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./buildscribe.toml` > `~/.config/buildscribe/buildscribe.toml`
//! > `/etc/buildscribe/buildscribe.toml` with environment variable overrides via
//! the `BUILDSCRIBE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::BuildscribeConfig;

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/buildscribe/buildscribe.toml";

/// Local configuration file, relative to the working directory.
pub const LOCAL_CONFIG_FILE: &str = "buildscribe.toml";

/// Sections that environment variables may target.
const ENV_SECTIONS: &[&str] = &[
    "engine",
    "storage",
    "openai",
    "context",
    "dispatch",
    "ingest",
    "completeness",
    "retention",
    "prometheus",
];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/buildscribe/buildscribe.toml` (system-wide)
/// 3. `~/.config/buildscribe/buildscribe.toml` (user XDG config)
/// 4. `./buildscribe.toml` (local directory)
/// 5. `BUILDSCRIBE_*` environment variables
pub fn load_config() -> Result<BuildscribeConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<BuildscribeConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(BuildscribeConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<BuildscribeConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(BuildscribeConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(BuildscribeConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG_FILE))
        .merge(env_provider())
}

/// `~/.config/buildscribe/buildscribe.toml`, when a config dir is known.
pub fn user_config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|d| d.join("buildscribe").join("buildscribe.toml"))
}

/// Create the environment variable provider.
///
/// Uses `Env::map()` rather than `Env::split("_")`: key names contain
/// underscores, so `BUILDSCRIBE_DISPATCH_MAX_ATTEMPTS` must become
/// `dispatch.max_attempts`, not `dispatch.max.attempts`.
fn env_provider() -> Env {
    Env::prefixed("BUILDSCRIBE_").map(|key| map_env_key(key.as_str()).into())
}

/// Maps a lowercased, prefix-stripped env var name to a dotted config path.
fn map_env_key(key: &str) -> String {
    for section in ENV_SECTIONS {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_split_on_section_only() {
        assert_eq!(map_env_key("dispatch_max_attempts"), "dispatch.max_attempts");
        assert_eq!(map_env_key("openai_api_key"), "openai.api_key");
        assert_eq!(
            map_env_key("retention_keep_per_conversation"),
            "retention.keep_per_conversation"
        );
    }

    #[test]
    fn unknown_env_section_is_left_alone() {
        assert_eq!(map_env_key("telemetry_level"), "telemetry_level");
    }
}
