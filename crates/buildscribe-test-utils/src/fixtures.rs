// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Raw NDJSON events shaped like the ones CI jobs emit.

use serde_json::{Value, json};

/// Single-event categories of a complete build under the default policy.
pub const SINGLE_CATEGORIES: [&str; 11] = [
    "secret-scan",
    "dependency-check",
    "static-analysis",
    "system-info",
    "test-results",
    "code-coverage",
    "container-scan",
    "license-check",
    "git-metadata",
    "artifact-manifest",
    "performance",
];

/// One raw event line.
pub fn event(job: &str, build: u64, category: &str, payload: Value) -> String {
    json!({
        "category": category,
        "job_name": job,
        "build_number": build,
        "timestamp": "2026-03-01T10:00:00Z",
        "payload": payload,
    })
    .to_string()
}

/// The terminal `build-log` event.
pub fn final_log(job: &str, build: u64) -> String {
    event(job, build, "build-log", json!({"phase": "final", "status": "success"}))
}

/// The 13 events of a complete build, in emission order, final log last.
pub fn full_build(job: &str, build: u64) -> Vec<String> {
    let mut events = vec![event(job, build, "build-log", json!({"phase": "initial"}))];
    events.extend(
        SINGLE_CATEGORIES
            .iter()
            .map(|category| event(job, build, category, json!({"ok": true}))),
    );
    events.push(final_log(job, build));
    events
}

/// The same 13 events in a deterministic out-of-order arrangement.
///
/// The final log still arrives last, so the build only completes on the
/// 13th distinct event.
pub fn scrambled_build(job: &str, build: u64) -> Vec<String> {
    let mut events = full_build(job, build);
    let terminal = events.pop();
    let (even, odd): (Vec<_>, Vec<_>) = events
        .into_iter()
        .enumerate()
        .partition(|(index, _)| index % 2 == 0);
    let mut scrambled: Vec<String> = odd
        .into_iter()
        .rev()
        .chain(even)
        .map(|(_, raw)| raw)
        .collect();
    scrambled.extend(terminal);
    scrambled
}
