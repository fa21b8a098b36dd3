// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Concurrent registry of build accumulators.
//!
//! Every mutation of a key happens under that key's shard lock, so `record`
//! and `claim` are atomic per key and exactly one caller observes
//! [`Completeness::BecameReady`] or wins a claim.

use buildscribe_core::types::{AccumulatorState, BuildKey};
use buildscribe_core::{BuildscribeError, LogEvent};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::accumulator::{BuildAccumulator, Completeness};
use crate::policy::PolicySet;

/// An accumulating build that has been silent longer than the staleness window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleBuild {
    pub key: BuildKey,
    pub received: u32,
    pub expected: u32,
    pub missing: Vec<String>,
    pub silent_for: chrono::Duration,
}

/// Sharded map from build key to accumulator.
#[derive(Debug, Default)]
pub struct AccumulatorRegistry {
    builds: DashMap<BuildKey, BuildAccumulator>,
    policies: PolicySet,
}

impl AccumulatorRegistry {
    pub fn new(policies: PolicySet) -> Self {
        Self {
            builds: DashMap::new(),
            policies,
        }
    }

    /// Registers one event, creating the accumulator on first sight.
    pub fn record(&self, event: &LogEvent) -> Completeness {
        self.record_at(event, Utc::now())
    }

    pub fn record_at(&self, event: &LogEvent, now: DateTime<Utc>) -> Completeness {
        let key = event.key();
        let mut entry = self.builds.entry(key.clone()).or_insert_with(|| {
            debug!(build = %key, "new build accumulator");
            BuildAccumulator::new(key.clone(), self.policies.for_job(&key.conversation_id), now)
        });
        entry.record(event, now)
    }

    /// Reinstates a terminal tombstone for a build settled in an earlier run,
    /// seeded with the fingerprints of its stored events.
    ///
    /// Returns false when the key is already tracked.
    pub fn restore_settled(
        &self,
        key: &BuildKey,
        state: AccumulatorState,
        at: DateTime<Utc>,
        fingerprints: impl IntoIterator<Item = String>,
    ) -> bool {
        if !state.is_terminal() {
            return false;
        }
        match self.builds.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(BuildAccumulator::settled(
                    key.clone(),
                    self.policies.for_job(&key.conversation_id),
                    state,
                    at,
                    fingerprints,
                ));
                true
            }
        }
    }

    /// READY -> DISPATCHING. Only one caller can win.
    pub fn claim(&self, key: &BuildKey) -> Result<(), BuildscribeError> {
        self.with_build(key, |acc| acc.claim())
    }

    /// DISPATCHING -> COMPLETE.
    pub fn complete(&self, key: &BuildKey) -> Result<(), BuildscribeError> {
        self.with_build(key, |acc| acc.complete(Utc::now()))
    }

    /// DISPATCHING -> FAILED.
    pub fn fail(&self, key: &BuildKey) -> Result<(), BuildscribeError> {
        self.with_build(key, |acc| acc.fail(Utc::now()))
    }

    /// Puts a build into READY for an explicit redispatch, creating it when unknown.
    pub fn reset_for_redispatch(&self, key: &BuildKey) -> Result<(), BuildscribeError> {
        let now = Utc::now();
        let mut entry = self.builds.entry(key.clone()).or_insert_with(|| {
            BuildAccumulator::new(key.clone(), self.policies.for_job(&key.conversation_id), now)
        });
        entry.reset_for_redispatch(now)
    }

    pub fn state(&self, key: &BuildKey) -> Option<AccumulatorState> {
        self.builds.get(key).map(|acc| acc.state())
    }

    /// True when `event` was already counted for its build.
    pub fn has_seen(&self, event: &LogEvent) -> bool {
        self.builds
            .get(&event.key())
            .is_some_and(|acc| acc.has_seen(&event.fingerprint()))
    }

    pub fn contains(&self, key: &BuildKey) -> bool {
        self.builds.contains_key(key)
    }

    /// Runs `f` against a snapshot of one accumulator.
    pub fn inspect<R>(&self, key: &BuildKey, f: impl FnOnce(&BuildAccumulator) -> R) -> Option<R> {
        self.builds.get(key).map(|acc| f(&acc))
    }

    /// Builds waiting in READY, e.g. after the dispatch queue was saturated.
    pub fn ready_keys(&self) -> Vec<BuildKey> {
        self.builds
            .iter()
            .filter(|acc| acc.state() == AccumulatorState::Ready)
            .map(|acc| acc.key().clone())
            .collect()
    }

    /// Accumulating builds silent for at least `window`, each reported once
    /// per silence.
    pub fn stale(&self, now: DateTime<Utc>, window: chrono::Duration) -> Vec<StaleBuild> {
        let mut stale = Vec::new();
        for mut acc in self.builds.iter_mut() {
            if acc.take_stale(now, window) {
                stale.push(StaleBuild {
                    key: acc.key().clone(),
                    received: acc.received_total(),
                    expected: acc.expected_total(),
                    missing: acc.missing(),
                    silent_for: now - acc.last_event_at(),
                });
            }
        }
        stale
    }

    /// Drops terminal tombstones settled more than `retention` ago.
    pub fn sweep_settled(&self, now: DateTime<Utc>, retention: chrono::Duration) -> usize {
        let before = self.builds.len();
        self.builds.retain(|_, acc| {
            !(acc.state().is_terminal()
                && acc.settled_at().is_some_and(|at| now - at >= retention))
        });
        before.saturating_sub(self.builds.len())
    }

    /// Number of builds currently in `state`.
    pub fn count_in(&self, state: AccumulatorState) -> usize {
        self.builds.iter().filter(|acc| acc.state() == state).count()
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }

    fn with_build<R>(
        &self,
        key: &BuildKey,
        f: impl FnOnce(&mut BuildAccumulator) -> Result<R, BuildscribeError>,
    ) -> Result<R, BuildscribeError> {
        match self.builds.get_mut(key) {
            Some(mut acc) => f(&mut acc),
            None => Err(BuildscribeError::NotFound(format!("build {key}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::CompletenessPolicy;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(job: &str, build: u64, category: &str, payload: serde_json::Value) -> LogEvent {
        LogEvent {
            category: category.to_string(),
            job_name: job.to_string(),
            build_number: build,
            timestamp: Utc::now(),
            payload,
            event_id: None,
        }
    }

    /// The 13 events of a complete default build.
    fn full_build(job: &str, build: u64) -> Vec<LogEvent> {
        let mut events = vec![
            event(job, build, "build-log", serde_json::json!({"phase": "initial"})),
            event(job, build, "build-log", serde_json::json!({"phase": "final"})),
        ];
        for category in [
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
        ] {
            events.push(event(job, build, category, serde_json::json!({"ok": true})));
        }
        events
    }

    /// Multiset-only policy so readiness depends on every event.
    fn total_only() -> PolicySet {
        let expected: BTreeMap<String, u32> = CompletenessPolicy::default().expected().clone();
        PolicySet::uniform(CompletenessPolicy::new(
            expected,
            Vec::new(),
            "build-log",
            "phase",
            "never",
        ))
    }

    #[test]
    fn claim_is_won_once() {
        let registry = AccumulatorRegistry::default();
        let key = BuildKey::new("api", 1);
        assert!(matches!(registry.claim(&key), Err(BuildscribeError::NotFound(_))));

        registry.record(&event("api", 1, "system-info", serde_json::json!({})));
        registry.record(&event("api", 1, "build-log", serde_json::json!({"phase": "final"})));
        assert_eq!(registry.state(&key), Some(AccumulatorState::Ready));
        assert_eq!(registry.ready_keys(), vec![key.clone()]);

        registry.claim(&key).unwrap();
        assert!(registry.claim(&key).is_err());
        registry.complete(&key).unwrap();
        assert_eq!(registry.state(&key), Some(AccumulatorState::Complete));
    }

    #[test]
    fn has_seen_tracks_fingerprints_per_build() {
        let registry = AccumulatorRegistry::default();
        let scan = event("api", 2, "secret-scan", serde_json::json!({"hits": 0}));
        assert!(!registry.has_seen(&scan));
        registry.record(&scan);
        assert!(registry.has_seen(&scan));
        assert!(!registry.has_seen(&event("api", 3, "secret-scan", serde_json::json!({"hits": 0}))));
    }

    #[test]
    fn keys_are_independent() {
        let registry = AccumulatorRegistry::default();
        registry.record(&event("api", 1, "system-info", serde_json::json!({})));
        registry.record(&event("api", 2, "build-log", serde_json::json!({"phase": "final"})));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.count_in(AccumulatorState::Accumulating), 2);
    }

    #[test]
    fn restored_tombstone_absorbs_replays() {
        let registry = AccumulatorRegistry::default();
        let key = BuildKey::new("build-x", 42);
        let events = full_build("build-x", 42);
        let stored = events[..3].iter().map(LogEvent::fingerprint);
        assert!(registry.restore_settled(&key, AccumulatorState::Complete, Utc::now(), stored));
        assert!(!registry.restore_settled(&key, AccumulatorState::Failed, Utc::now(), Vec::new()));
        assert!(!registry.restore_settled(
            &BuildKey::new("x", 1),
            AccumulatorState::Ready,
            Utc::now(),
            Vec::new()
        ));

        for e in &events[..3] {
            assert!(registry.has_seen(e));
            assert_eq!(registry.record(e), Completeness::Duplicate);
        }
        for e in &events[3..] {
            assert_eq!(
                registry.record(e),
                Completeness::Settled(AccumulatorState::Complete)
            );
        }
        assert_eq!(registry.state(&key), Some(AccumulatorState::Complete));
    }

    #[test]
    fn redispatch_creates_unknown_builds_ready() {
        let registry = AccumulatorRegistry::default();
        let key = BuildKey::new("api", 9);
        registry.reset_for_redispatch(&key).unwrap();
        assert_eq!(registry.state(&key), Some(AccumulatorState::Ready));
        registry.claim(&key).unwrap();
        assert!(registry.reset_for_redispatch(&key).is_err());
        registry.fail(&key).unwrap();
        registry.reset_for_redispatch(&key).unwrap();
        assert_eq!(registry.state(&key), Some(AccumulatorState::Ready));
    }

    #[test]
    fn stale_builds_are_reported_once() {
        let registry = AccumulatorRegistry::default();
        let start = Utc::now();
        registry.record_at(&event("api", 1, "system-info", serde_json::json!({})), start);
        let window = chrono::Duration::seconds(300);

        let later = start + chrono::Duration::seconds(301);
        let stale = registry.stale(later, window);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].received, 1);
        assert_eq!(stale[0].expected, 13);
        assert!(stale[0].missing.contains(&"build-log".to_string()));
        assert!(registry.stale(later, window).is_empty());
    }

    #[test]
    fn sweep_drops_only_old_tombstones() {
        let registry = AccumulatorRegistry::default();
        let now = Utc::now();
        registry.restore_settled(
            &BuildKey::new("api", 1),
            AccumulatorState::Complete,
            now - chrono::Duration::hours(2),
            Vec::new(),
        );
        registry.restore_settled(&BuildKey::new("api", 2), AccumulatorState::Failed, now, Vec::new());
        registry.record_at(&event("api", 3, "system-info", serde_json::json!({})), now - chrono::Duration::hours(5));

        let removed = registry.sweep_settled(now, chrono::Duration::hours(1));
        assert_eq!(removed, 1);
        assert!(!registry.contains(&BuildKey::new("api", 1)));
        assert!(registry.contains(&BuildKey::new("api", 2)));
        assert!(registry.contains(&BuildKey::new("api", 3)));
    }

    proptest! {
        /// Any ordering with any duplication triggers READY exactly once, and
        /// only after the last distinct event.
        #[test]
        fn exactly_once_under_reordering_and_duplication(
            order in Just((0..13usize).collect::<Vec<_>>()).prop_shuffle(),
            dups in proptest::collection::vec(0..13usize, 0..10),
        ) {
            let registry = AccumulatorRegistry::new(total_only());
            let events = full_build("build-x", 42);
            let mut sequence: Vec<usize> = order.clone();
            for (i, d) in dups.iter().enumerate() {
                let at = (i * 7) % (sequence.len() + 1);
                sequence.insert(at, *d);
            }

            let mut ready = 0;
            let mut seen = std::collections::HashSet::new();
            for idx in sequence {
                seen.insert(idx);
                if registry.record(&events[idx]) == Completeness::BecameReady {
                    ready += 1;
                    prop_assert_eq!(seen.len(), 13);
                }
            }
            prop_assert_eq!(ready, 1);
            prop_assert_eq!(
                registry.state(&BuildKey::new("build-x", 42)),
                Some(AccumulatorState::Ready)
            );
        }

        /// Concurrent recorders on the same key still observe one transition
        /// and one successful claim.
        #[test]
        fn exactly_once_under_concurrency(threads in 2..6usize, seed in 0..1000usize) {
            let registry = AccumulatorRegistry::new(total_only());
            let events = full_build("build-x", 42);
            let key = BuildKey::new("build-x", 42);
            let became_ready = AtomicUsize::new(0);
            let claims = AtomicUsize::new(0);

            std::thread::scope(|scope| {
                for t in 0..threads {
                    let registry = &registry;
                    let events = &events;
                    let key = &key;
                    let became_ready = &became_ready;
                    let claims = &claims;
                    scope.spawn(move || {
                        // Every thread delivers every event, rotated differently.
                        for i in 0..events.len() {
                            let idx = (i + seed + t * 5) % events.len();
                            if registry.record(&events[idx]) == Completeness::BecameReady {
                                became_ready.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                        if registry.claim(key).is_ok() {
                            claims.fetch_add(1, Ordering::SeqCst);
                        }
                    });
                }
            });

            prop_assert_eq!(became_ready.load(Ordering::SeqCst), 1);
            prop_assert_eq!(claims.load(Ordering::SeqCst), 1);
        }
    }
}
