// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-build completeness state machine.
//!
//! ```text
//! ACCUMULATING --(complete)--> READY --(claim)--> DISPATCHING --+--> COMPLETE
//!                                ^                              |
//!                                +------(redispatch)--- FAILED <-+
//! ```
//!
//! `FAILED -> READY` only happens through an explicit redispatch.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use buildscribe_core::types::{AccumulatorState, BuildKey};
use buildscribe_core::{BuildscribeError, LogEvent};
use chrono::{DateTime, Utc};

use crate::policy::CompletenessPolicy;

/// Result of registering one event with an accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    /// Counted; the build is still incomplete.
    Pending { received: u32, expected: u32 },
    /// This event moved the build to READY. Observed exactly once per build.
    BecameReady,
    /// A redelivery of an event that was already counted.
    Duplicate,
    /// Counted after the build was already READY or DISPATCHING.
    Late(AccumulatorState),
    /// The build is COMPLETE or FAILED; only the fingerprint was recorded.
    Settled(AccumulatorState),
}

/// Transient completeness state for one `(conversation_id, build_number)`.
#[derive(Debug, Clone)]
pub struct BuildAccumulator {
    key: BuildKey,
    policy: Arc<CompletenessPolicy>,
    state: AccumulatorState,
    counts: BTreeMap<String, u32>,
    unexpected: u32,
    fingerprints: HashSet<String>,
    terminal_seen: bool,
    first_seen_at: DateTime<Utc>,
    last_event_at: DateTime<Utc>,
    ready_at: Option<DateTime<Utc>>,
    settled_at: Option<DateTime<Utc>>,
    stale_reported: bool,
}

impl BuildAccumulator {
    pub fn new(key: BuildKey, policy: Arc<CompletenessPolicy>, now: DateTime<Utc>) -> Self {
        Self {
            key,
            policy,
            state: AccumulatorState::Accumulating,
            counts: BTreeMap::new(),
            unexpected: 0,
            fingerprints: HashSet::new(),
            terminal_seen: false,
            first_seen_at: now,
            last_event_at: now,
            ready_at: None,
            settled_at: None,
            stale_reported: false,
        }
    }

    /// A tombstone for a build whose outcome was persisted earlier.
    ///
    /// `fingerprints` are the events already stored for the build, so that
    /// their redeliveries are still recognised.
    pub fn settled(
        key: BuildKey,
        policy: Arc<CompletenessPolicy>,
        state: AccumulatorState,
        at: DateTime<Utc>,
        fingerprints: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut acc = Self::new(key, policy, at);
        acc.state = state;
        acc.settled_at = Some(at);
        acc.fingerprints.extend(fingerprints);
        acc
    }

    /// Registers one event.
    ///
    /// A settled build only remembers the fingerprint; counts and state stay
    /// as they were.
    pub fn record(&mut self, event: &LogEvent, now: DateTime<Utc>) -> Completeness {
        if !self.fingerprints.insert(event.fingerprint()) {
            return Completeness::Duplicate;
        }
        if self.state.is_terminal() {
            return Completeness::Settled(self.state);
        }

        self.last_event_at = now;
        self.stale_reported = false;

        match self.policy.expected_count(&event.category) {
            Some(limit) => {
                let count = self.counts.entry(event.category.clone()).or_insert(0);
                *count = (*count + 1).min(limit);
            }
            None => self.unexpected += 1,
        }
        if self.policy.is_terminal(&event.category, &event.payload) {
            self.terminal_seen = true;
        }

        if self.state != AccumulatorState::Accumulating {
            return Completeness::Late(self.state);
        }
        if self.is_complete() {
            self.state = AccumulatorState::Ready;
            self.ready_at = Some(now);
            return Completeness::BecameReady;
        }
        Completeness::Pending {
            received: self.received_total(),
            expected: self.policy.expected_total(),
        }
    }

    /// Either the full multiset arrived, or the terminal event plus every
    /// required category.
    pub fn is_complete(&self) -> bool {
        if self.received_total() >= self.policy.expected_total() {
            return true;
        }
        self.terminal_seen
            && self
                .policy
                .required()
                .iter()
                .all(|category| self.counts.get(category).copied().unwrap_or(0) > 0)
    }

    /// READY -> DISPATCHING.
    pub fn claim(&mut self) -> Result<(), BuildscribeError> {
        self.transition(AccumulatorState::Ready, AccumulatorState::Dispatching, "claim")
    }

    /// DISPATCHING -> COMPLETE.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), BuildscribeError> {
        self.transition(
            AccumulatorState::Dispatching,
            AccumulatorState::Complete,
            "complete",
        )?;
        self.settled_at = Some(now);
        Ok(())
    }

    /// DISPATCHING -> FAILED.
    pub fn fail(&mut self, now: DateTime<Utc>) -> Result<(), BuildscribeError> {
        self.transition(AccumulatorState::Dispatching, AccumulatorState::Failed, "fail")?;
        self.settled_at = Some(now);
        Ok(())
    }

    /// Forces the build back to READY for an operator-requested redispatch.
    ///
    /// Refused while an analysis is in flight or after one has completed.
    pub fn reset_for_redispatch(&mut self, now: DateTime<Utc>) -> Result<(), BuildscribeError> {
        match self.state {
            AccumulatorState::Dispatching | AccumulatorState::Complete => Err(self.invalid("redispatch")),
            _ => {
                self.state = AccumulatorState::Ready;
                self.ready_at = Some(now);
                self.settled_at = None;
                Ok(())
            }
        }
    }

    fn transition(
        &mut self,
        from: AccumulatorState,
        to: AccumulatorState,
        action: &'static str,
    ) -> Result<(), BuildscribeError> {
        if self.state != from {
            return Err(self.invalid(action));
        }
        self.state = to;
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> BuildscribeError {
        BuildscribeError::InvalidTransition {
            key: self.key.to_string(),
            from: self.state.to_string(),
            action,
        }
    }

    /// True when an event with this fingerprint was already counted.
    pub fn has_seen(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    /// Clamped number of expected events received so far.
    pub fn received_total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// Expected categories still short of their multiplicity.
    pub fn missing(&self) -> Vec<String> {
        self.policy
            .expected()
            .iter()
            .filter(|(category, want)| self.counts.get(*category).copied().unwrap_or(0) < **want)
            .map(|(category, _)| category.clone())
            .collect()
    }

    /// True once per staleness episode: ACCUMULATING and silent for `window`.
    pub(crate) fn take_stale(&mut self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        if self.state != AccumulatorState::Accumulating || self.stale_reported {
            return false;
        }
        if now - self.last_event_at < window {
            return false;
        }
        self.stale_reported = true;
        true
    }

    pub fn key(&self) -> &BuildKey {
        &self.key
    }

    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    pub fn expected_total(&self) -> u32 {
        self.policy.expected_total()
    }

    pub fn unexpected(&self) -> u32 {
        self.unexpected
    }

    pub fn terminal_seen(&self) -> bool {
        self.terminal_seen
    }

    pub fn first_seen_at(&self) -> DateTime<Utc> {
        self.first_seen_at
    }

    pub fn last_event_at(&self) -> DateTime<Utc> {
        self.last_event_at
    }

    pub fn ready_at(&self) -> Option<DateTime<Utc>> {
        self.ready_at
    }

    pub fn settled_at(&self) -> Option<DateTime<Utc>> {
        self.settled_at
    }
}
