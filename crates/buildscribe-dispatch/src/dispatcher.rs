// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The assemble -> call -> persist pipeline run once per READY build.

use std::sync::Arc;
use std::time::{Duration, Instant};

use buildscribe_accumulator::AccumulatorRegistry;
use buildscribe_bus::{EngineEvent, EventBus};
use buildscribe_config::model::DispatchConfig;
use buildscribe_context::ContextAssembler;
use buildscribe_core::types::{
    AccumulatorState, BuildKey, BuildOutcome, ContextMessage, Message, MessageMetadata,
    NewMessage, Role,
};
use buildscribe_core::{AnalysisProvider, BuildscribeError, ConversationStore};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::retry::Backoff;
use crate::verdict::AnalysisVerdict;

/// A READY build handed to the dispatcher, with the `SOURCE` message that
/// completed it.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub key: BuildKey,
    pub trigger: Message,
}

/// Result of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// The verdict was persisted as message `message_id`.
    Completed { message_id: i64, attempts: u32 },
    /// The attempt budget was exhausted; the build is FAILED.
    Failed { attempts: u32, error: String },
    /// Another dispatch owns the build, or it is no longer READY.
    Skipped { state: Option<AccumulatorState> },
}

/// Timeout and retry budget of a dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl DispatchSettings {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_attempts: config.max_attempts.max(1),
            backoff: Backoff::from_config(config),
        }
    }
}

/// Runs analyses for READY builds.
pub struct AnalysisDispatcher {
    store: Arc<dyn ConversationStore>,
    provider: Arc<dyn AnalysisProvider>,
    assembler: ContextAssembler,
    registry: Arc<AccumulatorRegistry>,
    bus: EventBus,
    settings: DispatchSettings,
}

impl AnalysisDispatcher {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        provider: Arc<dyn AnalysisProvider>,
        assembler: ContextAssembler,
        registry: Arc<AccumulatorRegistry>,
        bus: EventBus,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            provider,
            assembler,
            registry,
            bus,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<AccumulatorRegistry> {
        &self.registry
    }

    /// Claims the build and runs the analysis to a terminal state.
    ///
    /// Losing the claim is not an error: the outcome is `Skipped`.
    pub async fn dispatch(&self, job: DispatchJob) -> Result<AnalysisOutcome, BuildscribeError> {
        let key = job.key;
        match self.registry.claim(&key) {
            Ok(()) => {}
            Err(BuildscribeError::InvalidTransition { .. }) => {
                let state = self.registry.state(&key);
                debug!(build = %key, ?state, "dispatch skipped, build not claimable");
                return Ok(AnalysisOutcome::Skipped { state });
            }
            Err(e) => return Err(e),
        }

        info!(build = %key, trigger = job.trigger.id, "dispatching analysis");
        let pending = ContextMessage::from(&job.trigger);
        let mut last_error = String::new();
        let mut attempts = 0;

        for attempt in 1..=self.settings.max_attempts {
            attempts = attempt;
            match self.attempt(&key, &pending, attempt).await {
                Ok(message) => return Ok(self.settle_complete(&key, &message, attempt).await),
                Err(e) => {
                    warn!(
                        build = %key,
                        attempt,
                        max_attempts = self.settings.max_attempts,
                        error = %e,
                        "analysis attempt failed"
                    );
                    last_error = e.to_string();
                    if !e.is_retryable() {
                        break;
                    }
                    if attempt < self.settings.max_attempts {
                        tokio::time::sleep(self.settings.backoff.delay(attempt)).await;
                    }
                }
            }
        }

        Ok(self.settle_failed(&key, attempts, last_error).await)
    }

    /// Operator-requested re-run of a FAILED or never-settled build.
    ///
    /// Uses the latest `SOURCE` message of the build as trigger and runs the
    /// dispatch inline. A build that is COMPLETE, or already has an
    /// `ANALYSIS` message without its outcome row, is refused.
    pub async fn redispatch(&self, key: &BuildKey) -> Result<AnalysisOutcome, BuildscribeError> {
        let recorded = self.store.build_outcome(key).await?.map(|o| o.state);
        let messages = self.store.messages_for_build(key).await?;
        if recorded == Some(AccumulatorState::Complete)
            || messages.iter().any(|m| m.role == Role::Analysis)
        {
            return Err(BuildscribeError::InvalidTransition {
                key: key.to_string(),
                from: AccumulatorState::Complete.to_string(),
                action: "redispatch",
            });
        }

        let trigger = messages
            .into_iter()
            .rev()
            .find(|m| m.role == Role::Source)
            .ok_or_else(|| BuildscribeError::NotFound(format!("no source messages for {key}")))?;

        self.registry.reset_for_redispatch(key)?;
        info!(build = %key, trigger = trigger.id, "redispatch requested");
        self.dispatch(DispatchJob {
            key: key.clone(),
            trigger,
        })
        .await
    }

    async fn attempt(
        &self,
        key: &BuildKey,
        pending: &ContextMessage,
        attempt: u32,
    ) -> Result<Message, BuildscribeError> {
        let request = self.assembler.request(key, pending).await?;
        let window = request.messages.len();

        let started = Instant::now();
        let response = tokio::time::timeout(self.settings.timeout, self.provider.analyze(request))
            .await
            .map_err(|_| BuildscribeError::Timeout {
                duration: self.settings.timeout,
            })
            .and_then(|result| result);

        #[cfg(feature = "prometheus")]
        buildscribe_prometheus::record_latency(started.elapsed().as_secs_f64());

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                #[cfg(feature = "prometheus")]
                buildscribe_prometheus::record_analysis_attempt("transient");
                return Err(e);
            }
        };

        let verdict = match AnalysisVerdict::parse(&response.content, key) {
            Ok(verdict) => verdict,
            Err(e) => {
                #[cfg(feature = "prometheus")]
                buildscribe_prometheus::record_analysis_attempt("malformed");
                return Err(e);
            }
        };
        debug!(
            build = %key,
            attempt,
            window,
            elapsed_ms = started.elapsed().as_millis() as u64,
            model = %response.model,
            "analysis response parsed"
        );

        let mut metadata = MessageMetadata::new(key.build_number)
            .with("model", response.model.clone())
            .with("attempts", attempt);
        if let Some(id) = pending.id {
            metadata = metadata.with("trigger_message_id", id);
        }
        if let Some(usage) = response.usage {
            metadata = metadata
                .with("prompt_tokens", usage.prompt_tokens)
                .with("completion_tokens", usage.completion_tokens);
        }

        let message = NewMessage::analysis(key, verdict.to_value()?, metadata);
        let stored = self.store.append(&message).await?;

        #[cfg(feature = "prometheus")]
        buildscribe_prometheus::record_analysis_attempt("success");

        Ok(stored)
    }

    async fn settle_complete(
        &self,
        key: &BuildKey,
        message: &Message,
        attempts: u32,
    ) -> AnalysisOutcome {
        if let Err(e) = self.registry.complete(key) {
            warn!(build = %key, error = %e, "could not mark build complete");
        }

        let outcome = BuildOutcome {
            key: key.clone(),
            state: AccumulatorState::Complete,
            attempts,
            detail: Some(message.id.to_string()),
            updated_at: Utc::now(),
        };
        if let Err(e) = self.store.record_outcome(&outcome).await {
            warn!(build = %key, error = %e, "failed to record build outcome");
        }

        info!(build = %key, message_id = message.id, attempts, "analysis persisted");
        self.bus.publish(EngineEvent::AnalysisCompleted {
            conversation_id: key.conversation_id.clone(),
            build_number: key.build_number,
            message_id: message.id,
            attempts,
        });

        AnalysisOutcome::Completed {
            message_id: message.id,
            attempts,
        }
    }

    async fn settle_failed(&self, key: &BuildKey, attempts: u32, error: String) -> AnalysisOutcome {
        if let Err(e) = self.registry.fail(key) {
            warn!(build = %key, error = %e, "could not mark build failed");
        }

        let outcome = BuildOutcome {
            key: key.clone(),
            state: AccumulatorState::Failed,
            attempts,
            detail: Some(error.clone()),
            updated_at: Utc::now(),
        };
        if let Err(e) = self.store.record_outcome(&outcome).await {
            warn!(build = %key, error = %e, "failed to record build outcome");
        }

        error!(build = %key, attempts, error = %error, "analysis failed, build marked FAILED");
        #[cfg(feature = "prometheus")]
        buildscribe_prometheus::record_build_failed();

        self.bus.publish(EngineEvent::AnalysisFailed {
            conversation_id: key.conversation_id.clone(),
            build_number: key.build_number,
            attempts,
            error: error.clone(),
        });

        AnalysisOutcome::Failed { attempts, error }
    }
}
