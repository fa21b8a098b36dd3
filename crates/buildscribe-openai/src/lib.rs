// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI-compatible analysis provider for buildscribe.
//!
//! Implements [`AnalysisProvider`] on top of the chat completions API with
//! `response_format = {"type": "json_object"}`.

pub mod client;
pub mod types;

use async_trait::async_trait;
use buildscribe_config::model::OpenAiConfig;
use buildscribe_core::types::{
    AdapterType, AnalysisRequest, AnalysisResponse, ContextMessage, HealthStatus, Role, TokenUsage,
};
use buildscribe_core::{AnalysisProvider, BuildscribeError, PluginAdapter};
use tracing::{debug, info};

use crate::client::OpenAiClient;
use crate::types::{ChatMessage, ChatRequest, ResponseFormat};

/// Analysis provider backed by an OpenAI-compatible endpoint.
///
/// API key resolution order: config -> `OPENAI_API_KEY` env var -> error.
pub struct OpenAiAnalyst {
    client: OpenAiClient,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiAnalyst {
    pub fn new(config: &OpenAiConfig) -> Result<Self, BuildscribeError> {
        let api_key = resolve_api_key(&config.api_key)?;
        let client = OpenAiClient::new(&api_key, &config.base_url, config.max_retries)?;
        info!(model = %config.model, endpoint = client.endpoint(), "analysis provider initialized");
        Ok(Self::with_client(client, config))
    }

    /// Builds a provider around an existing client.
    pub fn with_client(client: OpenAiClient, config: &OpenAiConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Converts an analysis request into a chat completion request.
    ///
    /// The instruction template becomes the system message; stored log chunks
    /// are user turns and earlier verdicts are assistant turns.
    pub fn to_chat_request(&self, request: &AnalysisRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(ChatMessage::system(request.instructions.clone()));
        messages.extend(request.messages.iter().map(render_message));
        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: ResponseFormat::json_object(),
        }
    }
}

fn render_message(msg: &ContextMessage) -> ChatMessage {
    match msg.role {
        Role::Source => ChatMessage::user(
            serde_json::json!({
                "build_number": msg.build_number,
                "category": msg.content.category,
                "payload": msg.content.payload,
            })
            .to_string(),
        ),
        Role::Analysis => ChatMessage::assistant(msg.content.payload.to_string()),
    }
}

#[async_trait]
impl PluginAdapter for OpenAiAnalyst {
    fn name(&self) -> &str {
        "openai"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, BuildscribeError> {
        // No live call: health checks must not spend tokens.
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), BuildscribeError> {
        debug!("analysis provider shutting down");
        Ok(())
    }
}

#[async_trait]
impl AnalysisProvider for OpenAiAnalyst {
    async fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> Result<AnalysisResponse, BuildscribeError> {
        let chat = self.to_chat_request(&request);
        debug!(
            build = %request.key,
            messages = chat.messages.len(),
            "sending analysis request"
        );
        let response = self.client.complete(&chat).await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| BuildscribeError::MalformedResponse {
                message: "completion has no message content".into(),
            })?;

        Ok(AnalysisResponse {
            content,
            model: if response.model.is_empty() {
                self.model.clone()
            } else {
                response.model
            },
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
        })
    }
}

fn resolve_api_key(config_key: &Option<String>) -> Result<String, BuildscribeError> {
    if let Some(key) = config_key
        && !key.is_empty()
    {
        return Ok(key.clone());
    }

    std::env::var("OPENAI_API_KEY").map_err(|_| {
        BuildscribeError::Config(
            "analysis API key not found. Set openai.api_key in config or OPENAI_API_KEY environment variable.".into(),
        )
    })
}
