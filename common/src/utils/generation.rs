//! Generation client for the locally hosted chat model. The seam is the
//! [`Generate`] trait so tests can swap in canned responses; the production
//! implementation talks to an OpenAI-compatible completion endpoint.

use std::{sync::Arc, time::Instant};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub text: String,
    pub model_version: String,
    pub total_tokens: Option<u32>,
    pub latency_ms: u64,
}

#[async_trait]
pub trait Generate: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, AppError>;
}

pub struct ChatGenerator {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl ChatGenerator {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Generate for ChatGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, AppError> {
        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(request.system_prompt.clone()).into(),
                ChatCompletionRequestUserMessage::from(request.user_prompt.clone()).into(),
            ])
            .temperature(request.temperature)
            .max_completion_tokens(request.max_tokens)
            .build()
            .map_err(|e| AppError::Generator(e.to_string()))?;

        let started = Instant::now();
        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e| AppError::Generator(e.to_string()))?;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::Generator("no content in model response".to_string()))?;

        Ok(GenerationOutput {
            text,
            model_version: response.model,
            total_tokens: response.usage.map(|usage| usage.total_tokens),
            latency_ms,
        })
    }
}
