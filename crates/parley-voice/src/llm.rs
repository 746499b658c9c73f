//! Chat completion with tool selection.

use crate::config::OpenAiConfig;
use crate::error::{check_status, VoiceError};
use async_trait::async_trait;
use parley_types::{ChatMessage, Completion, ToolDefinition, ToolInvocation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PROVIDER: &str = "openai";

/// Sampling limits for one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A chat model that answers with text or selects one of the offered tools.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: CompletionOptions,
    ) -> Result<Completion, VoiceError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Serialize)]
struct ToolSpec<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDefinition,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

/// Converts a chat-completions response body into a [`Completion`].
///
/// A tool call takes precedence over any accompanying text.
fn parse_completion(response: ChatResponse) -> Result<Completion, VoiceError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| VoiceError::invalid_response(PROVIDER, "no choices in response"))?;

    if let Some(call) = message.tool_calls.and_then(|calls| calls.into_iter().next()) {
        let invocation = ToolInvocation::from_call(&call.function.name, &call.function.arguments)
            .map_err(|e| VoiceError::invalid_response(PROVIDER, e.to_string()))?;
        return Ok(Completion::Tool(invocation));
    }

    match message.content {
        Some(text) if !text.trim().is_empty() => Ok(Completion::Text(text.trim().to_string())),
        _ => Err(VoiceError::invalid_response(PROVIDER, "empty completion")),
    }
}

/// OpenAI chat completions over HTTP.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiChat {
    pub fn new(config: OpenAiConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: CompletionOptions,
    ) -> Result<Completion, VoiceError> {
        let request = ChatRequest {
            model: &self.config.chat_model,
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            tools: tools
                .iter()
                .map(|function| ToolSpec {
                    kind: "function",
                    function,
                })
                .collect(),
            tool_choice: (!tools.is_empty()).then_some("auto"),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| VoiceError::transport(PROVIDER, e))?;
        let response = check_status(PROVIDER, response).await?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::invalid_response(PROVIDER, e.to_string()))?;
        parse_completion(body)
    }
}
