/// LLM Client — the single point of entry for all Claude API calls.
///
/// ARCHITECTURAL RULE: No other module may call the Anthropic API directly.
/// All LLM interactions MUST go through this module.
///
/// The client makes exactly one attempt per call. Retrying belongs to the
/// adaptive retry layer, which knows the failure category and policy.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::providers::{
    ExternalServiceError, GapNarrative, GapNarrativeGenerator, NarrativeParams, ServiceErrorKind,
};

pub mod prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for gap narratives. Hardcoded to prevent accidental drift.
pub const MODEL: &str = "claude-sonnet-4-5";
const SERVICE: &str = "narrative";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// Wraps the Anthropic Messages API with structured output helpers.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            api_key,
        })
    }

    /// Makes a single raw call to the Claude API.
    pub async fn call(
        &self,
        prompt: &str,
        system: &str,
        params: NarrativeParams,
    ) -> Result<LlmResponse, ExternalServiceError> {
        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ExternalServiceError::from_reqwest(SERVICE, e))?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AnthropicError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(ExternalServiceError::from_status(
                SERVICE,
                status.as_u16(),
                message,
            ));
        }

        let llm_response: LlmResponse = response
            .json()
            .await
            .map_err(|e| ExternalServiceError::from_reqwest(SERVICE, e))?;

        debug!(
            "LLM call succeeded: input_tokens={}, output_tokens={}",
            llm_response.usage.input_tokens, llm_response.usage.output_tokens
        );

        Ok(llm_response)
    }

    /// Calls the LLM and deserializes the text response as JSON.
    /// The prompt must instruct the model to return valid JSON.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system: &str,
        params: NarrativeParams,
    ) -> Result<T, ExternalServiceError> {
        let response = self.call(prompt, system, params).await?;

        let text = response.text().ok_or_else(|| {
            ExternalServiceError::new(
                SERVICE,
                ServiceErrorKind::EmptyResponse,
                "LLM returned empty content",
            )
        })?;

        parse_json_payload(text)
    }
}

#[async_trait]
impl GapNarrativeGenerator for LlmClient {
    async fn generate(
        &self,
        prompt: &str,
        params: NarrativeParams,
    ) -> Result<GapNarrative, ExternalServiceError> {
        let narrative: GapNarrative = self
            .call_json(prompt, prompts::GAP_ANALYSIS_SYSTEM, params)
            .await?;
        validate_narrative(narrative)
    }
}

/// Rejects narratives with blank required fields so the retry layer can
/// treat them as `empty_fields` failures.
pub fn validate_narrative(narrative: GapNarrative) -> Result<GapNarrative, ExternalServiceError> {
    let missing = narrative.missing_fields();
    if missing.is_empty() {
        Ok(narrative)
    } else {
        Err(ExternalServiceError::new(
            SERVICE,
            ServiceErrorKind::EmptyResponse,
            format!("missing required fields: {}", missing.join(", ")),
        ))
    }
}

fn parse_json_payload<T: DeserializeOwned>(text: &str) -> Result<T, ExternalServiceError> {
    // Strip markdown code fences if the model wraps JSON in them
    let text = strip_json_fences(text);
    if text.is_empty() {
        return Err(ExternalServiceError::new(
            SERVICE,
            ServiceErrorKind::EmptyResponse,
            "LLM returned an empty JSON payload",
        ));
    }

    serde_json::from_str(text).map_err(|e| {
        // A structurally incomplete object is a missing-fields failure, anything
        // else is a generic one.
        let kind = if e.is_data() || e.is_eof() {
            ServiceErrorKind::EmptyResponse
        } else {
            ServiceErrorKind::Generic
        };
        ExternalServiceError::new(SERVICE, kind, format!("JSON parse error: {e}"))
    })
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
