use crate::error::GenerationError;
use crate::traits::TextGenerator;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

pub const DEFAULT_LLM_REPO_ID: &str = "mistralai/Mistral-7B-Instruct-v0.3";
pub const DEFAULT_TEMPERATURE: f32 = 0.5;
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 512;

const BACKEND: &str = "huggingface";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_new_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
        }
    }
}

#[derive(Debug, Serialize)]
struct TextGenerationRequest<'a> {
    inputs: &'a str,
    parameters: TextGenerationParameters,
    options: RequestOptions,
}

#[derive(Debug, Serialize)]
struct TextGenerationParameters {
    temperature: f32,
    max_new_tokens: u32,
    return_full_text: bool,
}

#[derive(Debug, Serialize)]
struct RequestOptions {
    wait_for_model: bool,
}

/// Client for a hosted text-generation model on the Hugging Face inference
/// API. The token is sent as a bearer credential when present; a missing
/// token only shows up as an authorization failure on the first request.
pub struct HuggingFaceEndpoint {
    client: Client,
    base_url: String,
    repo_id: String,
    token: Option<String>,
    options: GenerationOptions,
}

impl HuggingFaceEndpoint {
    pub fn new(
        base_url: impl Into<String>,
        repo_id: impl Into<String>,
        token: Option<String>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            repo_id: repo_id.into(),
            token,
            options,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    fn endpoint(&self) -> Result<Url, GenerationError> {
        Ok(Url::parse(&format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.repo_id
        ))?)
    }
}

#[async_trait]
impl TextGenerator for HuggingFaceEndpoint {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let payload = TextGenerationRequest {
            inputs: prompt,
            parameters: TextGenerationParameters {
                temperature: self.options.temperature,
                max_new_tokens: self.options.max_new_tokens,
                return_full_text: false,
            },
            options: RequestOptions {
                wait_for_model: true,
            },
        };

        let mut request = self.client.post(self.endpoint()?).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        debug!(repo_id = %self.repo_id, prompt_chars = prompt.len(), "calling generation endpoint");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let parsed: Value = response.json().await?;
        parse_generated_text(&parsed)
    }
}

fn status_error(status: StatusCode, body: String) -> GenerationError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            GenerationError::Unauthorized { status }
        }
        StatusCode::TOO_MANY_REQUESTS => GenerationError::RateLimited(body),
        _ => GenerationError::BackendResponse {
            backend: BACKEND.to_string(),
            status,
            details: body,
        },
    }
}

/// Accepts `[{"generated_text": ..}]` and `{"generated_text": ..}`.
fn parse_generated_text(payload: &Value) -> Result<String, GenerationError> {
    if let Some(message) = payload.get("error").and_then(Value::as_str) {
        return Err(GenerationError::InvalidResponse(message.to_string()));
    }

    payload
        .pointer("/0/generated_text")
        .or_else(|| payload.get("generated_text"))
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| {
            GenerationError::InvalidResponse(format!("no generated_text in response: {payload}"))
        })
}
