//! Image-generation client.
//!
//! Calls an OpenAI-compatible `/images/generations` endpoint. Generation can
//! take tens of seconds, so requests carry their own hard timeout instead of
//! the shared client default.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::LLMError;

/// Input for one image generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInput {
    pub prompt: String,
    pub size: String,
    pub quality: String,
    pub model: String,
}

/// Result of a successful generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResult {
    pub url: String,
    pub revised_prompt: String,
}

/// Abstraction over the image provider so job execution can be tested
/// without a live endpoint.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, input: &ImageInput) -> Result<ImageResult, LLMError>;
}

/// Client for the upstream image-generation provider.
#[derive(Clone)]
pub struct ImageClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl ImageClient {
    #[must_use]
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl ImageGenerator for ImageClient {
    async fn generate(&self, input: &ImageInput) -> Result<ImageResult, LLMError> {
        let url = format!("{}/images/generations", self.base_url);

        let payload = GenerationRequest {
            model: &input.model,
            prompt: &input.prompt,
            n: 1,
            size: &input.size,
            quality: &input.quality,
        };

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout);

        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req.json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = parse_provider_error(&body).unwrap_or(body);
            return Err(LLMError::Rejected { status, message });
        }

        let result: GenerationResponse = response.json().await?;
        let first = result.data.into_iter().next().ok_or(LLMError::Rejected {
            status: 502,
            message: "provider returned no images".to_string(),
        })?;

        Ok(ImageResult {
            revised_prompt: first.revised_prompt.unwrap_or_else(|| input.prompt.clone()),
            url: first.url,
        })
    }
}

/// Extract `error.message` from a provider error body, if present.
fn parse_provider_error(body: &str) -> Option<String> {
    let parsed: ProviderError = serde_json::from_str(body).ok()?;
    Some(parsed.error.message)
}

#[derive(Serialize)]
struct GenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,
    quality: &'a str,
}

#[derive(Deserialize)]
struct GenerationResponse {
    data: Vec<GeneratedImage>,
}

#[derive(Deserialize)]
struct GeneratedImage {
    url: String,
    revised_prompt: Option<String>,
}

#[derive(Deserialize)]
struct ProviderError {
    error: ProviderErrorBody,
}

#[derive(Deserialize)]
struct ProviderErrorBody {
    message: String,
}
