//! Typed HTTP gateway to the persistence service.
//!
//! Every durable record lives behind this boundary: character profiles,
//! conversation messages, and generation jobs. The gateway translates
//! typed calls into REST requests and never retries; failure policy
//! belongs to the caller.

mod error;

pub use error::PersistError;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Records
// ============================================================================

/// A character profile, fetched before generation to build the prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct CharacterProfile {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Sampling temperature override for this character.
    #[serde(default)]
    pub creativity: Option<f32>,
}

/// A message to append to a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Kind of generation work, matching the values the service validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Image,
    Variation,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobType::Image => "image",
            JobType::Variation => "variation",
        };
        f.write_str(s)
    }
}

/// Lifecycle states of a generation job, as stored by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A generation job as returned by the persistence service.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub status: JobStatus,
    #[serde(default)]
    pub attempts: Option<u32>,
}

/// Partial update for a generation job.
///
/// Only populated fields are sent, so a status change never clobbers
/// fields it does not own.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_data: Option<Value>,
    /// Double option: the outer level decides whether the field is sent,
    /// the inner level allows an explicit `null` to clear the stored
    /// message on retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct NewJob<'a> {
    job_type: JobType,
    input_data: &'a Value,
}

// ============================================================================
// Gateway
// ============================================================================

/// Client for the persistence service REST API.
#[derive(Clone)]
pub struct PersistClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl PersistClient {
    /// Build a gateway with the given metadata timeout applied to every
    /// request.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        api_key: Option<String>,
    ) -> Result<Self, PersistError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }

    /// Fetch a character profile by id.
    pub async fn get_character(&self, character_id: i64) -> Result<CharacterProfile, PersistError> {
        let url = format!("{}/api/v1/characters/{}/", self.base_url, character_id);
        let response = self.with_auth(self.client.get(&url)).send().await?;
        Self::decode(response).await
    }

    /// Append a message to a conversation.
    pub async fn save_message(
        &self,
        conversation_id: i64,
        message: &NewMessage,
    ) -> Result<(), PersistError> {
        let url = format!(
            "{}/api/v1/conversations/{}/add_message/",
            self.base_url, conversation_id
        );
        let response = self
            .with_auth(self.client.post(&url))
            .json(message)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    /// Create a generation job record. The service assigns the id.
    pub async fn create_job(
        &self,
        job_type: JobType,
        input_data: &Value,
    ) -> Result<JobRecord, PersistError> {
        let url = format!("{}/api/v1/generation-jobs/", self.base_url);
        let body = NewJob {
            job_type,
            input_data,
        };
        let response = self
            .with_auth(self.client.post(&url))
            .json(&body)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Apply a partial update to a job record.
    pub async fn update_job(&self, job_id: i64, patch: &JobPatch) -> Result<(), PersistError> {
        let url = format!("{}/api/v1/generation-jobs/{}/", self.base_url, job_id);
        let response = self
            .with_auth(self.client.patch(&url))
            .json(patch)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PersistError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(PersistError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PersistError> {
        let response = Self::check_status(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| PersistError::Decode(e.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================
