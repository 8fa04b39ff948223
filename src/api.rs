//! Request and response types for the HTTP surface.

use serde::{Deserialize, Serialize};

use crate::llm::Message;
use crate::persist::JobStatus;

// ============================================================================
// Chat Streaming
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatStreamRequest {
    pub conversation_id: i64,
    pub character_id: i64,
    /// The new user turn. Appended after `messages` when building the
    /// upstream prompt.
    pub user_message: String,
    /// Prior conversation turns, oldest first.
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// When false, neither the user turn nor the assistant reply is
    /// written to the conversation history.
    #[serde(default = "default_save_history")]
    pub save_history: bool,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_save_history() -> bool {
    true
}

// ============================================================================
// Image Generation
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ImageGenerateRequest {
    pub prompt: String,
    #[serde(default = "default_size")]
    pub size: String,
    #[serde(default = "default_quality")]
    pub quality: String,
    /// When true the job is queued for the worker pool and the response
    /// carries only the job id; otherwise generation happens inline.
    #[serde(default)]
    pub deferred: bool,
}

fn default_size() -> String {
    "1024x1024".into()
}

fn default_quality() -> String {
    "standard".into()
}

#[derive(Debug, Serialize)]
pub struct ImageGenerateResponse {
    pub job_id: i64,
    pub status: JobStatus,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_request_fills_defaults() {
        let req: ChatStreamRequest = serde_json::from_value(json!({
            "conversation_id": 1,
            "character_id": 2,
            "user_message": "hi",
        }))
        .unwrap();
        assert!(req.messages.is_empty());
        assert_eq!(req.temperature, 0.7);
        assert_eq!(req.max_tokens, 2000);
        assert!(req.save_history);
    }

    #[test]
    fn image_request_fills_defaults() {
        let req: ImageGenerateRequest =
            serde_json::from_value(json!({"prompt": "a cat"})).unwrap();
        assert_eq!(req.size, "1024x1024");
        assert_eq!(req.quality, "standard");
        assert!(!req.deferred);
    }

    #[test]
    fn image_response_omits_absent_fields() {
        let response = ImageGenerateResponse {
            job_id: 9,
            status: JobStatus::Pending,
            success: true,
            url: None,
            revised_prompt: None,
            error: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["job_id"], 9);
        assert_eq!(json["status"], "pending");
        assert!(json.get("url").is_none());
        assert!(json.get("error").is_none());
    }
}
