//! Streaming chat-completion client.
//!
//! Talks to an OpenAI-compatible `/chat/completions` endpoint with
//! `stream: true` and adapts the SSE wire format into [`StreamEvent`]s.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use reqwest::Client;

use crate::sse::SseEventStream;

use super::error::LLMError;
use super::types::{ChatRequest, ChatStream, StreamEvent};

/// Client for the upstream chat-completion provider.
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl ChatClient {
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Open a streaming chat completion.
    ///
    /// Returns an error without producing a stream if the provider rejects
    /// the request (non-2xx) or the connection cannot be established.
    pub async fn stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let url = format!("{}/chat/completions", self.base_url);

        let stream_request = StreamRequest {
            model: request.model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
        };

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");

        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req.json(&stream_request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LLMError::Rejected { status, message });
        }

        let byte_stream = Box::pin(response.bytes_stream());
        let sse_stream = SseEventStream::new(byte_stream);

        Ok(Box::pin(ChatStreamAdapter::new(sse_stream)))
    }
}

// ============================================================================
// Streaming Types
// ============================================================================

#[derive(serde::Serialize)]
struct StreamRequest {
    model: String,
    messages: Vec<super::types::Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

/// Adapter that converts SSE frames into chat [`StreamEvent`]s.
struct ChatStreamAdapter<S> {
    inner: SseEventStream<S>,
    done: bool,
}

impl<S> ChatStreamAdapter<S> {
    fn new(inner: SseEventStream<S>) -> Self {
        Self { inner, done: false }
    }
}

impl<S> Stream for ChatStreamAdapter<S>
where
    S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<StreamEvent, LLMError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    let data = event.data;
                    if data.is_empty() {
                        continue;
                    }

                    if data == "[DONE]" {
                        self.done = true;
                        return Poll::Ready(Some(Ok(StreamEvent::Done)));
                    }

                    match serde_json::from_str::<StreamChunk>(&data) {
                        Ok(chunk) => {
                            if let Some(choice) = chunk.choices.first() {
                                if let Some(ref content) = choice.delta.content {
                                    if !content.is_empty() {
                                        return Poll::Ready(Some(Ok(StreamEvent::Token(
                                            content.clone(),
                                        ))));
                                    }
                                }
                            }
                            // Skip chunks without content (role preludes etc).
                        }
                        Err(e) => {
                            tracing::debug!(data = %data, error = %e, "failed to parse SSE chunk");
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(LLMError::Unavailable(e))));
                }
                Poll::Ready(None) => {
                    // Upstream closed without [DONE]; treat as completion.
                    self.done = true;
                    return Poll::Ready(Some(Ok(StreamEvent::Done)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Provider SSE stream chunk.
#[derive(serde::Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(serde::Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(serde::Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
