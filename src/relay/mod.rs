//! SSE relay between the chat upstream and the client.
//!
//! The relay consumes the adapted upstream stream, runs every text
//! fragment through the emoji diversifier, and forwards wire frames:
//! `{"content": "...", "done": false}` per fragment, then exactly one
//! terminal frame, `{"done": true}` on success or `{"error": "..."}` on
//! failure. The full diversified text is accumulated and handed to a
//! background persistence task exactly once, whether the stream ends
//! normally or the client disconnects mid-stream.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::response::sse::Event;
use futures::Stream;
use rand::Rng;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_stream::Elapsed;
use tracing::{debug, warn};

use crate::background::BackgroundTasks;
use crate::diversify::EmojiDiversifier;
use crate::llm::{ChatStream, LLMError, StreamEvent};
use crate::persist::{NewMessage, PersistClient};

// ============================================================================
// Wire Frames
// ============================================================================

/// A single frame on the client-facing SSE wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Content(String),
    Done,
    Error(String),
}

#[derive(Serialize)]
struct ContentFrame<'a> {
    content: &'a str,
    done: bool,
}

#[derive(Serialize)]
struct DoneFrame {
    done: bool,
}

#[derive(Serialize)]
struct ErrorFrame<'a> {
    error: &'a str,
}

impl Frame {
    pub fn to_json(&self) -> String {
        let serialized = match self {
            Frame::Content(content) => serde_json::to_string(&ContentFrame {
                content,
                done: false,
            }),
            Frame::Done => serde_json::to_string(&DoneFrame { done: true }),
            Frame::Error(error) => serde_json::to_string(&ErrorFrame { error }),
        };
        // Plain string fields cannot fail to serialize.
        serialized.unwrap_or_else(|_| String::from("{}"))
    }

    fn to_event(&self) -> Event {
        Event::default().data(self.to_json())
    }
}

// ============================================================================
// Relay Stream
// ============================================================================

/// Destination for the accumulated assistant message.
pub struct MessageSink {
    pub conversation_id: i64,
    pub model_version: String,
}

type TimedChatStream =
    Pin<Box<dyn Stream<Item = Result<Result<StreamEvent, LLMError>, Elapsed>> + Send>>;

/// Yields [`Frame`]s until one terminal frame has been emitted.
///
/// The persistence handoff fires from `Drop` as well, so a client that
/// walks away mid-stream still gets its partial message saved.
pub struct RelayStream<R = StdRng> {
    inner: TimedChatStream,
    diversifier: EmojiDiversifier<R>,
    accumulated: String,
    finisher: Option<oneshot::Sender<String>>,
    finished: bool,
}

impl RelayStream<StdRng> {
    pub fn new(stream: ChatStream, idle_timeout: Duration) -> Self {
        Self::with_diversifier(stream, idle_timeout, EmojiDiversifier::new())
    }
}

impl<R: Rng + Unpin> RelayStream<R> {
    pub fn with_diversifier(
        stream: ChatStream,
        idle_timeout: Duration,
        diversifier: EmojiDiversifier<R>,
    ) -> Self {
        Self {
            inner: Box::pin(tokio_stream::StreamExt::timeout(stream, idle_timeout)),
            diversifier,
            accumulated: String::new(),
            finisher: None,
            finished: false,
        }
    }

    /// Arrange for the accumulated text to be saved as an assistant
    /// message once the stream finishes or is dropped. Nothing is saved
    /// when no content was relayed.
    pub fn persist_to(
        mut self,
        background: &BackgroundTasks,
        persist: PersistClient,
        sink: MessageSink,
    ) -> Self {
        let (tx, rx) = oneshot::channel::<String>();
        self.finisher = Some(tx);

        background.spawn(async move {
            let Ok(content) = rx.await else {
                return;
            };
            if content.is_empty() {
                return;
            }
            let message = NewMessage {
                role: "assistant".into(),
                content: content.clone(),
                token_usage: Some(content.split_whitespace().count() as u64),
                model_version: Some(sink.model_version),
                metadata: None,
            };
            if let Err(e) = persist.save_message(sink.conversation_id, &message).await {
                warn!(conversation_id = sink.conversation_id, error = %e,
                    "failed to persist assistant message");
            }
        });
        self
    }

    /// Adapt to the `Result<Event, _>` item type axum's SSE response
    /// expects.
    pub fn into_sse(self) -> impl Stream<Item = Result<Event, Infallible>> + Send
    where
        R: Send + 'static,
    {
        futures::StreamExt::map(self, |frame| Ok::<_, Infallible>(frame.to_event()))
    }

    fn finish(&mut self) {
        if let Some(tx) = self.finisher.take() {
            let _ = tx.send(std::mem::take(&mut self.accumulated));
        }
    }

    fn terminal(&mut self, frame: Frame) -> Frame {
        self.finished = true;
        self.finish();
        frame
    }
}

impl<R: Rng + Unpin> Stream for RelayStream<R> {
    type Item = Frame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(Ok(StreamEvent::Token(text))))) => {
                    let text = this.diversifier.apply(&text);
                    if text.is_empty() {
                        continue;
                    }
                    this.accumulated.push_str(&text);
                    return Poll::Ready(Some(Frame::Content(text)));
                }
                Poll::Ready(Some(Ok(Ok(StreamEvent::Done)))) => {
                    debug!(chars = this.accumulated.len(), "relay stream complete");
                    return Poll::Ready(Some(this.terminal(Frame::Done)));
                }
                Poll::Ready(Some(Ok(Err(e)))) => {
                    warn!(error = %e, "upstream error mid-stream");
                    let frame = Frame::Error(e.to_string());
                    return Poll::Ready(Some(this.terminal(frame)));
                }
                Poll::Ready(Some(Err(_elapsed))) => {
                    warn!("upstream idle timeout");
                    let frame = Frame::Error("upstream idle timeout".into());
                    return Poll::Ready(Some(this.terminal(frame)));
                }
                // Adapter always emits Done, but guard against a bare end.
                Poll::Ready(None) => {
                    return Poll::Ready(Some(this.terminal(Frame::Done)));
                }
            }
        }
    }
}

impl<R> Drop for RelayStream<R> {
    fn drop(&mut self) {
        if let Some(tx) = self.finisher.take() {
            let _ = tx.send(std::mem::take(&mut self.accumulated));
        }
    }
}

/// A one-frame SSE stream for failures that happen before the upstream
/// stream exists, such as a rejected connection attempt.
pub fn error_stream(message: impl Into<String>) -> impl Stream<Item = Result<Event, Infallible>> {
    let frame = Frame::Error(message.into());
    futures::stream::once(async move { Ok::<_, Infallible>(frame.to_event()) })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::routing::post;
    use axum::{Json, Router};
    use futures::StreamExt;
    use rand::SeedableRng;
    use serde_json::{Value, json};
    use tokio::sync::Mutex;

    use crate::diversify::{Emotion, is_emoji};

    fn chat(events: Vec<Result<StreamEvent, LLMError>>) -> ChatStream {
        Box::pin(futures::stream::iter(events))
    }

    fn seeded(history: &[char]) -> EmojiDiversifier<StdRng> {
        let mut d = EmojiDiversifier::with_rng(StdRng::seed_from_u64(7));
        d.seed_history(history.iter().copied());
        d
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<Value>>>);

    async fn capture_persist() -> (PersistClient, Capture) {
        let capture = Capture::default();
        let sink = capture.clone();
        let app = Router::new().route(
            "/api/v1/conversations/{id}/add_message/",
            post(move |Json(body): Json<Value>| {
                let sink = sink.clone();
                async move {
                    sink.0.lock().await.push(body);
                    Json(json!({"ok": true}))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let client =
            PersistClient::new(format!("http://{addr}"), Duration::from_secs(5), None).unwrap();
        (client, capture)
    }

    #[tokio::test]
    async fn repeated_emoji_is_replaced_and_done_follows() {
        let stream = chat(vec![
            Ok(StreamEvent::Token("😊 hi 😊".into())),
            Ok(StreamEvent::Done),
        ]);
        let relay =
            RelayStream::with_diversifier(stream, Duration::from_secs(5), seeded(&['😊']));

        let frames: Vec<Frame> = relay.collect().await;
        assert_eq!(frames.len(), 2);

        let Frame::Content(content) = &frames[0] else {
            panic!("expected content frame, got {:?}", frames[0]);
        };
        let glyphs: Vec<char> = content.chars().filter(|c| is_emoji(*c)).collect();
        assert_eq!(glyphs.len(), 2);
        for glyph in glyphs {
            assert_ne!(glyph, '😊');
            assert!(Emotion::Joy.pool().contains(&glyph));
        }
        assert_eq!(frames[1], Frame::Done);
    }

    #[tokio::test]
    async fn replaying_the_same_upstream_yields_identical_content() {
        let events = || {
            chat(vec![
                Ok(StreamEvent::Token("😊 hello".into())),
                Ok(StreamEvent::Token(" there 😊".into())),
                Ok(StreamEvent::Token(" friend 🎉".into())),
                Ok(StreamEvent::Done),
            ])
        };

        let mut runs = Vec::new();
        for _ in 0..2 {
            let relay = RelayStream::with_diversifier(
                events(),
                Duration::from_secs(5),
                seeded(&['😊', '🎉']),
            );
            let frames: Vec<Frame> = relay.collect().await;
            let content: String = frames
                .iter()
                .filter_map(|f| match f {
                    Frame::Content(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            runs.push(content);
        }

        assert_eq!(runs[0], runs[1]);
        // The run actually rewrote something, so equality is not vacuous.
        assert!(runs[0].chars().any(is_emoji));
        assert_ne!(runs[0], "😊 hello there 😊 friend 🎉");
    }

    #[tokio::test]
    async fn upstream_error_before_content_emits_single_error_frame() {
        let stream = chat(vec![Err(LLMError::Rejected {
            status: 500,
            message: "internal error".into(),
        })]);
        let (persist, capture) = capture_persist().await;
        let background = BackgroundTasks::new();

        let relay = RelayStream::new(stream, Duration::from_secs(5)).persist_to(
            &background,
            persist,
            MessageSink {
                conversation_id: 1,
                model_version: "gpt-4o".into(),
            },
        );

        let frames: Vec<Frame> = relay.collect().await;
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], Frame::Error(m) if m.contains("internal error")));

        // Nothing was relayed, so nothing is saved.
        background.shutdown().await;
        assert!(capture.0.lock().await.is_empty());
    }

    #[tokio::test]
    async fn accumulated_text_is_persisted_once_after_stream_end() {
        let stream = chat(vec![
            Ok(StreamEvent::Token("hello ".into())),
            Ok(StreamEvent::Token("world 😊".into())),
            Ok(StreamEvent::Done),
        ]);
        let (persist, capture) = capture_persist().await;
        let background = BackgroundTasks::new();

        let relay = RelayStream::new(stream, Duration::from_secs(5)).persist_to(
            &background,
            persist,
            MessageSink {
                conversation_id: 42,
                model_version: "gpt-4o".into(),
            },
        );

        let frames: Vec<Frame> = relay.collect().await;
        assert_eq!(frames.last(), Some(&Frame::Done));

        background.shutdown().await;
        let saved = capture.0.lock().await;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0]["role"], "assistant");
        assert_eq!(saved[0]["content"], "hello world 😊");
        assert_eq!(saved[0]["token_usage"], 2);
        assert_eq!(saved[0]["model_version"], "gpt-4o");
    }

    #[tokio::test]
    async fn dropping_mid_stream_persists_partial_content() {
        let stream = chat(vec![
            Ok(StreamEvent::Token("partial".into())),
            Ok(StreamEvent::Token(" never sent".into())),
            Ok(StreamEvent::Done),
        ]);
        let (persist, capture) = capture_persist().await;
        let background = BackgroundTasks::new();

        let mut relay = RelayStream::new(stream, Duration::from_secs(5)).persist_to(
            &background,
            persist,
            MessageSink {
                conversation_id: 7,
                model_version: "gpt-4o".into(),
            },
        );

        // Client reads one frame then disconnects.
        let first = relay.next().await;
        assert!(matches!(first, Some(Frame::Content(ref c)) if c == "partial"));
        drop(relay);

        background.shutdown().await;
        let saved = capture.0.lock().await;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0]["content"], "partial");
    }

    #[tokio::test]
    async fn idle_upstream_yields_error_frame() {
        let stream: ChatStream = Box::pin(
            futures::stream::iter(vec![Ok(StreamEvent::Token("x".into()))])
                .chain(futures::stream::pending()),
        );
        let relay = RelayStream::new(stream, Duration::from_millis(50));

        let frames: Vec<Frame> = relay.collect().await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Frame::Content("x".into()));
        assert!(matches!(&frames[1], Frame::Error(m) if m.contains("idle")));
    }

    #[tokio::test]
    async fn error_stream_emits_one_error_frame() {
        let frames: Vec<_> = error_stream("character not found").collect().await;
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn frame_wire_format() {
        assert_eq!(
            Frame::Content("hi".into()).to_json(),
            r#"{"content":"hi","done":false}"#
        );
        assert_eq!(Frame::Done.to_json(), r#"{"done":true}"#);
        assert_eq!(Frame::Error("boom".into()).to_json(), r#"{"error":"boom"}"#);
    }
}
