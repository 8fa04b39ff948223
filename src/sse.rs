//! Server-Sent Events parser.
//!
//! Turns a raw byte stream into parsed SSE events. Handles `data:` and
//! `event:` fields, comment lines, and events split across chunk boundaries.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

/// A single parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// Optional event name from an `event:` field.
    pub event: Option<String>,
    /// Data payload, multiple `data:` lines joined with newlines.
    pub data: String,
}

/// Adapter that parses a byte stream into SSE events.
///
/// An event is dispatched on each blank line, per the SSE framing rules.
/// Incomplete trailing data (no final blank line) is dispatched when the
/// underlying stream ends.
pub struct SseEventStream<S> {
    inner: S,
    buffer: Vec<u8>,
    pending: SseEvent,
    has_data: bool,
    done: bool,
}

impl<S> SseEventStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            pending: SseEvent::default(),
            has_data: false,
            done: false,
        }
    }

    /// Consume one field line. Returns a complete event on a blank line.
    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.has_data {
                self.has_data = false;
                return Some(std::mem::take(&mut self.pending));
            }
            // Blank line with no accumulated data resets the event name only.
            self.pending = SseEvent::default();
            return None;
        }

        if line.starts_with(':') {
            // Comment (keep-alive), ignore.
            return None;
        }

        if let Some(value) = field_value(line, "data") {
            if self.has_data {
                self.pending.data.push('\n');
            }
            self.pending.data.push_str(value);
            self.has_data = true;
        } else if let Some(value) = field_value(line, "event") {
            self.pending.event = Some(value.to_string());
        }
        // Other fields (id, retry) are not needed here.

        None
    }

    /// Pop the next complete line from the buffer, if any.
    fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop(); // trailing \n
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Extract the value of `<field>:` from a line, trimming one leading space.
fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?;
    let rest = rest.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

impl<S> Stream for SseEventStream<S>
where
    S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<SseEvent, reqwest::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            // Drain complete lines before reading more bytes.
            while let Some(line) = self.next_line() {
                if let Some(event) = self.process_line(&line) {
                    return Poll::Ready(Some(Ok(event)));
                }
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.done = true;

                    // Flush a final unterminated line and any pending event.
                    if !self.buffer.is_empty() {
                        let line = String::from_utf8_lossy(&std::mem::take(&mut self.buffer))
                            .into_owned();
                        let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
                        if let Some(event) = self.process_line(&line) {
                            return Poll::Ready(Some(Ok(event)));
                        }
                    }
                    if self.has_data {
                        self.has_data = false;
                        return Poll::Ready(Some(Ok(std::mem::take(&mut self.pending))));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
