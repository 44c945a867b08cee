//! Incremental parsing of `data: `-framed chat-completion streams.
//!
//! The provider sends one event per line: blank lines separate events, a
//! `data: ` marker prefixes the payload, and the literal `[DONE]` ends the
//! stream. Every other non-blank line must decode as a chunk object; anything
//! that does not is reported as a protocol error rather than skipped.

use std::pin::Pin;

use async_stream::stream;
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    types::{ApiErrorBody, StreamFragment, StreamOutcome},
};

/// End-of-stream sentinel
pub const DONE_SENTINEL: &str = "[DONE]";
/// Marker in front of every event payload
pub const DATA_PREFIX: &str = "data: ";

/// Raw response body delivered incrementally by a transport
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Events emitted while consuming a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A non-empty piece of assistant text
    Fragment(StreamFragment),
    /// The single terminal outcome; always the last event
    Finished(StreamOutcome),
}

/// Reassembles newline-terminated lines from arbitrary byte chunks.
///
/// Bytes are buffered until a full line is available so characters split
/// across chunks decode intact.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk from the source
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Take the next complete line, without its terminator
    pub fn next_line(&mut self) -> Option<Result<String>> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(decode_line(line))
    }

    /// Take whatever is left once the source is exhausted
    pub fn finish(&mut self) -> Option<Result<String>> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buffer);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(decode_line(line))
    }
}

fn decode_line(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|e| Error::protocol(format!("invalid UTF-8 in stream: {}", e)))
}

/// What the parser made of one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineAction {
    /// Nothing to emit
    Skip,
    /// Emit and accumulate this fragment
    Fragment(StreamFragment),
    /// Stop reading; this is the outcome
    Finish(StreamOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ParserState {
    #[default]
    Streaming,
    Completed,
    Failed,
}

/// Line-level state machine for one streamed response
#[derive(Debug, Default)]
pub struct StreamParser {
    state: ParserState,
    accumulated: String,
    fragments: usize,
    finish_reason: Option<String>,
    outcome: Option<StreamOutcome>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal outcome has been produced
    pub fn is_finished(&self) -> bool {
        self.state != ParserState::Streaming
    }

    /// Text accumulated so far
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Interpret one line (terminator already removed).
    ///
    /// Lines offered after a terminal outcome are ignored.
    pub fn process_line(&mut self, line: &str) -> LineAction {
        if self.is_finished() {
            tracing::warn!("line offered after stream reached a terminal state; ignoring");
            return LineAction::Skip;
        }

        let line = line.trim();
        if line.is_empty() {
            return LineAction::Skip;
        }

        // Only the exact marker is stripped; anything else must decode as-is
        let payload = match line.strip_prefix(DATA_PREFIX) {
            Some(rest) => rest.trim(),
            None => line,
        };
        tracing::trace!(payload, "stream line");

        if payload == DONE_SENTINEL {
            return LineAction::Finish(self.complete());
        }

        let chunk: StreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => return LineAction::Finish(self.fail(format!("malformed chunk: {}", e))),
        };
        tracing::trace!(
            id = ?chunk.id,
            object = ?chunk.object,
            created = ?chunk.created,
            model = ?chunk.model,
            choices = chunk.choices.len(),
            "decoded chunk"
        );

        if let Some(error) = chunk.error {
            let (code, message) = (error.code(), error.message());
            tracing::debug!(%code, %message, "in-band API error");
            let outcome = StreamOutcome::ApiError { code, message };
            return LineAction::Finish(self.finish(ParserState::Failed, outcome));
        }

        // Keep-alive chunks carry an empty choice list
        let Some(choice) = chunk.choices.into_iter().next() else {
            return LineAction::Skip;
        };
        tracing::trace!(index = ?choice.index, "first choice");
        if choice.finish_reason.is_some() {
            self.finish_reason = choice.finish_reason;
        }

        // Only `delta` is read here; a `message` object belongs to the
        // non-streaming shape and is ignored.
        match choice.delta.and_then(|d| d.content) {
            Some(text) if !text.is_empty() => {
                self.accumulated.push_str(&text);
                let fragment = StreamFragment {
                    index: self.fragments,
                    text,
                };
                self.fragments += 1;
                LineAction::Fragment(fragment)
            }
            _ => LineAction::Skip,
        }
    }

    /// The source ran out. Succeeds only if the sentinel was already seen;
    /// an earlier terminal outcome is returned unchanged.
    pub fn end_of_source(&mut self) -> StreamOutcome {
        match &self.outcome {
            Some(outcome) => outcome.clone(),
            None => self.fail(format!("stream ended before {}", DONE_SENTINEL)),
        }
    }

    /// Force the parser into the failed state
    pub(crate) fn fail(&mut self, reason: impl Into<String>) -> StreamOutcome {
        let reason = reason.into();
        tracing::debug!(%reason, fragments = self.fragments, "stream failed");
        self.finish(ParserState::Failed, StreamOutcome::ProtocolError { reason })
    }

    fn complete(&mut self) -> StreamOutcome {
        tracing::debug!(
            fragments = self.fragments,
            chars = self.accumulated.chars().count(),
            "stream completed"
        );
        let outcome = StreamOutcome::Completed {
            accumulated_text: self.accumulated.clone(),
            finish_reason: self.finish_reason.clone(),
        };
        self.finish(ParserState::Completed, outcome)
    }

    fn finish(&mut self, state: ParserState, outcome: StreamOutcome) -> StreamOutcome {
        self.state = state;
        self.outcome = Some(outcome.clone());
        outcome
    }
}

/// Turn a byte stream into fragment events followed by exactly one outcome.
///
/// Transport failures while reading surface as `Err` items. Nothing is read
/// from `source` after the outcome; dropping the returned stream drops the
/// source and with it the connection.
pub fn events(mut source: ByteStream) -> impl Stream<Item = Result<StreamEvent>> + Send {
    stream! {
        let mut decoder = LineDecoder::new();
        let mut parser = StreamParser::new();

        loop {
            while let Some(line) = decoder.next_line() {
                let action = match line {
                    Ok(line) => parser.process_line(&line),
                    Err(e) => LineAction::Finish(parser.fail(e.to_string())),
                };
                match action {
                    LineAction::Skip => {}
                    LineAction::Fragment(fragment) => yield Ok(StreamEvent::Fragment(fragment)),
                    LineAction::Finish(outcome) => {
                        yield Ok(StreamEvent::Finished(outcome));
                        return;
                    }
                }
            }

            match source.next().await {
                Some(Ok(bytes)) => decoder.push(&bytes),
                Some(Err(e)) => {
                    tracing::debug!("transport error mid-stream: {}", e);
                    yield Err(e);
                    return;
                }
                None => {
                    if let Some(line) = decoder.finish() {
                        let action = match line {
                            Ok(line) => parser.process_line(&line),
                            Err(e) => LineAction::Finish(parser.fail(e.to_string())),
                        };
                        match action {
                            LineAction::Skip => {}
                            LineAction::Fragment(fragment) => {
                                yield Ok(StreamEvent::Fragment(fragment))
                            }
                            LineAction::Finish(outcome) => {
                                yield Ok(StreamEvent::Finished(outcome));
                                return;
                            }
                        }
                    }
                    yield Ok(StreamEvent::Finished(parser.end_of_source()));
                    return;
                }
            }
        }
    }
}

/// Consume a streamed response, calling `on_fragment` for each fragment in
/// arrival order, and return its outcome.
pub async fn consume<F>(
    source: ByteStream,
    mut on_fragment: F,
    cancel: &CancellationToken,
) -> Result<StreamOutcome>
where
    F: FnMut(&StreamFragment),
{
    let events = events(source);
    futures::pin_mut!(events);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("stream consumption cancelled");
                return Err(Error::Cancelled);
            }
            next = events.next() => next,
        };

        match next {
            Some(Ok(StreamEvent::Fragment(fragment))) => on_fragment(&fragment),
            Some(Ok(StreamEvent::Finished(outcome))) => return Ok(outcome),
            Some(Err(e)) => return Err(e),
            None => {
                return Ok(StreamOutcome::ProtocolError {
                    reason: "event stream ended without an outcome".to_string(),
                });
            }
        }
    }
}

// Streaming chunk schema. Absent fields decode to `None`, so an absent
// `content` is distinguishable from an empty one.

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    object: Option<String>,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
