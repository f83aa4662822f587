use std::error::Error;
use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use memchr::memchr;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::ChatResponse;
use crate::core::message::StreamFragment;
use crate::core::request::PreparedRequest;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamFragment, StreamError>> + Send>>;

/// Transport-level failures that end a stream.
#[derive(Debug)]
pub enum StreamError {
    /// The provider answered with a non-success status.
    Status { status: u16, body: Option<String> },
    /// The connection failed before or while reading the body.
    Transport(Box<dyn Error + Send + Sync>),
    /// The turn was cancelled before the response arrived.
    Cancelled,
}

impl StreamError {
    pub fn status(&self) -> Option<u16> {
        match self {
            StreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Status { status, body } => {
                write!(f, "API request failed with status {status}")?;
                if let Some(body) = body {
                    write!(f, ": {body}")?;
                }
                Ok(())
            }
            StreamError::Transport(err) => write!(f, "Connection error: {err}"),
            StreamError::Cancelled => f.write_str("Request cancelled"),
        }
    }
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StreamError::Transport(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// Reassembles newline-terminated lines from arbitrarily split byte chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete line without its terminator. Lines that are not valid
    /// UTF-8 are dropped.
    pub fn next_line(&mut self) -> Option<String> {
        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            let mut line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            match String::from_utf8(line) {
                Ok(text) => return Some(text),
                Err(err) => debug!(error = %err, "skipping line with invalid UTF-8"),
            }
        }
        None
    }

    /// Treat whatever is buffered as a final line once the input has ended.
    pub fn terminate(&mut self) {
        if !self.buffer.is_empty() && self.buffer.last() != Some(&b'\n') {
            self.buffer.push(b'\n');
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Decode one stream line into a fragment, if it carries one.
///
/// Blank lines, non-`data:` lines, `[DONE]`, and payloads that fail to parse
/// all yield `None`. Reasoning text is kept only for reasoning models.
pub fn decode_line(line: &str, supports_reasoning: bool) -> Option<StreamFragment> {
    if line.trim().is_empty() {
        return None;
    }
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();
    if payload.is_empty() || payload == DONE_SENTINEL {
        return None;
    }

    let response = match serde_json::from_str::<ChatResponse>(payload) {
        Ok(response) => response,
        Err(err) => {
            let preview: String = payload.chars().take(50).collect();
            debug!(error = %err, preview = %preview, "skipping malformed frame");
            return None;
        }
    };

    let delta = response.choices.into_iter().next()?.delta;
    let content = delta.content.filter(|text| !text.is_empty());
    let reasoning = delta
        .reasoning_content
        .filter(|text| supports_reasoning && !text.is_empty());

    if content.is_none() && reasoning.is_none() {
        return None;
    }

    Some(StreamFragment {
        content_delta: content.unwrap_or_default(),
        reasoning_delta: reasoning,
    })
}

struct DecodeState<S> {
    inner: Pin<Box<S>>,
    lines: LineBuffer,
    supports_reasoning: bool,
    finished: bool,
}

/// Turn a body byte stream into a lazy stream of fragments.
///
/// The returned stream ends when the body ends, or right after yielding the
/// first transport error.
pub fn decode<S, E>(
    byte_stream: S,
    supports_reasoning: bool,
) -> impl Stream<Item = Result<StreamFragment, StreamError>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Error + Send + Sync + 'static,
{
    let state = DecodeState {
        inner: Box::pin(byte_stream),
        lines: LineBuffer::new(),
        supports_reasoning,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.lines.next_line() {
                if let Some(fragment) = decode_line(&line, state.supports_reasoning) {
                    return Some((Ok(fragment), state));
                }
                continue;
            }

            if state.finished {
                return None;
            }

            match state.inner.next().await {
                Some(Ok(chunk)) => state.lines.push(&chunk),
                Some(Err(err)) => {
                    state.finished = true;
                    state.lines.clear();
                    return Some((Err(StreamError::Transport(Box::new(err))), state));
                }
                None => {
                    state.finished = true;
                    state.lines.terminate();
                }
            }
        }
    })
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value
                .get("error")
                .and_then(|v| v.as_str().map(str::to_owned))
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Condense an error response body into one line.
fn summarize_error_body(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&json_value).filter(|s| !s.is_empty()) {
            return Some(summary);
        }
    }

    Some(trimmed.to_string())
}

/// Send the request and, on a success status, return its decoded fragments.
///
/// Once `cancel` fires, the returned stream stops yielding.
pub async fn open_stream(
    client: &reqwest::Client,
    request: PreparedRequest,
    supports_reasoning: bool,
    cancel: CancellationToken,
) -> Result<FragmentStream, StreamError> {
    let send = request.into_http(client).send();
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(StreamError::Cancelled),
        result = send => result.map_err(|err| StreamError::Transport(Box::new(err)))?,
    };

    let status = response.status();
    if !status.is_success() {
        let body = match response.text().await {
            Ok(text) => summarize_error_body(&text),
            Err(err) => {
                debug!(error = %err, "could not read error response body");
                None
            }
        };
        return Err(StreamError::Status {
            status: status.as_u16(),
            body,
        });
    }

    debug!(status = status.as_u16(), "response stream opened");
    let fragments = decode(response.bytes_stream(), supports_reasoning)
        .take_until(cancel.cancelled_owned());
    Ok(Box::pin(fragments))
}
