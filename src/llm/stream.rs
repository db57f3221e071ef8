// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Server-sent-event stream decoding
//!
//! [`SseDecoder`] turns a chat-completions response body into one
//! [`StreamChunk`] per `data:` frame. [`ReplaySource`] yields a fixed chunk
//! sequence for deterministic tests. Both implement [`ChunkSource`].

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::error::{ApiError, ParleyError, Result};
use crate::llm::cancel::CancelScope;
use crate::llm::tool_calls::ToolCallFragment;
use crate::llm::wire::StreamPayload;

/// Raw response body as a stream of byte buffers
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// One decoded stream frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamChunk {
    /// Text delta, if the frame carried any
    pub text: Option<String>,
    /// Partial tool calls carried by this frame
    pub tool_calls: Vec<ToolCallFragment>,
    pub finish_reason: Option<String>,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn tool_calls(fragments: Vec<ToolCallFragment>) -> Self {
        Self {
            tool_calls: fragments,
            ..Self::default()
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            finish_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    fn from_payload(payload: StreamPayload) -> Self {
        let Some(choice) = payload.choices.into_iter().next() else {
            return Self::default();
        };

        let tool_calls = choice
            .delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let (name, arguments) = match call.function {
                    Some(function) => (function.name, function.arguments),
                    None => (None, None),
                };
                ToolCallFragment {
                    index: call.index,
                    id: call.id,
                    name,
                    arguments,
                }
            })
            .collect();

        Self {
            text: choice.delta.content.filter(|text| !text.is_empty()),
            tool_calls,
            finish_reason: choice.finish_reason,
        }
    }
}

/// A source of stream chunks, consumed by a single reader in arrival order
#[async_trait]
pub trait ChunkSource: Send {
    /// Next chunk, or `None` at end of stream
    async fn recv(&mut self) -> Result<Option<StreamChunk>>;

    /// Release the underlying transport. Idempotent.
    fn close(&mut self);
}

enum Frame {
    Chunk(StreamChunk),
    Done,
    Skip,
}

/// Decode one SSE line
fn decode_line(line: &str) -> Frame {
    if line.is_empty() || line.starts_with(':') {
        return Frame::Skip;
    }

    let Some(data) = line.strip_prefix("data:") else {
        return Frame::Skip;
    };
    let data = data.strip_prefix(' ').unwrap_or(data);

    if data.trim() == "[DONE]" {
        return Frame::Done;
    }

    tracing::trace!(target: "parley.llm.stream", payload = data, "sse frame");

    match serde_json::from_str::<StreamPayload>(data) {
        Ok(payload) => Frame::Chunk(StreamChunk::from_payload(payload)),
        Err(err) => {
            tracing::debug!(
                target: "parley.llm.stream",
                error = %err,
                "skipping malformed stream chunk"
            );
            Frame::Skip
        }
    }
}

/// Longest SSE line accepted before the stream is abandoned
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Decodes an SSE response body into chunks
pub struct SseDecoder {
    body: Option<ByteStream>,
    buffer: Vec<u8>,
    scanned: usize,
    scope: CancelScope,
    eof: bool,
    finished: bool,
}

impl SseDecoder {
    pub fn new(body: ByteStream, scope: CancelScope) -> Self {
        Self {
            body: Some(body),
            buffer: Vec::new(),
            scanned: 0,
            scope,
            eof: false,
            finished: false,
        }
    }

    /// Build a decoder over in-memory byte slices
    pub fn from_parts<I>(parts: I, scope: CancelScope) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
        I::IntoIter: Send + 'static,
    {
        let body = futures::stream::iter(parts.into_iter().map(Ok::<Vec<u8>, ParleyError>));
        Self::new(Box::pin(body), scope)
    }

    /// Pop the next complete line from the buffer. At EOF the remainder
    /// counts as a final line.
    fn next_line(&mut self) -> Option<Vec<u8>> {
        if let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            self.scanned = 0;
            let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Some(line);
        }

        self.scanned = self.buffer.len();

        if self.eof && !self.buffer.is_empty() {
            self.scanned = 0;
            let mut line = std::mem::take(&mut self.buffer);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Some(line);
        }

        None
    }

    fn finish(&mut self) {
        self.finished = true;
        self.close();
    }
}

#[async_trait]
impl ChunkSource for SseDecoder {
    async fn recv(&mut self) -> Result<Option<StreamChunk>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            self.scope.check()?;

            if let Some(line) = self.next_line() {
                let Ok(line) = std::str::from_utf8(&line) else {
                    tracing::debug!(target: "parley.llm.stream", "skipping non-utf8 line");
                    continue;
                };
                match decode_line(line) {
                    Frame::Chunk(chunk) => return Ok(Some(chunk)),
                    Frame::Done => {
                        tracing::debug!(target: "parley.llm.stream", "received [DONE]");
                        self.finish();
                        return Ok(None);
                    }
                    Frame::Skip => continue,
                }
            }

            if self.buffer.len() > MAX_LINE_BYTES {
                self.finish();
                return Err(ParleyError::Api(ApiError::Decode(format!(
                    "stream line exceeds {MAX_LINE_BYTES} bytes"
                ))));
            }

            if self.eof {
                tracing::debug!(target: "parley.llm.stream", "body ended without [DONE]");
                self.finish();
                return Ok(None);
            }

            let Some(body) = self.body.as_mut() else {
                self.eof = true;
                continue;
            };

            let next = tokio::select! {
                biased;
                reason = self.scope.cancelled() => Err(ParleyError::Cancelled(reason)),
                item = body.next() => Ok(item),
            };

            match next {
                Ok(Some(Ok(bytes))) => self.buffer.extend_from_slice(&bytes),
                Ok(Some(Err(err))) => {
                    self.finish();
                    return Err(err);
                }
                Ok(None) => self.eof = true,
                Err(err) => {
                    self.finish();
                    return Err(err);
                }
            }
        }
    }

    fn close(&mut self) {
        self.finished = true;
        if self.body.take().is_some() {
            tracing::debug!(target: "parley.llm.stream", "released stream transport");
        }
    }
}

/// Replays a fixed chunk sequence, optionally ending in an error
#[derive(Debug, Default)]
pub struct ReplaySource {
    chunks: VecDeque<StreamChunk>,
    terminal_error: Option<ParleyError>,
    scope: Option<CancelScope>,
    closed: bool,
    close_count: usize,
}

impl ReplaySource {
    pub fn new(chunks: impl IntoIterator<Item = StreamChunk>) -> Self {
        Self {
            chunks: chunks.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Fail with `error` once the chunks run out
    pub fn failing_with(mut self, error: ParleyError) -> Self {
        self.terminal_error = Some(error);
        self
    }

    /// Honour cancellation of `scope` before each chunk
    pub fn with_scope(mut self, scope: CancelScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// How many times `close` released the source (0 or 1)
    pub fn close_count(&self) -> usize {
        self.close_count
    }
}

#[async_trait]
impl ChunkSource for ReplaySource {
    async fn recv(&mut self) -> Result<Option<StreamChunk>> {
        if self.closed {
            return Ok(None);
        }
        if let Some(scope) = &self.scope {
            scope.check()?;
        }
        if let Some(chunk) = self.chunks.pop_front() {
            return Ok(Some(chunk));
        }
        match self.terminal_error.take() {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.close_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CancelReason;

    fn decoder(body: &str) -> SseDecoder {
        SseDecoder::from_parts(vec![body.as_bytes().to_vec()], CancelScope::new())
    }

    async fn collect(source: &mut dyn ChunkSource) -> Result<Vec<StreamChunk>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = source.recv().await? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    #[tokio::test]
    async fn test_done_after_keepalive_yields_no_chunks() {
        let mut source = decoder(":keep-alive\ndata: [DONE]\n");
        assert!(collect(&mut source).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_text_deltas_in_order() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let chunks = collect(&mut decoder(body)).await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.as_deref(), Some("Hel"));
        assert_eq!(chunks[1].text.as_deref(), Some("lo"));
        assert_eq!(chunks[2].finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_lines_split_across_reads() {
        let parts = vec![
            b"data: {\"choices\":[{\"del".to_vec(),
            b"ta\":{\"content\":\"hi\"}}]}\r".to_vec(),
            b"\ndata: [DO".to_vec(),
            b"NE]\r\n".to_vec(),
        ];
        let mut source = SseDecoder::from_parts(parts, CancelScope::new());
        let chunks = collect(&mut source).await.unwrap();
        assert_eq!(chunks, vec![StreamChunk::text("hi")]);
    }

    #[tokio::test]
    async fn test_skips_malformed_json_comments_and_other_fields() {
        let body = concat!(
            "event: message\n",
            ": comment\n",
            "data: {not json}\n",
            "data:{\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
            "id: 7\n",
        );
        let chunks = collect(&mut decoder(body)).await.unwrap();
        assert_eq!(chunks, vec![StreamChunk::text("ok")]);
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline_is_decoded() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}";
        let chunks = collect(&mut decoder(body)).await.unwrap();
        assert_eq!(chunks, vec![StreamChunk::text("tail")]);
    }

    #[tokio::test]
    async fn test_oversized_line_ends_stream_with_decode_error() {
        let parts = vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n".to_vec(),
            vec![b'x'; MAX_LINE_BYTES / 2],
            vec![b'x'; MAX_LINE_BYTES / 2 + 1],
            b"\ndata: [DONE]\n".to_vec(),
        ];
        let mut source = SseDecoder::from_parts(parts, CancelScope::new());

        assert_eq!(source.recv().await.unwrap(), Some(StreamChunk::text("ok")));
        match source.recv().await {
            Err(ParleyError::Api(ApiError::Decode(message))) => {
                assert!(message.contains("exceeds"));
            }
            other => panic!("expected decode error, got {other:?}"),
        }
        assert_eq!(source.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_line_assembled_from_many_small_reads() {
        let body = b"data: {\"choices\":[{\"delta\":{\"content\":\"slow\"}}]}\n\ndata: [DONE]\n";
        let parts: Vec<Vec<u8>> = body.iter().map(|b| vec![*b]).collect();
        let mut source = SseDecoder::from_parts(parts, CancelScope::new());
        let chunks = collect(&mut source).await.unwrap();
        assert_eq!(chunks, vec![StreamChunk::text("slow")]);
    }

    #[tokio::test]
    async fn test_tool_call_fragments_are_decoded() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",",
            "\"type\":\"function\",\"function\":{\"name\":\"read_file\",\"arguments\":\"\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,",
            "\"function\":{\"arguments\":\"{}\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n",
        );
        let chunks = collect(&mut decoder(body)).await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].tool_calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(chunks[0].tool_calls[0].name.as_deref(), Some("read_file"));
        assert_eq!(chunks[1].tool_calls[0].index, Some(0));
        assert_eq!(chunks[1].tool_calls[0].arguments.as_deref(), Some("{}"));
        assert_eq!(chunks[2].finish_reason.as_deref(), Some("tool_calls"));
    }

    #[tokio::test]
    async fn test_frames_after_done_are_ignored() {
        let body = concat!(
            "data: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        );
        assert!(collect(&mut decoder(body)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_scope_returns_before_reading() {
        let scope = CancelScope::new();
        scope.cancel();
        let mut source = SseDecoder::from_parts(
            vec![b"data: {\"choices\":[]}\n".to_vec()],
            scope,
        );
        assert!(matches!(
            source.recv().await,
            Err(ParleyError::Cancelled(CancelReason::User))
        ));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_pending_read() {
        let scope = CancelScope::new();
        let body: ByteStream = Box::pin(futures::stream::pending::<Result<Vec<u8>>>());
        let mut source = SseDecoder::new(body, scope.clone());

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            scope.cancel();
        });

        assert!(matches!(
            source.recv().await,
            Err(ParleyError::Cancelled(CancelReason::User))
        ));
    }

    #[tokio::test]
    async fn test_transport_error_mid_body_is_surfaced() {
        let parts: Vec<Result<Vec<u8>>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n".to_vec()),
            Err(ParleyError::Api(ApiError::Transport("reset".to_string()))),
        ];
        let mut source = SseDecoder::new(Box::pin(futures::stream::iter(parts)), CancelScope::new());

        assert_eq!(source.recv().await.unwrap(), Some(StreamChunk::text("a")));
        let err = source.recv().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(source.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut source = decoder("data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n");
        source.close();
        source.close();
        assert_eq!(source.recv().await.unwrap(), None);

        let mut replay = ReplaySource::new(vec![StreamChunk::text("x")]);
        replay.close();
        replay.close();
        assert_eq!(replay.close_count(), 1);
        assert_eq!(replay.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_replay_source_ends_with_error() {
        let mut replay = ReplaySource::new(vec![StreamChunk::text("a")])
            .failing_with(ParleyError::Api(ApiError::Transport("gone".to_string())));
        assert_eq!(replay.recv().await.unwrap(), Some(StreamChunk::text("a")));
        assert!(replay.recv().await.is_err());
        assert_eq!(replay.recv().await.unwrap(), None);
    }
}
