// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock chat backend for testing
//!
//! Replays scripted completions and chunk sequences in order and records
//! every request it receives, so service tests run without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{ParleyError, Result};
use crate::llm::backend::{ChatBackend, Completion};
use crate::llm::cancel::CancelScope;
use crate::llm::stream::{ChunkSource, ReplaySource, StreamChunk};
use crate::llm::wire::ChatRequest;

/// One scripted outcome
#[derive(Debug)]
pub enum MockReply {
    Complete(Completion),
    Stream {
        chunks: Vec<StreamChunk>,
        error: Option<ParleyError>,
    },
    Fail(ParleyError),
}

/// A scripted backend
#[derive(Clone, Default)]
pub struct MockBackend {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    call_count: Arc<AtomicUsize>,
    recorded_requests: Arc<Mutex<Vec<ChatRequest>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text completion
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.push(MockReply::Complete(Completion::text(text)))
    }

    /// Queue an arbitrary completion
    pub fn with_completion(self, completion: Completion) -> Self {
        self.push(MockReply::Complete(completion))
    }

    /// Queue a stream that ends cleanly after `chunks`
    pub fn with_stream(self, chunks: Vec<StreamChunk>) -> Self {
        self.push(MockReply::Stream {
            chunks,
            error: None,
        })
    }

    /// Queue a stream that fails after `chunks`
    pub fn with_failing_stream(self, chunks: Vec<StreamChunk>, error: ParleyError) -> Self {
        self.push(MockReply::Stream {
            chunks,
            error: Some(error),
        })
    }

    /// Queue an error returned before any response
    pub fn with_error(self, error: ParleyError) -> Self {
        self.push(MockReply::Fail(error))
    }

    fn push(self, reply: MockReply) -> Self {
        lock(&self.replies).push_back(reply);
        self
    }

    /// Number of calls made to the backend
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests received so far
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        lock(&self.recorded_requests).clone()
    }

    /// The most recent request
    pub fn last_request(&self) -> Option<ChatRequest> {
        lock(&self.recorded_requests).last().cloned()
    }

    fn next_reply(&self, request: &ChatRequest) -> Result<MockReply> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.recorded_requests).push(request.clone());
        lock(&self.replies)
            .pop_front()
            .ok_or_else(|| ParleyError::InvalidInput("mock backend has no scripted reply".to_string()))
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn complete(&self, request: &ChatRequest, scope: &CancelScope) -> Result<Completion> {
        scope.check()?;
        match self.next_reply(request)? {
            MockReply::Complete(completion) => Ok(completion),
            MockReply::Fail(error) => Err(error),
            MockReply::Stream { chunks, .. } => {
                let text: String = chunks.iter().filter_map(|c| c.text.as_deref()).collect();
                Ok(Completion::text(text))
            }
        }
    }

    async fn open_stream(
        &self,
        request: &ChatRequest,
        scope: &CancelScope,
    ) -> Result<Box<dyn ChunkSource>> {
        scope.check()?;
        match self.next_reply(request)? {
            MockReply::Stream { chunks, error } => {
                let mut source = ReplaySource::new(chunks).with_scope(scope.clone());
                if let Some(error) = error {
                    source = source.failing_with(error);
                }
                Ok(Box::new(source))
            }
            MockReply::Complete(completion) => {
                let mut chunks = vec![StreamChunk::text(completion.text)];
                if let Some(reason) = completion.finish_reason {
                    chunks.push(StreamChunk::finish(reason));
                }
                Ok(Box::new(ReplaySource::new(chunks).with_scope(scope.clone())))
            }
            MockReply::Fail(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::llm::message::Message;

    fn request() -> ChatRequest {
        ChatRequest::new("mock-model", &[Message::user("hi")], 16)
    }

    #[tokio::test]
    async fn test_replies_in_order_and_records_requests() {
        let backend = MockBackend::new()
            .with_response("first")
            .with_error(ParleyError::Api(ApiError::EmptyResponse));
        let scope = CancelScope::new();

        let first = backend.complete(&request(), &scope).await.unwrap();
        assert_eq!(first.text, "first");
        assert!(backend.complete(&request(), &scope).await.is_err());
        assert!(backend.complete(&request(), &scope).await.is_err());

        assert_eq!(backend.call_count(), 3);
        assert_eq!(backend.recorded_requests().len(), 3);
        assert_eq!(backend.last_request().unwrap().model, "mock-model");
    }

    #[tokio::test]
    async fn test_stream_reply() {
        let backend = MockBackend::new().with_stream(vec![
            StreamChunk::text("a"),
            StreamChunk::text("b"),
        ]);
        let mut source = backend
            .open_stream(&request(), &CancelScope::new())
            .await
            .unwrap();

        assert_eq!(source.recv().await.unwrap(), Some(StreamChunk::text("a")));
        assert_eq!(source.recv().await.unwrap(), Some(StreamChunk::text("b")));
        assert_eq!(source.recv().await.unwrap(), None);
    }
}
