//! The model-call collaborator boundary.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use fc_core::{ChatMessage, SynthError};
use tokio::sync::mpsc;

/// One increment of a streaming response: the new delta plus the full
/// accumulated text so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub delta: String,
    pub accumulated: String,
}

/// Transport to the completion provider. The only shapes the pipeline
/// depends on: a buffered call and a chunked stream.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn call(&self, messages: &[ChatMessage]) -> Result<String, SynthError>;

    /// Stream a response, emitting chunks as they arrive, and return the
    /// final accumulated text.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        chunks: mpsc::Sender<StreamChunk>,
    ) -> Result<String, SynthError>;
}

/// In-process transport that replays pre-recorded responses, chunked to
/// simulate token streaming. Used by tests and the CLI `synthesize` command.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
    chunk_size: usize,
    chunk_delay: Duration,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new(responses: impl IntoIterator<Item = String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            chunk_size: 16,
            chunk_delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Every message sequence this transport has been asked to send, in
    /// order, across both `call` and `stream`.
    #[must_use]
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn next_response(&self, messages: &[ChatMessage]) -> Result<String, SynthError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front())
            .ok_or_else(|| SynthError::transport("scripted transport has no response left"))
    }
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    async fn call(&self, messages: &[ChatMessage]) -> Result<String, SynthError> {
        self.next_response(messages)
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        chunks: mpsc::Sender<StreamChunk>,
    ) -> Result<String, SynthError> {
        let response = self.next_response(messages)?;
        let mut accumulated = String::with_capacity(response.len());
        let mut delta = String::new();
        let mut count = 0usize;
        for ch in response.chars() {
            delta.push(ch);
            count += 1;
            if count == self.chunk_size {
                accumulated.push_str(&delta);
                let chunk = StreamChunk {
                    delta: std::mem::take(&mut delta),
                    accumulated: accumulated.clone(),
                };
                // The receiver hanging up is not a transport failure.
                if chunks.send(chunk).await.is_err() {
                    return Ok(response);
                }
                count = 0;
                if !self.chunk_delay.is_zero() {
                    tokio::time::sleep(self.chunk_delay).await;
                }
            }
        }
        if !delta.is_empty() {
            accumulated.push_str(&delta);
            let _ = chunks
                .send(StreamChunk {
                    delta,
                    accumulated: accumulated.clone(),
                })
                .await;
        }
        Ok(response)
    }
}
