//! Shared test helpers for orchestrator tests.

use std::sync::Mutex;

use async_trait::async_trait;
use lorebook_core::error::{ProviderError, RetrievalError, TranscriptError};
use lorebook_core::message::{ConversationId, Message};
use lorebook_core::provider::{
    CompletionProvider, CompletionRequest, CompletionResponse, EmbeddingRequest,
    EmbeddingResponse, StreamChunk, Usage,
};
use lorebook_core::retrieval::{VectorHit, VectorIndex};

/// A mock provider with a scripted reply.
///
/// Records every completion request so tests can assert on the assembled
/// payload. Failure modes are toggled per concern.
pub struct MockProvider {
    pub reply: String,
    pub fail_complete: bool,
    pub fail_embed: bool,
    pub hang_embed: bool,
    pub stream_chunks: Mutex<Vec<Result<StreamChunk, ProviderError>>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.into(),
            fail_complete: false,
            fail_embed: false,
            hang_embed: false,
            stream_chunks: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_completion() -> Self {
        Self {
            fail_complete: true,
            ..Self::replying("")
        }
    }

    pub fn failing_embedding() -> Self {
        Self {
            fail_embed: true,
            ..Self::replying("")
        }
    }

    /// Script the chunks `stream()` will yield.
    pub fn with_stream(mut self, chunks: Vec<Result<StreamChunk, ProviderError>>) -> Self {
        self.stream_chunks = Mutex::new(chunks);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail_complete {
            return Err(ProviderError::ApiError {
                status_code: 500,
                message: "mock completion failure".into(),
            });
        }
        Ok(CompletionResponse {
            message: Message::assistant(self.reply.clone()),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: request.model,
        })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> Result<
        tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        self.requests.lock().unwrap().push(request);
        let chunks = std::mem::take(&mut *self.stream_chunks.lock().unwrap());
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, ProviderError> {
        if self.hang_embed {
            futures_never().await;
        }
        if self.fail_embed {
            return Err(ProviderError::Network("mock embedding failure".into()));
        }
        Ok(EmbeddingResponse {
            embeddings: vec![vec![0.5; 8]],
            model: request.model,
            usage: None,
        })
    }
}

/// A future that never resolves (for timeout tests).
async fn futures_never() {
    std::future::pending::<()>().await
}

/// A mock vector index with scripted hits.
pub struct MockIndex {
    pub hits: Vec<VectorHit>,
    pub fail: bool,
}

impl MockIndex {
    pub fn with_answers(answers: &[&str]) -> Self {
        Self {
            hits: answers
                .iter()
                .enumerate()
                .map(|(i, a)| VectorHit {
                    score: 0.9 - i as f32 * 0.1,
                    text: String::new(),
                    metadata: serde_json::json!({"answer": a}),
                })
                .collect(),
            fail: false,
        }
    }

    pub fn empty() -> Self {
        Self { hits: vec![], fail: false }
    }

    pub fn unreachable() -> Self {
        Self { hits: vec![], fail: true }
    }
}

#[async_trait]
impl VectorIndex for MockIndex {
    fn name(&self) -> &str {
        "mock"
    }

    async fn search(
        &self,
        _collection: &str,
        _vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>, RetrievalError> {
        if self.fail {
            return Err(RetrievalError::Search("mock index unreachable".into()));
        }
        Ok(self.hits.iter().take(top_k).cloned().collect())
    }
}

/// An in-memory transcript log for asserting on audit writes.
#[derive(Default)]
pub struct MemoryTranscript {
    pub entries: Mutex<Vec<(String, Message)>>,
}

#[async_trait]
impl crate::transcript::TranscriptLog for MemoryTranscript {
    async fn append(
        &self,
        id: &ConversationId,
        message: &Message,
    ) -> Result<(), TranscriptError> {
        self.entries
            .lock()
            .unwrap()
            .push((id.as_str().to_string(), message.clone()));
        Ok(())
    }

    async fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, TranscriptError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(cid, _)| cid == id.as_str())
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn conversations(&self) -> Result<Vec<String>, TranscriptError> {
        let mut ids: Vec<String> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(cid, _)| cid.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
