//! The conversation orchestrator — one retrieval-augmented chat cycle.
//!
//! Pulls history from the context store, retrieves knowledge, assembles the
//! prompt, calls the completion service, and commits the user/assistant pair
//! back to the store (and transcript) only after a full successful response.
//!
//! Failure semantics: retrieval and completion failures never propagate —
//! they degrade to a reply string naming the failure category, and the store
//! is left untouched. Store failures are programming-error-level and do
//! propagate.

use std::sync::Arc;
use std::time::Duration;

use lorebook_core::error::Result;
use lorebook_core::message::ConversationId;
use lorebook_core::provider::{CompletionProvider, CompletionRequest};
use lorebook_core::retrieval::KnowledgeFragment;
use lorebook_retrieval::KnowledgeRetriever;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::context::ContextStore;
use crate::prompt::{NO_KNOWLEDGE_FALLBACK, PromptAssembler};
use crate::stream_event::ChatStreamEvent;
use crate::transcript::TranscriptLog;

/// Reply when knowledge retrieval errored or timed out.
pub const RETRIEVAL_FAILURE_REPLY: &str =
    "Sorry — knowledge retrieval failed, so this question cannot be answered right now. \
     Please try again later.";

/// Reply when the completion service errored or timed out.
pub const COMPLETION_FAILURE_REPLY: &str =
    "Sorry — the completion service did not produce a reply. Please try again later.";

/// Coordinates one chat cycle per call. Cheap to clone: configuration plus
/// shared handles.
#[derive(Clone)]
pub struct ChatOrchestrator {
    provider: Arc<dyn CompletionProvider>,
    retriever: Arc<KnowledgeRetriever>,
    store: Arc<ContextStore>,
    assembler: PromptAssembler,
    transcript: Option<Arc<dyn TranscriptLog>>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    retrieval_timeout: Duration,
    completion_timeout: Duration,
    reply_without_knowledge: bool,
}

impl ChatOrchestrator {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        retriever: Arc<KnowledgeRetriever>,
        store: Arc<ContextStore>,
        assembler: PromptAssembler,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            provider,
            retriever,
            store,
            assembler,
            transcript: None,
            model: model.into(),
            temperature,
            max_tokens: 1024,
            retrieval_timeout: Duration::from_secs(15),
            completion_timeout: Duration::from_secs(60),
            reply_without_knowledge: true,
        }
    }

    /// Set the max tokens per reply.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the retrieval and completion timeouts.
    pub fn with_timeouts(mut self, retrieval: Duration, completion: Duration) -> Self {
        self.retrieval_timeout = retrieval;
        self.completion_timeout = completion;
        self
    }

    /// Attach the append-only transcript log.
    pub fn with_transcript(mut self, transcript: Arc<dyn TranscriptLog>) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// When false, an empty retrieval skips the model call and replies with
    /// the no-knowledge phrase directly.
    pub fn with_reply_without_knowledge(mut self, enabled: bool) -> Self {
        self.reply_without_knowledge = enabled;
        self
    }

    /// Shared view of the context store (for history endpoints).
    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Shared view of the transcript log, when enabled.
    pub fn transcript(&self) -> Option<&Arc<dyn TranscriptLog>> {
        self.transcript.as_ref()
    }

    /// Run one chat cycle and return the reply.
    ///
    /// The returned string may be a degraded failure-category reply; `Err`
    /// is reserved for store-level faults.
    pub async fn handle(&self, conversation_id: &ConversationId, query: &str) -> Result<String> {
        let history = self.store.history(conversation_id).await?;

        let fragments = match self.retrieve(conversation_id, query).await {
            Ok(fragments) => fragments,
            Err(reply) => return Ok(reply),
        };

        if fragments.is_empty() && !self.reply_without_knowledge {
            debug!(conversation = %conversation_id, "No knowledge found, skipping model call");
            self.commit_turn(conversation_id, query, NO_KNOWLEDGE_FALLBACK).await?;
            return Ok(NO_KNOWLEDGE_FALLBACK.to_string());
        }

        let payload = self.assembler.build(query, &fragments, &history);
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: payload.messages,
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
        };

        let reply = match timeout(self.completion_timeout, self.provider.complete(request)).await
        {
            Ok(Ok(response)) => response.message.content,
            Ok(Err(e)) => {
                warn!(conversation = %conversation_id, error = %e, "Completion failed");
                return Ok(COMPLETION_FAILURE_REPLY.to_string());
            }
            Err(_) => {
                warn!(conversation = %conversation_id, "Completion timed out");
                return Ok(COMPLETION_FAILURE_REPLY.to_string());
            }
        };

        self.commit_turn(conversation_id, query, &reply).await?;

        info!(
            conversation = %conversation_id,
            fragments = fragments.len(),
            reply_chars = reply.chars().count(),
            "Chat cycle complete"
        );

        Ok(reply)
    }

    /// Run one chat cycle, yielding the reply incrementally.
    ///
    /// The store and transcript are updated only after the stream completes;
    /// a mid-stream failure emits one `Error` event and leaves them
    /// untouched.
    pub async fn handle_stream(
        &self,
        conversation_id: &ConversationId,
        query: &str,
    ) -> Result<mpsc::Receiver<ChatStreamEvent>> {
        // Store faults surface before any event is produced.
        let history = self.store.history(conversation_id).await?;

        let (tx, rx) = mpsc::channel(64);
        let this = self.clone();
        let conversation_id = conversation_id.clone();
        let query = query.to_string();

        tokio::spawn(async move {
            let fragments = match this.retrieve(&conversation_id, &query).await {
                Ok(fragments) => fragments,
                Err(reply) => {
                    let _ = tx.send(ChatStreamEvent::Error { message: reply }).await;
                    return;
                }
            };

            if fragments.is_empty() && !this.reply_without_knowledge {
                if this.commit_turn(&conversation_id, &query, NO_KNOWLEDGE_FALLBACK).await.is_err() {
                    return;
                }
                let _ = tx
                    .send(ChatStreamEvent::Done {
                        conversation_id: conversation_id.to_string(),
                        response: NO_KNOWLEDGE_FALLBACK.to_string(),
                        usage: None,
                    })
                    .await;
                return;
            }

            let payload = this.assembler.build(&query, &fragments, &history);
            let request = CompletionRequest {
                model: this.model.clone(),
                messages: payload.messages,
                temperature: this.temperature,
                max_tokens: Some(this.max_tokens),
            };

            let mut chunks = match timeout(this.completion_timeout, this.provider.stream(request))
                .await
            {
                Ok(Ok(chunks)) => chunks,
                Ok(Err(e)) => {
                    warn!(conversation = %conversation_id, error = %e, "Streaming completion failed");
                    let _ = tx
                        .send(ChatStreamEvent::Error {
                            message: COMPLETION_FAILURE_REPLY.to_string(),
                        })
                        .await;
                    return;
                }
                Err(_) => {
                    warn!(conversation = %conversation_id, "Streaming completion timed out");
                    let _ = tx
                        .send(ChatStreamEvent::Error {
                            message: COMPLETION_FAILURE_REPLY.to_string(),
                        })
                        .await;
                    return;
                }
            };

            let mut full = String::new();
            let mut usage = None;

            loop {
                // The completion timeout doubles as the per-chunk idle limit.
                let chunk = match timeout(this.completion_timeout, chunks.recv()).await {
                    Ok(Some(Ok(chunk))) => chunk,
                    Ok(Some(Err(e))) => {
                        warn!(conversation = %conversation_id, error = %e, "Stream interrupted");
                        let _ = tx
                            .send(ChatStreamEvent::Error {
                                message: COMPLETION_FAILURE_REPLY.to_string(),
                            })
                            .await;
                        return;
                    }
                    // Channel closed or idle timeout without a done marker.
                    Ok(None) | Err(_) => {
                        warn!(conversation = %conversation_id, "Stream ended without completion");
                        let _ = tx
                            .send(ChatStreamEvent::Error {
                                message: COMPLETION_FAILURE_REPLY.to_string(),
                            })
                            .await;
                        return;
                    }
                };

                if let Some(content) = chunk.content {
                    full.push_str(&content);
                    if tx.send(ChatStreamEvent::Delta { content }).await.is_err() {
                        // Client went away: abandon without committing the
                        // partial reply.
                        return;
                    }
                }

                if chunk.done {
                    usage = chunk.usage;
                    break;
                }
            }

            if this.commit_turn(&conversation_id, &query, &full).await.is_err() {
                let _ = tx
                    .send(ChatStreamEvent::Error {
                        message: COMPLETION_FAILURE_REPLY.to_string(),
                    })
                    .await;
                return;
            }

            let _ = tx
                .send(ChatStreamEvent::Done {
                    conversation_id: conversation_id.to_string(),
                    response: full,
                    usage,
                })
                .await;
        });

        Ok(rx)
    }

    /// Retrieve knowledge under the retrieval timeout. An `Err` carries the
    /// user-visible degraded reply.
    async fn retrieve(
        &self,
        conversation_id: &ConversationId,
        query: &str,
    ) -> std::result::Result<Vec<KnowledgeFragment>, String> {
        match timeout(self.retrieval_timeout, self.retriever.retrieve(query)).await {
            Ok(Ok(fragments)) => Ok(fragments),
            Ok(Err(e)) => {
                warn!(conversation = %conversation_id, error = %e, "Knowledge retrieval failed");
                Err(RETRIEVAL_FAILURE_REPLY.to_string())
            }
            Err(_) => {
                warn!(conversation = %conversation_id, "Knowledge retrieval timed out");
                Err(RETRIEVAL_FAILURE_REPLY.to_string())
            }
        }
    }

    /// Append the pair to the context store and the transcript.
    ///
    /// A transcript failure is logged and swallowed; only store failures
    /// fail the turn.
    async fn commit_turn(
        &self,
        conversation_id: &ConversationId,
        query: &str,
        reply: &str,
    ) -> Result<()> {
        self.store.push_turn(conversation_id, query, reply).await?;

        if let Some(transcript) = &self.transcript {
            use lorebook_core::message::Message;
            for message in [Message::user(query), Message::assistant(reply)] {
                if let Err(e) = transcript.append(conversation_id, &message).await {
                    warn!(conversation = %conversation_id, error = %e, "Transcript append failed");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptTemplate;
    use crate::test_helpers::*;
    use lorebook_core::error::ProviderError;
    use lorebook_core::message::Role;
    use lorebook_core::provider::StreamChunk;

    struct Fixture {
        provider: Arc<MockProvider>,
        transcript: Arc<MemoryTranscript>,
        orchestrator: Arc<ChatOrchestrator>,
    }

    fn fixture(provider: MockProvider, index: MockIndex) -> Fixture {
        let provider = Arc::new(provider);
        let retriever = Arc::new(KnowledgeRetriever::new(
            provider.clone(),
            Arc::new(index),
            "test_collection",
            "text-embedding-3-large",
            5,
        ));
        let store = Arc::new(ContextStore::new("You answer from knowledge.", 4096));
        let assembler = PromptAssembler::new(
            PromptTemplate::parse("Context:\n{context}\n\nQuestion: {query}").unwrap(),
        );
        let transcript = Arc::new(MemoryTranscript::default());

        let orchestrator = Arc::new(
            ChatOrchestrator::new(
                provider.clone(),
                retriever,
                store,
                assembler,
                "mock-model",
                0.3,
            )
            .with_transcript(transcript.clone()),
        );

        Fixture {
            provider,
            transcript,
            orchestrator,
        }
    }

    fn conv(s: &str) -> ConversationId {
        ConversationId::from(s)
    }

    #[tokio::test]
    async fn success_path_replies_and_commits() {
        let f = fixture(
            MockProvider::replying("The editor was the standards team."),
            MockIndex::with_answers(&["Edited by the standards team."]),
        );

        let reply = f.orchestrator.handle(&conv("c1"), "Who edited module five?").await.unwrap();
        assert_eq!(reply, "The editor was the standards team.");

        let history = f.orchestrator.store().history(&conv("c1")).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].content, "Who edited module five?");
        assert_eq!(history[2].content, "The editor was the standards team.");

        // transcript holds the same raw pair
        let logged = f.transcript.messages(&conv("c1")).await.unwrap();
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[0].role, Role::User);
    }

    #[tokio::test]
    async fn composite_only_in_payload_not_history() {
        let f = fixture(
            MockProvider::replying("ok"),
            MockIndex::with_answers(&["Some fact."]),
        );

        f.orchestrator.handle(&conv("c1"), "raw question").await.unwrap();

        // the request carried the knowledge-augmented composite
        let request = f.provider.last_request().unwrap();
        let sent = &request.messages.last().unwrap().content;
        assert!(sent.contains("Some fact."));
        assert!(sent.contains("raw question"));

        // the history stored only the raw query
        let history = f.orchestrator.store().history(&conv("c1")).await.unwrap();
        assert_eq!(history[1].content, "raw question");
    }

    #[tokio::test]
    async fn empty_retrieval_uses_fallback_phrase() {
        let f = fixture(MockProvider::replying("ok"), MockIndex::empty());

        f.orchestrator.handle(&conv("c1"), "unknown topic").await.unwrap();

        let request = f.provider.last_request().unwrap();
        let sent = &request.messages.last().unwrap().content;
        assert!(sent.contains(NO_KNOWLEDGE_FALLBACK));

        // raw query stored, not the composite
        let history = f.orchestrator.store().history(&conv("c1")).await.unwrap();
        assert_eq!(history[1].content, "unknown topic");
    }

    #[tokio::test]
    async fn short_circuit_skips_model_call() {
        let provider = MockProvider::replying("should never be sent");
        let f = fixture(provider, MockIndex::empty());
        let orchestrator = Arc::new(
            ChatOrchestrator::new(
                f.provider.clone(),
                Arc::new(KnowledgeRetriever::new(
                    f.provider.clone(),
                    Arc::new(MockIndex::empty()),
                    "test_collection",
                    "text-embedding-3-large",
                    5,
                )),
                f.orchestrator.store().clone(),
                PromptAssembler::new(PromptTemplate::builtin()),
                "mock-model",
                0.3,
            )
            .with_reply_without_knowledge(false),
        );

        let reply = orchestrator.handle(&conv("c1"), "unknown topic").await.unwrap();
        assert_eq!(reply, NO_KNOWLEDGE_FALLBACK);
        assert_eq!(f.provider.request_count(), 0);

        // policy: the exchange is still recorded
        let history = orchestrator.store().history(&conv("c1")).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].content, NO_KNOWLEDGE_FALLBACK);
    }

    #[tokio::test]
    async fn unreachable_index_fails_open() {
        let f = fixture(MockProvider::replying("ok"), MockIndex::unreachable());

        let reply = f.orchestrator.handle(&conv("c1"), "question").await.unwrap();
        assert_eq!(reply, "ok");

        // the model was still called, with the fallback phrase as context
        let request = f.provider.last_request().unwrap();
        assert!(request.messages.last().unwrap().content.contains(NO_KNOWLEDGE_FALLBACK));
    }

    #[tokio::test]
    async fn embedding_failure_degrades_without_commit() {
        let f = fixture(MockProvider::failing_embedding(), MockIndex::with_answers(&["x"]));

        let reply = f.orchestrator.handle(&conv("c1"), "question").await.unwrap();
        assert_eq!(reply, RETRIEVAL_FAILURE_REPLY);
        assert!(reply.contains("knowledge retrieval"));

        // no partial append
        let history = f.orchestrator.store().history(&conv("c1")).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(f.transcript.messages(&conv("c1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn completion_failure_degrades_without_commit() {
        let f = fixture(
            MockProvider::failing_completion(),
            MockIndex::with_answers(&["a fact"]),
        );

        let reply = f.orchestrator.handle(&conv("c1"), "question").await.unwrap();
        assert_eq!(reply, COMPLETION_FAILURE_REPLY);
        assert!(reply.contains("completion service"));

        let history = f.orchestrator.store().history(&conv("c1")).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retrieval_timeout_degrades() {
        let provider = MockProvider {
            hang_embed: true,
            ..MockProvider::replying("late")
        };
        let f = fixture(provider, MockIndex::with_answers(&["x"]));

        let reply = f.orchestrator.handle(&conv("c1"), "question").await.unwrap();
        assert_eq!(reply, RETRIEVAL_FAILURE_REPLY);

        let history = f.orchestrator.store().history(&conv("c1")).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn failed_turn_leaves_next_turn_clean() {
        let f = fixture(
            MockProvider::failing_completion(),
            MockIndex::with_answers(&["a fact"]),
        );

        let _ = f.orchestrator.handle(&conv("c1"), "first").await.unwrap();
        let history = f.orchestrator.store().history(&conv("c1")).await.unwrap();
        assert_eq!(history.len(), 1);
        // the payload for a retry sees no trace of the failed attempt
        let request = f.provider.last_request().unwrap();
        assert_eq!(request.messages.len(), 2); // system + composite only
    }

    // --- streaming ---

    fn delta(content: &str) -> std::result::Result<StreamChunk, ProviderError> {
        Ok(StreamChunk {
            content: Some(content.into()),
            done: false,
            usage: None,
        })
    }

    fn done_chunk() -> std::result::Result<StreamChunk, ProviderError> {
        Ok(StreamChunk {
            content: None,
            done: true,
            usage: None,
        })
    }

    #[tokio::test]
    async fn stream_accumulates_and_commits() {
        let provider = MockProvider::replying("")
            .with_stream(vec![delta("The "), delta("answer."), done_chunk()]);
        let f = fixture(provider, MockIndex::with_answers(&["k"]));

        let mut rx = f.orchestrator.handle_stream(&conv("c1"), "question").await.unwrap();

        let mut deltas = Vec::new();
        let mut final_response = None;
        while let Some(event) = rx.recv().await {
            match event {
                ChatStreamEvent::Delta { content } => deltas.push(content),
                ChatStreamEvent::Done { response, .. } => final_response = Some(response),
                ChatStreamEvent::Error { message } => panic!("unexpected error: {message}"),
            }
        }

        assert_eq!(deltas.join(""), "The answer.");
        assert_eq!(final_response.as_deref(), Some("The answer."));

        let history = f.orchestrator.store().history(&conv("c1")).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].content, "The answer.");
    }

    #[tokio::test]
    async fn stream_error_leaves_store_untouched() {
        let provider = MockProvider::replying("").with_stream(vec![
            delta("partial "),
            Err(ProviderError::StreamInterrupted("mock cut".into())),
        ]);
        let f = fixture(provider, MockIndex::with_answers(&["k"]));

        let mut rx = f.orchestrator.handle_stream(&conv("c1"), "question").await.unwrap();

        let mut saw_error = false;
        while let Some(event) = rx.recv().await {
            if let ChatStreamEvent::Error { message } = event {
                assert_eq!(message, COMPLETION_FAILURE_REPLY);
                saw_error = true;
            }
        }
        assert!(saw_error);

        let history = f.orchestrator.store().history(&conv("c1")).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn stream_retrieval_failure_emits_error() {
        let f = fixture(MockProvider::failing_embedding(), MockIndex::with_answers(&["k"]));

        let mut rx = f.orchestrator.handle_stream(&conv("c1"), "question").await.unwrap();
        match rx.recv().await {
            Some(ChatStreamEvent::Error { message }) => {
                assert_eq!(message, RETRIEVAL_FAILURE_REPLY);
            }
            other => panic!("expected error event, got {other:?}"),
        }
        assert!(rx.recv().await.is_none());
    }
}
