//! The Lorebook chat core.
//!
//! One orchestration cycle:
//!
//! 1. **Fetch context** — the conversation's trimmed, role-tagged history
//! 2. **Retrieve knowledge** — top-K fragments for the raw query
//! 3. **Assemble the prompt** — history + knowledge-augmented final message
//! 4. **Complete** — call the model (sync or streaming)
//! 5. **Commit** — append the user/assistant pair, trim, log the transcript
//!
//! The history stores the *raw* query and reply; the knowledge-augmented
//! composite exists only inside the per-request prompt payload.

pub mod context;
pub mod orchestrator;
pub mod prompt;
pub mod stream_event;
pub mod transcript;

pub use context::ContextStore;
pub use orchestrator::{
    ChatOrchestrator, COMPLETION_FAILURE_REPLY, RETRIEVAL_FAILURE_REPLY,
};
pub use prompt::{NO_KNOWLEDGE_FALLBACK, PromptAssembler, PromptPayload, PromptTemplate};
pub use stream_event::ChatStreamEvent;
pub use transcript::TranscriptLog;

#[cfg(feature = "sqlite")]
pub use transcript::SqliteTranscript;

#[cfg(test)]
pub(crate) mod test_helpers;
