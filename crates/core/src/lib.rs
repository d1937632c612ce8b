//! # Lorebook Core
//!
//! Domain types, traits, and error definitions for the Lorebook RAG chat
//! service. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is defined as a trait here: the completion /
//! embedding endpoint (`CompletionProvider`) and the nearest-neighbor search
//! backend (`VectorIndex`). Implementations live in their respective crates.
//! This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod retrieval;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{ConversationId, Message, Role};
pub use provider::{
    CompletionProvider, CompletionRequest, CompletionResponse, EmbeddingRequest,
    EmbeddingResponse, StreamChunk, Usage,
};
pub use retrieval::{KnowledgeFragment, VectorHit, VectorIndex};
