//! Error types for the Lorebook domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Lorebook operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Completion / embedding endpoint errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Knowledge retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Context store errors ---
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    // --- Prompt template errors ---
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    // --- Transcript log errors ---
    #[error("Transcript error: {0}")]
    Transcript(#[from] TranscriptError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    /// The query could not be embedded. There is no vector to search with,
    /// so this is not recoverable inside the retriever.
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// The vector search backend errored. Recovered inside the retriever by
    /// substituting an empty result — callers normally never see this.
    #[error("Vector search failed: {0}")]
    Search(String),

    #[error("Retrieval timed out after {0}s")]
    Timeout(u64),
}

#[derive(Debug, Clone, Error)]
pub enum ContextError {
    /// The store's invariants were violated (e.g. missing system message
    /// after initialization). Programming-error-level; not user-recoverable.
    #[error("Context store corrupted: {0}")]
    Corrupted(String),
}

#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    #[error("Failed to read prompt template at {path}: {reason}")]
    ReadError { path: String, reason: String },

    #[error("Prompt template is missing the {{{name}}} placeholder")]
    MissingPlaceholder { name: &'static str },
}

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}
