//! Knowledge retrieval for Lorebook.
//!
//! Given a user query, obtains a vector embedding from the configured
//! provider, runs a top-K nearest-neighbor search against the vector
//! backend, and extracts answer fragments from the hits' metadata.

pub mod http_index;
pub mod retriever;

pub use http_index::HttpVectorIndex;
pub use retriever::{KnowledgeRetriever, fragment_from_hit};

use std::sync::Arc;

use lorebook_config::AppConfig;
use lorebook_core::CompletionProvider;

/// Build a retriever wired to the configured vector backend.
pub fn build_from_config(
    config: &AppConfig,
    provider: Arc<dyn CompletionProvider>,
) -> KnowledgeRetriever {
    let index = Arc::new(HttpVectorIndex::new(
        &config.retrieval.index_url,
        config.retrieval.index_token.clone(),
    ));

    KnowledgeRetriever::new(
        provider,
        index,
        &config.retrieval.collection,
        &config.retrieval.embedding_model,
        config.retrieval.top_k,
    )
}
