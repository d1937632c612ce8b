//! The knowledge retriever — embed the query, search the index, extract
//! answer fragments.
//!
//! Failure policy:
//! - a search-side failure (backend down, bad collection) fails OPEN: the
//!   retriever logs and returns an empty result, and the caller treats that
//!   as "no knowledge found";
//! - an embedding failure fails CLOSED: with no query vector there is
//!   nothing to search with, so the error surfaces to the orchestrator.

use std::sync::Arc;

use lorebook_core::error::RetrievalError;
use lorebook_core::provider::{CompletionProvider, EmbeddingRequest};
use lorebook_core::retrieval::{KnowledgeFragment, VectorHit, VectorIndex};
use tracing::{debug, info, warn};

/// Retrieves ranked knowledge fragments for a query string.
pub struct KnowledgeRetriever {
    provider: Arc<dyn CompletionProvider>,
    index: Arc<dyn VectorIndex>,
    collection: String,
    embedding_model: String,
    top_k: usize,
}

impl KnowledgeRetriever {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
        embedding_model: impl Into<String>,
        top_k: usize,
    ) -> Self {
        Self {
            provider,
            index,
            collection: collection.into(),
            embedding_model: embedding_model.into(),
            top_k,
        }
    }

    /// Retrieve fragments for the query. `Ok(vec![])` means "no knowledge
    /// found" — not an error.
    pub async fn retrieve(
        &self,
        query: &str,
    ) -> std::result::Result<Vec<KnowledgeFragment>, RetrievalError> {
        let embedding = self
            .provider
            .embed(EmbeddingRequest {
                model: self.embedding_model.clone(),
                inputs: vec![query.to_string()],
            })
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let vector = embedding
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::Embedding("embedding response was empty".into()))?;

        debug!(dimension = vector.len(), "Query embedded");

        let hits = match self.index.search(&self.collection, &vector, self.top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                // Fail open: an unreachable index means "no knowledge", not
                // a failed conversation.
                warn!(backend = self.index.name(), error = %e, "Vector search failed, returning no knowledge");
                return Ok(Vec::new());
            }
        };

        let fragments: Vec<KnowledgeFragment> =
            hits.iter().filter_map(fragment_from_hit).collect();

        info!(
            collection = %self.collection,
            hits = hits.len(),
            fragments = fragments.len(),
            "Knowledge retrieved"
        );

        Ok(fragments)
    }
}

/// Extract a knowledge fragment from a search hit.
///
/// The hit's metadata must be a JSON object carrying an `answer` string;
/// hits that don't match are skipped with a warning.
pub fn fragment_from_hit(hit: &VectorHit) -> Option<KnowledgeFragment> {
    let metadata = match hit.metadata.as_object() {
        Some(obj) => obj.clone(),
        None => {
            warn!(score = hit.score, "Skipping hit: metadata is not an object");
            return None;
        }
    };

    let answer = match metadata.get("answer").and_then(|v| v.as_str()) {
        Some(s) => s.to_string(),
        None => {
            warn!(score = hit.score, "Skipping hit: metadata has no 'answer' field");
            return None;
        }
    };

    Some(KnowledgeFragment {
        text: answer,
        score: hit.score,
        metadata,
    })
}
